//! Entity transpiler
//!
//! Walks one cube body at a time and builds canonical entities, consulting the
//! coercer for every field and the shape normalizer for every collection.
//! Diagnostics are collected rather than returned early so that one pass over
//! a document reports every problem in it.

use tracing::debug;

use crate::coerce::{FieldContext, FieldValue};
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticPath, Diagnostics};
use crate::model::{
    CubeEntity, DimensionEntity, DimensionType, EntityKind, JoinEntity, MeasureEntity,
    MeasureFilter, MeasureType, MemberRef, MetaBag, PreAggregationEntity, PreAggregationType,
    Relationship, SegmentEntity, SqlExpr, SqlSource, TimeDimensionRef,
};
use crate::node::{GenericNode, Location};
use crate::preagg;
use crate::shape::{self, Fields};

const CUBE_KEYS: &[&str] = &[
    "name", "sql", "sqlTable", "title", "description", "sqlAlias", "dataSource", "public",
    "shown", "refreshKey", "meta", "dimensions", "measures", "segments", "joins",
    "preAggregations",
];
const DIMENSION_KEYS: &[&str] = &[
    "name", "sql", "type", "title", "description", "format", "primaryKey", "shown", "meta",
];
const MEASURE_KEYS: &[&str] = &[
    "name", "sql", "type", "title", "description", "format", "shown", "drillMembers", "filters",
    "meta",
];
const SEGMENT_KEYS: &[&str] = &["name", "sql", "title", "description", "shown", "meta"];
const JOIN_KEYS: &[&str] = &["name", "sql", "relationship"];
const PRE_AGGREGATION_KEYS: &[&str] = &[
    "name", "type", "measures", "dimensions", "segments", "timeDimensions", "timeDimension",
    "granularity", "partitionGranularity", "buildRangeStart", "buildRangeEnd", "refreshKey",
    "scheduledRefresh",
];

/// A cube body whose name has been established
#[derive(Debug)]
pub struct CubeHeader<'a> {
    pub name: String,
    pub fields: Fields<'a>,
    pub location: Location,
}

/// Builds canonical entities from cube bodies
pub struct Transpiler<'c> {
    config: &'c CompilerConfig,
}

impl<'c> Transpiler<'c> {
    pub fn new(config: &'c CompilerConfig) -> Self {
        Self { config }
    }

    /// Check the body is a mapping and extract its name
    ///
    /// Failing here abandons the cube: without a name no field can be
    /// attributed to it.
    pub fn header<'a>(&self, body: &'a GenericNode) -> Result<CubeHeader<'a>, Diagnostic> {
        let path = DiagnosticPath::default();
        let fields = Fields::new(body, "cube", &path)?;
        let label = body.location.to_string();
        let ctx = FieldContext::new(&label, path, &self.config.coercion);
        let name = ctx.name(fields.get("name"), EntityKind::Cube, body)?;
        Ok(CubeHeader {
            name,
            fields,
            location: body.location.clone(),
        })
    }

    /// Build the cube entity, collecting every field and member diagnostic
    ///
    /// Returns `None` when anything was reported for this cube.
    pub fn cube(&self, header: &CubeHeader<'_>, diags: &mut Diagnostics) -> Option<CubeEntity> {
        let before = diags.len();
        let fields = &header.fields;
        fields.trace_unknown(CUBE_KEYS);

        let ctx = FieldContext::new(
            &header.name,
            DiagnosticPath::cube(&header.name),
            &self.config.coercion,
        );

        let sql = diags.take(ctx.sql(fields.get("sql"))).flatten();
        let sql_table = diags.take(ctx.sql(fields.get("sqlTable"))).flatten();
        let source = match (sql, sql_table) {
            (Some(sql), None) => Some(SqlSource::Sql(sql)),
            (None, Some(table)) => Some(SqlSource::SqlTable(table)),
            (Some(_), Some(_)) => {
                let sql_table = fields.authored("sqlTable");
                diags.push(Diagnostic::semantic(
                    &header.name,
                    format!("sql and {} are mutually exclusive", sql_table),
                    ctx.path.field(sql_table),
                    header.location.clone(),
                ));
                None
            }
            (None, None) => {
                if !fields.get("sql").is_absent() || !fields.get("sqlTable").is_absent() {
                    None
                } else {
                    diags.push(ctx.required(
                        "sql",
                        &format!("cube {}", header.name),
                        &header.location,
                    ));
                    None
                }
            }
        };

        let title = diags.take(ctx.string(fields.get("title"))).flatten();
        let description = diags.take(ctx.string(fields.get("description"))).flatten();
        let sql_alias = diags.take(ctx.string(fields.get("sqlAlias"))).flatten();
        let data_source = diags.take(ctx.string(fields.get("dataSource"))).flatten();
        let public = diags.take(ctx.boolean(fields.get("public"))).flatten();
        let shown = diags.take(ctx.boolean(fields.get("shown"))).flatten();
        let refresh_key = diags
            .take(preagg::refresh_key(&ctx, fields.get("refreshKey")))
            .flatten();
        let meta = meta_bag(fields.get("meta"));

        let dimensions = self.members(fields, "dimensions", &ctx, diags, Self::dimension);
        let measures = self.members(fields, "measures", &ctx, diags, Self::measure);
        let segments = self.members(fields, "segments", &ctx, diags, Self::segment);
        let joins = self.members(fields, "joins", &ctx, diags, Self::join);
        let pre_aggregations =
            self.members(fields, "preAggregations", &ctx, diags, Self::pre_aggregation);

        let reported = diags.len() - before;
        debug!(cube = %header.name, diagnostics = reported, "transpiled cube");
        if reported > 0 {
            return None;
        }

        Some(CubeEntity {
            name: header.name.clone(),
            sql: source?,
            title,
            description,
            sql_alias,
            data_source,
            public: public.or(shown).unwrap_or(true),
            refresh_key,
            dimensions,
            measures,
            segments,
            joins,
            pre_aggregations,
            meta,
            location: header.location.clone(),
        })
    }

    /// Normalize a collection, then transpile each member independently
    fn members<'a, T>(
        &self,
        fields: &Fields<'a>,
        key: &str,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
        build: impl Fn(&Self, &'a GenericNode, &FieldContext<'_>, &mut Diagnostics) -> Option<T>,
    ) -> Vec<T> {
        let Some(nodes) = diags.take(shape::collection(fields, key, &ctx.path)) else {
            return Vec::new();
        };
        nodes
            .into_iter()
            .filter_map(|node| build(self, node, ctx, diags))
            .collect()
    }

    /// Shared prologue of every member: mapping view, name, narrowed context
    fn member_header<'a, 'x>(
        &self,
        node: &'a GenericNode,
        kind: EntityKind,
        ctx: &FieldContext<'x>,
        diags: &mut Diagnostics,
    ) -> Option<(Fields<'a>, String, FieldContext<'x>)> {
        let path = ctx.path.entity(kind, None);
        let fields = diags.take(Fields::new(node, kind.as_str(), &path))?;
        let name = diags.take(ctx.with_path(path).name(fields.get("name"), kind, node))?;
        let ctx = ctx.with_path(ctx.path.entity(kind, Some(&name)));
        Some((fields, name, ctx))
    }

    fn dimension(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Option<DimensionEntity> {
        let (fields, name, ctx) = self.member_header(node, EntityKind::Dimension, ctx, diags)?;
        fields.trace_unknown(DIMENSION_KEYS);
        let before = diags.len();
        let entity = format!("dimension {}", name);

        let sql = required(diags.take(ctx.sql(fields.get("sql"))), &ctx, "sql", &entity, node, diags);
        let dimension_type = required(
            diags.take(ctx.one_of(fields.get("type"), DimensionType::parse, DimensionType::VALUES)),
            &ctx,
            "type",
            &entity,
            node,
            diags,
        );
        let title = diags.take(ctx.string(fields.get("title"))).flatten();
        let description = diags.take(ctx.string(fields.get("description"))).flatten();
        let format = diags.take(ctx.string(fields.get("format"))).flatten();
        let primary_key = diags.take(ctx.boolean(fields.get("primaryKey"))).flatten();
        let shown = diags.take(ctx.boolean(fields.get("shown"))).flatten();

        if diags.len() > before {
            return None;
        }
        Some(DimensionEntity {
            name,
            sql: sql?,
            dimension_type: dimension_type?,
            title,
            description,
            format,
            primary_key: primary_key.unwrap_or(false),
            shown: shown.unwrap_or(true),
            meta: meta_bag(fields.get("meta")),
            location: node.location.clone(),
        })
    }

    fn measure(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Option<MeasureEntity> {
        let (fields, name, ctx) = self.member_header(node, EntityKind::Measure, ctx, diags)?;
        fields.trace_unknown(MEASURE_KEYS);
        let before = diags.len();
        let entity = format!("measure {}", name);

        let measure_type = required(
            diags.take(ctx.one_of(fields.get("type"), MeasureType::parse, MeasureType::VALUES)),
            &ctx,
            "type",
            &entity,
            node,
            diags,
        );
        let sql = match measure_type {
            Some(MeasureType::Count) | None => diags.take(ctx.sql(fields.get("sql"))).flatten(),
            Some(_) => required(diags.take(ctx.sql(fields.get("sql"))), &ctx, "sql", &entity, node, diags),
        };
        let title = diags.take(ctx.string(fields.get("title"))).flatten();
        let description = diags.take(ctx.string(fields.get("description"))).flatten();
        let format = diags.take(ctx.string(fields.get("format"))).flatten();
        let shown = diags.take(ctx.boolean(fields.get("shown"))).flatten();
        let drill_members = self.references(&fields, "drillMembers", &ctx, diags);

        let filters = diags
            .take(shape::collection(&fields, "filters", &ctx.path))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|filter| {
                let filter_fields = diags.take(Fields::new(filter, "filter", &ctx.path))?;
                let sql = required(
                    diags.take(ctx.sql(filter_fields.get("sql"))),
                    &ctx,
                    "sql",
                    &format!("filter of {}", entity),
                    filter,
                    diags,
                )?;
                Some(MeasureFilter { sql })
            })
            .collect();

        if diags.len() > before {
            return None;
        }
        Some(MeasureEntity {
            name,
            sql,
            measure_type: measure_type?,
            title,
            description,
            format,
            shown: shown.unwrap_or(true),
            drill_members,
            filters,
            meta: meta_bag(fields.get("meta")),
            location: node.location.clone(),
        })
    }

    fn segment(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Option<SegmentEntity> {
        let (fields, name, ctx) = self.member_header(node, EntityKind::Segment, ctx, diags)?;
        fields.trace_unknown(SEGMENT_KEYS);
        let before = diags.len();
        let entity = format!("segment {}", name);

        let sql = required(diags.take(ctx.sql(fields.get("sql"))), &ctx, "sql", &entity, node, diags);
        let title = diags.take(ctx.string(fields.get("title"))).flatten();
        let description = diags.take(ctx.string(fields.get("description"))).flatten();
        let shown = diags.take(ctx.boolean(fields.get("shown"))).flatten();

        if diags.len() > before {
            return None;
        }
        Some(SegmentEntity {
            name,
            sql: sql?,
            title,
            description,
            shown: shown.unwrap_or(true),
            meta: meta_bag(fields.get("meta")),
            location: node.location.clone(),
        })
    }

    fn join(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Option<JoinEntity> {
        let (fields, name, ctx) = self.member_header(node, EntityKind::Join, ctx, diags)?;
        fields.trace_unknown(JOIN_KEYS);
        let before = diags.len();
        let entity = format!("join {}", name);

        let sql = required(diags.take(ctx.sql(fields.get("sql"))), &ctx, "sql", &entity, node, diags);
        let relationship = required(
            diags.take(ctx.one_of(fields.get("relationship"), Relationship::parse, Relationship::VALUES)),
            &ctx,
            "relationship",
            &entity,
            node,
            diags,
        );

        if diags.len() > before {
            return None;
        }
        Some(JoinEntity {
            name,
            sql: sql?,
            relationship: relationship?,
            location: node.location.clone(),
        })
    }

    fn pre_aggregation(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Option<PreAggregationEntity> {
        let (fields, name, ctx) = self.member_header(node, EntityKind::PreAggregation, ctx, diags)?;
        fields.trace_unknown(PRE_AGGREGATION_KEYS);
        let before = diags.len();
        let entity = format!("pre_aggregation {}", name);

        let pre_aggregation_type = diags
            .take(ctx.one_of(fields.get("type"), PreAggregationType::parse, PreAggregationType::VALUES))
            .flatten()
            .unwrap_or(PreAggregationType::Rollup);
        let measures = self.references(&fields, "measures", &ctx, diags);
        let dimensions = self.references(&fields, "dimensions", &ctx, diags);
        let segments = self.references(&fields, "segments", &ctx, diags);

        let mut time_dimensions = Vec::new();
        let legacy = diags.take(ctx.string(fields.get("timeDimension"))).flatten();
        let legacy_granularity = diags.take(ctx.string(fields.get("granularity"))).flatten();
        match (legacy, legacy_granularity) {
            (Some(dimension), Some(granularity)) => time_dimensions.push(TimeDimensionRef {
                dimension: MemberRef::parse(&dimension, ctx.cube_label),
                granularity,
            }),
            (Some(_), None) => diags.push(ctx.required("granularity", &entity, &node.location)),
            (None, Some(_)) => diags.push(ctx.required("time_dimension", &entity, &node.location)),
            (None, None) => {}
        }
        if let Some(items) = diags.take(shape::collection(&fields, "timeDimensions", &ctx.path)) {
            for item in items {
                if let Some(reference) = self.time_dimension(item, &ctx, &entity, diags) {
                    time_dimensions.push(reference);
                }
            }
        }

        let partition_granularity = diags.take(ctx.string(fields.get("partitionGranularity"))).flatten();
        let build_range_start = diags.take(sql_expr(&ctx, fields.get("buildRangeStart"))).flatten();
        let build_range_end = diags.take(sql_expr(&ctx, fields.get("buildRangeEnd"))).flatten();
        let refresh_key = diags.take(preagg::refresh_key(&ctx, fields.get("refreshKey"))).flatten();
        let scheduled_refresh = diags.take(ctx.boolean(fields.get("scheduledRefresh"))).flatten();

        if diags.len() > before {
            return None;
        }
        Some(PreAggregationEntity {
            name,
            pre_aggregation_type,
            measures,
            dimensions,
            segments,
            time_dimensions,
            partition_granularity,
            build_range_start,
            build_range_end,
            refresh_key,
            scheduled_refresh,
            location: node.location.clone(),
        })
    }

    fn time_dimension(
        &self,
        node: &GenericNode,
        ctx: &FieldContext<'_>,
        entity: &str,
        diags: &mut Diagnostics,
    ) -> Option<TimeDimensionRef> {
        let fields = diags.take(Fields::new(node, "time dimension", &ctx.path))?;
        let dimension = required(
            diags.take(ctx.string(fields.get("dimension"))),
            ctx,
            "dimension",
            &format!("time dimension of {}", entity),
            node,
            diags,
        );
        let granularity = required(
            diags.take(ctx.string(fields.get("granularity"))),
            ctx,
            "granularity",
            &format!("time dimension of {}", entity),
            node,
            diags,
        );
        Some(TimeDimensionRef {
            dimension: MemberRef::parse(&dimension?, ctx.cube_label),
            granularity: granularity?,
        })
    }

    /// A sequence of member names
    fn references(
        &self,
        fields: &Fields<'_>,
        key: &str,
        ctx: &FieldContext<'_>,
        diags: &mut Diagnostics,
    ) -> Vec<MemberRef> {
        let Some(items) = diags.take(shape::sequence(fields, key, &ctx.path)) else {
            return Vec::new();
        };
        let authored = fields.authored(key);
        items
            .into_iter()
            .filter_map(|item| match item.as_str() {
                Some(raw) if !raw.is_empty() => Some(MemberRef::parse(raw, ctx.cube_label)),
                _ => {
                    diags.push(ctx.mismatch(authored, item, "member name"));
                    None
                }
            })
            .collect()
    }
}

/// Unwrap a coerced required field, reporting it when absent
///
/// `value` is `None` when coercion already failed (and was reported).
fn required<T>(
    value: Option<Option<T>>,
    ctx: &FieldContext<'_>,
    key: &str,
    entity: &str,
    owner: &GenericNode,
    diags: &mut Diagnostics,
) -> Option<T> {
    match value {
        Some(Some(value)) => Some(value),
        Some(None) => {
            diags.push(ctx.required(key, entity, &owner.location));
            None
        }
        None => None,
    }
}

/// `{ sql: ... }` descriptors such as `build_range_start`
fn sql_expr(ctx: &FieldContext<'_>, value: FieldValue<'_>) -> Result<Option<SqlExpr>, Diagnostic> {
    let (key, node) = match value {
        FieldValue::Absent => return Ok(None),
        FieldValue::Null { key, node } => return Err(ctx.mismatch(key, node, "mapping with sql")),
        FieldValue::Present { key, node } => (key, node),
    };
    if node.as_mapping().is_none() {
        return Err(ctx.mismatch(key, node, "mapping with sql"));
    }
    let fields = Fields::new(node, key, &ctx.path)?;
    match ctx.sql(fields.get("sql"))? {
        Some(sql) => Ok(Some(SqlExpr { sql })),
        None => Err(ctx.required("sql", key, &node.location)),
    }
}

fn meta_bag(value: FieldValue<'_>) -> Option<MetaBag> {
    value.node().map(|node| MetaBag::new(node.clone()))
}
