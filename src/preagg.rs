//! Pre-aggregation validation
//!
//! Semantic rules for materialization definitions that go beyond field
//! types: member references must resolve, time dimensions need a granularity
//! from the configured vocabulary, and a refresh key has exactly one policy.
//!
//! References qualified with another cube's name cannot be checked while a
//! single cube is being looked at; they are returned as [`DeferredReference`]s
//! and resolved once the whole schema is known.

use std::collections::HashSet;
use std::sync::OnceLock;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;
use tracing::debug;

use crate::coerce::{FieldContext, FieldValue};
use crate::config::GranularityConfig;
use crate::diagnostics::{Diagnostic, DiagnosticPath, Diagnostics};
use crate::model::{
    CubeEntity, DimensionType, EntityKind, Interval, MemberRef, PreAggregationEntity,
    RefreshKey, RefreshPolicy, Schedule,
};
use crate::node::Location;
use crate::shape::Fields;

/// Which collection of the target cube a reference must resolve in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTarget {
    Measure,
    Dimension,
    TimeDimension,
    Segment,
}

impl ReferenceTarget {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Dimension => "dimension",
            Self::TimeDimension => "time dimension",
            Self::Segment => "segment",
        }
    }

    /// Names in `cube` this reference could resolve to
    pub fn candidates<'a>(&self, cube: &'a CubeEntity) -> Vec<&'a str> {
        match self {
            Self::Measure => cube.measures.iter().map(|m| m.name.as_str()).collect(),
            Self::Dimension => cube.dimensions.iter().map(|d| d.name.as_str()).collect(),
            Self::TimeDimension => cube
                .dimensions
                .iter()
                .filter(|d| d.dimension_type == DimensionType::Time)
                .map(|d| d.name.as_str())
                .collect(),
            Self::Segment => cube.segments.iter().map(|s| s.name.as_str()).collect(),
        }
    }

    /// Why `member` does not resolve in `cube`, if it doesn't
    pub fn check(&self, cube: &CubeEntity, member: &str) -> Option<String> {
        match self {
            Self::TimeDimension => match cube.dimension(member) {
                None => Some(format!("references unknown dimension '{}'", cube.qualify(member))),
                Some(d) if d.dimension_type != DimensionType::Time => Some(format!(
                    "uses '{}' as a time dimension but its type is {}",
                    cube.qualify(member),
                    d.dimension_type
                )),
                Some(_) => None,
            },
            _ if self.candidates(cube).contains(&member) => None,
            _ => Some(format!(
                "references unknown {} '{}'",
                self.describe(),
                cube.qualify(member)
            )),
        }
    }
}

/// A cross-cube reference awaiting schema-level resolution
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredReference {
    pub cube: String,
    pub pre_aggregation: String,
    pub field: &'static str,
    pub reference: MemberRef,
    pub target: ReferenceTarget,
    pub location: Location,
}

impl DeferredReference {
    pub fn path(&self) -> DiagnosticPath {
        DiagnosticPath::cube(&self.cube)
            .entity(EntityKind::PreAggregation, Some(&self.pre_aggregation))
            .field(self.field)
    }
}

/// Outcome of validating one pre-aggregation
#[derive(Debug, Default)]
pub struct Validation {
    pub diagnostics: Diagnostics,
    pub deferred: Vec<DeferredReference>,
}

/// Applies pre-aggregation rules against the owning cube
pub struct PreAggregationValidator<'c> {
    granularity: &'c GranularityConfig,
}

impl<'c> PreAggregationValidator<'c> {
    pub fn new(granularity: &'c GranularityConfig) -> Self {
        Self { granularity }
    }

    pub fn validate(&self, pre_agg: &PreAggregationEntity, cube: &CubeEntity) -> Validation {
        let mut validation = Validation::default();
        let path = DiagnosticPath::cube(&cube.name).entity(EntityKind::PreAggregation, Some(&pre_agg.name));

        let references = pre_agg
            .measures
            .iter()
            .map(|r| ("measures", r, ReferenceTarget::Measure))
            .chain(pre_agg.dimensions.iter().map(|r| ("dimensions", r, ReferenceTarget::Dimension)))
            .chain(pre_agg.segments.iter().map(|r| ("segments", r, ReferenceTarget::Segment)))
            .chain(
                pre_agg
                    .time_dimensions
                    .iter()
                    .map(|td| ("time_dimensions", &td.dimension, ReferenceTarget::TimeDimension)),
            );

        for (field, reference, target) in references {
            if !reference.is_local() {
                debug!(cube = %cube.name, pre_aggregation = %pre_agg.name, reference = %reference, "deferring reference");
                validation.deferred.push(DeferredReference {
                    cube: cube.name.clone(),
                    pre_aggregation: pre_agg.name.clone(),
                    field,
                    reference: reference.clone(),
                    target,
                    location: pre_agg.location.clone(),
                });
                continue;
            }
            if let Some(problem) = target.check(cube, &reference.member) {
                let message = with_suggestion(
                    format!("pre-aggregation {} {}", pre_agg.name, problem),
                    &reference.member,
                    target.candidates(cube),
                );
                validation.diagnostics.push(Diagnostic::semantic(
                    &cube.name,
                    message,
                    path.field(field),
                    pre_agg.location.clone(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for td in &pre_agg.time_dimensions {
            if !self.granularity.is_allowed(&td.granularity) {
                validation.diagnostics.push(Diagnostic::semantic(
                    &cube.name,
                    format!(
                        "(granularity = {}) must be one of [{}]",
                        td.granularity,
                        self.granularity.allowed.join(", ")
                    ),
                    path.field("time_dimensions"),
                    pre_agg.location.clone(),
                ));
            }
            if !seen.insert((&td.dimension, td.granularity.as_str())) {
                validation.diagnostics.push(Diagnostic::semantic(
                    &cube.name,
                    format!(
                        "pre-aggregation {} lists time dimension {} with granularity {} more than once",
                        pre_agg.name, td.dimension, td.granularity
                    ),
                    path.field("time_dimensions"),
                    pre_agg.location.clone(),
                ));
            }
        }

        if let Some(partition) = &pre_agg.partition_granularity {
            if !self.granularity.is_allowed(partition) {
                validation.diagnostics.push(Diagnostic::semantic(
                    &cube.name,
                    format!(
                        "(partition_granularity = {}) must be one of [{}]",
                        partition,
                        self.granularity.allowed.join(", ")
                    ),
                    path.field("partition_granularity"),
                    pre_agg.location.clone(),
                ));
            }
            if pre_agg.time_dimensions.is_empty() {
                validation.diagnostics.push(Diagnostic::semantic(
                    &cube.name,
                    format!(
                        "pre-aggregation {} sets partition_granularity without a time dimension",
                        pre_agg.name
                    ),
                    path.field("partition_granularity"),
                    pre_agg.location.clone(),
                ));
            }
        }

        validation
    }
}

/// Append `; did you mean 'x'?` when a close candidate exists
pub fn with_suggestion<'a>(
    message: String,
    needle: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> String {
    match suggest(needle, candidates) {
        Some(candidate) => format!("{}; did you mean '{}'?", message, candidate),
        None => message,
    }
}

/// Closest candidate by fuzzy score
pub fn suggest<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, &'a str)> = None;
    for candidate in candidates {
        if let Some(score) = matcher.fuzzy_match(candidate, needle) {
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, candidate));
            }
        }
    }
    best.map(|(_, candidate)| candidate)
}

fn cron_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Digits, cron operators, or month and weekday names
        let field = r"(?:[0-9*?/,LW#-]|(?i:JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC|MON|TUE|WED|THU|FRI|SAT|SUN))+";
        Regex::new(&format!(r"^\s*{field}(?:\s+{field}){{4,5}}\s*$")).expect("cron regex is valid")
    })
}

fn schedule(every: &str) -> Option<Schedule> {
    if let Some(interval) = Interval::parse(every) {
        return Some(Schedule::Interval(interval));
    }
    if cron_regex().is_match(every) {
        return Some(Schedule::Cron(every.trim().to_string()));
    }
    None
}

/// Parse a `refresh_key` mapping
///
/// Exactly one of `every` (interval or cron) and `sql` must be given.
pub fn refresh_key(ctx: &FieldContext<'_>, value: FieldValue<'_>) -> Result<Option<RefreshKey>, Diagnostic> {
    let (key, node) = match value {
        FieldValue::Absent => return Ok(None),
        FieldValue::Null { key, node } => return Err(ctx.mismatch(key, node, "mapping")),
        FieldValue::Present { key, node } => (key, node),
    };
    if node.as_mapping().is_none() {
        return Err(ctx.mismatch(key, node, "mapping"));
    }
    let fields = Fields::new(node, key, &ctx.path)?;
    let path = ctx.path.field(key);

    let every = ctx.string(fields.get("every"))?;
    let sql = ctx.sql(fields.get("sql"))?;
    let policy = match (every, sql) {
        (Some(every), None) => match schedule(&every) {
            Some(schedule) => RefreshPolicy::Every(schedule),
            None => {
                return Err(Diagnostic::semantic(
                    ctx.cube_label,
                    format!(
                        "{} every '{}' must be an interval like '1 day' or a cron expression",
                        key, every
                    ),
                    path,
                    node.location.clone(),
                ))
            }
        },
        (None, Some(sql)) => RefreshPolicy::Sql(sql),
        (Some(_), Some(_)) | (None, None) => {
            return Err(Diagnostic::semantic(
                ctx.cube_label,
                format!("{} must define exactly one of every or sql", key),
                path,
                node.location.clone(),
            ))
        }
    };

    let incremental = ctx.boolean(fields.get("incremental"))?;
    let update_window = match ctx.string(fields.get("updateWindow"))? {
        Some(window) => Some(Interval::parse(&window).ok_or_else(|| {
            Diagnostic::semantic(
                ctx.cube_label,
                format!("{} update_window '{}' must be an interval like '7 day'", key, window),
                path.clone(),
                node.location.clone(),
            )
        })?),
        None => None,
    };
    let timezone = ctx.string(fields.get("timezone"))?;

    Ok(Some(RefreshKey {
        policy,
        incremental,
        update_window,
        timezone,
    }))
}
