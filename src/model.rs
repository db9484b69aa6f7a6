//! Canonical entity model
//!
//! Everything here is built once by the transpiler and never mutated again.
//! Entities serialise to JSON for fingerprinting and downstream consumers;
//! source locations are kept for schema-level diagnostics but not serialised.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::node::{GenericNode, Location};

// =============================================================================
// Entity kinds
// =============================================================================

/// Closed set of entity kinds a document can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cube,
    Dimension,
    Measure,
    Segment,
    Join,
    PreAggregation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cube => "cube",
            Self::Dimension => "dimension",
            Self::Measure => "measure",
            Self::Segment => "segment",
            Self::Join => "join",
            Self::PreAggregation => "pre_aggregation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Meta bag
// =============================================================================

/// Schema-less annotation tree, passed through without validation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetaBag(GenericNode);

impl MetaBag {
    pub fn new(node: GenericNode) -> Self {
        Self(node)
    }

    pub fn node(&self) -> &GenericNode {
        &self.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Typed vocabularies
// =============================================================================

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Canonical spellings, in declaration order
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text $(| $alias)* => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Declared type of a dimension
    DimensionType {
        String => "string",
        Number => "number",
        Boolean => "boolean",
        Time => "time",
        Geo => "geo",
    }
}

string_enum! {
    /// Aggregation or value type of a measure
    MeasureType {
        Count => "count",
        CountDistinct => "count_distinct" | "countDistinct",
        CountDistinctApprox => "count_distinct_approx" | "countDistinctApprox",
        Sum => "sum",
        Avg => "avg",
        Min => "min",
        Max => "max",
        Number => "number",
        String => "string",
        Time => "time",
        Boolean => "boolean",
        RunningTotal => "running_total" | "runningTotal",
    }
}

string_enum! {
    /// Cardinality of a join
    Relationship {
        OneToOne => "one_to_one" | "oneToOne" | "has_one" | "hasOne",
        OneToMany => "one_to_many" | "oneToMany" | "has_many" | "hasMany",
        ManyToOne => "many_to_one" | "manyToOne" | "belongs_to" | "belongsTo",
    }
}

string_enum! {
    /// Materialisation strategy of a pre-aggregation
    PreAggregationType {
        Rollup => "rollup",
        OriginalSql => "original_sql" | "originalSql",
    }
}

string_enum! {
    /// Unit of a refresh interval
    IntervalUnit {
        Second => "second",
        Minute => "minute",
        Hour => "hour",
        Day => "day",
        Week => "week",
        Month => "month",
        Quarter => "quarter",
        Year => "year",
    }
}

// =============================================================================
// Refresh policies
// =============================================================================

/// `<amount> <unit>`, e.g. `1 day` or `30 minutes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub amount: u64,
    pub unit: IntervalUnit,
}

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s+([a-z]+?)s?\s*$").expect("interval regex is valid")
    })
}

impl Interval {
    pub fn parse(value: &str) -> Option<Self> {
        let caps = interval_regex().captures(value)?;
        let amount = caps[1].parse::<u64>().ok().filter(|amount| *amount > 0)?;
        let unit = IntervalUnit::parse(&caps[2])?;
        Some(Self { amount, unit })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount == 1 {
            write!(f, "1 {}", self.unit)
        } else {
            write!(f, "{} {}s", self.amount, self.unit)
        }
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// When a refresh check runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Schedule {
    Interval(Interval),
    Cron(String),
}

/// The single policy shape of a refresh key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshPolicy {
    Every(Schedule),
    Sql(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshKey {
    pub policy: RefreshPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_window: Option<Interval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Opaque SQL expression descriptor (`{ sql: ... }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlExpr {
    pub sql: String,
}

// =============================================================================
// Member references
// =============================================================================

/// Reference to a cube member, as written in a pre-aggregation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Cube qualifier; `None` means the owning cube
    pub cube: Option<String>,
    pub member: String,
}

impl MemberRef {
    /// `count`, `CUBE.count` and `<owning>.count` refer to the owning cube
    pub fn parse(raw: &str, owning_cube: &str) -> Self {
        match raw.split_once('.') {
            Some((cube, member)) if cube == "CUBE" || cube == owning_cube => Self {
                cube: None,
                member: member.to_string(),
            },
            Some((cube, member)) => Self {
                cube: Some(cube.to_string()),
                member: member.to_string(),
            },
            None => Self {
                cube: None,
                member: raw.to_string(),
            },
        }
    }

    pub fn is_local(&self) -> bool {
        self.cube.is_none()
    }

    /// `Cube.member`, qualifying local references with `owning_cube`
    pub fn qualified(&self, owning_cube: &str) -> String {
        format!("{}.{}", self.cube.as_deref().unwrap_or(owning_cube), self.member)
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cube {
            Some(cube) => write!(f, "{}.{}", cube, self.member),
            None => f.write_str(&self.member),
        }
    }
}

impl Serialize for MemberRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeDimensionRef {
    pub dimension: MemberRef,
    pub granularity: String,
}

// =============================================================================
// Entities
// =============================================================================

/// Where a cube's rows come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SqlSource {
    Sql(String),
    SqlTable(String),
}

impl SqlSource {
    pub fn text(&self) -> &str {
        match self {
            SqlSource::Sql(s) | SqlSource::SqlTable(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeEntity {
    pub name: String,
    pub sql: SqlSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_key: Option<RefreshKey>,
    pub dimensions: Vec<DimensionEntity>,
    pub measures: Vec<MeasureEntity>,
    pub segments: Vec<SegmentEntity>,
    pub joins: Vec<JoinEntity>,
    pub pre_aggregations: Vec<PreAggregationEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    #[serde(skip)]
    pub location: Location,
}

impl CubeEntity {
    pub fn dimension(&self, name: &str) -> Option<&DimensionEntity> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureEntity> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn segment(&self, name: &str) -> Option<&SegmentEntity> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn pre_aggregation(&self, name: &str) -> Option<&PreAggregationEntity> {
        self.pre_aggregations.iter().find(|p| p.name == name)
    }

    /// `Cube.member`
    pub fn qualify(&self, member: &str) -> String {
        format!("{}.{}", self.name, member)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionEntity {
    pub name: String,
    pub sql: String,
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub primary_key: bool,
    pub shown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    #[serde(skip)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasureFilter {
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureEntity {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(rename = "type")]
    pub measure_type: MeasureType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub shown: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drill_members: Vec<MemberRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<MeasureFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    #[serde(skip)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEntity {
    pub name: String,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub shown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    #[serde(skip)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEntity {
    /// Target cube
    pub name: String,
    pub sql: String,
    pub relationship: Relationship,
    #[serde(skip)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAggregationEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub pre_aggregation_type: PreAggregationType,
    pub measures: Vec<MemberRef>,
    pub dimensions: Vec<MemberRef>,
    pub segments: Vec<MemberRef>,
    pub time_dimensions: Vec<TimeDimensionRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_granularity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_range_start: Option<SqlExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_range_end: Option<SqlExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_key: Option<RefreshKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_refresh: Option<bool>,
    #[serde(skip)]
    pub location: Location,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_aliases() {
        assert_eq!(Relationship::parse("belongs_to"), Some(Relationship::ManyToOne));
        assert_eq!(Relationship::parse("hasMany"), Some(Relationship::OneToMany));
        assert_eq!(MeasureType::parse("countDistinct"), Some(MeasureType::CountDistinct));
        assert_eq!(MeasureType::parse("median"), None);
        assert_eq!(DimensionType::VALUES, &["string", "number", "boolean", "time", "geo"]);
    }

    #[test]
    fn test_interval_parsing() {
        let interval = Interval::parse("1 day").unwrap();
        assert_eq!(interval, Interval { amount: 1, unit: IntervalUnit::Day });

        let interval = Interval::parse("30 minutes").unwrap();
        assert_eq!(interval.unit, IntervalUnit::Minute);
        assert_eq!(interval.to_string(), "30 minutes");

        assert!(Interval::parse("day").is_none());
        assert!(Interval::parse("1 fortnight").is_none());
        assert!(Interval::parse("0 day").is_none());
        assert!(Interval::parse("00 hours").is_none());
    }

    #[test]
    fn test_member_ref_parsing() {
        let local = MemberRef::parse("count", "Orders");
        assert!(local.is_local());
        assert_eq!(local.qualified("Orders"), "Orders.count");

        assert!(MemberRef::parse("CUBE.count", "Orders").is_local());
        assert!(MemberRef::parse("Orders.count", "Orders").is_local());

        let foreign = MemberRef::parse("Users.count", "Orders");
        assert_eq!(foreign.cube.as_deref(), Some("Users"));
        assert_eq!(foreign.to_string(), "Users.count");
    }
}
