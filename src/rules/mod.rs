//! Declarative tier transformation rules.
//!
//! Each medallion tier's cleaning/enrichment logic is a [`TierRule`]: a
//! source predicate plus a list of named derived-field expressions. The
//! same rule value can be rendered to the analytic engine's SQL dialect
//! ([`sql`]) or interpreted directly over in-memory rows ([`eval`]), which
//! keeps transformation logic testable without a live database.

pub mod eval;
pub mod geo;
pub mod gold;
pub mod silver;
pub mod sql;

use serde::{Deserialize, Serialize};

use crate::catalog::{EntityType, Tier};

/// A scalar expression over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Number(f64),
    Text(String),
    Null,
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// Division evaluates to null when the divisor is zero or null.
    Div(Box<Expr>, Box<Expr>),
    Coalesce(Vec<Expr>),
    Clamp {
        expr: Box<Expr>,
        min: f64,
        max: f64,
    },
    Round {
        expr: Box<Expr>,
        digits: i32,
    },
    Case {
        arms: Vec<(Predicate, Expr)>,
        default: Box<Expr>,
    },
    /// Great-circle distance in kilometers to a fixed reference point.
    HaversineKm {
        lat: Box<Expr>,
        lon: Box<Expr>,
        ref_lat: f64,
        ref_lon: f64,
    },
    Lower(Box<Expr>),
    Trim(Box<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn num(v: f64) -> Expr {
        Expr::Number(v)
    }

    pub fn text(v: impl Into<String>) -> Expr {
        Expr::Text(v.into())
    }

    pub fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }

    pub fn div(self, rhs: Expr) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs))
    }

    pub fn clamp(self, min: f64, max: f64) -> Expr {
        Expr::Clamp {
            expr: Box::new(self),
            min,
            max,
        }
    }

    pub fn round(self, digits: i32) -> Expr {
        Expr::Round {
            expr: Box::new(self),
            digits,
        }
    }

    pub fn or_else(self, fallback: Expr) -> Expr {
        Expr::Coalesce(vec![self, fallback])
    }

    pub fn lower(self) -> Expr {
        Expr::Lower(Box::new(self))
    }

    pub fn trim(self) -> Expr {
        Expr::Trim(Box::new(self))
    }
}

/// A boolean predicate over one row. Comparisons against null are false.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Gt(Expr, Expr),
    Ge(Expr, Expr),
    Lt(Expr, Expr),
    Le(Expr, Expr),
    Eq(Expr, Expr),
    Between {
        expr: Expr,
        low: f64,
        high: f64,
    },
    IsNotNull(Expr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(preds: Vec<Predicate>) -> Predicate {
        Predicate::And(preds)
    }

    pub fn between(expr: Expr, low: f64, high: f64) -> Predicate {
        Predicate::Between { expr, low, high }
    }
}

/// One output column computed by a rule.
#[derive(Debug, Clone)]
pub struct DerivedField {
    pub name: String,
    pub expr: Expr,
}

impl DerivedField {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// Declarative description of one tier's record-level transformation.
///
/// Output rows carry every source column plus the derived fields, applied
/// in order; a derived field may reference fields derived before it
/// (DuckDB-style lateral alias references).
#[derive(Debug, Clone)]
pub struct TierRule {
    pub name: String,
    pub source_filter: Option<Predicate>,
    pub derived: Vec<DerivedField>,
}

/// Which tier transformation a processor runs. Replaces per-tier
/// subclassing: one generic processor dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Silver,
    Gold,
    Geographic,
}

impl TierKind {
    /// Tier the transformation writes to.
    pub fn target_tier(&self) -> Tier {
        match self {
            TierKind::Silver => Tier::Silver,
            TierKind::Gold => Tier::Gold,
            TierKind::Geographic => Tier::Enriched,
        }
    }

    /// Tier the transformation reads from.
    pub fn source_tier(&self) -> Tier {
        match self {
            TierKind::Silver => Tier::Bronze,
            TierKind::Gold => Tier::Silver,
            TierKind::Geographic => Tier::Gold,
        }
    }

    pub fn stage_name(&self) -> &'static str {
        match self {
            TierKind::Silver => "cleaning",
            TierKind::Gold => "enrichment",
            TierKind::Geographic => "geographic",
        }
    }
}

/// Reference point for geographic enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoReference {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for GeoReference {
    fn default() -> Self {
        // Downtown Seattle.
        Self {
            name: "downtown".to_string(),
            latitude: 47.6062,
            longitude: -122.3321,
        }
    }
}

/// Resolves the rule for a tier/entity pair.
pub fn transformation_for(kind: TierKind, entity: EntityType, geo: &GeoReference) -> TierRule {
    match kind {
        TierKind::Silver => silver::rule(entity),
        TierKind::Gold => gold::rule(entity),
        TierKind::Geographic => geo::rule(entity, geo),
    }
}

/// Columns a tier's output must populate; drives the completeness score.
pub fn required_columns(entity: EntityType, tier: Tier) -> Vec<&'static str> {
    let mut cols: Vec<&'static str> = match entity {
        EntityType::Property => vec![
            "id",
            "listing_price",
            "bedrooms",
            "bathrooms",
            "square_feet",
            "city",
            "latitude",
            "longitude",
        ],
        EntityType::Neighborhood => vec!["id", "name", "latitude", "longitude"],
        EntityType::WikipediaArticle => vec!["id", "title", "summary"],
        EntityType::Location => vec!["id", "latitude", "longitude"],
    };
    if matches!(tier, Tier::Gold | Tier::Enriched) {
        match entity {
            EntityType::Property => {
                cols.extend(["price_per_sqft", "size_category", "desirability_score"])
            }
            EntityType::Neighborhood => cols.push("livability_score"),
            EntityType::WikipediaArticle => cols.push("relevance_bucket"),
            EntityType::Location => {}
        }
    }
    if tier == Tier::Enriched {
        // Distance itself may be legitimately null for out-of-range
        // coordinates; region always resolves (to "unknown" at worst).
        cols.push("region");
    }
    cols
}

/// Minimum-validity predicate for records at a tier; drives both the
/// input data-presence check and the output quality score.
pub fn validity_predicate(entity: EntityType, tier: Tier) -> Predicate {
    if tier == Tier::Bronze {
        return Predicate::IsNotNull(Expr::col("id"));
    }
    match entity {
        EntityType::Property => Predicate::and(vec![
            Predicate::Gt(Expr::col("listing_price"), Expr::num(0.0)),
            Predicate::Gt(Expr::col("square_feet"), Expr::num(0.0)),
            Predicate::between(Expr::col("latitude"), -90.0, 90.0),
            Predicate::between(Expr::col("longitude"), -180.0, 180.0),
        ]),
        EntityType::Neighborhood => Predicate::and(vec![
            Predicate::IsNotNull(Expr::col("name")),
            Predicate::between(Expr::col("latitude"), -90.0, 90.0),
            Predicate::between(Expr::col("longitude"), -180.0, 180.0),
        ]),
        EntityType::WikipediaArticle => Predicate::and(vec![
            Predicate::IsNotNull(Expr::col("title")),
            Predicate::IsNotNull(Expr::col("summary")),
        ]),
        EntityType::Location => Predicate::and(vec![
            Predicate::between(Expr::col("latitude"), -90.0, 90.0),
            Predicate::between(Expr::col("longitude"), -180.0, 180.0),
        ]),
    }
}
