//! Canonical table naming for the medallion tiers.
//!
//! Every table produced by the pipeline is named
//! `{entity}_{tier}_{unix_timestamp}` with an optional `_{stage}` suffix.
//! The name is the only bookkeeping between phases: the next phase finds
//! its input by parsing the names the store already knows about and
//! picking the greatest timestamp.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Entity kinds flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Property,
    Neighborhood,
    WikipediaArticle,
    Location,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Property => "property",
            EntityType::Neighborhood => "neighborhood",
            EntityType::WikipediaArticle => "wikipedia_article",
            EntityType::Location => "location",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "property" => Some(EntityType::Property),
            "neighborhood" => Some(EntityType::Neighborhood),
            "wikipedia_article" => Some(EntityType::WikipediaArticle),
            "location" => Some(EntityType::Location),
            _ => None,
        }
    }

    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Property,
            EntityType::Neighborhood,
            EntityType::WikipediaArticle,
            EntityType::Location,
        ]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Medallion tier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Enriched,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Enriched => "enriched",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bronze" => Some(Tier::Bronze),
            "silver" => Some(Tier::Silver),
            "gold" => Some(Tier::Gold),
            "enriched" => Some(Tier::Enriched),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of one pipeline table.
///
/// Round-trip invariant: `TableIdentifier::parse(&id.table_name()) == Some(id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    pub entity_type: EntityType,
    pub tier: Tier,
    pub timestamp: i64,
    pub stage: Option<String>,
}

impl TableIdentifier {
    pub fn new(entity_type: EntityType, tier: Tier, timestamp: i64) -> Self {
        Self {
            entity_type,
            tier,
            timestamp,
            stage: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Renders the canonical table name.
    pub fn table_name(&self) -> String {
        match &self.stage {
            Some(stage) => format!(
                "{}_{}_{}_{}",
                self.entity_type, self.tier, self.timestamp, stage
            ),
            None => format!("{}_{}_{}", self.entity_type, self.tier, self.timestamp),
        }
    }

    /// Parses a canonical table name back into its identifier.
    ///
    /// Unparseable names return `None` rather than erroring; tables the
    /// pipeline did not create are simply invisible to lineage resolution.
    pub fn parse(name: &str) -> Option<TableIdentifier> {
        // Entity names may themselves contain underscores, so match known
        // entity prefixes instead of splitting blindly.
        let entity_type = EntityType::all()
            .iter()
            .copied()
            .find(|e| name.starts_with(e.as_str()) && name[e.as_str().len()..].starts_with('_'))?;
        let rest = &name[entity_type.as_str().len() + 1..];

        let (tier_str, rest) = rest.split_once('_')?;
        let tier = Tier::parse(tier_str)?;

        let (ts_str, stage) = match rest.split_once('_') {
            Some((ts, stage)) if !stage.is_empty() => (ts, Some(stage.to_string())),
            Some((ts, _)) => (ts, None),
            None => (rest, None),
        };
        let timestamp: i64 = ts_str.parse().ok()?;
        if timestamp < 0 {
            return None;
        }

        Some(TableIdentifier {
            entity_type,
            tier,
            timestamp,
            stage,
        })
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_name())
    }
}

/// Mints table identifiers and resolves lineage from existing table names.
///
/// Timestamps issued by one catalog are monotonically non-decreasing, so
/// "latest table" stays well defined even when two phases complete within
/// the same second.
pub struct TableCatalog {
    last_issued: AtomicI64,
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TableCatalog {
    pub fn new() -> Self {
        Self {
            last_issued: AtomicI64::new(0),
        }
    }

    /// Issues a new identifier for the given entity and tier.
    ///
    /// Issued timestamps never go backwards; same-second mints are bumped
    /// forward so two phases never collide on a name.
    pub fn mint(&self, entity_type: EntityType, tier: Tier) -> TableIdentifier {
        let now = Utc::now().timestamp();
        let mut last = self.last_issued.load(Ordering::SeqCst);
        loop {
            let candidate = if now > last { now } else { last + 1 };
            match self.last_issued.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return TableIdentifier::new(entity_type, tier, candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Finds the most recent table for an entity/tier among known names.
    pub fn latest<'a, I>(names: I, entity_type: EntityType, tier: Tier) -> Option<TableIdentifier>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(TableIdentifier::parse)
            .filter(|id| id.entity_type == entity_type && id.tier == tier)
            .max_by_key(|id| id.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_round_trip() {
        let id = TableIdentifier::new(EntityType::Property, Tier::Silver, 1_700_000_000);
        assert_eq!(id.table_name(), "property_silver_1700000000");
        assert_eq!(TableIdentifier::parse(&id.table_name()), Some(id));
    }

    #[test]
    fn test_round_trip_with_stage() {
        let id = TableIdentifier::new(EntityType::Neighborhood, Tier::Gold, 1_700_000_123)
            .with_stage("scored");
        assert_eq!(id.table_name(), "neighborhood_gold_1700000123_scored");
        assert_eq!(TableIdentifier::parse(&id.table_name()), Some(id));
    }

    #[test]
    fn test_round_trip_underscored_entity() {
        let id = TableIdentifier::new(EntityType::WikipediaArticle, Tier::Bronze, 42);
        assert_eq!(id.table_name(), "wikipedia_article_bronze_42");
        assert_eq!(TableIdentifier::parse(&id.table_name()), Some(id));
    }

    #[test]
    fn test_unparseable_names_return_none() {
        assert_eq!(TableIdentifier::parse("not_a_pipeline_table"), None);
        assert_eq!(TableIdentifier::parse("property_platinum_123"), None);
        assert_eq!(TableIdentifier::parse("property_silver_notanumber"), None);
        assert_eq!(TableIdentifier::parse("property_silver_-5"), None);
        assert_eq!(TableIdentifier::parse(""), None);
    }

    #[test]
    fn test_latest_picks_greatest_timestamp() {
        let names = vec![
            "property_silver_100".to_string(),
            "property_silver_300".to_string(),
            "property_silver_200".to_string(),
            "property_gold_999".to_string(),
            "junk_table".to_string(),
        ];
        let latest =
            TableCatalog::latest(names.iter().map(|s| s.as_str()), EntityType::Property, Tier::Silver)
                .unwrap();
        assert_eq!(latest.timestamp, 300);
        assert_eq!(latest.tier, Tier::Silver);
    }

    #[test]
    fn test_latest_none_when_no_match() {
        let names = ["property_bronze_100"];
        assert!(TableCatalog::latest(names, EntityType::Property, Tier::Gold).is_none());
    }

    #[test]
    fn test_mint_is_monotonic() {
        let catalog = TableCatalog::new();
        let mut prev = 0;
        for _ in 0..50 {
            let id = catalog.mint(EntityType::Property, Tier::Bronze);
            assert!(id.timestamp >= prev, "timestamps must not go backwards");
            prev = id.timestamp;
        }
    }
}
