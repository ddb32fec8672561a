//! Silver-tier cleaning rules: normalization, type coercion, bounds
//! filtering. Records failing the tier's minimum-validity predicate are
//! dropped here rather than patched.

use super::{validity_predicate, DerivedField, Expr, TierRule};
use crate::catalog::{EntityType, Tier};

pub fn rule(entity: EntityType) -> TierRule {
    let derived = match entity {
        EntityType::Property => vec![
            DerivedField::new("city", Expr::col("city").trim()),
            DerivedField::new("state", Expr::col("state").trim()),
            DerivedField::new("property_type", Expr::col("property_type").trim().lower()),
            // Data-entry outliers: nobody lists a 400-bedroom house.
            DerivedField::new("bedrooms", Expr::col("bedrooms").clamp(0.0, 20.0)),
            DerivedField::new("bathrooms", Expr::col("bathrooms").clamp(0.0, 20.0)),
        ],
        EntityType::Neighborhood => vec![
            DerivedField::new("name", Expr::col("name").trim()),
            DerivedField::new("city", Expr::col("city").trim()),
            DerivedField::new(
                "walkability_score",
                Expr::col("walkability_score").clamp(0.0, 100.0),
            ),
        ],
        EntityType::WikipediaArticle => vec![
            DerivedField::new("title", Expr::col("title").trim()),
            DerivedField::new(
                "relevance_score",
                Expr::col("relevance_score").clamp(0.0, 1.0),
            ),
        ],
        EntityType::Location => vec![],
    };

    TierRule {
        name: format!("silver_{}", entity),
        source_filter: Some(validity_predicate(entity, Tier::Silver)),
        derived,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Row;
    use crate::rules::eval::apply_rule;
    use serde_json::json;

    fn property_row(price: f64, lat: f64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!("p1"));
        row.insert("listing_price".into(), json!(price));
        row.insert("square_feet".into(), json!(1500.0));
        row.insert("latitude".into(), json!(lat));
        row.insert("longitude".into(), json!(-122.3));
        row.insert("city".into(), json!("  Seattle "));
        row.insert("property_type".into(), json!(" Single_Family "));
        row.insert("bedrooms".into(), json!(3));
        row.insert("bathrooms".into(), json!(2.0));
        row
    }

    #[test]
    fn test_silver_drops_nonpositive_prices() {
        let rows = vec![
            property_row(450_000.0, 47.6),
            property_row(0.0, 47.6),
            property_row(-5.0, 47.6),
        ];
        let out = apply_rule(&rule(EntityType::Property), &rows);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_silver_drops_out_of_range_coordinates() {
        let rows = vec![property_row(450_000.0, 95.0)];
        let out = apply_rule(&rule(EntityType::Property), &rows);
        assert!(out.is_empty());
    }

    #[test]
    fn test_silver_normalizes_strings() {
        let out = apply_rule(&rule(EntityType::Property), &[property_row(450_000.0, 47.6)]);
        assert_eq!(out[0].get("city"), Some(&json!("Seattle")));
        assert_eq!(out[0].get("property_type"), Some(&json!("single_family")));
    }
}
