//! Gold-tier enrichment rules: derived business features computed from
//! cleaned silver records. Every derived numeric score is clamped into
//! its documented range; the clamp is part of the rule, not a courtesy.

use chrono::{Datelike, Utc};

use super::{DerivedField, Expr, Predicate, TierRule};
use crate::catalog::EntityType;

pub fn rule(entity: EntityType) -> TierRule {
    let derived = match entity {
        EntityType::Property => property_fields(),
        EntityType::Neighborhood => neighborhood_fields(),
        EntityType::WikipediaArticle => article_fields(),
        EntityType::Location => vec![],
    };

    TierRule {
        name: format!("gold_{}", entity),
        source_filter: None,
        derived,
    }
}

fn property_fields() -> Vec<DerivedField> {
    let price_per_sqft = Expr::col("listing_price")
        .div(Expr::col("square_feet"))
        .round(2);

    let size_category = Expr::Case {
        arms: vec![
            (
                Predicate::Lt(Expr::col("square_feet"), Expr::num(1000.0)),
                Expr::text("compact"),
            ),
            (
                Predicate::Lt(Expr::col("square_feet"), Expr::num(2500.0)),
                Expr::text("mid_size"),
            ),
        ],
        default: Box::new(Expr::text("large")),
    };

    let price_bucket = Expr::Case {
        arms: vec![
            (
                Predicate::Lt(Expr::col("listing_price"), Expr::num(300_000.0)),
                Expr::text("entry"),
            ),
            (
                Predicate::Lt(Expr::col("listing_price"), Expr::num(750_000.0)),
                Expr::text("mid_market"),
            ),
            (
                Predicate::Lt(Expr::col("listing_price"), Expr::num(1_500_000.0)),
                Expr::text("premium"),
            ),
        ],
        default: Box::new(Expr::text("luxury")),
    };

    let current_year = Utc::now().year() as f64;
    let property_age = Expr::num(current_year)
        .sub(Expr::col("year_built"))
        .clamp(0.0, 200.0);

    // Composite desirability in [0, 100]: room count pushes up, high
    // price-per-area pushes down, newer construction earns a bonus.
    let age_bonus = Expr::Case {
        arms: vec![
            (
                Predicate::Ge(Expr::col("year_built"), Expr::num(2000.0)),
                Expr::num(10.0),
            ),
            (
                Predicate::Ge(Expr::col("year_built"), Expr::num(1970.0)),
                Expr::num(5.0),
            ),
        ],
        default: Box::new(Expr::num(0.0)),
    };
    let desirability = Expr::num(35.0)
        .add(Expr::col("bedrooms").or_else(Expr::num(0.0)).mul(Expr::num(5.0)))
        .add(Expr::col("bathrooms").or_else(Expr::num(0.0)).mul(Expr::num(4.0)))
        .sub(
            Expr::col("price_per_sqft")
                .or_else(Expr::num(0.0))
                .mul(Expr::num(0.05)),
        )
        .add(age_bonus)
        .clamp(0.0, 100.0);

    vec![
        DerivedField::new("price_per_sqft", price_per_sqft),
        DerivedField::new("size_category", size_category),
        DerivedField::new("price_bucket", price_bucket),
        DerivedField::new("property_age", property_age),
        DerivedField::new("desirability_score", desirability),
    ]
}

fn neighborhood_fields() -> Vec<DerivedField> {
    // Walkability carries most of the weight; income contributes a
    // bounded amount so outlier neighborhoods cannot dominate.
    let livability = Expr::col("walkability_score")
        .or_else(Expr::num(50.0))
        .mul(Expr::num(0.7))
        .add(
            Expr::col("median_income")
                .or_else(Expr::num(0.0))
                .div(Expr::num(4000.0))
                .clamp(0.0, 30.0),
        )
        .clamp(0.0, 100.0);

    let income_bracket = Expr::Case {
        arms: vec![
            (
                Predicate::Lt(Expr::col("median_income"), Expr::num(50_000.0)),
                Expr::text("lower"),
            ),
            (
                Predicate::Lt(Expr::col("median_income"), Expr::num(100_000.0)),
                Expr::text("middle"),
            ),
        ],
        default: Box::new(Expr::text("upper")),
    };

    vec![
        DerivedField::new("livability_score", livability),
        DerivedField::new("income_bracket", income_bracket),
    ]
}

fn article_fields() -> Vec<DerivedField> {
    let relevance_bucket = Expr::Case {
        arms: vec![
            (
                Predicate::Ge(Expr::col("relevance_score"), Expr::num(0.75)),
                Expr::text("high"),
            ),
            (
                Predicate::Ge(Expr::col("relevance_score"), Expr::num(0.4)),
                Expr::text("medium"),
            ),
            (
                Predicate::IsNotNull(Expr::col("relevance_score")),
                Expr::text("low"),
            ),
        ],
        default: Box::new(Expr::text("unrated")),
    };
    vec![DerivedField::new("relevance_bucket", relevance_bucket)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{field_f64, Row};
    use crate::rules::eval::apply_rule;
    use serde_json::json;

    fn silver_property(price: f64, sqft: f64, beds: i64, baths: f64, year: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!("p1"));
        row.insert("listing_price".into(), json!(price));
        row.insert("square_feet".into(), json!(sqft));
        row.insert("bedrooms".into(), json!(beds));
        row.insert("bathrooms".into(), json!(baths));
        row.insert("year_built".into(), json!(year));
        row
    }

    #[test]
    fn test_price_per_sqft() {
        let out = apply_rule(
            &rule(EntityType::Property),
            &[silver_property(450_000.0, 1500.0, 3, 2.0, 1995)],
        );
        assert_eq!(field_f64(&out[0], "price_per_sqft"), Some(300.0));
        assert_eq!(out[0].get("size_category"), Some(&json!("mid_size")));
        assert_eq!(out[0].get("price_bucket"), Some(&json!("mid_market")));
    }

    #[test]
    fn test_desirability_stays_in_bounds_for_extremes() {
        // Absurd room counts cannot push the score past 100.
        let high = apply_rule(
            &rule(EntityType::Property),
            &[silver_property(100_000.0, 5000.0, 18, 12.0, 2020)],
        );
        let score = field_f64(&high[0], "desirability_score").unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, 100.0);

        // Absurd price-per-area cannot push it below 0, even with
        // adversarial negative square footage sneaking past upstream.
        let low = apply_rule(
            &rule(EntityType::Property),
            &[silver_property(90_000_000.0, 10.0, 0, 0.0, 1900)],
        );
        let score = field_f64(&low[0], "desirability_score").unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_desirability_survives_missing_fields() {
        let mut row = Row::new();
        row.insert("id".into(), json!("p2"));
        row.insert("listing_price".into(), json!(500_000.0));
        row.insert("square_feet".into(), json!(0.0));
        let out = apply_rule(&rule(EntityType::Property), &[row]);
        // Divide-by-zero nulls out price_per_sqft; the score still lands in range.
        assert_eq!(out[0].get("price_per_sqft"), Some(&serde_json::Value::Null));
        let score = field_f64(&out[0], "desirability_score").unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn test_neighborhood_livability_bounds() {
        let mut row = Row::new();
        row.insert("id".into(), json!("n1"));
        row.insert("walkability_score".into(), json!(95.0));
        row.insert("median_income".into(), json!(900_000.0));
        let out = apply_rule(&rule(EntityType::Neighborhood), &[row]);
        let score = field_f64(&out[0], "livability_score").unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn test_article_without_score_is_unrated() {
        let mut row = Row::new();
        row.insert("id".into(), json!("a1"));
        row.insert("title".into(), json!("Ballard"));
        let out = apply_rule(&rule(EntityType::WikipediaArticle), &[row]);
        assert_eq!(out[0].get("relevance_bucket"), Some(&json!("unrated")));
    }
}
