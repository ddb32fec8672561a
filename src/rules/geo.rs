//! Geographic enrichment rules: distance to a reference point and region
//! classification. Records with out-of-range coordinates get null
//! distances and an "unknown" region rather than a nonsense number.

use super::{DerivedField, Expr, GeoReference, Predicate, TierRule};
use crate::catalog::EntityType;

pub fn rule(entity: EntityType, reference: &GeoReference) -> TierRule {
    let coords_valid = Predicate::and(vec![
        Predicate::between(Expr::col("latitude"), -90.0, 90.0),
        Predicate::between(Expr::col("longitude"), -180.0, 180.0),
    ]);

    let distance = Expr::Case {
        arms: vec![(
            coords_valid,
            Expr::HaversineKm {
                lat: Box::new(Expr::col("latitude")),
                lon: Box::new(Expr::col("longitude")),
                ref_lat: reference.latitude,
                ref_lon: reference.longitude,
            },
        )],
        default: Box::new(Expr::Null),
    };

    let region = Expr::Case {
        arms: vec![
            (
                Predicate::Lt(Expr::col("distance_from_center_km"), Expr::num(2.0)),
                Expr::text("urban_core"),
            ),
            (
                Predicate::Lt(Expr::col("distance_from_center_km"), Expr::num(8.0)),
                Expr::text("inner"),
            ),
            (
                Predicate::Lt(Expr::col("distance_from_center_km"), Expr::num(25.0)),
                Expr::text("suburban"),
            ),
            (
                Predicate::IsNotNull(Expr::col("distance_from_center_km")),
                Expr::text("outlying"),
            ),
        ],
        default: Box::new(Expr::text("unknown")),
    };

    TierRule {
        name: format!("geographic_{}", entity),
        source_filter: None,
        derived: vec![
            DerivedField::new("geo_reference", Expr::text(reference.name.clone())),
            DerivedField::new("distance_from_center_km", distance.round(3)),
            DerivedField::new("region", region),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{field_f64, Row};
    use crate::rules::eval::apply_rule;
    use serde_json::json;

    fn row_at(lat: f64, lon: f64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!("x"));
        row.insert("latitude".into(), json!(lat));
        row.insert("longitude".into(), json!(lon));
        row
    }

    #[test]
    fn test_distance_near_reference_is_urban_core() {
        let reference = GeoReference::default();
        let out = apply_rule(
            &rule(EntityType::Property, &reference),
            &[row_at(47.6070, -122.3330)],
        );
        let d = field_f64(&out[0], "distance_from_center_km").unwrap();
        assert!(d < 2.0, "expected sub-2km distance, got {}", d);
        assert_eq!(out[0].get("region"), Some(&json!("urban_core")));
    }

    #[test]
    fn test_out_of_range_latitude_yields_null_distance() {
        let reference = GeoReference::default();
        let out = apply_rule(&rule(EntityType::Property, &reference), &[row_at(95.0, -122.3)]);
        assert_eq!(
            out[0].get("distance_from_center_km"),
            Some(&serde_json::Value::Null)
        );
        assert_eq!(out[0].get("region"), Some(&json!("unknown")));
    }

    #[test]
    fn test_missing_coordinates_yield_unknown_region() {
        let reference = GeoReference::default();
        let mut row = Row::new();
        row.insert("id".into(), json!("a1"));
        let out = apply_rule(&rule(EntityType::WikipediaArticle, &reference), &[row]);
        assert_eq!(out[0].get("region"), Some(&json!("unknown")));
    }

    #[test]
    fn test_far_coordinates_are_outlying() {
        let reference = GeoReference::default();
        // Spokane, ~360 km from Seattle.
        let out = apply_rule(
            &rule(EntityType::Property, &reference),
            &[row_at(47.6588, -117.4260)],
        );
        assert_eq!(out[0].get("region"), Some(&json!("outlying")));
    }
}
