//! Domain data shapes shared across pipeline layers.
//!
//! Inside the store a record is an untyped [`Row`]; the typed structs here
//! exist at the loading boundary so malformed source files fail loudly
//! before they ever reach a bronze table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One table row. Transformation rules evaluate over this shape, and the
/// in-memory store holds tables as vectors of it.
pub type Row = serde_json::Map<String, Value>;

/// A raw property listing as loaded from a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub listing_price: Option<f64>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<f64>,
    pub property_type: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub year_built: Option<i64>,
    pub lot_size: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A raw neighborhood record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighborhood {
    pub id: String,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub population: Option<i64>,
    pub median_income: Option<f64>,
    pub walkability_score: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

/// A raw encyclopedia article record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikipediaArticle {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub relevance_score: Option<f64>,
}

/// Converts a serializable record into a store row.
pub fn to_row<T: Serialize>(record: &T) -> crate::error::Result<Row> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::error::PipelineError::Config(format!(
            "record did not serialize to an object: {}",
            other
        ))),
    }
}

/// Numeric view of a row field; integers widen to f64.
pub fn field_f64(row: &Row, name: &str) -> Option<f64> {
    row.get(name).and_then(Value::as_f64)
}

/// String view of a row field.
pub fn field_str<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).and_then(Value::as_str)
}

/// Whether a field is present and non-null.
pub fn field_present(row: &Row, name: &str) -> bool {
    matches!(row.get(name), Some(v) if !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_to_row() {
        let p = Property {
            id: "p1".into(),
            listing_price: Some(450_000.0),
            bedrooms: Some(3),
            bathrooms: Some(2.0),
            square_feet: Some(1800.0),
            property_type: Some("single_family".into()),
            address: Some("123 Main St".into()),
            city: Some("Seattle".into()),
            state: Some("WA".into()),
            zip_code: Some("98101".into()),
            latitude: Some(47.61),
            longitude: Some(-122.33),
            year_built: Some(1990),
            lot_size: None,
            description: None,
            features: vec!["garage".into()],
        };
        let row = to_row(&p).unwrap();
        assert_eq!(field_f64(&row, "listing_price"), Some(450_000.0));
        assert_eq!(field_str(&row, "city"), Some("Seattle"));
        assert!(field_present(&row, "bedrooms"));
        assert!(!field_present(&row, "lot_size"));
    }

    #[test]
    fn test_field_f64_widens_integers() {
        let mut row = Row::new();
        row.insert("bedrooms".into(), json!(3));
        assert_eq!(field_f64(&row, "bedrooms"), Some(3.0));
    }
}
