//! Record-to-document conversion.
//!
//! Text construction is a deterministic, ordered concatenation of the
//! fields present on the record; missing optional fields are simply
//! omitted. A record that cannot produce non-empty text and metadata is
//! rejected with a reason, never silently dropped.

use serde_json::{json, Value};
use tracing::debug;

use crate::catalog::EntityType;
use crate::domain::{field_f64, field_str, Row};

/// One searchable document derived from an enriched record.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Row,
}

/// Why one record failed conversion.
#[derive(Debug, Clone)]
pub struct ConversionFailure {
    pub record_id: String,
    pub reason: String,
}

/// Conversion output for a batch: failures ride alongside the documents
/// instead of aborting them.
#[derive(Debug, Default)]
pub struct ConversionBatch {
    pub documents: Vec<Document>,
    pub failures: Vec<ConversionFailure>,
}

pub struct DocumentConverter {
    tier_tag: String,
}

impl DocumentConverter {
    pub fn new(tier_tag: impl Into<String>) -> Self {
        Self {
            tier_tag: tier_tag.into(),
        }
    }

    /// Converts every row, isolating per-record failures.
    pub fn convert_all(&self, entity: EntityType, rows: &[Row]) -> ConversionBatch {
        let mut batch = ConversionBatch::default();
        for row in rows {
            match self.convert(entity, row) {
                Ok(doc) => batch.documents.push(doc),
                Err(failure) => {
                    debug!(
                        record_id = %failure.record_id,
                        reason = %failure.reason,
                        "document conversion rejected record"
                    );
                    batch.failures.push(failure);
                }
            }
        }
        batch
    }

    pub fn convert(
        &self,
        entity: EntityType,
        row: &Row,
    ) -> std::result::Result<Document, ConversionFailure> {
        let id = match field_str(row, "id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(ConversionFailure {
                    record_id: "<missing>".to_string(),
                    reason: "record has no id".to_string(),
                })
            }
        };

        let text = match entity {
            EntityType::Property => property_text(row),
            EntityType::Neighborhood => neighborhood_text(row),
            EntityType::WikipediaArticle => article_text(row),
            EntityType::Location => location_text(row),
        };
        if text.trim().is_empty() {
            return Err(ConversionFailure {
                record_id: id,
                reason: "record produced empty text".to_string(),
            });
        }

        let mut metadata = Row::new();
        metadata.insert("entity_id".into(), json!(id));
        metadata.insert("entity_type".into(), json!(entity.as_str()));
        metadata.insert("tier".into(), json!(self.tier_tag));
        for key in [
            "listing_price",
            "city",
            "region",
            "desirability_score",
            "price_bucket",
            "livability_score",
            "relevance_bucket",
        ] {
            if let Some(v) = row.get(key) {
                if !v.is_null() {
                    metadata.insert(key.to_string(), v.clone());
                }
            }
        }

        Ok(Document { id, text, metadata })
    }
}

fn property_text(row: &Row) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut headline = String::new();
    if let Some(beds) = field_f64(row, "bedrooms") {
        headline.push_str(&format!("{} bed", beds as i64));
    }
    if let Some(baths) = field_f64(row, "bathrooms") {
        if !headline.is_empty() {
            headline.push(' ');
        }
        headline.push_str(&format!("{} bath", baths));
    }
    if let Some(kind) = field_str(row, "property_type") {
        if !headline.is_empty() {
            headline.push(' ');
        }
        headline.push_str(&kind.replace('_', " "));
    }
    if let Some(address) = field_str(row, "address") {
        headline.push_str(&format!(" at {}", address));
    }
    if let Some(city) = field_str(row, "city") {
        headline.push_str(&format!(", {}", city));
    }
    if let Some(state) = field_str(row, "state") {
        headline.push_str(&format!(", {}", state));
    }
    if !headline.is_empty() {
        parts.push(format!("{}.", headline));
    }
    if let Some(price) = field_f64(row, "listing_price") {
        parts.push(format!("Listed at ${:.0}.", price));
    }
    if let Some(sqft) = field_f64(row, "square_feet") {
        parts.push(format!("{:.0} square feet.", sqft));
    }
    if let Some(region) = field_str(row, "region") {
        if region != "unknown" {
            parts.push(format!("Located in the {} region.", region.replace('_', " ")));
        }
    }
    if let Some(desc) = field_str(row, "description") {
        parts.push(desc.to_string());
    }
    if let Some(Value::Array(features)) = row.get("features") {
        let names: Vec<&str> = features.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            parts.push(format!("Features: {}.", names.join(", ")));
        }
    }
    parts.join(" ")
}

fn neighborhood_text(row: &Row) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = field_str(row, "name") {
        let mut headline = format!("{} neighborhood", name);
        if let Some(city) = field_str(row, "city") {
            headline.push_str(&format!(" in {}", city));
        }
        parts.push(format!("{}.", headline));
    }
    if let Some(score) = field_f64(row, "walkability_score") {
        parts.push(format!("Walkability score {:.0} of 100.", score));
    }
    if let Some(desc) = field_str(row, "description") {
        parts.push(desc.to_string());
    }
    if let Some(Value::Array(amenities)) = row.get("amenities") {
        let names: Vec<&str> = amenities.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            parts.push(format!("Amenities: {}.", names.join(", ")));
        }
    }
    parts.join(" ")
}

fn article_text(row: &Row) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = field_str(row, "title") {
        parts.push(format!("{}.", title));
    }
    if let Some(summary) = field_str(row, "summary") {
        parts.push(summary.to_string());
    }
    parts.join(" ")
}

fn location_text(row: &Row) -> String {
    match (field_f64(row, "latitude"), field_f64(row, "longitude")) {
        (Some(lat), Some(lon)) => format!("Location at {:.4}, {:.4}.", lat, lon),
        _ => String::new(),
    }
}
