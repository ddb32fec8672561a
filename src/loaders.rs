//! Source data loaders.
//!
//! Loaders produce rows for the bronze tier. Typed deserialization at
//! this boundary makes malformed source files fail before a bronze table
//! is ever created; from silver onward everything is untyped rows.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

use crate::catalog::EntityType;
use crate::domain::{to_row, Neighborhood, Property, Row, WikipediaArticle};
use crate::error::{PipelineError, Result};

#[async_trait]
pub trait Loader: Send + Sync {
    /// Reads all source records for the entity as bronze rows.
    async fn load(&self, entity: EntityType) -> Result<Vec<Row>>;

    /// Human-readable source description for logs and state.
    fn describe(&self) -> String;
}

/// Loads records from a JSON array file or an NDJSON file.
pub struct JsonFileLoader {
    path: PathBuf,
}

impl JsonFileLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn parse_typed<T: DeserializeOwned + serde::Serialize>(&self, raw: &str) -> Result<Vec<Row>> {
        let records: Vec<T> = if raw.trim_start().starts_with('[') {
            serde_json::from_str(raw)?
        } else {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(serde_json::from_str::<T>)
                .collect::<std::result::Result<Vec<T>, _>>()?
        };
        records.iter().map(to_row).collect()
    }

    fn parse_untyped(&self, raw: &str) -> Result<Vec<Row>> {
        let values: Vec<Value> = if raw.trim_start().starts_with('[') {
            serde_json::from_str(raw)?
        } else {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(serde_json::from_str::<Value>)
                .collect::<std::result::Result<Vec<Value>, _>>()?
        };
        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::Config(format!(
                    "source record is not an object: {}",
                    other
                ))),
            })
            .collect()
    }
}

#[async_trait]
impl Loader for JsonFileLoader {
    async fn load(&self, entity: EntityType) -> Result<Vec<Row>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let rows = match entity {
            EntityType::Property => self.parse_typed::<Property>(&raw)?,
            EntityType::Neighborhood => self.parse_typed::<Neighborhood>(&raw)?,
            EntityType::WikipediaArticle => self.parse_typed::<WikipediaArticle>(&raw)?,
            EntityType::Location => self.parse_untyped(&raw)?,
        };
        info!(
            path = %self.path.display(),
            entity = entity.as_str(),
            records = rows.len(),
            "loaded source file"
        );
        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Loads records from a table in a SQLite database file.
pub struct SqliteLoader {
    path: PathBuf,
    table: String,
}

impl SqliteLoader {
    pub fn new(path: impl AsRef<Path>, table: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            table: table.into(),
        }
    }
}

#[async_trait]
impl Loader for SqliteLoader {
    async fn load(&self, entity: EntityType) -> Result<Vec<Row>> {
        let path = self.path.clone();
        let table = self.table.clone();
        // rusqlite connections are synchronous and not Send across
        // awaits, so the whole read happens on a blocking thread.
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Row>> {
            let conn = Connection::open(&path)?;
            let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table))?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = Vec::new();
            let mut result_rows = stmt.query([])?;
            while let Some(result_row) = result_rows.next()? {
                let mut row = Row::new();
                for (index, name) in column_names.iter().enumerate() {
                    let value = match result_row.get_ref(index)? {
                        ValueRef::Null => Value::Null,
                        ValueRef::Integer(i) => json!(i),
                        ValueRef::Real(f) => json!(f),
                        ValueRef::Text(bytes) => {
                            let text = String::from_utf8_lossy(bytes).to_string();
                            // JSON stored as text comes back structured.
                            match serde_json::from_str::<Value>(&text) {
                                Ok(parsed @ (Value::Array(_) | Value::Object(_))) => parsed,
                                _ => json!(text),
                            }
                        }
                        ValueRef::Blob(bytes) => json!(hex::encode(bytes)),
                    };
                    row.insert(name.clone(), value);
                }
                rows.push(row);
            }
            Ok(rows)
        })
        .await
        .map_err(|e| PipelineError::State(format!("sqlite load task failed: {}", e)))??;

        info!(
            path = %self.path.display(),
            table = %self.table,
            entity = entity.as_str(),
            records = rows.len(),
            "loaded sqlite table"
        );
        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}#{}", self.path.display(), self.table)
    }
}
