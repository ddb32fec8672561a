//! In-memory table store for development and testing.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::TableStore;
use crate::domain::Row;
use crate::error::{PipelineError, Result};
use crate::rules::{eval::apply_rule, TierRule};

/// Tables held as vectors of rows behind one mutex; the orchestrator's
/// sequential phase ordering means contention is never meaningful here.
pub struct InMemoryTableStore {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn rows_of(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| PipelineError::TableNotFound {
                table: table.to_string(),
            })
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table(&self, name: &str, rows: Vec<Row>) -> Result<u64> {
        let count = rows.len() as u64;
        let mut tables = self.tables.lock().unwrap();
        tables.insert(name.to_string(), rows);
        debug!(table = name, rows = count, "created table");
        Ok(count)
    }

    async fn apply_rule(
        &self,
        rule: &TierRule,
        source: &str,
        target: &str,
        limit: Option<usize>,
    ) -> Result<u64> {
        let mut rows = self.rows_of(source)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        let out = apply_rule(rule, &rows);
        let created = out.len() as u64;
        let mut tables = self.tables.lock().unwrap();
        tables.insert(target.to_string(), out);
        debug!(
            rule = %rule.name,
            source,
            target,
            created,
            "applied transformation rule"
        );
        Ok(created)
    }

    async fn count_records(&self, table: &str) -> Result<u64> {
        Ok(self.rows_of(table)?.len() as u64)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(table))
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.rows_of(table)?;
        let mut cols = BTreeSet::new();
        for row in &rows {
            for key in row.keys() {
                cols.insert(key.clone());
            }
        }
        Ok(cols.into_iter().collect())
    }

    async fn scan(&self, table: &str, limit: Option<usize>) -> Result<Vec<Row>> {
        let mut rows = self.rows_of(table)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DerivedField, Expr, Predicate};
    use serde_json::json;

    fn row(id: &str, price: f64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(id));
        row.insert("price".into(), json!(price));
        row
    }

    #[tokio::test]
    async fn test_create_and_count() {
        let store = InMemoryTableStore::new();
        let n = store
            .create_table("t1", vec![row("a", 1.0), row("b", 2.0)])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.count_records("t1").await.unwrap(), 2);
        assert!(store.table_exists("t1").await.unwrap());
        assert!(!store.table_exists("t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_table_errors() {
        let store = InMemoryTableStore::new();
        assert!(store.count_records("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_apply_rule_with_limit() {
        let store = InMemoryTableStore::new();
        store
            .create_table("src", vec![row("a", 1.0), row("b", 2.0), row("c", 3.0)])
            .await
            .unwrap();
        let rule = TierRule {
            name: "keep_positive".into(),
            source_filter: Some(Predicate::Gt(Expr::col("price"), Expr::num(0.0))),
            derived: vec![DerivedField::new(
                "doubled",
                Expr::col("price").mul(Expr::num(2.0)),
            )],
        };
        let created = store.apply_rule(&rule, "src", "dst", Some(2)).await.unwrap();
        assert_eq!(created, 2);
        let rows = store.scan("dst", None).await.unwrap();
        assert_eq!(rows[0].get("doubled"), Some(&json!(2.0)));
    }

    #[tokio::test]
    async fn test_columns_union_across_rows() {
        let store = InMemoryTableStore::new();
        let mut sparse = Row::new();
        sparse.insert("id".into(), json!("x"));
        sparse.insert("extra".into(), json!(1));
        store
            .create_table("t", vec![row("a", 1.0), sparse])
            .await
            .unwrap();
        let cols = store.columns("t").await.unwrap();
        assert_eq!(cols, vec!["extra", "id", "price"]);
    }
}
