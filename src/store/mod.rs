//! Table storage port.
//!
//! The analytic engine itself is an external collaborator; the pipeline
//! only needs this narrow surface. The in-memory implementation interprets
//! rules directly, while a SQL-backed implementation would submit the
//! statement produced by [`crate::rules::sql::render_create_table`] over
//! its shared connection.

pub mod memory;

use async_trait::async_trait;

use crate::domain::Row;
use crate::error::Result;
use crate::rules::TierRule;

pub use memory::InMemoryTableStore;

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Creates a table from pre-materialized rows. Replaces any existing
    /// table of the same name.
    async fn create_table(&self, name: &str, rows: Vec<Row>) -> Result<u64>;

    /// Applies a tier rule, writing `target` from `source`. Returns the
    /// number of rows created. `limit` caps how many source rows are read.
    async fn apply_rule(
        &self,
        rule: &TierRule,
        source: &str,
        target: &str,
        limit: Option<usize>,
    ) -> Result<u64>;

    async fn count_records(&self, table: &str) -> Result<u64>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn table_names(&self) -> Result<Vec<String>>;

    /// Column names present anywhere in the table.
    async fn columns(&self, table: &str) -> Result<Vec<String>>;

    async fn scan(&self, table: &str, limit: Option<usize>) -> Result<Vec<Row>>;
}
