//! Output boundary.
//!
//! The pipeline hands its final tables and embedded nodes to an
//! [`OutputWriter`]; the NDJSON writer is the default sink and the only
//! place rows are serialized for consumers outside the store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::domain::Row;
use crate::embedding::TextNode;
use crate::error::Result;

/// One file produced by an output writer.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub records: usize,
}

#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write_rows(&self, name: &str, rows: &[Row]) -> Result<OutputFile>;

    async fn write_nodes(&self, name: &str, nodes: &[TextNode]) -> Result<OutputFile>;
}

/// Writes newline-delimited JSON files into an output directory.
pub struct NdjsonOutputWriter {
    dir: PathBuf,
}

impl NdjsonOutputWriter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    async fn write_lines(&self, name: &str, lines: Vec<String>) -> Result<OutputFile> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.ndjson", name));
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        let bytes = body.len() as u64;
        let records = lines.len();
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), records, bytes, "wrote output file");
        Ok(OutputFile {
            path,
            bytes,
            records,
        })
    }
}

#[async_trait]
impl OutputWriter for NdjsonOutputWriter {
    async fn write_rows(&self, name: &str, rows: &[Row]) -> Result<OutputFile> {
        let lines = rows
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.write_lines(name, lines).await
    }

    async fn write_nodes(&self, name: &str, nodes: &[TextNode]) -> Result<OutputFile> {
        let lines = nodes
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.write_lines(name, lines).await
    }
}
