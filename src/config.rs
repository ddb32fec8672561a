//! Pipeline configuration.
//!
//! Everything loads from a TOML file with full defaults, so a missing
//! config file still yields a runnable development setup. The embedding
//! API key is the one value that never lives in the file; it comes from
//! the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::batch::BatchConfig;
use crate::embedding::ChunkingPolicy;
use crate::error::Result;
use crate::rules::GeoReference;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Environment tag recorded in every state snapshot.
    pub environment: String,
    /// Directory for state snapshot files.
    pub state_dir: String,
    /// Directory for NDJSON output files.
    pub output_dir: String,
    /// Directory for rotated log files.
    pub log_dir: String,
    pub geo: GeoReference,
    pub chunking: ChunkingPolicy,
    pub embedding: EmbeddingConfig,
    pub quality: QualityConfig,
    pub features: FeatureFlags,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            state_dir: "state".to_string(),
            output_dir: "output".to_string(),
            log_dir: "logs".to_string(),
            geo: GeoReference::default(),
            chunking: ChunkingPolicy::default(),
            embedding: EmbeddingConfig::default(),
            quality: QualityConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider_url: String,
    pub model: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    pub batch_size: usize,
    pub max_workers: usize,
    pub batch_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "EMBEDDING_API_KEY".to_string(),
            batch_size: 32,
            max_workers: 4,
            batch_delay_ms: 100,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_quality: f64,
    pub min_completeness: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_quality: 0.8,
            min_completeness: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_geographic_enrichment: bool,
    pub enable_embeddings: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_geographic_enrichment: true,
            enable_embeddings: true,
        }
    }
}

impl PipelineConfig {
    /// Loads from a TOML file, falling back to defaults when the file
    /// does not exist. Runs before logging init, so it stays quiet; the
    /// entry point reports the resolved environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}
