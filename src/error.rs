use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("no source data for entity '{entity}' at tier '{tier}'")]
    NoSourceData { entity: String, tier: String },

    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    #[error("no embedding provider configured")]
    NoEmbeddingProvider,

    #[error("state persistence error: {0}")]
    State(String),

    #[error("phase '{phase}' failed: {message}")]
    Phase { phase: String, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
