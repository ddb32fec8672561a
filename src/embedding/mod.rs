//! Embedding generation: enriched records become text documents, text
//! documents become chunks, chunks become vectors.

pub mod batch;
pub mod chunker;
pub mod convert;
pub mod pipeline;
pub mod provider;

pub use batch::{BatchConfig, BatchOutcome, BatchProcessor};
pub use chunker::{ChunkingPolicy, TextChunker, TextNode};
pub use convert::{ConversionBatch, Document, DocumentConverter};
pub use pipeline::{EmbeddingPipeline, EmbeddingReport};
pub use provider::{EmbeddingClient, HttpEmbeddingClient, MockEmbeddingClient};
