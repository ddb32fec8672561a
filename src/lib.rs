//! Medallion-tier real estate data pipeline.
//!
//! Source records flow bronze (raw) to silver (cleaned) to gold
//! (business-enriched) to enriched (geographic), then through document
//! conversion, chunking, and batch embedding. Every run persists a state
//! snapshot so interrupted pipelines resume from their last completed
//! phase.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod loaders;
pub mod logging;
pub mod observability;
pub mod orchestrator;
pub mod output;
pub mod processing;
pub mod rules;
pub mod state;
pub mod store;
