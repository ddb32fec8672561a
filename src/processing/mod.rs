//! Tier processing: per-phase context, structured results, and the
//! generic rule-driven processor.

pub mod context;
pub mod tier;

pub use context::{InvocationStage, ProcessingContext, ProcessingResult};
pub use tier::{QualityThresholds, TierProcessor};
