//! Congestion prediction.
//!
//! The engine derives a feature vector from a request context, consults the
//! historical rollups, and delegates scoring to a pluggable strategy. The
//! shipped baseline is a deterministic function of its inputs plus the
//! current sample set; a trained model can replace it behind the same trait
//! without touching the engine contract.

pub mod baseline;
pub mod cache;
pub mod engine;
pub mod types;
