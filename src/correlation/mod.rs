//! Fuzzy correlation between monitoring alerts and incident records: feature
//! extraction, per-feature similarity scoring and the assignment engine.

pub mod engine;
pub mod extract;
pub mod similarity;
pub mod text;
