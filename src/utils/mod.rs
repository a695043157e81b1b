//! Shared utilities.

pub mod best_effort;

pub use best_effort::BestEffort;
