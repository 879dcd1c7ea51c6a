//! Taxonomy-aware retries for fallible operations.
//!
//! - [`RetryExecutor`] - classify, log, back off, retry.
//! - [`SleepProvider`] - pluggable wait strategy ([`TokioSleep`],
//!   [`TokioYield`]).

mod executor;
mod sleep;
#[cfg(test)]
mod tests;

pub use executor::*;
pub use sleep::*;
