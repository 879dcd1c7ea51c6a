//! Failure taxonomy and classification.
//!
//! Every failure that crosses a service boundary in this crate is a
//! [`ClassifiedError`]: raw store, backend, or I/O errors are wrapped at the
//! point they are first observed and carry a fixed category, severity,
//! retryability flag, and user-facing message from then on.
//!
//! - [`category`] - the twelve categories and their fixed properties.
//! - [`classified`] - the normalized error record and its logging.
//! - [`classify`] - message heuristics and [`OperationError`] conversion.
//! - [`response`] - caller-facing rendering of terminal failures.

mod category;
mod classified;
mod classify;
mod response;

pub use category::*;
pub use classified::*;
pub use classify::*;
pub use response::*;

pub type Result<T, E = ClassifiedError> = core::result::Result<T, E>;
