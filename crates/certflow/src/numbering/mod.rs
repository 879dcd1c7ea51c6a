//! Atomic, year-scoped certificate numbering.
//!
//! Numbers are rendered from a template such as `{YEAR}-{SEQUENTIAL_NUMBER}`
//! and are unique and strictly increasing per `(entity, year)`. The sequence
//! restarts at the start number when the year changes.

mod cache;
mod format;
mod request;
mod service;
mod store;

pub use cache::*;
pub use format::*;
pub use request::*;
pub use service::*;
pub use store::*;
