mod config;
mod error;
mod ids;
#[cfg(all(test, feature = "tracing"))]
mod log_capture;
mod numbering;
mod pipeline;
mod progress;
mod retry;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::numbering::*;
pub use crate::pipeline::*;
pub use crate::progress::*;
pub use crate::retry::*;
