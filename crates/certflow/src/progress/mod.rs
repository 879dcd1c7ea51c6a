//! Live progress of certificate generations.
//!
//! A [`ProgressTracker`] owns every in-flight [`GenerationSession`], applies
//! stage updates reported by the pipeline, and fans each change out to
//! [`Subscription`]s. Sessions that go quiet time out; terminal sessions are
//! evicted after a short delay.
//!
//! ```text
//! pending ──► in_progress ──► completed | failed | cancelled | timeout
//! ```

mod expiry;
mod session;
mod stage;
mod status;
mod subscription;
mod tracker;

pub(crate) use expiry::*;
pub use session::*;
pub use stage::*;
pub use status::*;
pub use subscription::*;
pub use tracker::*;
