//! End-to-end driver of one certificate generation.
//!
//! [`GenerationPipeline`] walks a [`GenerationJob`] through the tracker's
//! stages, calling an injected [`RenderBackend`] for template loading,
//! rendering and file preparation, and the numbering service for the
//! certificate number.

mod backend;
mod driver;
#[cfg(test)]
mod tests;

pub use backend::*;
pub use driver::*;
