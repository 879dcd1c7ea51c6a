pub mod config;
pub mod error;
pub mod handler;
pub mod stream;
pub mod telemetry;
#[cfg(test)]
mod tests;
