//! Process-wide tracing setup for the analytics engine.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// JSON logs at `info`, overridable via `RUST_LOG`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    crate::tracing::init(LogFormat::Json, "info");
}
