//! Logging setup.
//!
//! Every crate logs through `tracing` with structured fields; this module
//! installs the subscriber for the binary.

mod logging;

pub use logging::{init_logging, LogFormat};
