//! Logging and diagnostics.

mod logging;

pub use logging::{init_logging, LogFormat};
