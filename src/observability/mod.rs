//! Logging initialization and the diagnostic file sink.

mod diagnostic;
mod logging;

pub use diagnostic::DiagnosticSink;
pub use logging::{LogFormat, LoggingConfig, init_logging};
