//! Secret redaction for diagnostics and logs.

mod redact;

pub use redact::{SecretRedactor, redact_secrets};
