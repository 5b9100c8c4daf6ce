//! Structured logging setup.
//!
//! Hooks run as short-lived subprocesses of the host assistant, so logs go
//! to stderr (stdout belongs to the hook protocol). JSON is the default
//! format; `pretty` is for local debugging.

use tracing_subscriber::EnvFilter;

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logs.
    #[default]
    Json,
    /// Human-friendly logs for local debugging.
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Logging configuration resolved from config file and environment.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive, e.g. `tacit=debug`.
    pub filter: String,
}

impl LoggingConfig {
    /// Resolves the logging configuration.
    ///
    /// Precedence: `TACIT_LOG_FORMAT` / `TACIT_LOG_LEVEL` environment
    /// variables, then the supplied settings, then defaults (`json`,
    /// `tacit=info`, or `tacit=debug` when verbose).
    #[must_use]
    pub fn resolve(format: Option<&str>, level: Option<&str>, verbose: bool) -> Self {
        let format = std::env::var("TACIT_LOG_FORMAT")
            .ok()
            .as_deref()
            .and_then(LogFormat::parse)
            .or_else(|| format.and_then(LogFormat::parse))
            .unwrap_or_default();

        let filter = std::env::var("TACIT_LOG_LEVEL")
            .ok()
            .or_else(|| level.map(ToString::to_string))
            .map_or_else(
                || {
                    if verbose {
                        "tacit=debug".to_string()
                    } else {
                        "tacit=info".to_string()
                    }
                },
                normalize_level,
            );

        Self { format, filter }
    }
}

/// Installs the global tracing subscriber.
///
/// Safe to call once per process; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::new(config.filter.clone());
    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// Expands a bare level (`debug`) into a crate-scoped directive.
fn normalize_level(level: String) -> String {
    let normalized = level.trim().to_lowercase();
    if normalized.contains('=') || normalized.contains(',') {
        normalized
    } else {
        format!("tacit={normalized}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("debug".to_string()), "tacit=debug");
        assert_eq!(
            normalize_level("tacit=warn,hyper=info".to_string()),
            "tacit=warn,hyper=info"
        );
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("PRETTY"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
