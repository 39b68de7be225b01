//! Logging setup for the printer SDK
//!
//! Dashboards that draw to the terminal need a way to keep stderr quiet,
//! while daemons and demos want readable output. The mode is chosen once at
//! startup.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// How log output is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed
    Silent,
    /// Compact stderr output at info level
    Development,
    /// Pretty output with thread ids and source locations at debug level
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// Call this before connecting so the handshake is captured.
///
/// # Environment Variables
///
/// - `PRINTER_LOG_LEVEL`: filter directive (e.g. `printer_stream=debug`)
/// - `RUST_LOG`: used when `PRINTER_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `PRINTER_LOG_MODE`
///
/// - "silent" or unset -> `LoggingMode::Silent`
/// - "development" -> `LoggingMode::Development`
/// - "debug" -> `LoggingMode::Debug`
///
/// Any other value is rejected.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_logging(mode_from_env()?)
}

fn mode_from_env() -> Result<LoggingMode, LoggingError> {
    match std::env::var("PRINTER_LOG_MODE") {
        Err(_) => Ok(LoggingMode::Silent),
        Ok(value) => parse_mode(&value),
    }
}

fn parse_mode(value: &str) -> Result<LoggingMode, LoggingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "silent" => Ok(LoggingMode::Silent),
        "development" | "dev" => Ok(LoggingMode::Development),
        "debug" => Ok(LoggingMode::Debug),
        other => Err(LoggingError::InvalidEnv(format!(
            "PRINTER_LOG_MODE={other}"
        ))),
    }
}

/// Build a filter from `PRINTER_LOG_LEVEL`, then `RUST_LOG`, then the default
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = std::env::var("PRINTER_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directive)
        .map_err(|e| LoggingError::InvalidEnv(format!("{directive}: {e}")))
}

/// Shorthand for `init_logging(LoggingMode::Silent)`
pub fn init_silent() -> Result<(), LoggingError> {
    init_logging(LoggingMode::Silent)
}
