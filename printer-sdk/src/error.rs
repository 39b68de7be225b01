use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Connection error: {0}")]
    Connection(#[from] printer_stream::ConnectionError),

    #[error("Configuration error: {0}")]
    Config(#[from] printer_stream::ConfigError),

    #[error("Command failed: {0}")]
    Command(#[from] printer_stream::CallError),

    #[error("Logging error: {0}")]
    Logging(#[from] printer_state::LoggingError),

    #[error("Invalid sample interval: must be greater than 0")]
    InvalidSampleInterval,
}
