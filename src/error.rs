//! Error types for mover-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// mover-link error types
///
/// A response timeout is deliberately absent: an exchange that hears nothing
/// back returns `Ok(None)`, and decode noise is dropped inside the decoder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening the transport failed
    #[error("Connection failed ({target}): {reason}")]
    Connection {
        /// Port path or host:port that was being opened
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport or link used after close
    #[error("Link is closed")]
    Closed,

    /// Track file has no recognizable coordinate block
    #[error("Track format error: {0}")]
    Format(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mutex poisoned
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Worker thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoisoned(e.to_string())
    }
}
