//! Error types for budge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("already connected to IMAP server")]
    AlreadyConnected,

    #[error("not connected to IMAP server")]
    NotConnected,

    #[error("connected to IMAP server but not logged in")]
    NotAuthenticated,

    #[error("imap connection error during {operation}: {source}")]
    Connection {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("imap authentication failed for user {identity}: {source}")]
    Authentication {
        identity: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to reconnect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether `reconnect` is a sensible response to this error.
    ///
    /// Transport failures are; credential rejections and call-order
    /// mistakes are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Io(_) | Self::Tls(_) | Self::ReconnectExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
