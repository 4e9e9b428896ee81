//! Error types for NETCONF sessions.

use deploykit::ProtocolError;
use thiserror::Error;

/// Errors on an established or establishing NETCONF session.
#[derive(Debug, Error)]
pub enum Error {
    /// No message within the allowed time
    #[error("no reply within {secs}s")]
    Timeout {
        /// Timeout that expired
        secs: u64,
    },

    /// The peer closed the stream or the session was already closed
    #[error("session closed: {0}")]
    Closed(String),

    /// The byte stream does not follow the negotiated framing
    #[error("framing error: {0}")]
    Framing(String),

    /// A message arrived but is not a usable hello or rpc-reply
    #[error("malformed message: {0}")]
    Malformed(String),

    /// IO error on the transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<Error> for ProtocolError {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout { secs } => Self::Timeout { secs },
            Error::Closed(message) => Self::Closed(message),
            Error::Framing(message) | Error::Malformed(message) => Self::Malformed(message),
            Error::Io(e) => Self::Transport(e.to_string()),
        }
    }
}

/// Result type for NETCONF operations.
pub type Result<T> = std::result::Result<T, Error>;
