//! Error types for fleet deployment.
//!
//! Each error belongs to one phase of a device's deployment: rendering the
//! configuration, establishing the session, or one protocol step. Worker-level
//! errors are captured into the device's outcome and never abort the run;
//! only [`DeployError`] is returned from the orchestrator itself.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while rendering a device's configuration.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The per-device template data file does not exist
    #[error("no host data for {device}: {} not found", .path.display())]
    MissingHostData {
        /// Device the data was looked up for
        device: String,
        /// Path that was tried
        path: PathBuf,
    },

    /// The per-device template data could not be read or parsed
    #[error("invalid host data for {device}: {message}")]
    InvalidHostData {
        /// Device the data belongs to
        device: String,
        /// Parser or IO error message
        message: String,
    },

    /// The template itself is malformed
    #[error("template syntax error at line {line}: {message}")]
    TemplateSyntax {
        /// Line number (1-indexed)
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// The template referenced a variable the host data does not define
    #[error("undefined template variable '{name}' at line {line}")]
    UndefinedVariable {
        /// Dotted variable path
        name: String,
        /// Line number (1-indexed)
        line: usize,
    },

    /// Other rendering failure
    #[error("{0}")]
    Other(String),
}

/// Categories of connection failures.
///
/// Categories decide the advice shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCategory {
    /// Credentials were rejected
    Auth,
    /// Nothing listening, or the host could not be reached
    Network,
    /// The host key did not match
    HostKey,
    /// No answer within the connect timeout
    Timeout,
    /// A required local program is missing
    ToolMissing,
    /// The session opened but the protocol handshake failed
    Handshake,
    /// Other/unknown errors
    Other,
}

impl ConnectCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Auth => "Authentication failed",
            Self::Network => "Device unreachable",
            Self::HostKey => "Host key verification failed",
            Self::Timeout => "Connection timed out",
            Self::ToolMissing => "Local tool missing",
            Self::Handshake => "Protocol handshake failed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Auth => "Check NETPUSH_USERNAME / NETPUSH_PASSWORD",
            Self::Network => "Check the inventory address and that the management port is open",
            Self::HostKey => "Update known_hosts or disable strict host key checking",
            Self::Timeout => "Check reachability or raise timeouts.connect_secs",
            Self::ToolMissing => "Install ssh (and sshpass for password logins)",
            Self::Handshake => "Check that the NETCONF subsystem is enabled on the device",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors establishing a management session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Credentials were rejected
    #[error("authentication failed for {user}@{address}")]
    Auth {
        /// Device address
        address: String,
        /// User that tried to log in
        user: String,
    },

    /// Connection refused or host unreachable
    #[error("cannot reach {address}: {message}")]
    Unreachable {
        /// Device address
        address: String,
        /// Underlying error message
        message: String,
    },

    /// Host key verification failed
    #[error("host key verification failed for {address}")]
    HostKey {
        /// Device address
        address: String,
    },

    /// No session within the connect timeout
    #[error("timed out after {secs}s connecting to {address}")]
    Timeout {
        /// Device address
        address: String,
        /// Timeout that expired
        secs: u64,
    },

    /// A local program needed to connect is missing
    #[error("{program} not found in PATH")]
    ToolMissing {
        /// Program name
        program: String,
    },

    /// The channel opened but the session handshake failed
    #[error("session setup with {address} failed: {message}")]
    Handshake {
        /// Device address
        address: String,
        /// What went wrong
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    /// Get the error category.
    pub fn category(&self) -> ConnectCategory {
        match self {
            Self::Auth { .. } => ConnectCategory::Auth,
            Self::Unreachable { .. } => ConnectCategory::Network,
            Self::HostKey { .. } => ConnectCategory::HostKey,
            Self::Timeout { .. } => ConnectCategory::Timeout,
            Self::ToolMissing { .. } => ConnectCategory::ToolMissing,
            Self::Handshake { .. } => ConnectCategory::Handshake,
            Self::Io(_) => ConnectCategory::Other,
        }
    }
}

/// Errors while executing a protocol operation on an open session.
///
/// A device answering with an error is not a `ProtocolError`; that is a
/// reply (see [`crate::RpcReply`]). This covers the cases where no usable
/// reply arrived.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// No reply within the operation timeout
    #[error("no reply within {secs}s")]
    Timeout {
        /// Timeout that expired
        secs: u64,
    },

    /// The session ended underneath the operation
    #[error("session closed: {0}")]
    Closed(String),

    /// The reply could not be understood
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// Writing the request failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProtocolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The worker thread pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_category() {
        let err = ConnectError::Auth {
            address: "10.0.0.1".into(),
            user: "admin".into(),
        };
        assert_eq!(err.category(), ConnectCategory::Auth);
        assert_eq!(err.to_string(), "authentication failed for admin@10.0.0.1");

        let err = ConnectError::Timeout {
            address: "10.0.0.1".into(),
            secs: 30,
        };
        assert_eq!(err.category(), ConnectCategory::Timeout);
    }

    #[test]
    fn test_render_error_messages() {
        let err = RenderError::MissingHostData {
            device: "r1".into(),
            path: PathBuf::from("host_vars/r1.yaml"),
        };
        assert_eq!(
            err.to_string(),
            "no host data for r1: host_vars/r1.yaml not found"
        );

        let err = RenderError::UndefinedVariable {
            name: "ospf.area".into(),
            line: 3,
        };
        assert_eq!(
            err.to_string(),
            "undefined template variable 'ospf.area' at line 3"
        );
    }

    #[test]
    fn test_protocol_error_timeout() {
        assert!(ProtocolError::Timeout { secs: 5 }.is_timeout());
        assert!(!ProtocolError::Closed("eof".into()).is_timeout());
    }
}
