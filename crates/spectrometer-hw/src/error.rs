//! Error types for talking to the spectrometer hardware.

use thiserror::Error;

/// Errors raised while configuring, connecting to or driving the
/// spectrometer and its server.
#[derive(Debug, Error)]
pub enum HwError {
    /// Requested settings cannot be realised by the hardware.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A sequence was sent before `connect()` was called.
    #[error("not connected: call `connect()` before sending sequences")]
    NotConnected,

    /// A network operation did not finish in time.
    #[error("timed out while {action}")]
    Timeout { action: String },

    /// An I/O error on the socket, the local file system or a child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be encoded as msgpack.
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A reply could not be decoded from msgpack.
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The server replied with something that violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported errors in the status of its reply.
    #[error("server reported errors: {}", errors.join("; "))]
    Server { errors: Vec<String> },

    /// A command on the remote host exited unsuccessfully.
    #[error("remote command `{command}` failed (exit status {status:?}): {stderr}")]
    Remote {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// An artifact could not be downloaded.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// An error propagated from `reqwest`.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// An error propagated from the core domain layer.
    #[error(transparent)]
    Core(#[from] spectrometer_core::Error),
}

impl HwError {
    /// Returns `true` when the error is transient and the operation may
    /// succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Download { .. } => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` when the error was caused by the caller's input.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::InvalidSettings(_) => true,
            Self::Core(err) => err.is_invalid_input(),
            _ => false,
        }
    }
}

/// Convenience alias for hardware results.
pub type Result<T> = std::result::Result<T, HwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(HwError::Timeout {
            action: "connecting".to_string()
        }
        .is_transient());
        assert!(HwError::Io(std::io::ErrorKind::ConnectionRefused.into()).is_transient());
        assert!(!HwError::Io(std::io::ErrorKind::NotFound.into()).is_transient());
        assert!(!HwError::NotConnected.is_transient());
        assert!(!HwError::Server {
            errors: vec!["fifo overflow".to_string()]
        }
        .is_transient());
    }

    #[test]
    fn test_invalid_input() {
        assert!(HwError::InvalidSettings("bad".to_string()).is_invalid_input());
        let core = spectrometer_core::Error::InvalidSequence("pulse must end".to_string());
        assert!(HwError::from(core).is_invalid_input());
        assert!(!HwError::NotConnected.is_invalid_input());
    }

    #[test]
    fn test_server_error_message_joins_errors() {
        let err = HwError::Server {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "server reported errors: a; b");
    }
}
