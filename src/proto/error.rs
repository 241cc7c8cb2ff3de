use std::io;

use thiserror::Error;

/// Result type alias for remux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when connecting to or talking to a Redis server.
///
/// Connection-fatal kinds ([`Io`](Error::Io), [`Protocol`](Error::Protocol),
/// [`Timeout`](Error::Timeout) and every connect-phase kind) force the
/// connection into its reconnect path. [`Command`](Error::Command) is scoped
/// to the request that provoked it and leaves the connection healthy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// DNS resolution of the configured host failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        /// The host that could not be resolved.
        host: String,
        /// The underlying resolver error.
        source: io::Error,
    },

    /// TCP connect failed for every resolved address.
    #[error("connect failed: {source}")]
    Connect {
        /// The last connect error observed.
        source: io::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[from] TlsHandshakeError),

    /// Authentication was rejected by the server.
    #[error("authentication failed: {message}")]
    Auth {
        /// Error message from the server.
        message: String,
    },

    /// A protocol error occurred. Fatal to the connection; the stream is
    /// never resynchronized.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// An IO error occurred on the transport.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A health-check probe went unanswered.
    #[error("health check timed out")]
    Timeout,

    /// The request (or the whole connection) was canceled.
    #[error("operation canceled")]
    Canceled,

    /// The server replied with an error frame for a specific command.
    #[error("server error: {message}")]
    Command {
        /// Error message from the server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },
}

impl Error {
    /// Returns true if this error kind is fatal to the connection and must
    /// trigger the reconnect path.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Error::Command { .. } | Error::InvalidArgument { .. })
    }
}

/// Error returned when the TLS handshake fails.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsHandshakeError {
    /// The certificate-verification hook rejected the peer.
    #[error("peer certificate verification failed")]
    VerificationFailed,

    /// The handshake itself failed.
    #[error("{source}")]
    Failed {
        /// The underlying handshake error.
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_resolve() {
        let error = Error::Resolve {
            host: "db.example".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        };
        assert!(error.to_string().contains("db.example"));
        assert!(error.is_connection_fatal());
    }

    #[test]
    fn test_error_display_auth() {
        let error = Error::Auth {
            message: "WRONGPASS invalid username-password pair".to_string(),
        };
        assert!(error.to_string().contains("authentication failed"));
    }

    #[test]
    fn test_error_display_protocol() {
        let error = Error::Protocol {
            message: "invalid frame".to_string(),
        };
        assert_eq!(error.to_string(), "protocol error: invalid frame");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "test");
        let error: Error = io_err.into();
        assert!(matches!(error, Error::Io { .. }));
        assert!(error.is_connection_fatal());
    }

    #[test]
    fn test_error_command_is_not_fatal() {
        let error = Error::Command {
            message: "ERR wrong type".to_string(),
        };
        assert!(!error.is_connection_fatal());
    }

    #[test]
    fn test_tls_verification_failed() {
        let error: Error = TlsHandshakeError::VerificationFailed.into();
        assert!(matches!(
            error,
            Error::TlsHandshake(TlsHandshakeError::VerificationFailed)
        ));
        assert!(error.to_string().contains("verification failed"));
    }
}
