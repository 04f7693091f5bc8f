//! Error types for PeerLink.
//!
//! This module provides a unified error type for all PeerLink operations.
//! Every variant carries a stable reason code (see [`Error::reason`]) so that
//! callers such as a UI can report *why* an operation failed without matching
//! on display strings.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for PeerLink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for PeerLink.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection attempt did not complete within the timeout
    #[error("connection to {addr} timed out after {secs} seconds")]
    ConnectTimeout {
        /// Target address
        addr: String,
        /// Timeout in seconds
        secs: u64,
    },

    /// Remote peer refused the connection
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    /// Host name could not be resolved
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Peer closed the stream before answering
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Remote peer answered with an `ERROR:` line
    #[error("peer reported error: {reason}")]
    Remote {
        /// Reason carried in the error line (e.g. `FILE_NOT_FOUND`)
        reason: String,
    },

    /// The local file catalog has no entry to verify the download against
    #[error("file '{0}' is not in the local catalog")]
    NotInCatalog(String),

    /// Stream ended before the announced length was received
    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// Announced length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Received content hash does not match the catalog hash
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash from the catalog
        expected: String,
        /// Hash of the received bytes
        actual: String,
    },

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    Protocol(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Protocol line exceeded the maximum length
    #[error("protocol line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Listening or discovery socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Unable to send the discovery broadcast
    #[error("unable to broadcast on network: {0}")]
    BroadcastFailed(String),

    /// File catalog error
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Invalid user input (addresses, file names)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the stable reason code for this error.
    ///
    /// Remote errors return the reason sent by the peer, so a missing file
    /// surfaces as `FILE_NOT_FOUND` exactly as it appeared on the wire.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            Self::ConnectionRefused(_) => "CONNECTION_REFUSED",
            Self::UnknownHost(_) => "UNKNOWN_HOST",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Remote { reason } => reason,
            Self::NotInCatalog(_) => "NOT_IN_CATALOG",
            Self::Truncated { .. } => "TRUNCATED",
            Self::HashMismatch { .. } => "HASH_MISMATCH",
            Self::Protocol(_) | Self::LineTooLong(_) => "PROTOCOL_ERROR",
            Self::UnexpectedResponse(_) => "UNEXPECTED_RESPONSE",
            Self::BindFailed { .. } => "BIND_FAILED",
            Self::BroadcastFailed(_) => "BROADCAST_FAILED",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::ConfigError(_) | Self::InvalidConfig { .. } => "CONFIG_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Returns whether retrying the same operation could succeed.
    ///
    /// Nothing in this crate retries automatically; this is a hint for callers.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ConnectionRefused(_)
                | Self::ConnectionClosed
                | Self::Truncated { .. }
                | Self::Timeout(_)
        )
    }

    /// Returns true if the error came from establishing the connection.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::ConnectionRefused(_) | Self::UnknownHost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_reason_passthrough() {
        let err = Error::Remote {
            reason: "FILE_NOT_FOUND".to_string(),
        };
        assert_eq!(err.reason(), "FILE_NOT_FOUND");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transfer_reasons() {
        let truncated = Error::Truncated {
            expected: 10,
            received: 4,
        };
        assert_eq!(truncated.reason(), "TRUNCATED");
        assert!(truncated.is_recoverable());

        let mismatch = Error::HashMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(mismatch.reason(), "HASH_MISMATCH");
        assert!(!mismatch.is_recoverable());
    }

    #[test]
    fn test_connection_errors() {
        let err = Error::ConnectTimeout {
            addr: "10.0.0.1:8000".to_string(),
            secs: 5,
        };
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), "CONNECT_TIMEOUT");
        assert!(err.to_string().contains("10.0.0.1:8000"));

        assert!(Error::UnknownHost("nowhere".to_string()).is_connection_error());
        assert!(!Error::ConnectionClosed.is_connection_error());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let err: Error = io_err.into();
        assert_eq!(err.reason(), "IO_ERROR");
    }
}
