//! Crate-level error types.

use std::io;

use crate::session::SessionId;
use crate::types::{RefusalReason, ScanTarget};

/// Error reported by a transport scanner.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The transport cannot be scanned right now (radio off, permissions, no adapter).
    #[error("scanner unavailable: {0}")]
    Unavailable(String),

    /// The scan started but the vendor layer reported a failure.
    #[error("{0}")]
    Failed(String),

    /// An I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ScanError {
    /// Create a failure with a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Error reported by a connector or an open printer link.
#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    /// The transport refused to open a channel to the target.
    #[error("open failed: {0}")]
    Open(String),

    /// The operation did not finish within its deadline.
    #[error("timed out")]
    Timeout,

    /// The link was closed underneath us.
    #[error("link closed")]
    Closed,

    /// The printer rejected the command.
    #[error("rejected: {0}")]
    Rejected(String),

    /// An I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Crate-level error type.
///
/// Every variant maps to a stable code via [`Error::code`], which is what the
/// request surface hands back to callers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Discovery was turned away without scanning. This is backpressure, not a failure.
    #[error("discovery refused: {0}")]
    DiscoveryRefused(RefusalReason),

    /// A single transport failed while scanning.
    #[error("{transport} scan failed: {source}")]
    ScanFailed {
        transport: ScanTarget,
        #[source]
        source: ScanError,
    },

    /// The watchdog reset the state machine before the scan completed.
    #[error("watchdog expired for session {session}")]
    WatchdogTimeout { session: SessionId },

    /// Opening a connection failed or timed out.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation needs an open connection and there is none.
    #[error("printer is not connected")]
    NotConnected,

    /// Writing to an open connection failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A request payload was malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The coordinator configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request names an operation this crate does not provide.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The worker thread that owns the requested state has exited.
    #[error("coordinator stopped")]
    Stopped,
}

impl Error {
    /// Stable error code for callers that render their own messages.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DiscoveryRefused(_) => "DISCOVERY_REFUSED",
            Error::ScanFailed { .. } => "SCAN_FAILED",
            Error::WatchdogTimeout { .. } => "WATCHDOG_TIMEOUT",
            Error::ConnectionFailed(_) => "CONNECTION_FAILED",
            Error::NotConnected => "NOT_CONNECTED",
            Error::SendFailed(_) => "SEND_FAILED",
            Error::InvalidArguments(_) => "INVALID_ARGUMENTS",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::Stopped => "STOPPED",
        }
    }

    /// Create a connection failure.
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create a send failure.
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Create an invalid-arguments error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns true for outcomes that discovery callers see as an empty list.
    pub fn is_discovery_soft_failure(&self) -> bool {
        matches!(
            self,
            Error::DiscoveryRefused(_) | Error::WatchdogTimeout { .. } | Error::ScanFailed { .. }
        )
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            Error::DiscoveryRefused(RefusalReason::CleaningUp).code(),
            "DISCOVERY_REFUSED"
        );
        assert_eq!(Error::NotConnected.code(), "NOT_CONNECTED");
        assert_eq!(Error::send_failed("x").code(), "SEND_FAILED");
        assert_eq!(Error::connection_failed("x").code(), "CONNECTION_FAILED");
        assert_eq!(Error::invalid_arguments("x").code(), "INVALID_ARGUMENTS");
        assert_eq!(
            Error::WatchdogTimeout {
                session: SessionId(3)
            }
            .code(),
            "WATCHDOG_TIMEOUT"
        );
    }

    #[test]
    fn test_scan_failed_keeps_source() {
        use std::error::Error as _;

        let err = Error::ScanFailed {
            transport: ScanTarget::Lan,
            source: ScanError::failed("socket closed"),
        };
        assert_eq!(err.to_string(), "LAN scan failed: socket closed");
        assert!(err.source().is_some());
        assert!(err.is_discovery_soft_failure());
    }

    #[test]
    fn test_connection_errors_are_not_soft() {
        assert!(!Error::NotConnected.is_discovery_soft_failure());
        assert!(!Error::connection_failed("timeout").is_discovery_soft_failure());
    }
}
