//! Error types for ssh-mux.
//!
//! The taxonomy mirrors the failure modes of the connector: authentication
//! rejections, transport failures during setup, write failures on an open
//! session, and configuration mistakes. Steady-state failures are reported
//! through the callback sink by [`SshMultiplexer`](crate::SshMultiplexer);
//! configuration errors fail fast and synchronously.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// The main error type for ssh-mux operations.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Credentials were rejected by the remote host.
    #[error("authentication failed for user '{user}': {reason}")]
    Authentication {
        /// The user that failed to authenticate.
        user: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network or transport failure while connecting or opening the session.
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connection {
        /// The host that could not be connected to.
        host: String,
        /// The port that was used.
        port: u16,
        /// The reason for the failure.
        reason: String,
    },

    /// The connect phase exceeded the configured timeout.
    #[error("connect timed out after {duration:?}")]
    Timeout {
        /// The duration that elapsed.
        duration: Duration,
    },

    /// Failure writing to an already-open session.
    #[error("error writing to the session for '{identity}': {source}")]
    Communication {
        /// The caller identity whose session failed.
        identity: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The session was released and cannot be reused.
    ///
    /// A [`SessionClient`](crate::SessionClient) is one-shot: once closed it
    /// never reopens. The registry hands out a fresh client instead.
    #[error("session for '{identity}' has been released")]
    SessionReleased {
        /// The caller identity of the released session.
        identity: String,
    },

    /// Session channel error (PTY request, shell request, channel open).
    #[error("session channel error: {reason}")]
    Channel {
        /// The reason for the channel error.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Result type alias for ssh-mux operations.
pub type Result<T> = std::result::Result<T, MuxError>;

impl MuxError {
    /// Create an authentication error.
    pub fn authentication(user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            user: user.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a communication error.
    pub fn communication(identity: impl Into<String>, source: io::Error) -> Self {
        Self::Communication {
            identity: identity.into(),
            source,
        }
    }

    /// Create a session-released error.
    pub fn session_released(identity: impl Into<String>) -> Self {
        Self::SessionReleased {
            identity: identity.into(),
        }
    }

    /// Create a channel error.
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Check if this is a connection or timeout error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this is a communication error.
    #[must_use]
    pub const fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_display() {
        let err = MuxError::authentication("alice", "password rejected");
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("password rejected"));
        assert!(err.is_authentication());
    }

    #[test]
    fn connection_display() {
        let err = MuxError::connection("bastion", 2222, "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("bastion:2222"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_connection());
    }

    #[test]
    fn timeout_is_connection_class() {
        let err = MuxError::timeout(Duration::from_secs(5));
        assert!(err.is_connection());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn communication_carries_source() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = MuxError::communication("bob", io_err);
        let msg = err.to_string();
        assert!(msg.contains("bob"));
        assert!(msg.contains("pipe closed"));
        assert!(err.is_communication());
    }

    #[test]
    fn config_display() {
        let err = MuxError::config("receiver buffer size must be greater than or equal to 1");
        assert!(err.is_config());
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn session_released_display() {
        let err = MuxError::session_released("carol");
        assert!(err.to_string().contains("carol"));
        assert!(!err.is_config());
    }
}
