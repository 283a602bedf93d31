//! The transport boundary.
//!
//! Everything below the multiplexer — connecting, authenticating, opening a
//! session, PTY/shell setup — sits behind [`Transport`]. The production
//! implementation is [`ssh::SshTransport`]; tests and offline development use
//! [`crate::mock::MockTransport`].

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ConnectionDetails;
use crate::error::Result;

pub mod ssh;
pub mod stream;

/// Opens remote sessions for the registry.
///
/// A successful connect yields a fully set-up duplex byte stream: connected,
/// authenticated, session opened, and (in shell mode) PTY allocated with a
/// shell running. Dropping the stream tears the session down.
pub trait Transport: Send + Sync + 'static {
    /// The duplex byte stream of an open session.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connect, authenticate, and open a session for `details`.
    ///
    /// Errors are classified per the connector's taxonomy: credential
    /// rejection is [`MuxError::Authentication`](crate::MuxError), anything
    /// else that fails during setup is a connection, timeout, or channel
    /// error. No partial state survives a failed connect.
    fn connect(
        &self,
        details: &ConnectionDetails,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}
