//! russh-backed transport.
//!
//! Connects with a configurable deadline, authenticates with the password
//! credentials from the connection details, opens a session channel, and in
//! shell mode allocates a PTY and starts an interactive shell before handing
//! the stream over.

use std::future::Future;
use std::sync::Arc;

use russh::client;
use russh::keys::PublicKey;
use serde::Deserialize;

use super::Transport;
use super::stream::SshStream;
use crate::config::ConnectionDetails;
use crate::error::{MuxError, Result};

/// PTY geometry requested in shell mode.
///
/// Wide and tall on purpose: the remote side is driven programmatically and
/// oversized dimensions avoid line wrapping in command output.
const PTY_COLS: u32 = 500;
const PTY_ROWS: u32 = 500;

/// Server host key acceptance policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any server key.
    ///
    /// Matches the historical connector behavior of trusting the configured
    /// host. Every accepted key is logged at warn level; use
    /// [`RejectUnknown`](Self::RejectUnknown) when the deployment pins hosts
    /// by other means.
    #[default]
    AcceptAll,
    /// Reject every server key, refusing the connection.
    RejectUnknown,
}

/// Client handler that applies the host key policy.
pub(crate) struct ClientHandler {
    policy: HostKeyPolicy,
    host: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAll => {
                tracing::warn!(
                    host = %self.host,
                    key = ?server_public_key,
                    "accepting server key without verification"
                );
                Ok(true)
            }
            HostKeyPolicy::RejectUnknown => {
                tracing::debug!(
                    host = %self.host,
                    key = ?server_public_key,
                    "rejecting server key"
                );
                Ok(false)
            }
        }
    }
}

/// The production SSH transport.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host_key: HostKeyPolicy,
}

impl SshTransport {
    /// Create a transport with the given host key policy.
    #[must_use]
    pub const fn new(host_key: HostKeyPolicy) -> Self {
        Self { host_key }
    }

    async fn open_session(&self, details: &ConnectionDetails) -> Result<SshStream> {
        let ssh_config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            policy: self.host_key,
            host: details.host.clone(),
        };

        tracing::info!(
            host = %details.host,
            port = %details.port,
            user = %details.username,
            "connecting to SSH server"
        );

        let mut handle = tokio::time::timeout(
            details.timeout,
            client::connect(ssh_config, (details.host.as_str(), details.port), handler),
        )
        .await
        .map_err(|_| MuxError::timeout(details.timeout))?
        .map_err(|e| MuxError::connection(&details.host, details.port, e.to_string()))?;

        let auth = handle
            .authenticate_password(&details.username, &details.password)
            .await
            .map_err(|e| {
                MuxError::connection(
                    &details.host,
                    details.port,
                    format!("authentication exchange failed: {e}"),
                )
            })?;
        if !auth.success() {
            return Err(MuxError::authentication(
                &details.username,
                "password rejected by remote host",
            ));
        }

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| MuxError::channel(format!("session open failed: {e}")))?;

        if details.shell_mode {
            channel
                .request_pty(false, &details.term, PTY_COLS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| MuxError::channel(format!("PTY request failed: {e}")))?;
            channel
                .request_shell(false)
                .await
                .map_err(|e| MuxError::channel(format!("shell request failed: {e}")))?;
        }

        tracing::info!(
            host = %details.host,
            user = %details.username,
            shell_mode = details.shell_mode,
            "SSH session established"
        );

        Ok(SshStream::new(channel, handle))
    }
}

impl Transport for SshTransport {
    type Stream = SshStream;

    fn connect(
        &self,
        details: &ConnectionDetails,
    ) -> impl Future<Output = Result<Self::Stream>> + Send {
        self.open_session(details)
    }
}
