//! Connector-facing operations.
//!
//! [`SshMultiplexer`] is the operational surface the embedding application
//! talks to: `send` payloads for an identity, `release` an identity's
//! session, `shutdown` everything. Failures on the send path are not thrown
//! back to the caller — they are rendered and delivered through the same
//! callback sink as regular output, tagged with the identity, so the
//! application consumes exactly one asynchronous notification channel.

use std::sync::Arc;

use crate::config::{ConnectionDetails, MuxConfig};
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::sink::CallbackSink;
use crate::transport::Transport;
use crate::transport::ssh::SshTransport;

/// Multiplexes SSH sessions per caller identity.
///
/// Handles N sessions for N identities; each identity has at most one live
/// session at a time, reused across sends until released.
pub struct SshMultiplexer<T: Transport = SshTransport> {
    config: MuxConfig,
    sink: Arc<dyn CallbackSink>,
    registry: SessionRegistry<T>,
}

impl SshMultiplexer<SshTransport> {
    /// Create a multiplexer backed by the production SSH transport.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`](crate::MuxError) if the configuration is
    /// invalid; configuration problems fail fast instead of surfacing later
    /// through the sink.
    pub fn new(config: MuxConfig, sink: Arc<dyn CallbackSink>) -> Result<Self> {
        let transport = SshTransport::new(config.host_key);
        Self::with_transport(config, sink, transport)
    }
}

impl<T: Transport> SshMultiplexer<T> {
    /// Create a multiplexer over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`](crate::MuxError) if the configuration is
    /// invalid.
    pub fn with_transport(
        config: MuxConfig,
        sink: Arc<dyn CallbackSink>,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            registry: SessionRegistry::new(transport),
        })
    }

    /// Send `content` over the identity's session, creating it on first use.
    ///
    /// The session stays open afterwards; it is up to the caller to
    /// [`release`](Self::release) it. With `append_newline` a `\n` is
    /// appended, which shells interpret as end-of-command.
    ///
    /// Never fails synchronously: connect, authentication, and write errors
    /// are delivered through the callback sink tagged with `identity`, and
    /// the failed session is closed and removed so the next send starts
    /// clean.
    pub async fn send(
        &self,
        identity: &str,
        username: &str,
        password: &str,
        content: &str,
        append_newline: bool,
    ) {
        let details = ConnectionDetails::new(
            &self.config,
            Arc::clone(&self.sink),
            identity,
            username,
            password,
        );
        let client = self.registry.get_or_create(details);

        let payload = if append_newline {
            format!("{content}\n")
        } else {
            content.to_string()
        };

        if let Err(err) = client.send(&payload).await {
            tracing::error!(
                user = %identity,
                error = %err,
                "send failed, reporting through callback sink"
            );
            self.sink.deliver(err.to_string(), identity);
            // Self-healing: drop the broken session so the next send for
            // this identity starts from a clean connect.
            self.registry.evict(identity, client.id());
            client.close().await;
        }
    }

    /// Release the session associated with `identity`, if any.
    ///
    /// Idempotent; returns whether a session was actually released.
    pub async fn release(&self, identity: &str) -> bool {
        self.registry.release(identity).await
    }

    /// Release every active session.
    pub async fn shutdown(&self) {
        self.registry.release_all().await;
    }

    /// The connector configuration.
    #[must_use]
    pub const fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// The underlying session registry.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry<T> {
        &self.registry
    }
}

impl<T: Transport> std::fmt::Debug for SshMultiplexer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshMultiplexer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
