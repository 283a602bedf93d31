//! ssh-mux: SSH session multiplexing with asynchronous output streaming.
//!
//! This crate maintains one live SSH session per caller identity: sessions
//! are opened lazily on first send, reused across sends, and released
//! explicitly. Output is full duplex — the remote side can emit data at any
//! time, not just in reply to a send — so everything a session produces is
//! streamed through a caller-supplied [`CallbackSink`] tagged with the owning
//! identity. Operational failures travel through the same sink, keeping the
//! application on a single asynchronous notification channel.
//!
//! # Architecture
//!
//! - [`SshMultiplexer`] — the operational surface: send, release, shutdown.
//! - [`SessionRegistry`] — identity → session mapping, at most one live
//!   session per identity.
//! - [`SessionClient`] — one remote session plus its two worker loops: a
//!   producer reading raw output into a [`ChunkQueue`], and a consumer
//!   draining the queue into the sink.
//! - [`Transport`] — the seam below which russh does the protocol work;
//!   [`mock::MockTransport`] swaps in for tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ssh_mux::{ChannelSink, MuxConfig, SshMultiplexer};
//!
//! #[tokio::main]
//! async fn main() -> ssh_mux::Result<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!     let config = MuxConfig::new("bastion.internal").shell_mode(true);
//!     let mux = SshMultiplexer::new(config, Arc::new(sink))?;
//!
//!     mux.send("alice", "alice", "hunter2", "uptime", true).await;
//!     if let Some(event) = events.recv().await {
//!         println!("[{}] {}", event.identity, event.payload);
//!     }
//!
//!     mux.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod mock;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod transport;

pub use client::{SessionClient, SessionId};
pub use config::{
    ConnectionDetails, DEFAULT_PORT, DEFAULT_RECEIVER_BUFFER_SIZE, DEFAULT_TERM, DEFAULT_TIMEOUT,
    MuxConfig,
};
pub use connector::SshMultiplexer;
pub use error::{MuxError, Result};
pub use queue::{ChunkQueue, DEFAULT_QUEUE_CAPACITY, OverflowPolicy, QueueConfig};
pub use registry::SessionRegistry;
pub use sink::{CallbackEvent, CallbackSink, ChannelSink};
pub use transport::Transport;
pub use transport::ssh::{HostKeyPolicy, SshTransport};
pub use transport::stream::SshStream;
