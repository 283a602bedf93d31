//! Drive the multiplexer against the mock transport.
//!
//! Shows the full lifecycle without a live SSH server: lazy session creation,
//! asynchronous output delivery, error reporting through the sink, and
//! release.
//!
//! ```sh
//! cargo run --example mock_driven
//! ```

use std::sync::Arc;
use std::time::Duration;

use ssh_mux::mock::MockTransport;
use ssh_mux::{ChannelSink, MuxConfig, SshMultiplexer};

#[tokio::main]
async fn main() -> ssh_mux::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let transport = MockTransport::new();
    transport.script_output("alice", "file1\nfile2\n");
    transport.fail_auth("mallory");

    let (sink, mut events) = ChannelSink::new();
    let config = MuxConfig::new("demo-host").shell_mode(true);
    let mux = SshMultiplexer::with_transport(config, Arc::new(sink), transport.clone())?;

    // First send opens alice's session; the scripted output streams back.
    mux.send("alice", "alice", "hunter2", "ls", true).await;

    // A rejected login is reported through the same channel, tagged mallory.
    mux.send("mallory", "mallory", "guess", "whoami", true).await;

    // Unsolicited output can arrive at any time.
    transport
        .stream("alice")
        .expect("alice's session is open")
        .push_output_str("you have mail\n");

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Some(event)) => println!("[{}] {}", event.identity, event.payload.trim_end()),
            _ => break,
        }
    }

    mux.release("alice").await;
    mux.shutdown().await;
    Ok(())
}
