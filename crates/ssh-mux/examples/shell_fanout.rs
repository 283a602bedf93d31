//! Multiplex two users against a live SSH host.
//!
//! Reads the target from the environment and keeps one shell session per
//! user while printing everything the remote sides emit:
//!
//! ```sh
//! SSH_MUX_HOST=gateway.example.com \
//! SSH_MUX_USER=alice SSH_MUX_PASSWORD=secret \
//! cargo run --example shell_fanout
//! ```

use std::sync::Arc;
use std::time::Duration;

use ssh_mux::{ChannelSink, MuxConfig, SshMultiplexer};

#[tokio::main]
async fn main() -> ssh_mux::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Ok(user) = std::env::var("SSH_MUX_USER") else {
        eprintln!("set SSH_MUX_HOST, SSH_MUX_USER and SSH_MUX_PASSWORD to run this example");
        return Ok(());
    };
    let password = std::env::var("SSH_MUX_PASSWORD").unwrap_or_default();

    let (sink, mut events) = ChannelSink::new();
    let config = MuxConfig::new("")
        .shell_mode(true)
        .with_env_overrides()?;
    let mux = SshMultiplexer::new(config, Arc::new(sink))?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print!("[{}] {}", event.identity, event.payload);
        }
    });

    mux.send(&user, &user, &password, "hostname", true).await;
    mux.send(&user, &user, &password, "uptime", true).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    mux.shutdown().await;
    drop(mux);
    printer.abort();
    Ok(())
}
