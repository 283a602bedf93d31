//! End-to-end multiplexing behavior over the mock transport.

use std::sync::Arc;
use std::time::Duration;

use ssh_mux::mock::MockTransport;
use ssh_mux::{CallbackEvent, ChannelSink, MuxConfig, SshMultiplexer};
use tokio::sync::mpsc::UnboundedReceiver;

fn mux_over(
    transport: &MockTransport,
) -> (
    SshMultiplexer<MockTransport>,
    UnboundedReceiver<CallbackEvent>,
) {
    let (sink, events) = ChannelSink::new();
    let mux = SshMultiplexer::with_transport(
        MuxConfig::new("mock-host").shell_mode(true),
        Arc::new(sink),
        transport.clone(),
    )
    .unwrap();
    (mux, events)
}

/// Receive events until their concatenated payload reaches `expected`.
async fn collect_payload(
    events: &mut UnboundedReceiver<CallbackEvent>,
    expected: &str,
    identity: &str,
) {
    let mut collected = String::new();
    while collected.len() < expected.len() {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for callback events")
            .expect("sink channel closed unexpectedly");
        assert_eq!(event.identity, identity);
        collected.push_str(&event.payload);
    }
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn concurrent_sends_share_one_connection() {
    let transport = MockTransport::new();
    let (mux, _events) = mux_over(&transport);
    let mux = Arc::new(mux);

    let mut handles = Vec::new();
    for i in 0..8 {
        let mux = Arc::clone(&mux);
        handles.push(tokio::spawn(async move {
            mux.send("alice", "alice", "pw", &format!("echo {i}"), true)
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(transport.connect_count(), 1);
    assert_eq!(mux.registry().len(), 1);
    mux.shutdown().await;
}

#[tokio::test]
async fn release_of_absent_identity_is_a_noop() {
    let transport = MockTransport::new();
    let (mux, _events) = mux_over(&transport);
    assert!(!mux.release("ghost").await);
}

#[tokio::test]
async fn send_after_release_reconnects() {
    let transport = MockTransport::new();
    let (mux, _events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.connects_for("alice"), 1);

    assert!(mux.release("alice").await);
    assert!(!mux.registry().contains("alice"));

    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.connects_for("alice"), 2);
    mux.shutdown().await;
}

#[tokio::test]
async fn chunks_arrive_in_order_with_identity() {
    let transport = MockTransport::new();
    let (mux, mut events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "start", true).await;
    let stream = transport.stream("alice").unwrap();
    stream.push_output_str("c1");
    stream.push_output_str("c2");
    stream.push_output_str("c3");

    collect_payload(&mut events, "c1c2c3", "alice").await;
    mux.shutdown().await;
}

#[tokio::test]
async fn shell_output_reaches_the_sink() {
    let transport = MockTransport::new();
    transport.script_output("alice", "file1\nfile2\n");
    let (mux, mut events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.stream("alice").unwrap().take_input_str(), "ls\n");

    collect_payload(&mut events, "file1\nfile2\n", "alice").await;
    mux.shutdown().await;
}

#[tokio::test]
async fn identities_are_independent() {
    let transport = MockTransport::new();
    let (mux, _events) = mux_over(&transport);
    let mux = Arc::new(mux);

    let alice = {
        let mux = Arc::clone(&mux);
        tokio::spawn(async move { mux.send("alice", "alice", "pw", "ls", true).await })
    };
    let bob = {
        let mux = Arc::clone(&mux);
        tokio::spawn(async move { mux.send("bob", "bob", "pw", "pwd", true).await })
    };
    alice.await.unwrap();
    bob.await.unwrap();

    assert_eq!(mux.registry().len(), 2);

    // Closing alice's session must not affect bob's.
    assert!(mux.release("alice").await);
    assert!(!mux.registry().contains("alice"));
    assert!(mux.registry().contains("bob"));

    mux.send("bob", "bob", "pw", "whoami", true).await;
    assert_eq!(transport.connects_for("bob"), 1);
    assert_eq!(
        transport.stream("bob").unwrap().take_input_str(),
        "pwd\nwhoami\n"
    );
    mux.shutdown().await;
}

#[tokio::test]
async fn auth_failure_reports_once_and_leaves_no_entry() {
    let transport = MockTransport::new();
    transport.fail_auth("carol");
    let (mux, mut events) = mux_over(&transport);

    // Must not panic or return an error synchronously.
    mux.send("carol", "carol", "wrong", "whoami", true).await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for the error notification")
        .unwrap();
    assert_eq!(event.identity, "carol");
    assert!(event.payload.contains("authentication failed"));

    // Exactly one notification, and no session left behind.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .is_err()
    );
    assert!(!mux.registry().contains("carol"));
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test]
async fn connect_failure_reports_through_sink() {
    let transport = MockTransport::new();
    transport.fail_connect("dave");
    let (mux, mut events) = mux_over(&transport);

    mux.send("dave", "dave", "pw", "ls", true).await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.identity, "dave");
    assert!(event.payload.contains("failed to connect"));
    assert!(!mux.registry().contains("dave"));
}

#[tokio::test]
async fn shutdown_releases_everything() {
    let transport = MockTransport::new();
    let (mux, _events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "ls", true).await;
    mux.send("bob", "bob", "pw", "ls", true).await;
    assert_eq!(mux.registry().len(), 2);

    mux.shutdown().await;
    assert!(mux.registry().is_empty());

    // The registry starts from empty again.
    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.connects_for("alice"), 2);
    mux.shutdown().await;
}

#[tokio::test]
async fn remote_hangup_evicts_the_session() {
    let transport = MockTransport::new();
    let (mux, mut events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "exit", true).await;
    let stream = transport.stream("alice").unwrap();
    stream.push_output_str("logout\n");
    stream.close_remote();

    // Output produced before the hangup still reaches the sink.
    collect_payload(&mut events, "logout\n", "alice").await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while mux.registry().contains("alice") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dead session should be evicted");

    // A fresh send reconnects.
    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.connects_for("alice"), 2);
    mux.shutdown().await;
}

#[tokio::test]
async fn write_failure_self_heals() {
    let transport = MockTransport::new();
    let (mux, mut events) = mux_over(&transport);

    mux.send("alice", "alice", "pw", "ls", true).await;
    assert_eq!(transport.connects_for("alice"), 1);

    // Break the write side without the remote end hanging up.
    transport.stream("alice").unwrap().fail_writes();
    mux.send("alice", "alice", "pw", "ls", true).await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.identity, "alice");
    assert!(event.payload.contains("error writing"));

    // The broken session was removed; the next send reconnects cleanly.
    mux.send("alice", "alice", "pw", "pwd", true).await;
    assert_eq!(transport.connects_for("alice"), 2);
    assert_eq!(transport.stream("alice").unwrap().take_input_str(), "pwd\n");
    mux.shutdown().await;
}
