//! The callback sink boundary.
//!
//! Output never returns from a `send` call: the protocol is full duplex and
//! the remote side can emit data at any time, so everything a session
//! produces — including operational errors — is pushed through a single
//! [`CallbackSink`] tagged with the owning caller identity.

use tokio::sync::mpsc;

/// Receives session output and error notifications.
///
/// Implementations must be cheap and non-blocking: `deliver` is invoked from
/// each session's consumer loop, and a stalled sink stalls that session's
/// delivery (and, once the chunk queue fills, its producer).
pub trait CallbackSink: Send + Sync {
    /// Deliver one payload tagged with the caller identity that produced it.
    fn deliver(&self, payload: String, identity: &str);
}

/// Closures can act as sinks directly.
impl<F> CallbackSink for F
where
    F: Fn(String, &str) + Send + Sync,
{
    fn deliver(&self, payload: String, identity: &str) {
        self(payload, identity);
    }
}

/// One delivered payload with its owning identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    /// The delivered text chunk (or rendered error).
    pub payload: String,
    /// The caller identity the chunk belongs to.
    pub identity: String,
}

/// A [`CallbackSink`] that forwards events into an mpsc channel.
///
/// Useful when the embedding application consumes output from an async task,
/// and as the harness for the integration tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallbackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CallbackSink for ChannelSink {
    fn deliver(&self, payload: String, identity: &str) {
        let event = CallbackEvent {
            payload,
            identity: identity.to_string(),
        };
        if self.tx.send(event).is_err() {
            tracing::warn!(user = %identity, "callback receiver dropped, discarding chunk");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.deliver("file1\n".to_string(), "alice");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, "file1\n");
        assert_eq!(event.identity, "alice");
    }

    #[test]
    fn closure_as_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |payload: String, identity: &str| {
                seen.lock().unwrap().push((payload, identity.to_string()));
            }
        };

        sink.deliver("ping".to_string(), "bob");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("ping".to_string(), "bob".to_string())]);
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.deliver("into the void".to_string(), "carol");
    }
}
