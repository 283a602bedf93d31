//! Per-identity session client.
//!
//! A [`SessionClient`] owns one remote session: the write half of its byte
//! stream, the chunk queue, and the two worker loops that move output from
//! the stream into the callback sink. The session is opened lazily on the
//! first send and reused until released.
//!
//! Clients are one-shot: Closed → Open → Released. Once closed they never
//! reopen; the registry hands out a fresh client for the next send. This
//! keeps the open/close state machine race-free under concurrent sends and
//! releases.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::ConnectionDetails;
use crate::error::{MuxError, Result};
use crate::queue::ChunkQueue;
use crate::sink::CallbackSink;
use crate::transport::Transport;

/// Unique identifier of a client instance.
///
/// Used by the registry to tell a live entry apart from a stale one when a
/// terminated session tears itself down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    #[must_use]
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Invoked by the producer loop when the remote end hangs up, so the owner
/// can evict the dead session.
pub(crate) type TerminateHook = Arc<dyn Fn() + Send + Sync>;

/// Resources of an open session.
struct OpenSession<S> {
    writer: WriteHalf<S>,
    shutdown: watch::Sender<bool>,
    queue: Arc<ChunkQueue>,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// One caller identity's live remote session.
pub struct SessionClient<T: Transport> {
    id: SessionId,
    details: ConnectionDetails,
    transport: Arc<T>,
    /// Open/close transitions serialize against concurrent sends here.
    state: Mutex<Option<OpenSession<T::Stream>>>,
    open: AtomicBool,
    released: AtomicBool,
    on_terminate: TerminateHook,
}

impl<T: Transport> fmt::Debug for SessionClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("id", &self.id)
            .field("identity", &self.details.identity)
            .field("open", &self.is_open())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionClient<T> {
    pub(crate) fn new(
        id: SessionId,
        details: ConnectionDetails,
        transport: Arc<T>,
        on_terminate: TerminateHook,
    ) -> Self {
        Self {
            id,
            details,
            transport,
            state: Mutex::new(None),
            open: AtomicBool::new(false),
            released: AtomicBool::new(false),
            on_terminate,
        }
    }

    /// The client's instance id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// The caller identity this session belongs to.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.details.identity
    }

    /// The connection details the session was created with.
    #[must_use]
    pub const fn details(&self) -> &ConnectionDetails {
        &self.details
    }

    /// Whether the session is currently open.
    ///
    /// Reflects the last observed lifecycle transition; a session whose
    /// remote end just hung up reads as open until its teardown runs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the client has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Open the session if it is not open yet.
    ///
    /// Idempotent: an already-open session is left untouched.
    ///
    /// # Errors
    ///
    /// [`MuxError::Authentication`] if the credentials are rejected,
    /// [`MuxError::Connection`]/[`MuxError::Timeout`]/[`MuxError::Channel`]
    /// on any other setup failure, [`MuxError::SessionReleased`] if the
    /// client was already released. The client stays closed on failure; no
    /// partial state is retained.
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&mut state).await.map(|_| ())
    }

    /// Write `content` to the session, opening it first if needed.
    ///
    /// # Errors
    ///
    /// Everything [`open`](Self::open) can return, plus
    /// [`MuxError::Communication`] if the write to the open session fails.
    pub async fn send(&self, content: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let open = self.ensure_open(&mut state).await?;

        open.writer
            .write_all(content.as_bytes())
            .await
            .map_err(|e| MuxError::communication(&self.details.identity, e))?;
        open.writer
            .flush()
            .await
            .map_err(|e| MuxError::communication(&self.details.identity, e))?;

        tracing::trace!(
            user = %self.details.identity,
            bytes = content.len(),
            "payload written to session"
        );
        Ok(())
    }

    /// Close the session and release its resources.
    ///
    /// Idempotent and best-effort: signals both worker loops to stop, lets
    /// the consumer drain queued chunks, and never fails — close-time errors
    /// are logged and swallowed. The client is Released afterwards.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.released.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);

        let Some(session) = state.take() else {
            return;
        };
        drop(state);

        let OpenSession {
            writer,
            shutdown,
            queue,
            producer,
            consumer,
        } = session;

        let _ = shutdown.send(true);
        queue.close();
        drop(writer);

        if let Err(err) = producer.await {
            tracing::debug!(
                user = %self.details.identity,
                error = %err,
                "producer loop did not stop cleanly"
            );
        }
        if let Err(err) = consumer.await {
            tracing::debug!(
                user = %self.details.identity,
                error = %err,
                "consumer loop did not stop cleanly"
            );
        }

        tracing::debug!(user = %self.details.identity, id = %self.id, "session closed");
    }

    /// Open the session inside an already-held state lock.
    async fn ensure_open<'a>(
        &self,
        state: &'a mut Option<OpenSession<T::Stream>>,
    ) -> Result<&'a mut OpenSession<T::Stream>> {
        if self.is_released() {
            return Err(MuxError::session_released(&self.details.identity));
        }

        if state.is_none() {
            let session = self.connect_session().await?;
            *state = Some(session);
            self.open.store(true, Ordering::Release);
            tracing::info!(
                user = %self.details.identity,
                host = %self.details.address(),
                id = %self.id,
                "session opened"
            );
        }

        let Some(open) = state.as_mut() else {
            return Err(MuxError::channel("session state lost during open"));
        };
        Ok(open)
    }

    async fn connect_session(&self) -> Result<OpenSession<T::Stream>> {
        let stream = self.transport.connect(&self.details).await?;
        let (reader, writer) = tokio::io::split(stream);

        let queue = Arc::new(ChunkQueue::new(self.details.queue.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let producer = tokio::spawn(produce_loop(
            reader,
            Arc::clone(&queue),
            self.details.receiver_buffer_size,
            shutdown_rx,
            self.details.identity.clone(),
            Arc::clone(&self.on_terminate),
        ));
        let consumer = tokio::spawn(consume_loop(
            Arc::clone(&queue),
            Arc::clone(&self.details.sink),
            self.details.identity.clone(),
        ));

        Ok(OpenSession {
            writer,
            shutdown: shutdown_tx,
            queue,
            producer,
            consumer,
        })
    }
}

/// Why the producer loop stopped.
enum Termination {
    /// Remote end sent end-of-stream.
    Eof,
    /// The read failed.
    ReadError(io::Error),
    /// The owning client is closing.
    Shutdown,
}

/// Reads raw output from the session and feeds the chunk queue.
///
/// The buffer size sets the read granularity: one read produces at most one
/// chunk. Decoding is lossy, so a multi-byte sequence split across reads
/// degrades to replacement characters rather than failing the session.
async fn produce_loop<R>(
    mut reader: ReadHalf<R>,
    queue: Arc<ChunkQueue>,
    buffer_size: usize,
    mut shutdown: watch::Receiver<bool>,
    identity: String,
    on_terminate: TerminateHook,
) where
    R: AsyncRead + Send + 'static,
{
    let mut buf = vec![0u8; buffer_size];

    let reason = loop {
        tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => break Termination::Eof,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if queue.push(chunk).await.is_err() {
                        break Termination::Shutdown;
                    }
                }
                Err(e) => break Termination::ReadError(e),
            },
            _ = shutdown.changed() => break Termination::Shutdown,
        }
    };

    // Closing the queue lets the consumer drain what is left and stop.
    queue.close();

    match reason {
        Termination::Shutdown => {
            tracing::debug!(user = %identity, "producer loop stopped");
        }
        Termination::Eof => {
            tracing::debug!(user = %identity, "remote end closed the stream");
            on_terminate();
        }
        Termination::ReadError(e) => {
            tracing::debug!(user = %identity, error = %e, "session read failed");
            on_terminate();
        }
    }
}

/// Drains the chunk queue into the callback sink.
async fn consume_loop(queue: Arc<ChunkQueue>, sink: Arc<dyn CallbackSink>, identity: String) {
    while let Some(chunk) = queue.pop().await {
        sink.deliver(chunk, &identity);
    }
    tracing::debug!(user = %identity, "consumer loop drained and stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::MuxConfig;
    use crate::mock::MockTransport;

    fn client_for(
        transport: &MockTransport,
        identity: &str,
    ) -> SessionClient<MockTransport> {
        let details = ConnectionDetails::new(
            &MuxConfig::new("mock-host"),
            Arc::new(|_: String, _: &str| {}),
            identity,
            identity,
            "secret",
        );
        SessionClient::new(
            SessionId::new(),
            details,
            Arc::new(transport.clone()),
            Arc::new(|| {}),
        )
    }

    #[tokio::test]
    async fn send_opens_lazily_and_reuses() {
        let transport = MockTransport::new();
        let client = client_for(&transport, "alice");
        assert!(!client.is_open());

        client.send("ls\n").await.unwrap();
        assert!(client.is_open());
        assert_eq!(transport.connect_count(), 1);

        client.send("pwd\n").await.unwrap();
        assert_eq!(transport.connect_count(), 1);

        let stream = transport.stream("alice").unwrap();
        assert_eq!(stream.take_input_str(), "ls\npwd\n");
        client.close().await;
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let transport = MockTransport::new();
        let client = client_for(&transport, "alice");
        client.open().await.unwrap();
        client.open().await.unwrap();
        assert_eq!(transport.connect_count(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = MockTransport::new();
        let client = client_for(&transport, "alice");
        client.open().await.unwrap();
        client.close().await;
        client.close().await;
        assert!(!client.is_open());
        assert!(client.is_released());
    }

    #[tokio::test]
    async fn released_client_never_reopens() {
        let transport = MockTransport::new();
        let client = client_for(&transport, "alice");
        client.open().await.unwrap();
        client.close().await;

        let err = client.send("too late").await.unwrap_err();
        assert!(matches!(err, MuxError::SessionReleased { .. }));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn auth_failure_leaves_client_closed() {
        let transport = MockTransport::new();
        transport.fail_auth("carol");
        let client = client_for(&transport, "carol");

        let err = client.send("whoami\n").await.unwrap_err();
        assert!(err.is_authentication());
        assert!(!client.is_open());
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn remote_hangup_invokes_terminate_hook() {
        let transport = MockTransport::new();
        let details = ConnectionDetails::new(
            &MuxConfig::new("mock-host"),
            Arc::new(|_: String, _: &str| {}),
            "alice",
            "alice",
            "secret",
        );
        let terminated = Arc::new(AtomicBool::new(false));
        let hook = {
            let terminated = Arc::clone(&terminated);
            Arc::new(move || terminated.store(true, Ordering::Release))
        };
        let client =
            SessionClient::new(SessionId::new(), details, Arc::new(transport.clone()), hook);

        client.open().await.unwrap();
        transport.stream("alice").unwrap().close_remote();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !terminated.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.close().await;
    }
}
