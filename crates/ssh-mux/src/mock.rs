//! Mock transport for tests and offline development.
//!
//! [`MockTransport`] implements [`Transport`] without touching the network:
//! connects are recorded per identity, authentication and connection failures
//! can be injected, and each opened session is backed by a [`MockStream`]
//! whose remote side the test drives — pushing output, reading what the
//! client wrote, and hanging up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::ConnectionDetails;
use crate::error::{MuxError, Result};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct StreamState {
    /// Bytes queued for the client to read.
    output: VecDeque<u8>,
    /// Bytes the client has written.
    input: Vec<u8>,
    /// Remote side has hung up.
    eof: bool,
    /// Fail writes without ending the read side.
    write_error: bool,
    /// Waker of a pending read.
    read_waker: Option<Waker>,
}

/// One mock session's byte stream; clones share state.
///
/// The clone held by the test plays the remote side: it pushes output, reads
/// recorded input, and signals EOF.
#[derive(Debug, Clone, Default)]
pub struct MockStream {
    state: Arc<Mutex<StreamState>>,
}

impl MockStream {
    /// Create a new unconnected stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue output for the client to read.
    pub fn push_output(&self, data: &[u8]) {
        let waker = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.output.extend(data);
            state.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Queue a string for the client to read.
    pub fn push_output_str(&self, s: &str) {
        self.push_output(s.as_bytes());
    }

    /// Signal EOF: pending and future reads observe end-of-stream once the
    /// queued output is drained, and writes fail.
    pub fn close_remote(&self) {
        let waker = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.eof = true;
            state.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Make every subsequent write fail while reads stay pending.
    ///
    /// Models a session whose write side broke without the remote end
    /// hanging up.
    pub fn fail_writes(&self) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .write_error = true;
    }

    /// Take everything the client has written so far.
    #[must_use]
    pub fn take_input(&self) -> Vec<u8> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut state.input)
    }

    /// Take written input as a string.
    #[must_use]
    pub fn take_input_str(&self) -> String {
        String::from_utf8_lossy(&self.take_input()).into_owned()
    }

    /// Check if EOF has been signaled.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .eof
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !state.output.is_empty() {
            let len = std::cmp::min(buf.remaining(), state.output.len());
            let data: Vec<u8> = state.output.drain(..len).collect();
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }

        if state.eof {
            return Poll::Ready(Ok(()));
        }

        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.eof {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "remote side closed",
            )));
        }
        if state.write_error {
            return Poll::Ready(Err(io::Error::other("injected write failure")));
        }

        state.input.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Default)]
struct MockInner {
    /// Identities in connect order.
    connects: Mutex<Vec<String>>,
    /// Usernames whose authentication is rejected.
    auth_failures: Mutex<HashSet<String>>,
    /// Usernames whose connection attempt fails outright.
    connect_failures: Mutex<HashSet<String>>,
    /// Output preloaded onto the next session opened for an identity.
    scripts: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    /// Live stream handle per identity, replaced on reconnect.
    streams: Mutex<HashMap<String, MockStream>>,
}

/// A [`Transport`] whose remote side is driven by the test.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Create a new mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject authentication for the given username.
    pub fn fail_auth(&self, username: impl Into<String>) {
        self.inner
            .auth_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(username.into());
    }

    /// Fail the connection attempt for the given username.
    pub fn fail_connect(&self, username: impl Into<String>) {
        self.inner
            .connect_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(username.into());
    }

    /// Preload output onto the next session opened for `identity`.
    pub fn script_output(&self, identity: impl Into<String>, data: &str) {
        self.inner
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(identity.into())
            .or_default()
            .push(data.as_bytes().to_vec());
    }

    /// Total number of successful connects.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner
            .connects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Number of successful connects for one identity.
    #[must_use]
    pub fn connects_for(&self, identity: &str) -> usize {
        self.inner
            .connects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|i| i.as_str() == identity)
            .count()
    }

    /// The live stream for an identity, if one has been opened.
    #[must_use]
    pub fn stream(&self, identity: &str) -> Option<MockStream> {
        self.inner
            .streams
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    fn open(&self, details: &ConnectionDetails) -> Result<MockStream> {
        if self
            .inner
            .connect_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&details.username)
        {
            return Err(MuxError::connection(
                &details.host,
                details.port,
                "mock connection refused",
            ));
        }

        if self
            .inner
            .auth_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&details.username)
        {
            return Err(MuxError::authentication(
                &details.username,
                "mock credentials rejected",
            ));
        }

        let stream = MockStream::new();

        let scripted = self
            .inner
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&details.identity)
            .unwrap_or_default();
        for chunk in scripted {
            stream.push_output(&chunk);
        }

        self.inner
            .connects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(details.identity.clone());
        self.inner
            .streams
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(details.identity.clone(), stream.clone());

        Ok(stream)
    }
}

impl Transport for MockTransport {
    type Stream = MockStream;

    fn connect(
        &self,
        details: &ConnectionDetails,
    ) -> impl Future<Output = Result<Self::Stream>> + Send {
        let result = self.open(details);
        async move { result }
    }
}
