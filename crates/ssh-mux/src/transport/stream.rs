//! Byte-stream view of an open SSH session.
//!
//! [`SshStream`] adapts a russh channel to `AsyncRead`/`AsyncWrite` and owns
//! the connection handle, so the session and its connection live exactly as
//! long as the stream. Dropping the stream closes the channel and releases
//! the connection.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use russh::client;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::ssh::ClientHandler;

/// Duplex byte stream over an SSH session channel.
pub struct SshStream {
    /// The underlying russh channel.
    channel: russh::Channel<client::Msg>,
    /// Keeps the connection alive for the lifetime of the stream.
    _handle: client::Handle<ClientHandler>,
    /// Data received from the channel but not yet read by the caller.
    read_buffer: VecDeque<u8>,
    /// Exit status, when the remote command has reported one.
    exit_status: Option<u32>,
    /// Whether EOF has been received.
    eof: bool,
    /// Whether the channel has closed.
    closed: bool,
}

impl std::fmt::Debug for SshStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshStream")
            .field("read_buffer_len", &self.read_buffer.len())
            .field("exit_status", &self.exit_status)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SshStream {
    /// Wrap an open channel and the connection handle it depends on.
    pub(crate) fn new(
        channel: russh::Channel<client::Msg>,
        handle: client::Handle<ClientHandler>,
    ) -> Self {
        Self {
            channel,
            _handle: handle,
            read_buffer: VecDeque::with_capacity(8192),
            exit_status: None,
            eof: false,
            closed: false,
        }
    }

    /// Exit status reported by the remote command, if any.
    #[must_use]
    pub const fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Whether the remote side has sent EOF.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof
    }
}

impl AsyncRead for SshStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Serve buffered data first.
        if !self.read_buffer.is_empty() {
            let len = std::cmp::min(buf.remaining(), self.read_buffer.len());
            let data: Vec<u8> = self.read_buffer.drain(..len).collect();
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }

        if self.eof || self.closed {
            return Poll::Ready(Ok(()));
        }

        let this = self.get_mut();

        let wait_future = this.channel.wait();
        tokio::pin!(wait_future);

        match wait_future.poll(cx) {
            Poll::Ready(Some(msg)) => match msg {
                russh::ChannelMsg::Data { data } => {
                    let len = std::cmp::min(buf.remaining(), data.len());
                    buf.put_slice(&data[..len]);
                    if len < data.len() {
                        this.read_buffer.extend(&data[len..]);
                    }
                    Poll::Ready(Ok(()))
                }
                russh::ChannelMsg::ExtendedData { data, ext } => {
                    // ext 1 is stderr; fold it into the output stream.
                    if ext == 1 {
                        let len = std::cmp::min(buf.remaining(), data.len());
                        buf.put_slice(&data[..len]);
                        if len < data.len() {
                            this.read_buffer.extend(&data[len..]);
                        }
                        Poll::Ready(Ok(()))
                    } else {
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    }
                }
                russh::ChannelMsg::Eof => {
                    this.eof = true;
                    Poll::Ready(Ok(()))
                }
                russh::ChannelMsg::Close => {
                    this.closed = true;
                    Poll::Ready(Ok(()))
                }
                russh::ChannelMsg::ExitStatus { exit_status } => {
                    this.exit_status = Some(exit_status);
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                _ => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            },
            Poll::Ready(None) => {
                this.closed = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for SshStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.closed || this.eof {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session channel is closed",
            )));
        }

        let data_future = this.channel.data(buf);
        tokio::pin!(data_future);

        match data_future.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(buf.len())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(io::Error::other(format!(
                "SSH write error: {e}"
            )))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // SSH channels have no explicit flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let eof_future = this.channel.eof();
        tokio::pin!(eof_future);

        match eof_future.poll(cx) {
            Poll::Ready(Ok(())) => {
                this.eof = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(io::Error::other(format!(
                "SSH shutdown error: {e}"
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}
