//! Chunk queue between a session's producer and consumer loops.
//!
//! Each open session owns one [`ChunkQueue`]: the producer loop pushes
//! decoded output chunks, the consumer loop pops them and forwards each one to
//! the callback sink. The queue is single-producer/single-consumer with
//! blocking semantics on both ends.
//!
//! Capacity is explicit. A bounded queue applies one of two overflow
//! policies: [`OverflowPolicy::Block`] suspends the producer until the
//! consumer frees space, [`OverflowPolicy::DropOldest`] evicts the head chunk
//! to admit the new one. An unbounded queue (`capacity: None`) reproduces the
//! historical connector behavior where a slow consumer grows memory without
//! limit.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Deserialize;
use tokio::sync::Notify;

/// Default capacity of a session's chunk queue, in chunks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// What a bounded queue does when a push would exceed capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Suspend the producer until the consumer frees space.
    #[default]
    Block,
    /// Evict the oldest queued chunk to admit the new one.
    ///
    /// Trades the at-least-once delivery guarantee for bounded memory;
    /// evictions are counted and logged.
    DropOldest,
}

/// Capacity and overflow policy for a session's chunk queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum queued chunks; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Policy applied when a bounded queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_QUEUE_CAPACITY),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Create a bounded config with the given capacity.
    #[must_use]
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            overflow: OverflowPolicy::Block,
        }
    }

    /// Create an unbounded config.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::Block,
        }
    }

    /// Set the overflow policy.
    #[must_use]
    pub const fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }
}

/// Error returned when pushing onto a closed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

#[derive(Debug)]
struct QueueState {
    chunks: VecDeque<String>,
    closed: bool,
    dropped: u64,
}

/// An ordered FIFO of decoded text chunks awaiting delivery to the sink.
///
/// Closing the queue rejects further pushes (waking a blocked producer) while
/// letting the consumer drain what is already queued: [`pop`](Self::pop)
/// returns remaining chunks first and `None` only once the queue is both
/// closed and empty.
#[derive(Debug)]
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    config: QueueConfig,
    /// Notified when a chunk is pushed or the queue closes.
    data_available: Notify,
    /// Notified when a chunk is popped or the queue closes.
    space_available: Notify,
}

impl ChunkQueue {
    /// Create a new queue with the given configuration.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            config,
            data_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    /// Create a queue with the default bounded configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Push a chunk, waiting for space if the queue is full under
    /// [`OverflowPolicy::Block`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the queue has been closed.
    pub async fn push(&self, chunk: String) -> std::result::Result<(), QueueClosed> {
        let mut chunk = Some(chunk);
        loop {
            {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);

                if state.closed {
                    return Err(QueueClosed);
                }

                let full = self
                    .config
                    .capacity
                    .is_some_and(|cap| state.chunks.len() >= cap);

                if full && self.config.overflow == OverflowPolicy::Block {
                    // Fall through to wait for space.
                } else {
                    if full {
                        state.chunks.pop_front();
                        state.dropped += 1;
                        tracing::warn!(
                            dropped = state.dropped,
                            "chunk queue full, evicting oldest chunk"
                        );
                    }
                    if let Some(chunk) = chunk.take() {
                        state.chunks.push_back(chunk);
                    }
                    drop(state);
                    self.data_available.notify_one();
                    return Ok(());
                }
            }
            self.space_available.notified().await;
        }
    }

    /// Pop the next chunk, waiting when the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<String> {
        loop {
            {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);

                if let Some(chunk) = state.chunks.pop_front() {
                    drop(state);
                    self.space_available.notify_one();
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            self.data_available.notified().await;
        }
    }

    /// Close the queue: further pushes fail, queued chunks remain poppable.
    ///
    /// Wakes a producer blocked on space and a consumer blocked on data.
    pub fn close(&self) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.closed = true;
        }
        self.data_available.notify_one();
        self.space_available.notify_one();
    }

    /// Check whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .closed
    }

    /// Number of chunks currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .chunks
            .len()
    }

    /// Check whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of chunks evicted under [`OverflowPolicy::DropOldest`].
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .dropped
    }

    /// Get the queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }
}
