//! Event/status bus for decoupled pipeline observation.
//!
//! Elements report state and stream-metadata changes into a bus; a pipeline
//! chains all of its elements' buses into its own, and buses chain further,
//! so status from two independently-run pipelines can merge into one listener
//! loop. Delivery is FIFO per bus; across independently-posting sources only
//! the per-bus order is guaranteed.

use crate::element::{ElementStatus, StreamInfo};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default queue capacity for a bus.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Payload of one bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum BusPayload {
    /// An element changed state.
    Status(ElementStatus),
    /// An element's stream metadata changed.
    StreamInfo(StreamInfo),
    /// Progress report within the stream.
    Position {
        /// Bytes consumed so far.
        byte_pos: u64,
        /// Total stream length, when known.
        total_bytes: u64,
    },
}

impl fmt::Display for BusPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusPayload::Status(status) => write!(f, "status {:?}", status),
            BusPayload::StreamInfo(info) => write!(
                f,
                "stream info {}Hz/{}ch/{}bit",
                info.sample_rate, info.channels, info.bits
            ),
            BusPayload::Position {
                byte_pos,
                total_bytes,
            } => write!(f, "position {}/{}", byte_pos, total_bytes),
        }
    }
}

/// One message traveling through a bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Tag of the posting element.
    pub source_tag: Arc<str>,
    /// What is being reported.
    pub payload: BusPayload,
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source_tag, self.payload)
    }
}

struct BusState {
    queue: VecDeque<BusMessage>,
    parent: Option<EventBus>,
    dropped: u64,
}

struct BusInner {
    capacity: usize,
    state: Mutex<BusState>,
    not_empty: Condvar,
}

/// A chainable FIFO event bus.
///
/// Clones are handles onto the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                state: Mutex::new(BusState {
                    queue: VecDeque::new(),
                    parent: None,
                    dropped: 0,
                }),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Forward everything posted here to `parent`'s listener instead.
    ///
    /// Chains resolve to their terminal bus at post time, so listening on the
    /// topmost bus observes every chained source.
    pub fn chain(&self, parent: &EventBus) {
        if Arc::ptr_eq(&self.inner, &parent.inner) {
            tracing::warn!("refusing to chain a bus to itself");
            return;
        }
        self.inner.state.lock().unwrap().parent = Some(parent.clone());
    }

    /// Detach from the chained parent, if any.
    pub fn unchain(&self) {
        self.inner.state.lock().unwrap().parent = None;
    }

    /// Follow parent links to the bus whose queue receives the post.
    fn terminal(&self) -> EventBus {
        let mut current = self.clone();
        // Bounded walk; a cycle would otherwise spin forever.
        for _ in 0..8 {
            let parent = current.inner.state.lock().unwrap().parent.clone();
            match parent {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    /// Post a message. A full terminal bus drops the message with a warning
    /// rather than blocking the producer.
    pub fn post(&self, message: BusMessage) {
        let terminal = self.terminal();
        let mut state = terminal.inner.state.lock().unwrap();
        if state.queue.len() >= terminal.inner.capacity {
            state.dropped += 1;
            tracing::warn!(
                source = %message.source_tag,
                dropped = state.dropped,
                "event bus full, dropping message"
            );
            return;
        }
        state.queue.push_back(message);
        drop(state);
        terminal.inner.not_empty.notify_one();
    }

    /// Block up to `timeout` for the next message on *this* bus (`None` waits
    /// forever).
    pub fn listen(&self, timeout: Option<Duration>) -> Option<BusMessage> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(message) = state.queue.pop_front() {
                return Some(message);
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    let (s, res) = self
                        .inner
                        .not_empty
                        .wait_timeout(state, d - now)
                        .unwrap();
                    state = s;
                    if res.timed_out() {
                        return state.queue.pop_front();
                    }
                }
                None => state = self.inner.not_empty.wait(state).unwrap(),
            }
        }
    }

    /// Non-blocking variant of [`listen`](Self::listen).
    pub fn try_listen(&self) -> Option<BusMessage> {
        self.inner.state.lock().unwrap().queue.pop_front()
    }

    /// Messages currently queued on this bus.
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages discarded because the bus was full.
    pub fn dropped(&self) -> u64 {
        self.inner.state.lock().unwrap().dropped
    }

    /// Discard everything currently queued.
    pub fn discard(&self) {
        self.inner.state.lock().unwrap().queue.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("queued", &state.queue.len())
            .field("chained", &state.parent.is_some())
            .finish()
    }
}
