//! Fixed-size-node frame pool for variable-length stream chunks.
//!
//! Where a ring buffer carries a continuous byte cadence, the frame pool
//! carries discrete frames (compressed audio units, captured packets). Every
//! node is owned by exactly one of: the free list, the ready list, or the
//! caller currently holding it — enforced by move semantics, so double-use is
//! unrepresentable. The node count is fixed for the pool lifetime and node
//! identity (index and backing allocation) is stable across re-allocations.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One fixed-capacity node holding a variable-length frame.
#[derive(Debug)]
pub struct FrameNode {
    index: usize,
    data: Box<[u8]>,
    len: usize,
}

impl FrameNode {
    /// Stable identity of this node within its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fixed capacity of the node buffer.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Length of the committed frame.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no frame is committed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The committed frame bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Full node buffer for in-place filling; follow with
    /// [`set_len`](Self::set_len).
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record how many bytes of the buffer form the frame.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(Error::SizeMismatch {
                needed: len,
                available: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Copy `src` into the node and set the frame length.
    pub fn fill(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.data.len() {
            return Err(Error::SizeMismatch {
                needed: src.len(),
                available: self.data.len(),
            });
        }
        self.data[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }
}

/// Result of a blocking pool operation that hands out a node.
#[derive(Debug)]
pub enum FrameOutcome {
    /// A node was dequeued; the caller now owns it.
    Frame(FrameNode),
    /// The wait expired with nothing available.
    Timeout,
    /// The pool was aborted while waiting.
    Aborted,
    /// The stream is finished: nothing pending and no more will arrive.
    Done,
}

impl FrameOutcome {
    /// Extract the node, if one was handed out.
    pub fn frame(self) -> Option<FrameNode> {
        match self {
            Self::Frame(node) => Some(node),
            _ => None,
        }
    }
}

/// Node counts snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounts {
    /// Nodes the pool was created with.
    pub total: usize,
    /// Committed frames waiting for the consumer.
    pub ready: usize,
    /// Nodes available for allocation.
    pub free: usize,
}

struct PoolState {
    free: VecDeque<FrameNode>,
    ready: VecDeque<FrameNode>,
    outstanding: usize,
    aborted: bool,
    done_write: bool,
}

/// Pool of fixed-size nodes with a free list and a ready list.
///
/// Producer side: [`alloc_node`](Self::alloc_node), fill, then
/// [`commit`](Self::commit). Consumer side: [`read_ready`](Self::read_ready),
/// copy out, then **always** [`release`](Self::release), whether or not the
/// copy succeeded.
pub struct FramePool {
    node_size: usize,
    node_count: usize,
    state: Mutex<PoolState>,
    can_alloc: Condvar,
    can_read: Condvar,
}

impl FramePool {
    /// Create a pool of `node_count` nodes of `node_size` bytes each.
    pub fn new(node_size: usize, node_count: usize) -> Result<Self> {
        if node_size == 0 || node_count == 0 {
            return Err(Error::AllocationFailed(format!(
                "frame pool needs nonzero geometry, got {}x{}",
                node_count, node_size
            )));
        }
        let free = (0..node_count)
            .map(|index| FrameNode {
                index,
                data: vec![0u8; node_size].into_boxed_slice(),
                len: 0,
            })
            .collect();
        Ok(Self {
            node_size,
            node_count,
            state: Mutex::new(PoolState {
                free,
                ready: VecDeque::new(),
                outstanding: 0,
                aborted: false,
                done_write: false,
            }),
            can_alloc: Condvar::new(),
            can_read: Condvar::new(),
        })
    }

    /// Node size in bytes.
    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Total node count.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Take a free node for filling, blocking up to `timeout`.
    pub fn alloc_node(&self, timeout: Option<Duration>) -> Result<FrameOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(node) = state.free.pop_front() {
                state.outstanding += 1;
                return Ok(FrameOutcome::Frame(node));
            }
            if state.done_write {
                return Ok(FrameOutcome::Done);
            }
            if state.aborted {
                return Ok(FrameOutcome::Aborted);
            }
            match wait_step(&self.can_alloc, state, deadline) {
                (s, false) => state = s,
                (_, true) => return Ok(FrameOutcome::Timeout),
            }
        }
    }

    /// Publish a filled node to the consumer. Returns the frame length.
    pub fn commit(&self, node: FrameNode) -> usize {
        debug_assert!(node.index < self.node_count);
        let len = node.len;
        let mut state = self.state.lock().unwrap();
        state.ready.push_back(node);
        state.outstanding -= 1;
        self.can_read.notify_one();
        len
    }

    /// Dequeue the oldest committed frame, blocking up to `timeout`.
    ///
    /// Returns [`FrameOutcome::Done`] once the ready list is drained and the
    /// producer called [`set_done_write`](Self::set_done_write).
    pub fn read_ready(&self, timeout: Option<Duration>) -> Result<FrameOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(node) = state.ready.pop_front() {
                state.outstanding += 1;
                return Ok(FrameOutcome::Frame(node));
            }
            if state.done_write {
                return Ok(FrameOutcome::Done);
            }
            if state.aborted {
                return Ok(FrameOutcome::Aborted);
            }
            match wait_step(&self.can_read, state, deadline) {
                (s, false) => state = s,
                (_, true) => return Ok(FrameOutcome::Timeout),
            }
        }
    }

    /// Return a node to the free list. The previous content becomes fully
    /// overwritable on the next allocation.
    pub fn release(&self, mut node: FrameNode) {
        debug_assert!(node.index < self.node_count);
        node.len = 0;
        let mut state = self.state.lock().unwrap();
        state.free.push_back(node);
        state.outstanding -= 1;
        self.can_alloc.notify_one();
    }

    /// Unblock any task waiting to allocate or read.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.aborted = true;
        self.can_alloc.notify_all();
        self.can_read.notify_all();
    }

    /// Move every committed frame back to the free list and re-arm the pool.
    /// Nodes currently held by callers stay with them.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some(mut node) = state.ready.pop_front() {
            node.len = 0;
            state.free.push_back(node);
        }
        state.aborted = false;
        state.done_write = false;
        self.can_alloc.notify_all();
    }

    /// Signal that no more frames will ever be committed.
    pub fn set_done_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.done_write = true;
        self.can_read.notify_all();
        self.can_alloc.notify_all();
    }

    /// Current node distribution.
    pub fn counts(&self) -> FrameCounts {
        let state = self.state.lock().unwrap();
        FrameCounts {
            total: self.node_count,
            ready: state.ready.len(),
            free: state.free.len(),
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self.counts();
        f.debug_struct("FramePool")
            .field("node_size", &self.node_size)
            .field("total", &counts.total)
            .field("ready", &counts.ready)
            .field("free", &counts.free)
            .finish()
    }
}

fn wait_step<'a>(
    cond: &Condvar,
    state: std::sync::MutexGuard<'a, PoolState>,
    deadline: Option<Instant>,
) -> (std::sync::MutexGuard<'a, PoolState>, bool) {
    match deadline {
        Some(d) => {
            let now = Instant::now();
            if now >= d {
                return (state, true);
            }
            let (s, res) = cond.wait_timeout(state, d - now).unwrap();
            (s, res.timed_out())
        }
        None => (cond.wait(state).unwrap(), false),
    }
}
