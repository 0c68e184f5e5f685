//! Typed connectors through which elements exchange data.
//!
//! A [`Port`] is one of three concrete transports behind a single interface:
//!
//! - **Ring** — continuous byte stream over a [`ring::RingBuffer`].
//! - **Frame** — discrete variable-length frames over a [`frame::FramePool`].
//! - **Callback** — application-supplied read/write closures.
//!
//! All kinds expose read/write with timeout, abort, reset, done-write and
//! fill/free-size queries. A port is shared by exactly the producer element's
//! output and the consumer element's input; clones are cheap handles onto the
//! same transport.

pub mod callback;
pub mod frame;
mod info_list;
pub mod ring;

pub use callback::CallbackPort;
pub use frame::{FrameCounts, FrameNode, FrameOutcome, FramePool};
pub use info_list::{PortInfo, PortInfoList};
pub use ring::{PositionSource, RingBuffer, SourceRole};

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Result of a port read or write.
///
/// Transient and graceful conditions are values, not errors, so element loops
/// can branch on them without unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Bytes actually transferred.
    Data(usize),
    /// The bounded wait expired with nothing transferred.
    Timeout,
    /// The port was aborted while waiting (teardown path).
    Aborted,
    /// Graceful end of stream: drained and no more data will ever arrive.
    Done,
}

impl IoOutcome {
    /// Transferred byte count, if data moved.
    pub fn bytes(self) -> Option<usize> {
        match self {
            Self::Data(n) => Some(n),
            _ => None,
        }
    }

    /// True when data moved.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Data(_))
    }
}

/// The concrete transport behind a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Ring-buffer byte stream.
    Ring,
    /// Frame-buffer discrete frames.
    Frame,
    /// Application callback endpoints.
    Callback,
}

#[derive(Clone)]
enum PortInner {
    Ring(Arc<RingBuffer>),
    Frame(Arc<FramePool>),
    Callback(Arc<CallbackPort>),
}

/// Polymorphic connector between two elements.
#[derive(Clone)]
pub struct Port {
    tag: Arc<str>,
    inner: PortInner,
}

impl Port {
    /// Ring-buffer port with the given capacity in bytes.
    pub fn ring(capacity: u32) -> Result<Self> {
        Ok(Self {
            tag: Arc::from("ring"),
            inner: PortInner::Ring(RingBuffer::new(capacity)?),
        })
    }

    /// Ring-buffer port whose `role` side is owned by an external engine.
    pub fn ring_with_source(
        capacity: u32,
        source: Arc<dyn PositionSource>,
        role: SourceRole,
    ) -> Result<Self> {
        Ok(Self {
            tag: Arc::from("ring"),
            inner: PortInner::Ring(RingBuffer::with_position_source(capacity, source, role)?),
        })
    }

    /// Port over an existing ring buffer.
    pub fn from_ring(rb: Arc<RingBuffer>) -> Self {
        Self {
            tag: Arc::from("ring"),
            inner: PortInner::Ring(rb),
        }
    }

    /// Frame-buffer port with the given node geometry.
    pub fn frame(node_size: usize, node_count: usize) -> Result<Self> {
        Ok(Self {
            tag: Arc::from("frame"),
            inner: PortInner::Frame(Arc::new(FramePool::new(node_size, node_count)?)),
        })
    }

    /// Port over an existing frame pool.
    pub fn from_pool(pool: Arc<FramePool>) -> Self {
        Self {
            tag: Arc::from("frame"),
            inner: PortInner::Frame(pool),
        }
    }

    /// Callback port whose reads come from `f`.
    pub fn reader_callback(
        f: impl FnMut(&mut [u8], Option<Duration>) -> Result<IoOutcome> + Send + 'static,
    ) -> Self {
        Self {
            tag: Arc::from("callback"),
            inner: PortInner::Callback(Arc::new(CallbackPort::reader(f))),
        }
    }

    /// Callback port whose writes go to `f`.
    pub fn writer_callback(
        f: impl FnMut(&[u8], Option<Duration>) -> Result<IoOutcome> + Send + 'static,
    ) -> Self {
        Self {
            tag: Arc::from("callback"),
            inner: PortInner::Callback(Arc::new(CallbackPort::writer(f))),
        }
    }

    /// Rename the port (pipelines tag connecting ports after their producer).
    pub fn with_tag(mut self, tag: impl Into<Arc<str>>) -> Self {
        self.tag = tag.into();
        self
    }

    /// The port's tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The concrete transport kind.
    pub fn kind(&self) -> PortKind {
        match self.inner {
            PortInner::Ring(_) => PortKind::Ring,
            PortInner::Frame(_) => PortKind::Frame,
            PortInner::Callback(_) => PortKind::Callback,
        }
    }

    /// Read up to `dst.len()` bytes, blocking up to `timeout`.
    ///
    /// On a frame port this dequeues exactly one frame; a frame longer than
    /// `dst` is an [`Error::SizeMismatch`] (never a short read) and the node
    /// is released regardless.
    pub fn read(&self, dst: &mut [u8], timeout: Option<Duration>) -> Result<IoOutcome> {
        match &self.inner {
            PortInner::Ring(rb) => rb.read(dst, timeout),
            PortInner::Frame(pool) => match pool.read_ready(timeout)? {
                FrameOutcome::Frame(node) => {
                    let len = node.len();
                    let result = if len > dst.len() {
                        Err(Error::SizeMismatch {
                            needed: len,
                            available: dst.len(),
                        })
                    } else {
                        dst[..len].copy_from_slice(node.payload());
                        Ok(IoOutcome::Data(len))
                    };
                    pool.release(node);
                    result
                }
                FrameOutcome::Timeout => Ok(IoOutcome::Timeout),
                FrameOutcome::Aborted => Ok(IoOutcome::Aborted),
                FrameOutcome::Done => Ok(IoOutcome::Done),
            },
            PortInner::Callback(cb) => cb.read(&self.tag, dst, timeout),
        }
    }

    /// Write all of `src`, blocking up to `timeout`.
    ///
    /// On a frame port this allocates, fills and commits exactly one node; a
    /// source longer than the node size is an [`Error::SizeMismatch`].
    pub fn write(&self, src: &[u8], timeout: Option<Duration>) -> Result<IoOutcome> {
        match &self.inner {
            PortInner::Ring(rb) => rb.write(src, timeout),
            PortInner::Frame(pool) => match pool.alloc_node(timeout)? {
                FrameOutcome::Frame(mut node) => match node.fill(src) {
                    Ok(()) => {
                        let len = pool.commit(node);
                        Ok(IoOutcome::Data(len))
                    }
                    Err(e) => {
                        pool.release(node);
                        Err(e)
                    }
                },
                FrameOutcome::Timeout => Ok(IoOutcome::Timeout),
                FrameOutcome::Aborted => Ok(IoOutcome::Aborted),
                FrameOutcome::Done => Ok(IoOutcome::Done),
            },
            PortInner::Callback(cb) => cb.write(&self.tag, src, timeout),
        }
    }

    /// Immediately unblock any task waiting on this port.
    pub fn abort(&self) {
        match &self.inner {
            PortInner::Ring(rb) => rb.abort(),
            PortInner::Frame(pool) => pool.abort(),
            PortInner::Callback(_) => {}
        }
    }

    /// Clear contents and re-arm after an abort or a finished stream.
    pub fn reset(&self) {
        match &self.inner {
            PortInner::Ring(rb) => rb.reset(),
            PortInner::Frame(pool) => pool.reset(),
            PortInner::Callback(_) => {}
        }
    }

    /// Signal that the producer is finished with this port.
    pub fn set_done_write(&self) {
        match &self.inner {
            PortInner::Ring(rb) => rb.set_done_write(),
            PortInner::Frame(pool) => pool.set_done_write(),
            PortInner::Callback(_) => {}
        }
    }

    /// Pending data: bytes for a ring port, committed frames for a frame
    /// port, zero for a callback port.
    pub fn filled_size(&self) -> usize {
        match &self.inner {
            PortInner::Ring(rb) => rb.fill_size(),
            PortInner::Frame(pool) => pool.counts().ready,
            PortInner::Callback(_) => 0,
        }
    }

    /// Remaining room: bytes for a ring port, free nodes for a frame port,
    /// zero for a callback port.
    pub fn free_size(&self) -> usize {
        match &self.inner {
            PortInner::Ring(rb) => rb.free_size(),
            PortInner::Frame(pool) => pool.counts().free,
            PortInner::Callback(_) => 0,
        }
    }

    /// Total capacity: bytes for a ring port, node count for a frame port,
    /// zero for a callback port.
    pub fn total_size(&self) -> usize {
        match &self.inner {
            PortInner::Ring(rb) => rb.capacity() as usize,
            PortInner::Frame(pool) => pool.node_count(),
            PortInner::Callback(_) => 0,
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("tag", &self.tag)
            .field("kind", &self.kind())
            .field("filled", &self.filled_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Option<Duration> = Some(Duration::ZERO);

    #[test]
    fn test_ring_port_round_trip() {
        let port = Port::ring(128).unwrap().with_tag("src_out_rb");
        assert_eq!(port.kind(), PortKind::Ring);
        assert_eq!(port.tag(), "src_out_rb");
        assert_eq!(port.total_size(), 128);

        port.write(b"payload", T0).unwrap();
        assert_eq!(port.filled_size(), 7);

        let mut buf = [0u8; 16];
        assert_eq!(port.read(&mut buf, T0).unwrap().bytes(), Some(7));
        assert_eq!(&buf[..7], b"payload");
    }

    #[test]
    fn test_frame_port_preserves_frame_boundaries() {
        let port = Port::frame(32, 2).unwrap();
        assert_eq!(port.kind(), PortKind::Frame);

        port.write(b"first", T0).unwrap();
        port.write(b"second!", T0).unwrap();
        assert_eq!(port.filled_size(), 2);

        let mut buf = [0u8; 32];
        assert_eq!(port.read(&mut buf, T0).unwrap().bytes(), Some(5));
        assert_eq!(&buf[..5], b"first");
        assert_eq!(port.read(&mut buf, T0).unwrap().bytes(), Some(7));
        assert_eq!(&buf[..7], b"second!");
    }

    #[test]
    fn test_frame_port_size_mismatch_still_releases() {
        let port = Port::frame(32, 1).unwrap();
        port.write(b"a-frame-of-sixteen", T0).unwrap();

        let mut small = [0u8; 4];
        assert!(matches!(
            port.read(&mut small, T0),
            Err(Error::SizeMismatch { needed: 18, available: 4 })
        ));
        // The node went back to the free list despite the failed copy.
        assert_eq!(port.free_size(), 1);
        assert_eq!(port.filled_size(), 0);
    }

    #[test]
    fn test_frame_port_oversized_write() {
        let port = Port::frame(8, 1).unwrap();
        assert!(matches!(
            port.write(&[0u8; 12], T0),
            Err(Error::SizeMismatch { needed: 12, available: 8 })
        ));
        assert_eq!(port.free_size(), 1);
    }

    #[test]
    fn test_callback_port_delegates() {
        let mut fed = vec![9u8, 8, 7];
        let port = Port::reader_callback(move |dst, _| {
            let n = fed.len().min(dst.len());
            dst[..n].copy_from_slice(&fed[..n]);
            fed.drain(..n);
            if n == 0 {
                Ok(IoOutcome::Done)
            } else {
                Ok(IoOutcome::Data(n))
            }
        });
        assert_eq!(port.kind(), PortKind::Callback);
        assert_eq!(port.filled_size(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf, T0).unwrap().bytes(), Some(3));
        assert!(matches!(port.read(&mut buf, T0).unwrap(), IoOutcome::Done));
        // Abort and reset are no-ops for callback ports.
        port.abort();
        port.reset();
    }

    #[test]
    fn test_clones_share_transport() {
        let a = Port::ring(64).unwrap();
        let b = a.clone();
        a.write(b"xy", T0).unwrap();
        assert_eq!(b.filled_size(), 2);
        b.abort();
        let mut out = [0u8; 4];
        // Fill is drained first even after an abort.
        assert_eq!(a.read(&mut out, T0).unwrap().bytes(), Some(2));
        assert!(matches!(a.read(&mut out, T0).unwrap(), IoOutcome::Aborted));
    }
}
