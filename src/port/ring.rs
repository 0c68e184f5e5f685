//! Blocking byte ring buffer with optional hardware position synchronization.
//!
//! The ring is the continuous-cadence transport between two elements: one
//! writer task, one reader task. Offsets stay in `[0, capacity)` and all
//! arithmetic is explicit modulo-capacity on `u32`. An optional
//! [`PositionSource`] lets an autonomous engine (a DMA channel moving data in
//! or out of the storage) own one side of the ring; the software side then
//! resynchronizes from it and publishes its own progress back.

use crate::error::{Error, Result};
use crate::port::IoOutcome;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Bytes kept unused between the write and read offsets when a hardware
/// position source is attached, so the engine can never collide with the
/// software pointer.
pub const SAFETY_MARGIN: u32 = 4;

/// Which side of the ring an external engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    /// The engine produces data into the ring; software reads.
    Producer,
    /// The engine consumes data from the ring; software writes.
    Consumer,
}

/// A hardware position source (DMA-like engine) attached to one side of a
/// ring buffer.
///
/// Offsets are byte positions within the ring storage, in `[0, capacity)`.
pub trait PositionSource: Send + Sync {
    /// Current byte offset of the engine within the ring storage, or `None`
    /// while the engine is idle.
    fn position(&self) -> Option<u32>;

    /// Tell the engine where to pause so it never crosses the software
    /// pointer.
    fn set_pause_position(&self, offset: u32);
}

struct RingState {
    storage: Box<[u8]>,
    read_offset: u32,
    write_offset: u32,
    fill: u32,
    aborted: bool,
    done_write: bool,
}

/// Fixed-capacity circular byte store with blocking read/write.
///
/// # Example
///
/// ```rust
/// use tributary::port::ring::RingBuffer;
///
/// let rb = RingBuffer::new(1024).unwrap();
/// let written = rb.write(b"hello", Some(std::time::Duration::ZERO)).unwrap();
/// assert_eq!(written.bytes(), Some(5));
/// assert_eq!(rb.fill_size(), 5);
/// ```
pub struct RingBuffer {
    capacity: u32,
    source: Option<(Arc<dyn PositionSource>, SourceRole)>,
    state: Mutex<RingState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingBuffer {
    /// Create a ring buffer with the given capacity in bytes.
    pub fn new(capacity: u32) -> Result<Arc<Self>> {
        Self::build(capacity, None)
    }

    /// Create a ring buffer whose `role` side is owned by an external engine.
    pub fn with_position_source(
        capacity: u32,
        source: Arc<dyn PositionSource>,
        role: SourceRole,
    ) -> Result<Arc<Self>> {
        Self::build(capacity, Some((source, role)))
    }

    fn build(
        capacity: u32,
        source: Option<(Arc<dyn PositionSource>, SourceRole)>,
    ) -> Result<Arc<Self>> {
        if capacity <= SAFETY_MARGIN {
            return Err(Error::AllocationFailed(format!(
                "ring capacity must exceed {} bytes, got {}",
                SAFETY_MARGIN, capacity
            )));
        }
        let rb = Arc::new(Self {
            capacity,
            source,
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity as usize].into_boxed_slice(),
                read_offset: 0,
                write_offset: 0,
                fill: 0,
                aborted: false,
                done_write: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });
        rb.publish_initial_pause();
        Ok(rb)
    }

    fn publish_initial_pause(&self) {
        match &self.source {
            Some((src, SourceRole::Producer)) => {
                // Empty ring: the engine may fill everything but the margin.
                src.set_pause_position(self.capacity - SAFETY_MARGIN);
            }
            Some((src, SourceRole::Consumer)) => {
                // Empty ring: nothing for the engine to consume yet.
                src.set_pause_position(0);
            }
            None => {}
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Largest single write this ring accepts.
    fn usable(&self) -> u32 {
        if self.source.is_some() {
            self.capacity - SAFETY_MARGIN
        } else {
            self.capacity
        }
    }

    /// Resynchronize the engine-owned offset and recompute the fill count.
    ///
    /// `rp == wp` with a position source reads as empty: the pause margin
    /// guarantees the engine never completely fills the ring.
    fn sync(&self, state: &mut RingState) -> u32 {
        if let Some((src, role)) = &self.source {
            if let Some(pos) = src.position() {
                let pos = pos % self.capacity;
                match role {
                    SourceRole::Producer => state.write_offset = pos,
                    SourceRole::Consumer => state.read_offset = pos,
                }
            }
            state.fill = (state.write_offset + self.capacity - state.read_offset) % self.capacity;
        }
        state.fill
    }

    /// Bytes currently stored.
    pub fn fill_size(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        self.sync(&mut state) as usize
    }

    /// Bytes currently writable (net of the safety margin when an engine is
    /// attached).
    pub fn free_size(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let fill = self.sync(&mut state);
        let free = self.capacity - fill;
        if self.source.is_some() {
            free.saturating_sub(SAFETY_MARGIN) as usize
        } else {
            free as usize
        }
    }

    /// Read up to `dst.len()` bytes, blocking up to `timeout` while the ring
    /// is empty (`None` waits forever).
    ///
    /// Returns [`IoOutcome::Done`] only once the ring is drained and the
    /// producer has called [`set_done_write`](Self::set_done_write).
    pub fn read(&self, dst: &mut [u8], timeout: Option<Duration>) -> Result<IoOutcome> {
        if dst.is_empty() {
            return Ok(IoOutcome::Data(0));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            let fill = self.sync(&mut state);
            if fill > 0 {
                let n = (dst.len() as u32).min(fill);
                let rp = state.read_offset;
                let first = (self.capacity - rp).min(n);
                dst[..first as usize]
                    .copy_from_slice(&state.storage[rp as usize..(rp + first) as usize]);
                if n > first {
                    dst[first as usize..n as usize]
                        .copy_from_slice(&state.storage[..(n - first) as usize]);
                }
                state.read_offset = (rp + n) % self.capacity;
                state.fill -= n;
                if let Some((src, SourceRole::Producer)) = &self.source {
                    // Resume the engine exactly where the consumer stopped.
                    src.set_pause_position(state.read_offset);
                }
                self.not_full.notify_one();
                return Ok(IoOutcome::Data(n as usize));
            }
            if state.aborted {
                return Ok(IoOutcome::Aborted);
            }
            if state.done_write {
                return Ok(IoOutcome::Done);
            }
            match self.wait(&self.not_empty, state, deadline) {
                (s, false) => state = s,
                (_, true) => return Ok(IoOutcome::Timeout),
            }
        }
    }

    /// Write all of `src`, blocking up to `timeout` while there is not enough
    /// free space. All-or-nothing: the ring never accepts a partial write.
    pub fn write(&self, src: &[u8], timeout: Option<Duration>) -> Result<IoOutcome> {
        if src.is_empty() {
            return Ok(IoOutcome::Data(0));
        }
        let len = src.len();
        if len > self.usable() as usize {
            return Err(Error::SizeMismatch {
                needed: len,
                available: self.usable() as usize,
            });
        }
        let len = len as u32;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            let fill = self.sync(&mut state);
            let free = self.capacity - fill;
            let margin = if self.source.is_some() { SAFETY_MARGIN } else { 0 };
            if free >= len + margin {
                let wp = state.write_offset;
                let first = (self.capacity - wp).min(len);
                state.storage[wp as usize..(wp + first) as usize]
                    .copy_from_slice(&src[..first as usize]);
                if len > first {
                    let rest = (len - first) as usize;
                    state.storage[..rest].copy_from_slice(&src[first as usize..]);
                }
                state.write_offset = (wp + len) % self.capacity;
                state.fill += len;
                if let Some((src_engine, SourceRole::Consumer)) = &self.source {
                    // Let the engine consume up to the new write offset.
                    src_engine.set_pause_position(state.write_offset);
                }
                self.not_empty.notify_one();
                return Ok(IoOutcome::Data(len as usize));
            }
            if state.aborted {
                return Ok(IoOutcome::Aborted);
            }
            match self.wait(&self.not_full, state, deadline) {
                (s, false) => state = s,
                (_, true) => return Ok(IoOutcome::Timeout),
            }
        }
    }

    /// Wait on `cond` until notified or the deadline passes. With a position
    /// source attached nothing ever notifies, so the wait degrades to one
    /// bounded sleep followed by a final resync in the caller's loop.
    fn wait<'a>(
        &self,
        cond: &Condvar,
        state: std::sync::MutexGuard<'a, RingState>,
        deadline: Option<Instant>,
    ) -> (std::sync::MutexGuard<'a, RingState>, bool) {
        match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return (state, true);
                }
                let (s, res) = cond.wait_timeout(state, d - now).unwrap();
                if res.timed_out() {
                    // One last chance for the checks at the loop head.
                    let retry = self.recheck(&s);
                    (s, !retry)
                } else {
                    (s, false)
                }
            }
            None => (cond.wait(state).unwrap(), false),
        }
    }

    fn recheck(&self, state: &RingState) -> bool {
        state.aborted || state.done_write || state.fill > 0 || self.source.is_some()
    }

    /// Drop all stored bytes and rewind both offsets.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.read_offset = 0;
        state.write_offset = 0;
        state.fill = 0;
        drop(state);
        self.publish_initial_pause();
        self.not_full.notify_all();
    }

    /// Unblock any reader or writer currently waiting on this ring.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.aborted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Clear contents and re-arm after an abort or a finished stream.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.read_offset = 0;
            state.write_offset = 0;
            state.fill = 0;
            state.aborted = false;
            state.done_write = false;
        }
        self.publish_initial_pause();
        self.not_full.notify_all();
    }

    /// Signal that no more data will ever be written. Readers drain what is
    /// stored, then observe [`IoOutcome::Done`].
    pub fn set_done_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.done_write = true;
        self.not_empty.notify_all();
    }

    /// True once `set_done_write` has been called.
    pub fn is_done_write(&self) -> bool {
        self.state.lock().unwrap().done_write
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("read_offset", &state.read_offset)
            .field("write_offset", &state.write_offset)
            .field("fill", &state.fill)
            .field("synced", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    const T0: Option<Duration> = Some(Duration::ZERO);
    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn test_write_then_read_round_trip() {
        let rb = RingBuffer::new(1024).unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(rb.write(&data, T0).unwrap().bytes(), Some(600));
        assert_eq!(rb.fill_size(), 600);

        let mut out = vec![0u8; 600];
        assert_eq!(rb.read(&mut out, T0).unwrap().bytes(), Some(600));
        assert_eq!(out, data);
        assert_eq!(rb.fill_size(), 0);
    }

    #[test]
    fn test_full_write_rejected_without_corruption() {
        let rb = RingBuffer::new(1024).unwrap();
        let first: Vec<u8> = vec![0xAA; 700];
        assert_eq!(rb.write(&first, T0).unwrap().bytes(), Some(700));

        // Second write does not fit: rejected whole, nothing partial.
        let second = vec![0xBB; 500];
        assert!(matches!(rb.write(&second, T0).unwrap(), IoOutcome::Timeout));
        assert_eq!(rb.fill_size(), 700);

        let mut out = vec![0u8; 700];
        rb.read(&mut out, T0).unwrap();
        assert_eq!(out, first);
    }

    #[test]
    fn test_fill_plus_free_is_capacity() {
        let rb = RingBuffer::new(256).unwrap();
        assert_eq!(rb.fill_size() + rb.free_size(), 256);
        rb.write(&[1u8; 100], T0).unwrap();
        assert_eq!(rb.fill_size() + rb.free_size(), 256);
        let mut out = [0u8; 37];
        rb.read(&mut out, T0).unwrap();
        assert_eq!(rb.fill_size() + rb.free_size(), 256);
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let rb = RingBuffer::new(64).unwrap();
        let mut expected = Vec::new();
        let mut received = Vec::new();
        let mut seq = 0u8;

        for round in 0..20 {
            let chunk_len = 7 + (round % 13);
            let chunk: Vec<u8> = (0..chunk_len)
                .map(|_| {
                    seq = seq.wrapping_add(1);
                    seq
                })
                .collect();
            assert_eq!(rb.write(&chunk, T0).unwrap().bytes(), Some(chunk.len()));
            expected.extend_from_slice(&chunk);

            let mut out = vec![0u8; chunk.len()];
            assert_eq!(rb.read(&mut out, T0).unwrap().bytes(), Some(out.len()));
            received.extend_from_slice(&out);
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_oversized_write_is_size_mismatch() {
        let rb = RingBuffer::new(64).unwrap();
        let err = rb.write(&[0u8; 65], T0).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { needed: 65, .. }));
    }

    #[test]
    fn test_zero_length_requests() {
        let rb = RingBuffer::new(64).unwrap();
        assert_eq!(rb.write(&[], T0).unwrap().bytes(), Some(0));
        let mut out = [0u8; 0];
        assert_eq!(rb.read(&mut out, T0).unwrap().bytes(), Some(0));
    }

    #[test]
    fn test_read_empty_times_out() {
        let rb = RingBuffer::new(64).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(rb.read(&mut out, SHORT).unwrap(), IoOutcome::Timeout));
    }

    #[test]
    fn test_done_write_drains_then_done() {
        let rb = RingBuffer::new(64).unwrap();
        rb.write(b"tail", T0).unwrap();
        rb.set_done_write();

        let mut out = [0u8; 16];
        assert_eq!(rb.read(&mut out, T0).unwrap().bytes(), Some(4));
        assert!(matches!(rb.read(&mut out, T0).unwrap(), IoOutcome::Done));
    }

    #[test]
    fn test_abort_unblocks_reader() {
        let rb = RingBuffer::new(64).unwrap();
        let rb2 = Arc::clone(&rb);

        let reader = thread::spawn(move || {
            let mut out = [0u8; 8];
            rb2.read(&mut out, Some(Duration::from_secs(5))).unwrap()
        });

        thread::sleep(Duration::from_millis(30));
        rb.abort();
        assert!(matches!(reader.join().unwrap(), IoOutcome::Aborted));
    }

    #[test]
    fn test_blocked_writer_resumes_when_reader_drains() {
        let rb = RingBuffer::new(32).unwrap();
        rb.write(&[1u8; 32], T0).unwrap();
        let rb2 = Arc::clone(&rb);

        let writer = thread::spawn(move || rb2.write(&[2u8; 16], Some(Duration::from_secs(5))));

        thread::sleep(Duration::from_millis(30));
        let mut out = [0u8; 20];
        rb.read(&mut out, T0).unwrap();

        assert_eq!(writer.join().unwrap().unwrap().bytes(), Some(16));
        assert_eq!(rb.fill_size(), 28);
    }

    #[test]
    fn test_threaded_round_trip() {
        let rb = RingBuffer::new(128).unwrap();
        let rb2 = Arc::clone(&rb);
        let total = 10_000usize;

        let producer = thread::spawn(move || {
            let mut seq = 0u8;
            let mut sent = 0;
            while sent < total {
                let n = 31.min(total - sent);
                let chunk: Vec<u8> = (0..n)
                    .map(|_| {
                        seq = seq.wrapping_add(1);
                        seq
                    })
                    .collect();
                loop {
                    match rb2.write(&chunk, Some(Duration::from_secs(5))).unwrap() {
                        IoOutcome::Data(_) => break,
                        IoOutcome::Timeout => continue,
                        other => panic!("unexpected outcome {other:?}"),
                    }
                }
                sent += n;
            }
            rb2.set_done_write();
        });

        let mut received = Vec::with_capacity(total);
        let mut buf = [0u8; 50];
        loop {
            match rb.read(&mut buf, Some(Duration::from_secs(5))).unwrap() {
                IoOutcome::Data(n) => received.extend_from_slice(&buf[..n]),
                IoOutcome::Done => break,
                IoOutcome::Timeout => continue,
                IoOutcome::Aborted => panic!("unexpected abort"),
            }
        }
        producer.join().unwrap();

        assert_eq!(received.len(), total);
        let mut seq = 0u8;
        for byte in received {
            seq = seq.wrapping_add(1);
            assert_eq!(byte, seq);
        }
    }

    /// Engine that autonomously "writes" into the ring: position advances
    /// under test control, pause position is captured for inspection.
    struct MockEngine {
        position: AtomicU32,
        pause: AtomicU32,
        enabled: std::sync::atomic::AtomicBool,
    }

    impl MockEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                position: AtomicU32::new(0),
                pause: AtomicU32::new(0),
                enabled: std::sync::atomic::AtomicBool::new(true),
            })
        }
    }

    impl PositionSource for MockEngine {
        fn position(&self) -> Option<u32> {
            if self.enabled.load(Ordering::SeqCst) {
                Some(self.position.load(Ordering::SeqCst))
            } else {
                None
            }
        }

        fn set_pause_position(&self, offset: u32) {
            self.pause.store(offset, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_position_source_read_resync_and_pause_publish() {
        let engine = MockEngine::new();
        let rb = RingBuffer::with_position_source(
            64,
            Arc::clone(&engine) as Arc<dyn PositionSource>,
            SourceRole::Producer,
        )
        .unwrap();

        // Construction arms the pause pointer one margin short of full.
        assert_eq!(engine.pause.load(Ordering::SeqCst), 64 - SAFETY_MARGIN);

        // Engine wrote 24 bytes; the ring only learns on resync.
        engine.position.store(24, Ordering::SeqCst);
        assert_eq!(rb.fill_size(), 24);

        let mut out = [0u8; 16];
        assert_eq!(rb.read(&mut out, T0).unwrap().bytes(), Some(16));
        // Consumed position published back so the engine resumes there.
        assert_eq!(engine.pause.load(Ordering::SeqCst), 16);

        assert_eq!(rb.fill_size(), 8);
        assert_eq!(rb.free_size(), 64 - 8 - SAFETY_MARGIN as usize);
    }

    #[test]
    fn test_position_source_empty_read_times_out() {
        let engine = MockEngine::new();
        let rb = RingBuffer::with_position_source(
            64,
            Arc::clone(&engine) as Arc<dyn PositionSource>,
            SourceRole::Consumer,
        )
        .unwrap();

        // Fill completely minus margin, engine has consumed nothing.
        let n = 64 - SAFETY_MARGIN as usize;
        assert_eq!(rb.write(&vec![7u8; n], T0).unwrap().bytes(), Some(n));
        assert_eq!(engine.pause.load(Ordering::SeqCst), n as u32 % 64);

        // No space left until the engine advances.
        assert!(matches!(rb.write(&[1u8; 4], SHORT).unwrap(), IoOutcome::Timeout));

        // Engine consumed 32 bytes; the next write resyncs and succeeds.
        engine.position.store(32, Ordering::SeqCst);
        assert_eq!(rb.write(&[1u8; 4], T0).unwrap().bytes(), Some(4));
    }
}
