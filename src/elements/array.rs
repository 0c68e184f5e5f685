//! Memory-backed source and sink elements.
//!
//! The source feeds an in-memory byte array into a pipeline chunk by chunk;
//! the sink collects whatever reaches it behind a shared handle. Both are the
//! standard endpoints for tests and for applications that stage audio in
//! memory.

use crate::element::{ElementContext, ProcessOutcome, Processor};
use crate::error::Result;
use crate::port::IoOutcome;
use std::sync::{Arc, Mutex};

/// Streams a byte array into the pipeline, then finishes.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    format: Option<(u32, u8, u8)>,
}

impl MemorySource {
    /// Source over the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            format: None,
        }
    }

    /// Announce a stream format when the source opens.
    pub fn with_format(mut self, sample_rate: u32, channels: u8, bits: u8) -> Self {
        self.format = Some((sample_rate, channels, bits));
        self
    }
}

impl Processor for MemorySource {
    fn open(&mut self, ctx: &mut ElementContext) -> Result<()> {
        self.pos = 0;
        ctx.set_byte_pos(0);
        ctx.set_total_bytes(self.data.len() as u64);
        if let Some((sample_rate, channels, bits)) = self.format {
            ctx.set_music_info(sample_rate, channels, bits);
        }
        Ok(())
    }

    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        if self.pos >= self.data.len() {
            return Ok(ProcessOutcome::Finished);
        }
        let end = (self.pos + ctx.chunk_size()).min(self.data.len());
        match ctx.write(&self.data[self.pos..end])? {
            IoOutcome::Data(n) => {
                self.pos += n;
                ctx.update_byte_pos(n as u64);
                Ok(ProcessOutcome::Processed(n))
            }
            other => Ok(ProcessOutcome::from_io(other)),
        }
    }
}

/// Collects everything that reaches it into a shared byte vector.
pub struct MemorySink {
    collected: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Create the sink and the handle the application reads it through.
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                collected: Arc::clone(&collected),
            },
            collected,
        )
    }
}

impl Processor for MemorySink {
    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        let mut buf = vec![0u8; ctx.chunk_size()];
        match ctx.read(&mut buf)? {
            IoOutcome::Data(n) => {
                self.collected.lock().unwrap().extend_from_slice(&buf[..n]);
                ctx.update_byte_pos(n as u64);
                Ok(ProcessOutcome::Processed(n))
            }
            other => Ok(ProcessOutcome::from_io(other)),
        }
    }
}
