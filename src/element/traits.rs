//! The processing seam between the engine and the supplied transform.

use crate::element::ElementContext;
use crate::error::Result;

/// What one `process` step accomplished.
///
/// Mirrors the port I/O outcomes so a processor can usually map its port
/// results straight through: a timed-out read is a quiet retry, an aborted
/// port unwinds toward Stopped, a drained input finishes the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Bytes were moved or transformed this cycle.
    Processed(usize),
    /// Nothing available this cycle; not an error, the loop continues.
    Timeout,
    /// A port was aborted; the element unwinds to Stopped.
    Aborted,
    /// The stream is complete; the element transitions to Finished.
    Finished,
}

/// A processing stage body: the codec/transform capability supplied per
/// concrete element type (decoder, encoder, resampler, equalizer, source,
/// sink).
///
/// The engine owns the loop; the processor owns one step of it. `open` runs
/// when the element resumes into Running, `process` runs repeatedly while
/// Running, `close` runs on pause/stop/finish/error and before teardown.
///
/// # Example
///
/// ```rust,ignore
/// struct Gain(f32);
///
/// impl Processor for Gain {
///     fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
///         let mut buf = vec![0u8; ctx.chunk_size()];
///         match ctx.read(&mut buf)? {
///             IoOutcome::Data(n) => {
///                 apply_gain(&mut buf[..n], self.0);
///                 ctx.write(&buf[..n])?;
///                 Ok(ProcessOutcome::Processed(n))
///             }
///             IoOutcome::Timeout => Ok(ProcessOutcome::Timeout),
///             IoOutcome::Aborted => Ok(ProcessOutcome::Aborted),
///             IoOutcome::Done => Ok(ProcessOutcome::Finished),
///         }
///     }
/// }
/// ```
pub trait Processor: Send {
    /// Prepare for streaming. Called each time the element resumes from
    /// Init/Paused/Stopped into Running.
    fn open(&mut self, ctx: &mut ElementContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Run one processing step.
    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome>;

    /// Release per-stream resources. Called on pause, stop, finish, error
    /// and final teardown (only if `open` succeeded).
    fn close(&mut self, ctx: &mut ElementContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

impl ProcessOutcome {
    /// Map a port outcome to the equivalent process outcome.
    pub fn from_io(outcome: crate::port::IoOutcome) -> Self {
        match outcome {
            crate::port::IoOutcome::Data(n) => Self::Processed(n),
            crate::port::IoOutcome::Timeout => Self::Timeout,
            crate::port::IoOutcome::Aborted => Self::Aborted,
            crate::port::IoOutcome::Done => Self::Finished,
        }
    }
}
