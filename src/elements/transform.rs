//! Closure-driven transform elements.
//!
//! [`Transform`] applies a function chunk-wise; [`UnitTransform`] reassembles
//! fixed-size units from the byte stream first, which is the shape codecs
//! need: when the input does not yet hold a full unit the element reads more
//! into its retained residual buffer and retries before treating anything as
//! an error, and a genuinely corrupt unit is handled per policy.

use crate::element::{ElementContext, ProcessOutcome, Processor};
use crate::error::Result;
use crate::port::IoOutcome;

/// Boxed transform function: input bytes to output bytes.
pub type TransformFn = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>> + Send>;

/// Applies a function to each input chunk.
pub struct Transform {
    f: TransformFn,
}

impl Transform {
    /// Transform every chunk through `f`.
    pub fn new(f: impl FnMut(&[u8]) -> Result<Vec<u8>> + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Processor for Transform {
    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        let mut buf = vec![0u8; ctx.chunk_size()];
        match ctx.read(&mut buf)? {
            IoOutcome::Data(n) => {
                let out = (self.f)(&buf[..n])?;
                match ctx.write(&out)? {
                    IoOutcome::Data(written) => {
                        ctx.update_byte_pos(n as u64);
                        Ok(ProcessOutcome::Processed(written))
                    }
                    other => Ok(ProcessOutcome::from_io(other)),
                }
            }
            other => Ok(ProcessOutcome::from_io(other)),
        }
    }
}

/// What to do when the transform rejects a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitPolicy {
    /// Log and drop the unit, keep streaming.
    #[default]
    Skip,
    /// Halt the element with the transform error.
    Halt,
}

/// Applies a function to fixed-size units reassembled from the byte stream.
///
/// Input bytes accumulate in a residual buffer until a full unit is present;
/// a short read is never an error, just a retry with more input. Output that
/// could not be delivered this cycle is retained and retried before the next
/// unit is consumed.
pub struct UnitTransform {
    unit_size: usize,
    policy: UnitPolicy,
    f: TransformFn,
    residual: Vec<u8>,
    pending_out: Option<Vec<u8>>,
}

impl UnitTransform {
    /// Transform every `unit_size`-byte unit through `f`.
    pub fn new(
        unit_size: usize,
        policy: UnitPolicy,
        f: impl FnMut(&[u8]) -> Result<Vec<u8>> + Send + 'static,
    ) -> Self {
        Self {
            unit_size: unit_size.max(1),
            policy,
            f: Box::new(f),
            residual: Vec::new(),
            pending_out: None,
        }
    }
}

impl Processor for UnitTransform {
    fn open(&mut self, _ctx: &mut ElementContext) -> Result<()> {
        self.residual.clear();
        self.pending_out = None;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        // Deliver output stuck from the previous cycle before consuming more.
        if let Some(out) = self.pending_out.take() {
            match ctx.write(&out)? {
                IoOutcome::Data(n) => return Ok(ProcessOutcome::Processed(n)),
                IoOutcome::Timeout => {
                    self.pending_out = Some(out);
                    return Ok(ProcessOutcome::Timeout);
                }
                other => return Ok(ProcessOutcome::from_io(other)),
            }
        }

        if self.residual.len() < self.unit_size {
            let mut buf = vec![0u8; self.unit_size - self.residual.len()];
            match ctx.read(&mut buf)? {
                IoOutcome::Data(n) => {
                    self.residual.extend_from_slice(&buf[..n]);
                    if self.residual.len() < self.unit_size {
                        // Not enough for a full unit yet; read more and retry.
                        return Ok(ProcessOutcome::Processed(n));
                    }
                }
                IoOutcome::Timeout => return Ok(ProcessOutcome::Timeout),
                IoOutcome::Aborted => return Ok(ProcessOutcome::Aborted),
                IoOutcome::Done => {
                    if !self.residual.is_empty() {
                        tracing::warn!(
                            element = %ctx.tag(),
                            bytes = self.residual.len(),
                            "dropping trailing partial unit"
                        );
                        self.residual.clear();
                    }
                    return Ok(ProcessOutcome::Finished);
                }
            }
        }

        let unit: Vec<u8> = self.residual.drain(..self.unit_size).collect();
        match (self.f)(&unit) {
            Ok(out) => {
                ctx.update_byte_pos(self.unit_size as u64);
                match ctx.write(&out)? {
                    IoOutcome::Data(_) => Ok(ProcessOutcome::Processed(self.unit_size)),
                    IoOutcome::Timeout => {
                        self.pending_out = Some(out);
                        Ok(ProcessOutcome::Timeout)
                    }
                    other => Ok(ProcessOutcome::from_io(other)),
                }
            }
            Err(e) => match self.policy {
                UnitPolicy::Skip => {
                    tracing::warn!(element = %ctx.tag(), error = %e, "skipping corrupt unit");
                    Ok(ProcessOutcome::Processed(0))
                }
                UnitPolicy::Halt => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{AudioElement, ElementConfig, ElementState};
    use crate::elements::{MemorySink, MemorySource};
    use crate::error::Error;
    use crate::pipeline::{Pipeline, PipelineConfig};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn run_chain(
        input: Vec<u8>,
        transform: Box<dyn Processor>,
        chunk: usize,
    ) -> (Pipeline, Arc<Mutex<Vec<u8>>>) {
        let (sink, collected) = MemorySink::new();
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline
            .register(
                AudioElement::new(
                    ElementConfig::new("unnamed").with_chunk_size(chunk),
                    Box::new(MemorySource::new(input)),
                )
                .unwrap(),
                "src",
            )
            .unwrap();
        pipeline
            .register(
                AudioElement::new(
                    ElementConfig::new("unnamed").with_chunk_size(chunk),
                    transform,
                )
                .unwrap(),
                "xfm",
            )
            .unwrap();
        pipeline
            .register(
                AudioElement::new(ElementConfig::new("unnamed"), Box::new(sink)).unwrap(),
                "snk",
            )
            .unwrap();
        pipeline.link(&["src", "xfm", "snk"]).unwrap();
        (pipeline, collected)
    }

    #[test]
    fn test_chunk_transform() {
        let data = vec![1u8; 1000];
        let doubler = Transform::new(|input| {
            Ok(input.iter().map(|b| b.wrapping_mul(2)).collect())
        });
        let (mut pipeline, collected) = run_chain(data, Box::new(doubler), 128);
        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().as_slice(), vec![2u8; 1000].as_slice());
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_unit_transform_reassembles_units() {
        // 25 units of 40 bytes, delivered through 7-byte chunks: every unit
        // needs several reads before it is complete.
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let expected: Vec<u8> = data.iter().map(|b| !b).collect();
        let invert = UnitTransform::new(40, UnitPolicy::Halt, |unit| {
            Ok(unit.iter().map(|b| !b).collect())
        });
        let (mut pipeline, collected) = run_chain(data, Box::new(invert), 7);
        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().as_slice(), expected.as_slice());
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_unit_transform_drops_trailing_partial() {
        // 90 bytes = 2 full units of 40, 10 bytes of tail to discard.
        let data = vec![5u8; 90];
        let ident = UnitTransform::new(40, UnitPolicy::Halt, |unit| Ok(unit.to_vec()));
        let (mut pipeline, collected) = run_chain(data, Box::new(ident), 64);
        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().len(), 80);
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_skip_policy_drops_corrupt_units() {
        // Units whose first byte is 0xBB are "corrupt".
        let mut data = Vec::new();
        data.extend_from_slice(&[0xAAu8; 8]);
        data.extend_from_slice(&[0xBBu8; 8]);
        data.extend_from_slice(&[0xCCu8; 8]);
        let screen = UnitTransform::new(8, UnitPolicy::Skip, |unit| {
            if unit[0] == 0xBB {
                Err(Error::Transform("bad sync word".into()))
            } else {
                Ok(unit.to_vec())
            }
        });
        let (mut pipeline, collected) = run_chain(data, Box::new(screen), 64);
        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();

        let got = collected.lock().unwrap();
        assert_eq!(got.len(), 16);
        assert!(got[..8].iter().all(|&b| b == 0xAA));
        assert!(got[8..].iter().all(|&b| b == 0xCC));
        assert_eq!(
            pipeline.element_by_tag("xfm").unwrap().state(),
            ElementState::Init // finished, then reset by wait_for_stop
        );
        drop(got);
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_halt_policy_stops_element_with_error() {
        let data = vec![0xBBu8; 32];
        let strict = UnitTransform::new(8, UnitPolicy::Halt, |_| {
            Err(Error::Transform("bad sync word".into()))
        });
        let (mut pipeline, collected) = run_chain(data, Box::new(strict), 64);
        pipeline.run().unwrap();

        let xfm = pipeline.element_by_tag("xfm").unwrap();
        xfm.wait_for_stop(WAIT).unwrap();
        assert_eq!(xfm.state(), ElementState::Error);
        assert!(collected.lock().unwrap().is_empty());

        // The rest of the pipeline did not tear down on its own.
        let src = pipeline.element_by_tag("src").unwrap();
        assert_ne!(src.state(), ElementState::Error);

        pipeline.stop().unwrap();
        pipeline.terminate().unwrap();
    }
}
