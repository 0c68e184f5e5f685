//! Byte relay element.

use crate::element::{ElementContext, ProcessOutcome, Processor};
use crate::error::Result;
use crate::port::IoOutcome;

/// Relays input to output unchanged, one chunk per cycle.
///
/// Useful as a pipeline stage boundary (its ports decouple producer and
/// consumer rates) and as the body of app-fed raw streams built from
/// callback ports.
#[derive(Default)]
pub struct Passthrough;

impl Passthrough {
    /// Create a passthrough element body.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for Passthrough {
    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        let mut buf = vec![0u8; ctx.chunk_size()];
        match ctx.read(&mut buf)? {
            IoOutcome::Data(n) => match ctx.write(&buf[..n])? {
                IoOutcome::Data(written) => {
                    ctx.update_byte_pos(written as u64);
                    Ok(ProcessOutcome::Processed(written))
                }
                other => Ok(ProcessOutcome::from_io(other)),
            },
            other => Ok(ProcessOutcome::from_io(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{AudioElement, ElementConfig};
    use crate::error::Error;
    use crate::port::{IoOutcome, Port};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    #[test]
    fn test_passthrough_over_callback_ports() {
        // App-fed source and app-drained sink, both over callback ports.
        let mut feed: Vec<u8> = (0..=255u8).collect();
        let input = Port::reader_callback(move |dst, _| {
            if feed.is_empty() {
                return Ok(IoOutcome::Done);
            }
            let n = feed.len().min(dst.len());
            dst[..n].copy_from_slice(&feed[..n]);
            feed.drain(..n);
            Ok(IoOutcome::Data(n))
        });

        let drained = Arc::new(Mutex::new(Vec::new()));
        let drained2 = Arc::clone(&drained);
        let output = Port::writer_callback(move |src, _| {
            drained2.lock().unwrap().extend_from_slice(src);
            Ok(IoOutcome::Data(src.len()))
        });

        let element = AudioElement::new(
            ElementConfig::new("raw")
                .with_chunk_size(40)
                .with_input_port(input)
                .with_output_port(output),
            Box::new(Passthrough::new()),
        )
        .unwrap();

        element.run().unwrap();
        element.resume(0.0, WAIT).unwrap();
        element.wait_for_stop(WAIT).unwrap();

        let expected: Vec<u8> = (0..=255u8).collect();
        assert_eq!(drained.lock().unwrap().as_slice(), expected.as_slice());
        element.terminate().unwrap();
    }

    #[test]
    fn test_callback_error_propagates() {
        let input = Port::reader_callback(|_, _| {
            Err(Error::Transform("capture device vanished".into()))
        });
        let element = AudioElement::new(
            ElementConfig::new("raw")
                .with_input_port(input)
                .with_output_port(Port::ring(256).unwrap()),
            Box::new(Passthrough::new()),
        )
        .unwrap();

        element.run().unwrap();
        element.resume(0.0, WAIT).unwrap();
        element.wait_for_stop(WAIT).unwrap();
        assert_eq!(element.state(), crate::element::ElementState::Error);
        element.terminate().unwrap();
    }
}
