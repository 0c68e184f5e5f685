//! Execution context handed to a [`Processor`](crate::element::Processor).
//!
//! The context is the processor's only view of its element: port I/O bounded
//! by the element's timeouts, stream-info tracking with report-on-change, and
//! position accounting. Everything else (state machine, commands, task) stays
//! with the engine.

use crate::element::audio_element::ElementShared;
use crate::element::state::BUFFER_LEVEL;
use crate::element::{CodecFormat, ElementStatus, StreamInfo};
use crate::error::{Error, Result};
use crate::event::{BusMessage, BusPayload};
use crate::port::IoOutcome;
use std::sync::Arc;
use std::time::Duration;

/// Per-step execution context for a processor.
pub struct ElementContext {
    shared: Arc<ElementShared>,
}

impl ElementContext {
    pub(crate) fn new(shared: Arc<ElementShared>) -> Self {
        Self { shared }
    }

    /// Tag of the owning element.
    pub fn tag(&self) -> Arc<str> {
        self.shared.tag()
    }

    /// Recommended working-chunk size for scratch buffers.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// True when an input port is connected.
    pub fn has_input(&self) -> bool {
        self.shared.ports.lock().unwrap().input.is_some()
    }

    /// True when an output port is connected.
    pub fn has_output(&self) -> bool {
        self.shared.ports.lock().unwrap().output.is_some()
    }

    /// Read from the input port with the element's input timeout.
    pub fn read(&self, dst: &mut [u8]) -> Result<IoOutcome> {
        let port = self.shared.ports.lock().unwrap().input.clone();
        let Some(port) = port else {
            return Err(Error::PortUnavailable {
                element: self.shared.tag().to_string(),
                side: "input",
            });
        };
        let timeout = *self.shared.input_timeout.lock().unwrap();
        match port.read(dst, timeout) {
            Ok(outcome) => {
                match outcome {
                    IoOutcome::Timeout => {
                        tracing::trace!(element = %self.shared.tag(), "input timed out")
                    }
                    IoOutcome::Aborted => {
                        tracing::warn!(element = %self.shared.tag(), "input aborted")
                    }
                    IoOutcome::Done => {
                        tracing::debug!(element = %self.shared.tag(), "input done")
                    }
                    IoOutcome::Data(_) => {}
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(element = %self.shared.tag(), error = %e, "input failed");
                self.shared.report_status(ElementStatus::ErrorInput);
                Err(e)
            }
        }
    }

    /// Read from an extra fan-in port by slot index.
    pub fn read_extra(
        &self,
        index: usize,
        dst: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<IoOutcome> {
        let port = {
            let ports = self.shared.ports.lock().unwrap();
            ports.extra_in.get(index).cloned().flatten()
        };
        let Some(port) = port else {
            return Err(Error::PortUnavailable {
                element: self.shared.tag().to_string(),
                side: "extra input",
            });
        };
        port.read(dst, timeout)
    }

    /// Write to the output port(s) with the element's output timeout.
    ///
    /// The primary output is written with backpressure; extra fan-out ports
    /// are written best-effort and their failures are logged, never fatal.
    pub fn write(&self, src: &[u8]) -> Result<IoOutcome> {
        let (primary, extras) = {
            let ports = self.shared.ports.lock().unwrap();
            (ports.output.clone(), ports.extra_out.clone())
        };
        let Some(primary) = primary else {
            return Err(Error::PortUnavailable {
                element: self.shared.tag().to_string(),
                side: "output",
            });
        };
        let timeout = *self.shared.output_timeout.lock().unwrap();
        let result = primary.write(src, timeout);

        // Wake anyone pre-rolling on the output fill level; failures wake
        // them too so they can observe the element's fate.
        let expect = self
            .shared
            .level_expect
            .load(std::sync::atomic::Ordering::Relaxed);
        if expect > 0 {
            let reached = primary.filled_size() >= expect
                || !matches!(result, Ok(IoOutcome::Data(_)));
            if reached {
                self.shared.flags.set(BUFFER_LEVEL);
            }
        }

        match result {
            Ok(outcome) => {
                for (index, port) in extras.iter().enumerate() {
                    let Some(port) = port else { continue };
                    match port.write(src, Some(Duration::ZERO)) {
                        Ok(IoOutcome::Data(_)) => {}
                        Ok(other) => tracing::warn!(
                            element = %self.shared.tag(),
                            slot = index,
                            outcome = ?other,
                            "fan-out write dropped"
                        ),
                        Err(e) => tracing::warn!(
                            element = %self.shared.tag(),
                            slot = index,
                            error = %e,
                            "fan-out write failed"
                        ),
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(element = %self.shared.tag(), error = %e, "output failed");
                self.shared.report_status(ElementStatus::ErrorOutput);
                Err(e)
            }
        }
    }

    /// Mark the output port(s) finished so downstream drains to `Done`.
    pub fn write_done(&self) {
        let ports = self.shared.ports.lock().unwrap();
        if let Some(port) = &ports.output {
            port.set_done_write();
        }
        for port in ports.extra_out.iter().flatten() {
            port.set_done_write();
        }
    }

    /// Snapshot of the element's stream info.
    pub fn stream_info(&self) -> StreamInfo {
        self.shared.info.lock().unwrap().clone()
    }

    /// Update sample rate, channel count and bit depth, republishing through
    /// the bus only when the values actually changed since the last report.
    pub fn set_music_info(&self, sample_rate: u32, channels: u8, bits: u8) {
        {
            let mut info = self.shared.info.lock().unwrap();
            info.sample_rate = sample_rate;
            info.channels = channels;
            info.bits = bits;
        }
        self.shared.report_info_if_changed();
    }

    /// Update the codec identifier, republishing on change.
    pub fn set_codec(&self, codec: CodecFormat) {
        self.shared.info.lock().unwrap().codec = codec;
        self.shared.report_info_if_changed();
    }

    /// Advance the processed-bytes position.
    pub fn update_byte_pos(&self, delta: u64) {
        self.shared.info.lock().unwrap().byte_pos += delta;
    }

    /// Set the processed-bytes position absolutely.
    pub fn set_byte_pos(&self, pos: u64) {
        self.shared.info.lock().unwrap().byte_pos = pos;
    }

    /// Set the known total stream length.
    pub fn set_total_bytes(&self, total: u64) {
        self.shared.info.lock().unwrap().total_bytes = total;
    }

    /// Publish the current position through the bus.
    pub fn report_position(&self) {
        let (byte_pos, total_bytes) = {
            let info = self.shared.info.lock().unwrap();
            (info.byte_pos, info.total_bytes)
        };
        self.shared.bus.post(BusMessage {
            source_tag: self.shared.tag(),
            payload: BusPayload::Position {
                byte_pos,
                total_bytes,
            },
        });
    }
}
