//! Priority fan-in element.
//!
//! A funnel merges several candidate input sources into one output stream by
//! always draining the highest-priority source currently holding data — the
//! arbitration a speaker mixer applies across concurrent players, prompts
//! and voice calls. The candidate set lives in a shared
//! [`PortInfoList`](crate::port::PortInfoList) so the application can add,
//! retune or drop sources while the funnel runs.

use crate::element::{ElementContext, ProcessOutcome, Processor};
use crate::error::Result;
use crate::port::{IoOutcome, PortInfoList};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Merges the highest-priority source with data into the output port.
///
/// A lower-priority source is only drained while no higher-priority source
/// holds data. The funnel never finishes on its own: sources come and go, so
/// the application stops it explicitly.
pub struct PriorityFunnel {
    sources: Arc<Mutex<PortInfoList>>,
    poll_interval: Duration,
}

impl PriorityFunnel {
    /// Funnel over a shared source list.
    pub fn new(sources: Arc<Mutex<PortInfoList>>) -> Self {
        Self {
            sources,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How long to sleep when no source holds data.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Processor for PriorityFunnel {
    fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
        let selected = {
            let sources = self.sources.lock().unwrap();
            sources
                .get_valid_port_id()
                .and_then(|id| sources.get_by_port_id(id))
                .and_then(|info| info.port.clone())
        };
        let Some(port) = selected else {
            std::thread::sleep(self.poll_interval);
            return Ok(ProcessOutcome::Timeout);
        };

        let mut buf = vec![0u8; ctx.chunk_size()];
        match port.read(&mut buf, Some(Duration::ZERO))? {
            IoOutcome::Data(n) => match ctx.write(&buf[..n])? {
                IoOutcome::Data(written) => {
                    ctx.update_byte_pos(written as u64);
                    Ok(ProcessOutcome::Processed(written))
                }
                other => Ok(ProcessOutcome::from_io(other)),
            },
            // A drained, aborted or finished source only means "nothing from
            // this one right now"; another source may feed the next cycle.
            _ => Ok(ProcessOutcome::Timeout),
        }
    }
}
