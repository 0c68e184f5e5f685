//! The audio element: one processing stage with its own task, ports and
//! state machine.
//!
//! Control operations (run/pause/resume/stop/terminate) never mutate the
//! element from outside. They send explicit commands into the task's bounded
//! control channel and synchronize on waitable flags, so the task alone
//! drives the state machine. While idle the task blocks on the channel;
//! while running it polls the channel once per processing cycle, which is the
//! cooperative-stop contract: every loop iteration observes pending control.

use crate::element::context::ElementContext;
use crate::element::state::{
    ElementState, ElementStatus, FlagSet, BUFFER_LEVEL, PAUSED, RESUMED, STOPPED, TASK_CREATED,
    TASK_DESTROYED,
};
use crate::element::traits::{ProcessOutcome, Processor};
use crate::element::StreamInfo;
use crate::error::{Error, Result};
use crate::event::{BusMessage, BusPayload, EventBus};
use crate::port::Port;
use smallvec::{smallvec, SmallVec};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default working-chunk size for processors.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
/// Default ring capacity for pipeline-created output ports.
pub const DEFAULT_RING_SIZE: u32 = 8 * 1024;
/// Default node size for pipeline-created frame output ports.
pub const DEFAULT_FRAME_NODE_SIZE: usize = 1024;
/// Default node count for pipeline-created frame output ports.
pub const DEFAULT_FRAME_NODE_COUNT: usize = 4;

/// Default bound on input reads. Finite so an idle element returns to its
/// control loop at least this often; a timed-out read is a quiet retry.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_millis(100);

const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);
const CONTROL_QUEUE_DEPTH: usize = 8;
const ELEMENT_BUS_CAPACITY: usize = 16;

/// Geometry of the connecting port a pipeline creates on this element's
/// output when linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSpec {
    /// Continuous byte stream over a ring buffer.
    Ring {
        /// Ring capacity in bytes.
        size: u32,
    },
    /// Discrete frames over a frame pool.
    Frame {
        /// Node size in bytes.
        node_size: usize,
        /// Node count.
        node_count: usize,
    },
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self::Ring {
            size: DEFAULT_RING_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Resume,
    Pause,
    Stop,
    Terminate,
}

/// Construction parameters for an [`AudioElement`].
#[derive(Debug)]
pub struct ElementConfig {
    tag: String,
    chunk_size: usize,
    input_timeout: Option<Duration>,
    output_timeout: Option<Duration>,
    output: OutputSpec,
    extra_inputs: usize,
    extra_outputs: usize,
    stack_size: usize,
    input_port: Option<Port>,
    output_port: Option<Port>,
}

impl ElementConfig {
    /// Start a config for an element with the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            input_timeout: Some(DEFAULT_INPUT_TIMEOUT),
            output_timeout: None,
            output: OutputSpec::default(),
            extra_inputs: 0,
            extra_outputs: 0,
            stack_size: 0,
            input_port: None,
            output_port: None,
        }
    }

    /// Working-chunk size handed to the processor.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Bound on input port reads (`None` waits forever; the default is
    /// [`DEFAULT_INPUT_TIMEOUT`] so idle elements keep servicing control).
    pub fn with_input_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.input_timeout = timeout;
        self
    }

    /// Bound on output port writes (`None`, the default, waits forever:
    /// backpressure blocks the producer until the consumer catches up).
    pub fn with_output_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.output_timeout = timeout;
        self
    }

    /// Link-time output: ring buffer of `size` bytes.
    pub fn with_ring_output(mut self, size: u32) -> Self {
        self.output = OutputSpec::Ring { size };
        self
    }

    /// Link-time output: frame pool of `node_count` nodes of `node_size`.
    pub fn with_frame_output(mut self, node_size: usize, node_count: usize) -> Self {
        self.output = OutputSpec::Frame {
            node_size,
            node_count,
        };
        self
    }

    /// Number of extra fan-in port slots.
    pub fn with_extra_inputs(mut self, slots: usize) -> Self {
        self.extra_inputs = slots;
        self
    }

    /// Number of extra fan-out port slots.
    pub fn with_extra_outputs(mut self, slots: usize) -> Self {
        self.extra_outputs = slots;
        self
    }

    /// Task stack size in bytes (0 uses the platform default).
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Preset input port (typically a callback port for app-fed sources).
    pub fn with_input_port(mut self, port: Port) -> Self {
        self.input_port = Some(port);
        self
    }

    /// Preset output port (typically a callback port for app-drained sinks).
    pub fn with_output_port(mut self, port: Port) -> Self {
        self.output_port = Some(port);
        self
    }
}

pub(crate) struct PortSet {
    pub input: Option<Port>,
    pub output: Option<Port>,
    pub extra_in: SmallVec<[Option<Port>; 2]>,
    pub extra_out: SmallVec<[Option<Port>; 2]>,
}

pub(crate) struct ElementShared {
    pub tag: Mutex<Arc<str>>,
    pub chunk_size: usize,
    pub out_spec: OutputSpec,
    pub state: Mutex<ElementState>,
    pub flags: FlagSet,
    pub ports: Mutex<PortSet>,
    pub info: Mutex<StreamInfo>,
    pub last_reported: Mutex<Option<(u32, u8, u8, crate::element::CodecFormat)>>,
    pub bus: EventBus,
    pub input_timeout: Mutex<Option<Duration>>,
    pub output_timeout: Mutex<Option<Duration>>,
    pub level_expect: AtomicUsize,
    pub running: AtomicBool,
    pub task_run: AtomicBool,
    pub stopping: AtomicBool,
}

impl ElementShared {
    pub fn tag(&self) -> Arc<str> {
        Arc::clone(&self.tag.lock().unwrap())
    }

    pub fn state(&self) -> ElementState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: ElementState) {
        let mut current = self.state.lock().unwrap();
        if *current != state {
            tracing::debug!(element = %self.tag(), from = ?*current, to = ?state, "state change");
            *current = state;
        }
    }

    pub fn report_status(&self, status: ElementStatus) {
        self.bus.post(BusMessage {
            source_tag: self.tag(),
            payload: BusPayload::Status(status),
        });
    }

    /// Publish stream info only when the reportable fields changed since the
    /// last publication (avoids event storms from chatty decoders).
    pub fn report_info_if_changed(&self) {
        let info = self.info.lock().unwrap().clone();
        let signature = info.signature();
        let mut last = self.last_reported.lock().unwrap();
        if last.as_ref() == Some(&signature) {
            return;
        }
        *last = Some(signature);
        drop(last);
        self.bus.post(BusMessage {
            source_tag: self.tag(),
            payload: BusPayload::StreamInfo(info),
        });
    }

    pub fn abort_ports(&self) {
        let ports = self.ports.lock().unwrap();
        if let Some(port) = &ports.input {
            port.abort();
        }
        if let Some(port) = &ports.output {
            port.abort();
        }
        for port in ports.extra_in.iter().flatten() {
            port.abort();
        }
        for port in ports.extra_out.iter().flatten() {
            port.abort();
        }
    }

    pub fn reset_output_ports(&self) {
        let ports = self.ports.lock().unwrap();
        if let Some(port) = &ports.output {
            port.reset();
        }
        for port in ports.extra_out.iter().flatten() {
            port.reset();
        }
    }

    pub fn reset_input_ports(&self) {
        let ports = self.ports.lock().unwrap();
        if let Some(port) = &ports.input {
            port.reset();
        }
        for port in ports.extra_in.iter().flatten() {
            port.reset();
        }
    }
}

/// One pipeline processing stage with its own task and state machine.
///
/// `AudioElement` is a cheap handle; clones control the same element.
#[derive(Clone)]
pub struct AudioElement {
    shared: Arc<ElementShared>,
    cmd_tx: kanal::Sender<Command>,
    cmd_rx: kanal::Receiver<Command>,
    processor: Arc<Mutex<Option<Box<dyn Processor>>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stack_size: usize,
}

impl AudioElement {
    /// Build an element around a processor. Fails on inconsistent config;
    /// no element exists on failure.
    pub fn new(config: ElementConfig, processor: Box<dyn Processor>) -> Result<Self> {
        if config.tag.is_empty() {
            return Err(Error::InvalidConfig("element tag must not be empty".into()));
        }
        if config.chunk_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "element '{}' needs a nonzero chunk size",
                config.tag
            )));
        }
        let (cmd_tx, cmd_rx) = kanal::bounded(CONTROL_QUEUE_DEPTH);
        let shared = Arc::new(ElementShared {
            tag: Mutex::new(Arc::from(config.tag.as_str())),
            chunk_size: config.chunk_size,
            out_spec: config.output,
            state: Mutex::new(ElementState::Init),
            flags: FlagSet::new(),
            ports: Mutex::new(PortSet {
                input: config.input_port,
                output: config.output_port,
                extra_in: smallvec![None; config.extra_inputs],
                extra_out: smallvec![None; config.extra_outputs],
            }),
            info: Mutex::new(StreamInfo::default()),
            last_reported: Mutex::new(None),
            bus: EventBus::new(ELEMENT_BUS_CAPACITY),
            input_timeout: Mutex::new(config.input_timeout),
            output_timeout: Mutex::new(config.output_timeout),
            level_expect: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            task_run: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        });
        Ok(Self {
            shared,
            cmd_tx,
            cmd_rx,
            processor: Arc::new(Mutex::new(Some(processor))),
            task: Arc::new(Mutex::new(None)),
            stack_size: config.stack_size,
        })
    }

    /// The element's tag.
    pub fn tag(&self) -> Arc<str> {
        self.shared.tag()
    }

    /// Rename the element. Pipelines retag elements at registration.
    pub fn set_tag(&self, tag: impl Into<Arc<str>>) {
        *self.shared.tag.lock().unwrap() = tag.into();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ElementState {
        self.shared.state()
    }

    /// True after `stop` was requested and before the task acknowledged it.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// The element's own event bus (chain it to observe this element alone).
    pub fn bus(&self) -> EventBus {
        self.shared.bus.clone()
    }

    /// Chain this element's reports into `listener`.
    pub fn set_listener(&self, listener: &EventBus) {
        self.shared.bus.chain(listener);
    }

    /// Detach from the chained listener.
    pub fn remove_listener(&self) {
        self.shared.bus.unchain();
    }

    /// Link-time output geometry.
    pub fn output_spec(&self) -> OutputSpec {
        self.shared.out_spec
    }

    /// Connect or disconnect the input port.
    pub fn set_input_port(&self, port: Option<Port>) {
        self.shared.ports.lock().unwrap().input = port;
    }

    /// Connect or disconnect the primary output port.
    pub fn set_output_port(&self, port: Option<Port>) {
        self.shared.ports.lock().unwrap().output = port;
    }

    /// Current input port handle.
    pub fn input_port(&self) -> Option<Port> {
        self.shared.ports.lock().unwrap().input.clone()
    }

    /// Current primary output port handle.
    pub fn output_port(&self) -> Option<Port> {
        self.shared.ports.lock().unwrap().output.clone()
    }

    /// Connect an extra fan-in port by slot index.
    pub fn set_extra_input_port(&self, index: usize, port: Option<Port>) -> Result<()> {
        let mut ports = self.shared.ports.lock().unwrap();
        match ports.extra_in.get_mut(index) {
            Some(slot) => {
                *slot = port;
                Ok(())
            }
            None => Err(Error::InvalidConfig(format!(
                "element '{}' has {} extra input slots, index {} is out of range",
                self.shared.tag(),
                ports.extra_in.len(),
                index
            ))),
        }
    }

    /// Connect an extra fan-out port by slot index.
    pub fn set_extra_output_port(&self, index: usize, port: Option<Port>) -> Result<()> {
        let mut ports = self.shared.ports.lock().unwrap();
        match ports.extra_out.get_mut(index) {
            Some(slot) => {
                *slot = port;
                Ok(())
            }
            None => Err(Error::InvalidConfig(format!(
                "element '{}' has {} extra output slots, index {} is out of range",
                self.shared.tag(),
                ports.extra_out.len(),
                index
            ))),
        }
    }

    /// Bound on input port reads.
    pub fn set_input_timeout(&self, timeout: Option<Duration>) {
        *self.shared.input_timeout.lock().unwrap() = timeout;
    }

    /// Bound on output port writes.
    pub fn set_output_timeout(&self, timeout: Option<Duration>) {
        *self.shared.output_timeout.lock().unwrap() = timeout;
    }

    /// Snapshot of the element's stream info.
    pub fn stream_info(&self) -> StreamInfo {
        self.shared.info.lock().unwrap().clone()
    }

    /// Set the source locator on the stream info.
    pub fn set_uri(&self, uri: Option<String>) {
        self.shared.info.lock().unwrap().uri = uri;
    }

    /// Spawn the element task. Idempotent while the task is alive. The task
    /// starts idle in `Init`; [`resume`](Self::resume) starts processing.
    pub fn run(&self) -> Result<()> {
        let mut task_slot = self.task.lock().unwrap();
        if task_slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::debug!(element = %self.shared.tag(), "element task already created");
            return Ok(());
        }
        // Discard control messages left over from a previous cycle.
        while let Ok(Some(_)) = self.cmd_rx.try_recv() {}
        self.shared
            .flags
            .clear(TASK_CREATED | TASK_DESTROYED | STOPPED);

        let shared = Arc::clone(&self.shared);
        let rx = self.cmd_rx.clone();
        let slot = Arc::clone(&self.processor);
        let mut builder = std::thread::Builder::new().name(format!("el-{}", self.shared.tag()));
        if self.stack_size > 0 {
            builder = builder.stack_size(self.stack_size);
        }
        let handle = builder
            .spawn(move || task_main(shared, rx, slot))
            .map_err(|e| {
                Error::AllocationFailed(format!(
                    "element '{}' task spawn failed: {e}",
                    self.shared.tag()
                ))
            })?;
        *task_slot = Some(handle);
        drop(task_slot);

        if !self.shared.flags.wait(TASK_CREATED, Some(CONTROL_TIMEOUT)) {
            return Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "start",
            });
        }
        tracing::debug!(element = %self.shared.tag(), "element task created");
        Ok(())
    }

    /// Start or continue processing.
    ///
    /// With `buffer_threshold` in `(0, 1]`, resume additionally waits until
    /// the output port fill reaches that fraction of its capacity (pre-roll)
    /// before returning.
    pub fn resume(&self, buffer_threshold: f32, timeout: Option<Duration>) -> Result<()> {
        if !self.shared.task_run.load(Ordering::SeqCst) {
            return Err(Error::InvalidState {
                element: self.shared.tag().to_string(),
                operation: "resume",
                state: self.state(),
            });
        }
        if !(0.0..=1.0).contains(&buffer_threshold) {
            return Err(Error::InvalidConfig(format!(
                "resume threshold {} outside [0, 1]",
                buffer_threshold
            )));
        }
        match self.state() {
            ElementState::Running => {
                self.shared.report_status(ElementStatus::Running);
                return Ok(());
            }
            ElementState::Finished => {
                self.shared.report_status(ElementStatus::Finished);
                return Ok(());
            }
            ElementState::Error => {
                return Err(Error::InvalidState {
                    element: self.shared.tag().to_string(),
                    operation: "resume",
                    state: ElementState::Error,
                });
            }
            _ => {}
        }

        self.shared.flags.clear(RESUMED);
        self.send_command(Command::Resume)?;
        if !self
            .shared
            .flags
            .wait(RESUMED, timeout.or(Some(CONTROL_TIMEOUT)))
        {
            return Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "resume",
            });
        }
        if self.state() == ElementState::Error {
            return Err(Error::InvalidState {
                element: self.shared.tag().to_string(),
                operation: "resume",
                state: ElementState::Error,
            });
        }
        if buffer_threshold > 0.0 {
            let level = self
                .output_port()
                .map(|port| (port.total_size() as f32 * buffer_threshold) as usize)
                .unwrap_or(0);
            self.wait_for_buffer(level, timeout)?;
        }
        Ok(())
    }

    /// Block until the output port holds at least `level` units (bytes for a
    /// ring port, frames for a frame port).
    pub fn wait_for_buffer(&self, level: usize, timeout: Option<Duration>) -> Result<()> {
        if level == 0 {
            return Ok(());
        }
        let Some(port) = self.output_port() else {
            return Err(Error::PortUnavailable {
                element: self.shared.tag().to_string(),
                side: "output",
            });
        };
        self.shared.level_expect.store(level, Ordering::SeqCst);
        self.shared.flags.clear(BUFFER_LEVEL);
        // The level may have been crossed before we armed the flag.
        let reached = port.filled_size() >= level
            || self
                .shared
                .flags
                .wait(BUFFER_LEVEL, timeout.or(Some(CONTROL_TIMEOUT)));
        self.shared.level_expect.store(0, Ordering::SeqCst);
        if reached {
            Ok(())
        } else {
            Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "pre-roll",
            })
        }
    }

    /// Suspend processing; the task keeps its resources and waits.
    pub fn pause(&self) -> Result<()> {
        if !self.shared.task_run.load(Ordering::SeqCst) {
            return Err(Error::InvalidState {
                element: self.shared.tag().to_string(),
                operation: "pause",
                state: self.state(),
            });
        }
        if self.state() != ElementState::Running {
            tracing::debug!(element = %self.shared.tag(), state = ?self.state(), "pause ignored");
            return Ok(());
        }
        self.shared.flags.clear(PAUSED);
        self.send_command(Command::Pause)?;
        if !self.shared.flags.wait(PAUSED, Some(CONTROL_TIMEOUT)) {
            return Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "pause",
            });
        }
        Ok(())
    }

    /// Request a cooperative stop: ports are aborted so the task unblocks,
    /// then the stop command is queued. Pair with
    /// [`wait_for_stop`](Self::wait_for_stop).
    pub fn stop(&self) -> Result<()> {
        if !self.shared.task_run.load(Ordering::SeqCst) {
            return Err(Error::InvalidState {
                element: self.shared.tag().to_string(),
                operation: "stop",
                state: self.state(),
            });
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            // Idle (paused or already terminal): no loop to interrupt.
            if self.state() == ElementState::Paused {
                let _ = self.send_command(Command::Stop);
            }
            self.shared.flags.set(STOPPED);
            self.shared.report_status(ElementStatus::Stopped);
            return Ok(());
        }
        self.shared.abort_ports();
        if self.state() == ElementState::Running {
            self.shared.flags.clear(STOPPED);
        }
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            tracing::debug!(element = %self.shared.tag(), "stop already requested");
            return Ok(());
        }
        if let Err(e) = self.send_command(Command::Stop) {
            self.shared.stopping.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Block until the task acknowledged a stop (or finished on its own).
    pub fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            tracing::debug!(element = %self.shared.tag(), "already stopped");
            return Ok(());
        }
        if self.shared.flags.wait(STOPPED, timeout) {
            Ok(())
        } else {
            Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "wait for stop",
            })
        }
    }

    /// Tear the task down entirely. The element object remains and can be
    /// run again.
    pub fn terminate(&self) -> Result<()> {
        let handle = {
            let mut task_slot = self.task.lock().unwrap();
            match task_slot.take() {
                Some(handle) => handle,
                None => return Ok(()),
            }
        };
        self.shared.abort_ports();
        self.shared.flags.clear(TASK_DESTROYED);
        let _ = self.send_command(Command::Terminate);
        if !self.shared.flags.wait(TASK_DESTROYED, Some(CONTROL_TIMEOUT)) {
            // Put the handle back so a later terminate can retry.
            *self.task.lock().unwrap() = Some(handle);
            return Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "terminate",
            });
        }
        let _ = handle.join();
        tracing::debug!(element = %self.shared.tag(), "element task destroyed");
        Ok(())
    }

    /// Force the state machine back to `Init` so the element can be resumed
    /// after reaching a terminal state.
    pub fn reset_state(&self) {
        self.shared.set_state(ElementState::Init);
    }

    /// Reset the element's ports (drop buffered data, clear abort/done).
    pub fn reset_ports(&self) {
        self.shared.reset_input_ports();
        self.shared.reset_output_ports();
    }

    fn send_command(&self, cmd: Command) -> Result<()> {
        match self.cmd_tx.try_send(cmd) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::ControlTimeout {
                element: self.shared.tag().to_string(),
                operation: "queue command",
            }),
            Err(_) => Err(Error::ChannelClosed(self.shared.tag().to_string())),
        }
    }
}

impl std::fmt::Debug for AudioElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioElement")
            .field("tag", &self.shared.tag())
            .field("state", &self.state())
            .finish()
    }
}

fn task_main(
    shared: Arc<ElementShared>,
    rx: kanal::Receiver<Command>,
    slot: Arc<Mutex<Option<Box<dyn Processor>>>>,
) {
    let mut processor = match slot.lock().unwrap().take() {
        Some(p) => p,
        None => {
            tracing::error!(element = %shared.tag(), "processor unavailable, task exiting");
            shared
                .flags
                .set(TASK_CREATED | TASK_DESTROYED | STOPPED | RESUMED | PAUSED);
            return;
        }
    };
    shared.task_run.store(true, Ordering::SeqCst);
    shared.set_state(ElementState::Init);
    shared.flags.set(TASK_CREATED);
    tracing::debug!(element = %shared.tag(), "element task started");

    let mut ctx = ElementContext::new(Arc::clone(&shared));
    let mut open = false;
    // While idle the task blocks on the control channel; while running it
    // polls once per cycle.
    let mut idle = true;

    loop {
        let cmd = if idle {
            match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        } else {
            match rx.try_recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            }
        };

        if let Some(cmd) = cmd {
            tracing::trace!(element = %shared.tag(), command = ?cmd, "control command");
            match cmd {
                Command::Resume => {
                    if shared.state() == ElementState::Running {
                        shared.running.store(true, Ordering::SeqCst);
                        idle = false;
                        shared.flags.set(RESUMED);
                    } else {
                        if shared.state().is_terminal() {
                            // Stale data from the previous cycle must not
                            // leak into the new one.
                            shared.reset_output_ports();
                        }
                        match processor.open(&mut ctx) {
                            Ok(()) => {
                                open = true;
                                shared.running.store(true, Ordering::SeqCst);
                                shared.set_state(ElementState::Running);
                                shared.report_status(ElementStatus::Running);
                                shared.flags.clear(STOPPED);
                                idle = false;
                            }
                            Err(e) => {
                                tracing::error!(element = %shared.tag(), error = %e, "open failed");
                                shared.set_state(ElementState::Error);
                                shared.report_status(ElementStatus::ErrorOpen);
                                shared.abort_ports();
                                shared.running.store(false, Ordering::SeqCst);
                                shared.flags.set(STOPPED);
                                idle = true;
                            }
                        }
                        shared.flags.set(RESUMED);
                    }
                }
                Command::Pause => {
                    if open {
                        if let Err(e) = processor.close(&mut ctx) {
                            tracing::warn!(element = %shared.tag(), error = %e, "close failed");
                        }
                        open = false;
                    }
                    shared.running.store(false, Ordering::SeqCst);
                    shared.set_state(ElementState::Paused);
                    shared.report_status(ElementStatus::Paused);
                    shared.flags.set(PAUSED);
                    idle = true;
                }
                Command::Stop => {
                    enter_stopped(&shared, &mut processor, &mut ctx, &mut open, &mut idle);
                }
                Command::Terminate => break,
            }
        }

        if !shared.running.load(Ordering::SeqCst) {
            continue;
        }

        match processor.process(&mut ctx) {
            Ok(ProcessOutcome::Processed(n)) => {
                tracing::trace!(element = %shared.tag(), bytes = n, "processed");
            }
            Ok(ProcessOutcome::Timeout) => {
                tracing::trace!(element = %shared.tag(), "process cycle timed out");
            }
            Ok(ProcessOutcome::Finished) => {
                tracing::debug!(element = %shared.tag(), "stream finished");
                ctx.write_done();
                if open {
                    if let Err(e) = processor.close(&mut ctx) {
                        tracing::warn!(element = %shared.tag(), error = %e, "close failed");
                    }
                    open = false;
                }
                shared.set_state(ElementState::Finished);
                shared.report_status(ElementStatus::Finished);
                shared.running.store(false, Ordering::SeqCst);
                shared.flags.set(STOPPED);
                idle = true;
            }
            Ok(ProcessOutcome::Aborted) => {
                tracing::debug!(element = %shared.tag(), "process aborted");
                enter_stopped(&shared, &mut processor, &mut ctx, &mut open, &mut idle);
            }
            Err(e) => {
                tracing::error!(element = %shared.tag(), error = %e, "process failed");
                shared.report_status(ElementStatus::ErrorProcess);
                if open {
                    let _ = processor.close(&mut ctx);
                    open = false;
                }
                shared.set_state(ElementState::Error);
                shared.running.store(false, Ordering::SeqCst);
                shared.flags.set(STOPPED);
                idle = true;
            }
        }
    }

    if open {
        let _ = processor.close(&mut ctx);
    }
    if matches!(
        shared.state(),
        ElementState::Running | ElementState::Paused | ElementState::Init
    ) {
        shared.set_state(ElementState::Stopped);
    }
    shared.running.store(false, Ordering::SeqCst);
    shared.stopping.store(false, Ordering::SeqCst);
    shared.task_run.store(false, Ordering::SeqCst);
    *slot.lock().unwrap() = Some(processor);
    tracing::debug!(element = %shared.tag(), "element task exited");
    shared
        .flags
        .set(STOPPED | RESUMED | PAUSED | TASK_DESTROYED);
}

fn enter_stopped(
    shared: &Arc<ElementShared>,
    processor: &mut Box<dyn Processor>,
    ctx: &mut ElementContext,
    open: &mut bool,
    idle: &mut bool,
) {
    if !shared.state().is_terminal() {
        if *open {
            if let Err(e) = processor.close(ctx) {
                tracing::warn!(element = %shared.tag(), error = %e, "close failed");
            }
            *open = false;
        }
        shared.set_state(ElementState::Stopped);
        shared.report_status(ElementStatus::Stopped);
    }
    shared.running.store(false, Ordering::SeqCst);
    shared.stopping.store(false, Ordering::SeqCst);
    shared.flags.set(STOPPED);
    *idle = true;
}
