//! Element state machine types and the waitable flag set that control
//! operations synchronize on.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle state of an element.
///
/// Transitions: `Init → Running` on resume, `Running ⇄ Paused`,
/// `Running/Paused → Stopped` on cooperative stop, `Running → Finished` when
/// the stream drains, any state `→ Error` on an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Constructed or reset; the task may exist but does no work.
    Init,
    /// The task loop is actively processing.
    Running,
    /// Processing suspended; the task waits for a control message.
    Paused,
    /// Cooperatively stopped by request.
    Stopped,
    /// The stream drained gracefully.
    Finished,
    /// An unrecoverable failure occurred.
    Error,
}

impl ElementState {
    /// States that permit starting the task loop again.
    pub fn can_restart(self) -> bool {
        matches!(
            self,
            Self::Init | Self::Stopped | Self::Finished | Self::Error
        )
    }

    /// Terminal states: only `destroy`/`reset_state` leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Error)
    }
}

/// Status reported through the event bus. Richer than [`ElementState`]: error
/// statuses carry which stage of the loop failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    /// The element entered the running state.
    Running,
    /// The element paused.
    Paused,
    /// The element stopped on request.
    Stopped,
    /// The element finished its stream.
    Finished,
    /// Opening the processor failed.
    ErrorOpen,
    /// Reading from the input port failed.
    ErrorInput,
    /// The processing step failed.
    ErrorProcess,
    /// Writing to the output port failed.
    ErrorOutput,
}

/// Waitable bit flags, the synchronization point between control operations
/// (run/pause/resume/stop callers) and the element task.
pub(crate) struct FlagSet {
    bits: Mutex<u32>,
    cond: Condvar,
}

pub(crate) const STOPPED: u32 = 1 << 0;
pub(crate) const TASK_CREATED: u32 = 1 << 1;
pub(crate) const TASK_DESTROYED: u32 = 1 << 2;
pub(crate) const PAUSED: u32 = 1 << 3;
pub(crate) const RESUMED: u32 = 1 << 4;
pub(crate) const BUFFER_LEVEL: u32 = 1 << 5;

impl FlagSet {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self, flags: u32) {
        let mut bits = self.bits.lock().unwrap();
        *bits |= flags;
        self.cond.notify_all();
    }

    pub fn clear(&self, flags: u32) {
        let mut bits = self.bits.lock().unwrap();
        *bits &= !flags;
    }

    /// Wait until any of `flags` is set. Returns false on timeout.
    pub fn wait(&self, flags: u32, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut bits = self.bits.lock().unwrap();
        loop {
            if *bits & flags != 0 {
                return true;
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    let (b, res) = self.cond.wait_timeout(bits, d - now).unwrap();
                    bits = b;
                    if res.timed_out() {
                        return *bits & flags != 0;
                    }
                }
                None => bits = self.cond.wait(bits).unwrap(),
            }
        }
    }

    pub fn contains(&self, flags: u32) -> bool {
        *self.bits.lock().unwrap() & flags != 0
    }
}
