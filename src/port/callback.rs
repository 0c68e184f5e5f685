//! Callback-backed port endpoints.
//!
//! A callback port adapts an application-supplied closure as an element's
//! input or output: a generator, a file, a network socket — anything that can
//! produce or accept bytes. Callback ports carry no storage of their own, so
//! size queries report zero and abort/reset are no-ops.

use crate::error::{Error, Result};
use crate::port::IoOutcome;
use std::sync::Mutex;
use std::time::Duration;

/// Closure filling the caller's buffer (element input side).
pub type ReadFn = dyn FnMut(&mut [u8], Option<Duration>) -> Result<IoOutcome> + Send;

/// Closure accepting the element's produced bytes (element output side).
pub type WriteFn = dyn FnMut(&[u8], Option<Duration>) -> Result<IoOutcome> + Send;

/// Endpoint closures for a callback port. Either side may be absent; using a
/// missing side is an [`Error::Unsupported`].
pub struct CallbackPort {
    read: Option<Mutex<Box<ReadFn>>>,
    write: Option<Mutex<Box<WriteFn>>>,
}

impl CallbackPort {
    /// A port whose reads come from `f`.
    pub fn reader(
        f: impl FnMut(&mut [u8], Option<Duration>) -> Result<IoOutcome> + Send + 'static,
    ) -> Self {
        Self {
            read: Some(Mutex::new(Box::new(f))),
            write: None,
        }
    }

    /// A port whose writes go to `f`.
    pub fn writer(
        f: impl FnMut(&[u8], Option<Duration>) -> Result<IoOutcome> + Send + 'static,
    ) -> Self {
        Self {
            read: None,
            write: Some(Mutex::new(Box::new(f))),
        }
    }

    pub(crate) fn read(
        &self,
        tag: &str,
        dst: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<IoOutcome> {
        match &self.read {
            Some(f) => (f.lock().unwrap())(dst, timeout),
            None => Err(Error::Unsupported {
                port: tag.to_string(),
                operation: "read",
            }),
        }
    }

    pub(crate) fn write(
        &self,
        tag: &str,
        src: &[u8],
        timeout: Option<Duration>,
    ) -> Result<IoOutcome> {
        match &self.write {
            Some(f) => (f.lock().unwrap())(src, timeout),
            None => Err(Error::Unsupported {
                port: tag.to_string(),
                operation: "write",
            }),
        }
    }
}

impl std::fmt::Debug for CallbackPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPort")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}
