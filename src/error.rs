//! Error types for Tributary.

use thiserror::Error;

/// Result type alias using Tributary's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tributary operations.
///
/// Transient conditions (timeout, abort, graceful end of stream) are not
/// errors; they are carried by [`crate::port::IoOutcome`] so that `?` only
/// propagates genuine failures.
#[derive(Error, Debug)]
pub enum Error {
    /// A buffer or pool could not be created with the requested geometry.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A delivered unit does not fit the receiving buffer. Never reported as
    /// a short read or write.
    #[error("size mismatch: {needed} bytes do not fit in {available}")]
    SizeMismatch {
        /// Size of the unit being transferred.
        needed: usize,
        /// Capacity of the receiving side.
        available: usize,
    },

    /// An element with this name is already registered in the pipeline.
    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    /// A link referenced an element name that is not registered.
    #[error("unknown element name '{0}'")]
    UnknownElement(String),

    /// `link` was called while the pipeline is already linked.
    #[error("pipeline is already linked")]
    AlreadyLinked,

    /// The operation requires a port the element does not have.
    #[error("element '{element}' has no {side} port")]
    PortUnavailable {
        /// Tag of the element.
        element: String,
        /// Which side is missing ("input" or "output").
        side: &'static str,
    },

    /// The port kind does not support the requested operation.
    #[error("port '{port}' does not support {operation}")]
    Unsupported {
        /// Tag of the port.
        port: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The element is in a state that forbids the requested transition.
    #[error("element '{element}' cannot {operation} in state {state:?}")]
    InvalidState {
        /// Tag of the element.
        element: String,
        /// The rejected operation.
        operation: &'static str,
        /// State the element was in.
        state: crate::element::ElementState,
    },

    /// A control operation did not complete within its bounded wait.
    #[error("timed out waiting for element '{element}' to {operation}")]
    ControlTimeout {
        /// Tag of the element.
        element: String,
        /// The operation that timed out.
        operation: &'static str,
    },

    /// A port info list operation referenced an id that is not present.
    #[error("port id {0} not present in the info list")]
    UnknownPortId(u8),

    /// The processing step failed (codec error, corrupt unit, ...).
    #[error("transform failed: {0}")]
    Transform(String),

    /// The element's control channel is gone (task side dropped).
    #[error("control channel closed for element '{0}'")]
    ChannelClosed(String),
}
