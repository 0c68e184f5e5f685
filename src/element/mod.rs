//! Audio elements: processing stages with their own tasks and state machines.
//!
//! An element wraps a [`Processor`] (the codec/transform seam) in a task
//! loop, connects it to the rest of the pipeline through [`crate::port`]
//! ports, and reports its lifecycle through [`crate::event`] buses.

mod audio_element;
mod context;
mod info;
mod state;
mod traits;

pub use audio_element::{
    AudioElement, ElementConfig, OutputSpec, DEFAULT_CHUNK_SIZE, DEFAULT_FRAME_NODE_COUNT,
    DEFAULT_FRAME_NODE_SIZE, DEFAULT_INPUT_TIMEOUT, DEFAULT_RING_SIZE,
};
pub use context::ElementContext;
pub use info::{CodecFormat, StreamInfo};
pub use state::{ElementState, ElementStatus};
pub use traits::{ProcessOutcome, Processor};
