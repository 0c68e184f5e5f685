//! # Tributary
//!
//! A composable audio streaming pipeline engine: processing stages
//! ("elements") connected through typed, backpressured ports, orchestrated by
//! a pipeline and observed through a chainable event bus.
//!
//! ## Architecture
//!
//! - **Ports** carry byte streams between elements. Three kinds: ring-buffer
//!   (continuous byte cadence), frame-buffer (variable-length discrete
//!   frames), and callback (application supplied endpoints). All expose
//!   read/write with timeout, abort, reset and fill/free-size queries.
//! - **Elements** each own one task (thread) that pulls from the input port,
//!   runs the supplied [`element::Processor`], and pushes to the output
//!   port(s). Lifecycle is a small state machine driven by explicit control
//!   messages.
//! - **Pipelines** register named elements, link them in data-flow order
//!   (creating the connecting ports), and fan lifecycle operations out to the
//!   whole set.
//! - **Event buses** collect status and stream-metadata reports; buses chain,
//!   so independently running pipelines can merge into one listener loop.
//! - **Port info lists** arbitrate among concurrent input sources by
//!   priority for fan-in elements such as speaker mixers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tributary::prelude::*;
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default());
//! pipeline.register(source, "src")?;
//! pipeline.register(sink, "sink")?;
//! pipeline.link(&["src", "sink"])?;
//! pipeline.run()?;
//! pipeline.wait_for_stop(None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod port;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::element::{
        AudioElement, ElementConfig, ElementContext, ElementState, ElementStatus, ProcessOutcome,
        Processor, StreamInfo,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{BusMessage, BusPayload, EventBus};
    pub use crate::pipeline::{Pipeline, PipelineConfig};
    pub use crate::port::{IoOutcome, Port, PortInfo, PortInfoList, PortKind};
}

pub use error::{Error, Result};
