//! Concrete elements built on the engine.
//!
//! These are the processors shipped with the crate: memory-backed endpoints
//! for feeding and draining pipelines, byte relays, closure and fixed-unit
//! transforms, and the priority fan-in funnel. Codec math stays outside; a
//! decoder is a [`UnitTransform`] (or [`Transform`]) around an external
//! function.

mod array;
mod funnel;
mod passthrough;
mod transform;

pub use array::{MemorySink, MemorySource};
pub use funnel::PriorityFunnel;
pub use passthrough::Passthrough;
pub use transform::{Transform, UnitPolicy, UnitTransform};
