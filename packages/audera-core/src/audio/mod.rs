//! Audio I/O endpoints (spec §4.2 "Audio I/O endpoints (C2)") and the
//! bounded SPSC queue between the cooperative loop and the render callback.

pub mod device;
pub mod input;
pub mod output;
pub mod queue;

pub use input::InputEndpoint;
pub use output::OutputEndpoint;
pub use queue::{bounded, QueueConsumer, QueueProducer};
