//! The real-time update pipeline.
//!
//! Inbound frames from the transport are routed per entity kind into a
//! keyed coalescing buffer (last write wins per id). A fixed-cadence flush
//! cycle atomically drains the buffer and commits one batch per non-empty
//! kind to the application's state sink. The whole pipeline starts and
//! stops with the authentication signal, never with the rendering layer.

pub mod buffer;
pub mod manager;
pub mod router;
pub mod scheduler;

pub use buffer::{BufferStats, CoalescingBuffer};
pub use manager::{PipelineState, UpdatePipeline};
pub use router::{EventRouter, Registration, RouteMode};
pub use scheduler::FlushScheduler;
