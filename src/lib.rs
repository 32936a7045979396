pub mod config;
mod error;
pub mod model;
pub mod network;
pub mod pipeline;
pub mod sink;

pub use config::PipelineConfig;
pub use error::{PipelineError, SinkError};
pub use model::{EntityKind, StreamMessage};
pub use network::connection::{ConnectionSupervisor, TransportEvent};
pub use pipeline::{CoalescingBuffer, EventRouter, FlushScheduler, PipelineState, UpdatePipeline};
pub use sink::{SharedStateStore, StateHandle, StateSink};
