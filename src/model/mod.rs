pub mod message;

pub use message::{EntityKind, StreamMessage};
pub(crate) use message::first_present_id;
