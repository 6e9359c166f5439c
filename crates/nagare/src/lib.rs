#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

//! Channel-ordered event persistence: strictly increasing, gap-aware,
//! per-channel sequence numbers assigned under a per-channel row lock.

pub mod append;
pub mod counter;
pub mod event;
pub mod mem_store;
pub mod persist;
pub mod sequence_number;
pub mod store;

pub use append::EventAppender;
pub use counter::Counter;
pub use event::{EidSelect, Event};
pub use mem_store::MemoryStore;
pub use persist::PersistenceError;
pub use sequence_number::SequenceNumber;
pub use store::EventStore;
