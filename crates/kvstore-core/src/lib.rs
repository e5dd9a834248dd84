//! Core in-memory state machine: keyspace, expiry index, purge scheduler,
//! pub/sub registry, and the command dispatcher that ties them together.

pub mod dispatch;
pub mod expiry;
pub mod keyspace;
pub mod pubsub;
pub mod purge;
pub mod time;

pub use dispatch::{DispatchError, Dispatcher};
pub use expiry::ExpiryIndex;
pub use keyspace::{KeyspaceStore, ValueRecord};
pub use pubsub::{next_sink_id, PubSubRegistry, Sink, SinkId};
pub use purge::{purge_sweep, spawn_purge_scheduler};
