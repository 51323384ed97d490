//! Task bridge driver: composes the frame codec, worker pool, feeder,
//! reader, and monitor into a single `compute(partition, context)`
//! operation with lifecycle and error propagation.

pub mod driver;
pub mod error;
pub mod feeder;
pub mod host;
pub mod monitor;
pub mod reader;

pub use bridge_protocol::ConfigStore;
pub use driver::{compute, BridgeIterator, ComputeConfig};
pub use error::{BridgeError, BridgeResult};
pub use feeder::{new_feeder_slot, FeederConfig, FeederFailure, FeederSlot, Record};
pub use host::{LocalStorage, MemoryManagers, TaskContext};
pub use monitor::{spawn_monitor, DEFAULT_POLL_INTERVAL};
pub use reader::Reader;
