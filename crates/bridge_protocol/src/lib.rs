//! Wire protocol for the cross-language task bridge: the length-prefixed
//! frame codec, broadcast delta encoding, the task header, host-supplied
//! configuration, and persisted frame files. No magic header, no
//! version negotiation — the protocol is implicit in the byte stream.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod file_store;
pub mod frame;
pub mod header;

pub use broadcast::{
    apply_delta, compute_delta, decode_raw_id, encode_deregistration, Broadcast, DeltaEntry,
};
pub use config::{ConfigStore, StaticConfig};
pub use error::{ProtocolError, Result};
pub use frame::{
    read_frame, read_frame_header, read_int32, read_int64, read_timing, read_utf, write_frame,
    write_int32, write_int64, write_sentinel, write_timing, write_utf, FrameHeader, Sentinel,
    TimingMetrics, DEFAULT_BUFFER_SIZE, IO_BUFFER_SIZE_KEY, WORKER_REUSE_KEY,
};
pub use header::{read_task_header, write_task_header, TaskHeader};
