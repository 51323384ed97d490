mod error;
mod sink;

pub use error::{AccumulatorError, AccumulatorResult};
pub use sink::{AccumulatorSink, Batch, LocalAccumulatorSink, RemoteAccumulatorSink};
