use bridge_accumulator::AccumulatorError;
use bridge_pool::PoolError;
use bridge_protocol::ProtocolError;

/// Error taxonomy for a single bridge session, surfaced to the host
/// framework from the reader's iterator.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The worker sent `ExceptionThrown`; `message` is the UTF-8 payload
    /// it carried. `cause`, if present, is a feeder-side exception that
    /// preceded it.
    #[error("{message}")]
    UserError {
        message: String,
        #[source]
        cause: Option<Box<BridgeError>>,
    },

    /// The feeder's exception slot was set when the reader checked it.
    #[error("feeder failed: {message}")]
    WorkerInputFailure { message: String },

    /// EOF on the socket with no recorded feeder exception and the task
    /// not cancelled.
    #[error("worker exited without completing its output stream")]
    WorkerCrashed,

    /// An I/O error occurred while the task context was cancelled.
    #[error("task was cancelled")]
    TaskCancelled,

    /// Unknown sentinel, short read, or a missing terminal end-of-stream
    /// marker.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Driver-side accumulator forwarding failed.
    #[error("{0}")]
    Accumulator(#[from] AccumulatorError),

    /// Acquiring or releasing a worker failed at the pool.
    #[error("{0}")]
    Pool(#[from] PoolError),

    #[error("{message}")]
    Message { message: String },
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn message(message: impl Into<String>) -> Self {
        BridgeError::Message {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Message {
            message: err.to_string(),
        }
    }
}
