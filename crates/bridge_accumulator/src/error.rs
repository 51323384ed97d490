/// Errors raised by an accumulator sink's `merge` operation.
#[derive(Debug, thiserror::Error)]
pub enum AccumulatorError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("aggregator closed the connection before sending an ack byte")]
    AggregatorProtocolError,
}

pub type AccumulatorResult<T> = std::result::Result<T, AccumulatorError>;

impl From<std::io::Error> for AccumulatorError {
    fn from(source: std::io::Error) -> Self {
        AccumulatorError::Source {
            message: source.to_string(),
            source,
        }
    }
}

impl From<bridge_protocol::ProtocolError> for AccumulatorError {
    fn from(err: bridge_protocol::ProtocolError) -> Self {
        AccumulatorError::Message {
            message: err.to_string(),
        }
    }
}
