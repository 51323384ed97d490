/// Errors raised while acquiring, releasing, or destroying pooled workers.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("guest process at {executable} did not connect within {timeout_secs:.1}s")]
    ConnectTimeout { executable: String, timeout_secs: f64 },
    #[error("guest process at {executable} exited with {status} before connecting")]
    ExitedBeforeConnect { executable: String, status: std::process::ExitStatus },
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;

impl PoolError {
    pub fn message(message: impl Into<String>) -> Self {
        PoolError::Message { message: message.into() }
    }
}

impl From<std::io::Error> for PoolError {
    fn from(source: std::io::Error) -> Self {
        PoolError::Source {
            message: source.to_string(),
            source,
        }
    }
}
