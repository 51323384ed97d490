use std::io;

/// Errors raised by the frame codec and persisted-file helpers.
///
/// Mirrors the `Message` / `Source` shape used across this workspace's
/// crates: a plain string for conditions the codec detects itself, and a
/// wrapped source for I/O failures bubbled up from the underlying stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected end of stream: wanted {wanted} bytes, got {got}")]
    UnexpectedEof { wanted: usize, got: usize },

    #[error("unknown negative frame length {0}: not a recognized sentinel")]
    UnknownSentinel(i32),

    #[error("frame length {0} exceeds maximum frame size")]
    FrameTooLarge(i64),

    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<io::Error> for ProtocolError {
    fn from(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof { wanted: 0, got: 0 }
        } else {
            ProtocolError::Io {
                message: source.to_string(),
                source,
            }
        }
    }
}
