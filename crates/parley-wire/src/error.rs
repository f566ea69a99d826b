use thiserror::Error;

/// Failure modes of the framing layer.
///
/// `Protocol` is fatal to a session: the byte stream can no longer be
/// trusted and the socket must be closed. `ConnectionClosed` is the graceful
/// end of a session.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("socket read failed: {0}")]
    Io(#[from] std::io::Error),
}
