use std::io;

/// A frame that does not follow the wire grammar for the current phase.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::Malformed(reason.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// The peer closed the stream on a frame boundary.
    #[error("connection closed by peer")]
    Closed,

    #[error("transport error")]
    Io(#[from] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("hello refused by server")]
    Refused,

    #[error("unexpected hello response: {0}")]
    Unexpected(String),

    #[error("invalid hello")]
    Malformed(#[source] DecodeError),

    #[error("transport error during handshake")]
    Frame(#[from] FrameError),
}

impl From<io::Error> for HandshakeError {
    fn from(e: io::Error) -> Self {
        HandshakeError::Frame(FrameError::Io(e))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to {addr}")]
    Connection {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),

    #[error("connection closed by the server")]
    PeerClosed,

    #[error("transport error")]
    Transport(#[source] io::Error),

    #[error("server answered with a malformed frame")]
    Decode(#[from] DecodeError),

    #[error("probe mismatch: expected {expected}, got {got:?}")]
    ProbeMismatch { expected: u32, got: Option<u32> },

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl From<FrameError> for ClientError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Closed => ClientError::PeerClosed,
            FrameError::Io(e) => ClientError::Transport(e),
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
