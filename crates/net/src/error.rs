use thiserror::Error;

use crate::transport::udp::wire::PacketError;

/// Failure while reading fields out of a message payload.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("read past the end of the message")]
    ReadPastEnd,
    #[error("string field is not valid utf-8")]
    InvalidString,
    #[error("unknown message kind {0}")]
    UnknownKind(u16),
    #[error("unknown call parameter tag {0}")]
    UnknownParamTag(u8),
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("a session is already active")]
    SessionActive,
    #[error("this endpoint does not host sessions")]
    NotServer,
    #[error("this endpoint does not join sessions")]
    NotClient,
    #[error("session {0:?} already exists")]
    SessionExists(String),
    #[error("no session named {0:?}")]
    UnknownSession(String),
    #[error("no server address configured")]
    NoServerAddress,
}
