use std::path::PathBuf;

use thiserror::Error;

use crate::codec::Frame;
use crate::registry::ConnectionId;

/// Listener lifecycle errors.
#[derive(Error, Debug)]
pub enum BroadcasterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Socket path error: {0}")]
    SocketPath(PathBuf),

    #[error("Listener not started")]
    NotStarted,

    #[error("Listener already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, BroadcasterError>;

/// An event payload could not be rendered to the wire format.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("event type must not be empty")]
    EmptyEventType,

    #[error("field `{field}` holds a non-finite number")]
    NonFiniteNumber { field: String },

    #[error("field `{field}` appears more than once")]
    DuplicateField { field: String },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A write to one connection failed.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A frame the transport could not take without waiting.
#[derive(Error, Debug)]
pub enum TrySendError {
    #[error("outbound queue full")]
    Full(Frame),

    #[error("connection closed")]
    Closed,
}

/// Outcome of a directed send that did not reach the client.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("no connection registered under {id}")]
    NotFound { id: ConnectionId },

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    #[error("send to {id} failed: {source}")]
    Transport {
        id: ConnectionId,
        #[source]
        source: TransportError,
    },

    #[error("send to {id} cancelled")]
    Cancelled { id: ConnectionId },
}
