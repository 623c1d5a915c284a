//! Crate-wide error taxonomy (spec.md §7).

use thiserror::Error;

/// Everything that can go wrong talking to the registry, the sockets, or
/// the protocol state machine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("server is already listening")]
    AlreadyListening,

    #[error("invalid port {0}")]
    InvalidPort(u16),

    #[error("no such client: {0}")]
    UnknownClient(u64),

    #[error("client {0} is closed")]
    ClientClosed(u64),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
