//! Session error types.

use arq_wire::WireError;
use thiserror::Error;

/// Errors returned by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// A previous frame is still waiting for its acknowledgement
    #[error("still sending previous frame")]
    SendInProgress,

    /// The payload could not be framed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The session task has stopped
    #[error("session closed")]
    Closed,

    /// Transport I/O failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
