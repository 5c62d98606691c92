//! Server error taxonomy.
//!
//! Synchronous failures (configuration, bind, `cut`, `close_remote`) are
//! returned directly. Everything raised inside the accept loop or a
//! connection task travels as an [`ErrorEvent`](crate::ErrorEvent) on the
//! server's error stream instead.

use std::io;

use chitchat_protocol::ProtocolError;
use thiserror::Error;

/// Error type returned by read handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by read handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// `listen` was called on a server built without a read handler.
    #[error("read handler is not set")]
    NoHandler,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server is already listening")]
    AlreadyListening,

    #[error("server is not listening")]
    NotListening,

    #[error("server has been shut down")]
    Closed,

    /// The accept loop hit an error and stopped.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A read handler returned an error for one frame.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// Closing an accepted socket failed during teardown.
    #[error("failed to close connection: {0}")]
    Close(#[source] io::Error),

    #[error("{0} is not connected to this server")]
    NotConnected(String),

    /// A connection tried to close itself but its registry entry was already gone.
    #[error("internal error: {0} missing from connection registry")]
    Internal(String),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("write deadline exceeded")]
    WriteTimeout,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
