//! Per-frame context handed to the read handler.
//!
//! A [`FrameContext`] is built for every dispatched frame and is only
//! meaningful while that handler call runs. It points at the connection the
//! frame arrived on; once the connection is torn down, writes through a
//! retained context fail with [`ServerError::ConnectionClosed`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chitchat_protocol::{encode_raw, encode_value};
use serde::Serialize;
use tracing::warn;

use crate::connection::ConnectionIo;
use crate::diversion::ErrorSink;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;

pub struct FrameContext<A> {
    io: Arc<ConnectionIo>,
    registry: ConnectionRegistry,
    errors: ErrorSink,
    extra: Arc<A>,
    bind_addr: Arc<str>,
}

impl<A> FrameContext<A> {
    pub(crate) fn new(
        io: Arc<ConnectionIo>,
        registry: ConnectionRegistry,
        errors: ErrorSink,
        extra: Arc<A>,
        bind_addr: Arc<str>,
    ) -> Self {
        Self {
            io,
            registry,
            errors,
            extra,
            bind_addr,
        }
    }

    /// Serialize `value` as JSON and write it, delimiter-terminated, to this connection.
    pub async fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ServerError> {
        let frame = encode_value(value, self.io.delimiter)?;
        self.io.write_frame(frame).await
    }

    /// Write raw bytes followed by the delimiter to this connection.
    pub async fn write_raw(&self, payload: impl Into<Bytes>) -> Result<(), ServerError> {
        let frame = encode_raw(payload, self.io.delimiter)?;
        self.io.write_frame(frame).await
    }

    /// Close this connection from inside its own handler.
    ///
    /// The connection stops dispatching after the current frame. If its
    /// registry entry is already gone (someone else closed it concurrently)
    /// an internal error is reported on the error stream and returned.
    pub fn close(&self) -> Result<(), ServerError> {
        if self.registry.cancel(&self.io.remote) {
            return Ok(());
        }
        warn!(remote = %self.io.remote, "self-close found no registry entry");
        self.errors.emit(
            ServerError::Internal(self.io.remote.clone()),
            self.bind_addr.to_string(),
        );
        Err(ServerError::Internal(self.io.remote.clone()))
    }

    /// Local address of this connection as a string.
    pub fn local_addr(&self) -> String {
        self.io.local.to_string()
    }

    /// Peer address of this connection; also its key in the registry.
    pub fn remote_addr(&self) -> &str {
        &self.io.remote
    }

    pub fn local(&self) -> SocketAddr {
        self.io.local
    }

    pub fn peer(&self) -> SocketAddr {
        self.io.peer
    }

    pub fn delimiter(&self) -> u8 {
        self.io.delimiter
    }

    /// The opaque value the server was built with.
    pub fn extra(&self) -> &A {
        &self.extra
    }

    /// Shared handle to the server's connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}
