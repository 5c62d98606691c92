//! Per-connection handler.
//!
//! Each accepted socket gets one task running [`Connection::run`]:
//!
//! - `Running`: a [`FrameReader`] feeds frames over the handoff queue and the
//!   dispatch loop hands them to the read handler one at a time, until the
//!   connection's token is cancelled or the queue closes.
//! - `Draining`: the socket is closed, the reader is stopped and its queue is
//!   drained so the reader task cannot leak.
//! - `Closed`: a close failure (if any) is reported and the registry entry
//!   is released.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConnectionDeadlines;
use crate::context::FrameContext;
use crate::diversion::ErrorSink;
use crate::error::ServerError;
use crate::handler::FrameHandlerDyn;
use crate::reader::{FrameReader, HANDOFF_DEPTH};
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Write side and identity of one connection, shared with frame contexts.
pub(crate) struct ConnectionIo {
    pub peer: SocketAddr,
    pub local: SocketAddr,
    pub remote: String,
    pub delimiter: u8,
    write_deadline: Option<Instant>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl ConnectionIo {
    pub fn new(
        peer: SocketAddr,
        local: SocketAddr,
        delimiter: u8,
        write_deadline: Option<Instant>,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self {
            peer,
            local,
            remote: peer.to_string(),
            delimiter,
            write_deadline,
            writer: Mutex::new(Some(writer)),
        }
    }

    pub async fn write_frame(&self, frame: Bytes) -> Result<(), ServerError> {
        let mut writer = self.writer.lock().await;
        let half = writer.as_mut().ok_or(ServerError::ConnectionClosed)?;
        let written = match self.write_deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, half.write_all(&frame))
                .await
                .map_err(|_| ServerError::WriteTimeout)?,
            None => half.write_all(&frame).await,
        };
        written.map_err(ServerError::Write)
    }

    /// Shut down the write side. Later writes fail with `ConnectionClosed`.
    pub async fn close(&self) -> io::Result<()> {
        let Some(mut half) = self.writer.lock().await.take() else {
            return Ok(());
        };
        match half.shutdown().await {
            // Peer already reset the connection; nothing left to close.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Running,
    Draining,
    Closed,
}

pub(crate) struct Connection<A> {
    pub id: ConnectionId,
    pub io: Arc<ConnectionIo>,
    pub token: CancellationToken,
    pub deadlines: ConnectionDeadlines,
    pub registry: ConnectionRegistry,
    pub errors: ErrorSink,
    pub handler: Arc<dyn FrameHandlerDyn<A>>,
    pub extra: Arc<A>,
    pub bind_addr: Arc<str>,
    state: ConnState,
}

impl<A: Send + Sync + 'static> Connection<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConnectionId,
        io: Arc<ConnectionIo>,
        token: CancellationToken,
        deadlines: ConnectionDeadlines,
        registry: ConnectionRegistry,
        errors: ErrorSink,
        handler: Arc<dyn FrameHandlerDyn<A>>,
        extra: Arc<A>,
        bind_addr: Arc<str>,
    ) -> Self {
        Self {
            id,
            io,
            token,
            deadlines,
            registry,
            errors,
            handler,
            extra,
            bind_addr,
            state: ConnState::Running,
        }
    }

    pub async fn run(mut self, read_half: OwnedReadHalf) {
        debug!(remote = %self.io.remote, "connection open");

        let (frame_tx, mut frames) = mpsc::channel::<Bytes>(HANDOFF_DEPTH);
        let read_stop = CancellationToken::new();
        let reader = FrameReader {
            read_half,
            delimiter: self.io.delimiter,
            deadline: self.deadlines.read,
            remote: self.io.remote.clone(),
        }
        .spawn(frame_tx, read_stop.clone());

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => self.dispatch(frame).await,
                    None => break,
                },
            }
        }

        self.transition(ConnState::Draining);
        let closed = self.io.close().await;
        read_stop.cancel();
        while frames.recv().await.is_some() {}
        if let Err(e) = reader.await {
            warn!(remote = %self.io.remote, error = %e, "frame reader panicked");
        }

        if let Err(e) = closed {
            warn!(remote = %self.io.remote, error = %e, "failed to close connection");
            self.errors.emit(ServerError::Close(e), self.io.remote.clone());
        }
        self.registry.release(&self.io.remote, self.id);
        self.transition(ConnState::Closed);
    }

    async fn dispatch(&self, frame: Bytes) {
        let ctx = FrameContext::new(
            self.io.clone(),
            self.registry.clone(),
            self.errors.clone(),
            self.extra.clone(),
            self.bind_addr.clone(),
        );
        if let Err(e) = self.handler.on_frame_dyn(frame, ctx).await {
            debug!(remote = %self.io.remote, error = %e, "handler returned error");
            self.errors.emit(ServerError::Handler(e), self.io.remote.clone());
        }
    }

    fn transition(&mut self, to: ConnState) {
        debug!(remote = %self.io.remote, from = ?self.state, to = ?to, "connection state");
        self.state = to;
    }
}
