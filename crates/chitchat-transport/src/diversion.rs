//! Error diversion — fan-in of every producer's errors into one stream.
//!
//! The accept loop and each connection own a private [`ErrorSink`]. Behind
//! every sink runs a small forwarding task (a link) that relays events into
//! the single outward channel read by the consumer through [`ErrorStream`].
//!
//! The outward sender lives behind one lock together with the `closed` flag.
//! Links check the flag and send while holding that lock, and `close` flips
//! the flag and drops the sender under the same lock, so nothing is ever
//! sent once the stream has been closed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ServerError;

/// An error raised asynchronously, tagged with where it came from.
///
/// `origin` is the server's bind address for listener-level failures and the
/// peer's address string for connection-level failures.
#[derive(Debug)]
pub struct ErrorEvent {
    pub error: ServerError,
    pub origin: String,
}

struct Outward {
    closed: bool,
    tx: Option<mpsc::UnboundedSender<ErrorEvent>>,
}

/// Shared end of the diversion: spawns links and owns the close.
#[derive(Clone)]
pub(crate) struct ErrorDiversion {
    outward: Arc<Mutex<Outward>>,
}

impl ErrorDiversion {
    pub fn new() -> (Self, ErrorStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let diversion = Self {
            outward: Arc::new(Mutex::new(Outward {
                closed: false,
                tx: Some(tx),
            })),
        };
        (diversion, ErrorStream { rx })
    }

    /// Start a forwarding link and return the sink feeding it.
    ///
    /// The link runs until every clone of the returned sink is dropped.
    pub fn link(&self) -> ErrorSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<ErrorEvent>();
        let diversion = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                diversion.forward(event);
            }
        });
        ErrorSink { tx }
    }

    fn forward(&self, event: ErrorEvent) {
        let outward = self.outward.lock();
        match outward.tx.as_ref() {
            Some(tx) if !outward.closed => {
                // The consumer may have dropped the stream; nobody is left to tell.
                let _ = tx.send(event);
            }
            _ => {
                debug!(origin = %event.origin, error = %event.error, "error stream closed, dropping event");
            }
        }
    }

    /// Mark the diversion closed and drop the outward sender.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut outward = self.outward.lock();
        if outward.closed {
            return false;
        }
        outward.closed = true;
        outward.tx = None;
        true
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.outward.lock().closed
    }
}

/// Producer-side handle of one link.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::UnboundedSender<ErrorEvent>,
}

impl ErrorSink {
    pub fn emit(&self, error: ServerError, origin: impl Into<String>) {
        let event = ErrorEvent {
            error,
            origin: origin.into(),
        };
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            debug!(origin = %event.origin, "error link gone, dropping event");
        }
    }
}

/// Consumer side of the server's error stream.
///
/// Ends (yields `None`) once the server has been cut and every event sent
/// before that has been received.
pub struct ErrorStream {
    rx: mpsc::UnboundedReceiver<ErrorEvent>,
}

impl ErrorStream {
    pub async fn recv(&mut self) -> Option<ErrorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ErrorEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ErrorStream {
    type Item = ErrorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ErrorEvent>> {
        self.rx.poll_recv(cx)
    }
}
