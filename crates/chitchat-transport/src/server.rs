//! TCP listener lifecycle.
//!
//! [`Server::listen`] binds the socket and spawns the accept loop; from then
//! on every failure is reported on the error stream. Each accepted socket
//! gets a child of the root cancellation token, a registry entry, its own
//! error link and a [`Connection`] task. [`Server::cut`] stops the accept
//! loop and waits for it to drop the listening socket, then closes the error
//! stream and cancels the root token, which cascades to every connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Deadlines, ServerConfig};
use crate::connection::{Connection, ConnectionIo};
use crate::diversion::{ErrorDiversion, ErrorSink, ErrorStream};
use crate::error::ServerError;
use crate::handler::{FrameHandler, FrameHandlerDyn};
use crate::registry::ConnectionRegistry;

enum Lifecycle {
    Idle,
    Listening {
        root: CancellationToken,
        /// Child of `root`. Stops only the accept loop.
        accept_stop: CancellationToken,
        accept_task: JoinHandle<()>,
        local_addr: SocketAddr,
    },
    Cut,
}

struct Inner<A> {
    bind_addr: Arc<str>,
    delimiter: u8,
    handler: Option<Arc<dyn FrameHandlerDyn<A>>>,
    extra: Arc<A>,
    /// Applied to connections accepted after the last update.
    deadlines: RwLock<Deadlines>,
    registry: ConnectionRegistry,
    diversion: ErrorDiversion,
    error_stream: Mutex<Option<ErrorStream>>,
    lifecycle: Mutex<Lifecycle>,
}

/// A delimiter-framed TCP server.
///
/// Cloning yields another handle to the same server.
pub struct Server<A = ()> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Server<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Server<()> {
    /// Start building a server with no extra value.
    pub fn builder(bind_addr: impl Into<String>) -> ServerBuilder<()> {
        ServerBuilder::new(ServerConfig::new(bind_addr), ())
    }
}

impl<A: Send + Sync + 'static> Server<A> {
    /// Bind the listening socket and start accepting connections.
    ///
    /// Returns as soon as the socket is bound.
    pub async fn listen(&self) -> Result<(), ServerError> {
        let handler = self.inner.handler.clone().ok_or(ServerError::NoHandler)?;
        self.ensure_idle()?;

        let bind_addr = self.inner.bind_addr.to_string();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        let root = CancellationToken::new();
        let accept_stop = root.child_token();
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            // Another listen() may have won while we were binding.
            match *lifecycle {
                Lifecycle::Idle => {}
                Lifecycle::Listening { .. } => return Err(ServerError::AlreadyListening),
                Lifecycle::Cut => return Err(ServerError::Closed),
            }

            let errors = self.inner.diversion.link();
            let accept_task = tokio::spawn(accept_loop(
                self.inner.clone(),
                handler,
                listener,
                root.clone(),
                accept_stop.clone(),
                errors,
            ));
            *lifecycle = Lifecycle::Listening {
                root,
                accept_stop,
                accept_task,
                local_addr,
            };
        }

        info!(addr = %local_addr, delimiter = self.inner.delimiter, "listening");
        Ok(())
    }

    /// Stop the server.
    ///
    /// The listening socket is closed by the time this returns, and the error
    /// stream is closed and every connection cancelled. Does not wait for
    /// connection tasks to finish tearing down.
    pub async fn cut(&self) -> Result<(), ServerError> {
        let (root, accept_stop, accept_task) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Cut) {
                Lifecycle::Listening {
                    root,
                    accept_stop,
                    accept_task,
                    ..
                } => (root, accept_stop, accept_task),
                Lifecycle::Idle => {
                    *lifecycle = Lifecycle::Idle;
                    return Err(ServerError::NotListening);
                }
                Lifecycle::Cut => return Err(ServerError::Closed),
            }
        };

        accept_stop.cancel();
        if let Err(e) = accept_task.await {
            warn!(addr = %self.inner.bind_addr, error = %e, "accept loop panicked");
        }

        self.inner.diversion.close();
        root.cancel();
        info!(addr = %self.inner.bind_addr, connections = self.inner.registry.len(), "server cut");
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), ServerError> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Idle => Ok(()),
            Lifecycle::Listening { .. } => Err(ServerError::AlreadyListening),
            Lifecycle::Cut => Err(ServerError::Closed),
        }
    }
}

impl<A> Server<A> {
    /// Close one connection by its remote address.
    pub fn close_remote(&self, remote: &str) -> Result<(), ServerError> {
        if self.inner.registry.cancel(remote) {
            debug!(remote = %remote, "connection closed by server");
            Ok(())
        } else {
            Err(ServerError::NotConnected(remote.to_string()))
        }
    }

    /// Snapshot of the remote addresses currently connected.
    pub fn remote_addrs(&self) -> Vec<String> {
        self.inner.registry.remote_addrs()
    }

    /// Set read/write timeouts for connections accepted from now on.
    ///
    /// Zero disables the corresponding deadline.
    pub fn set_deadline(&self, read: Duration, write: Duration) {
        *self.inner.deadlines.write() = Deadlines { read, write };
    }

    /// Take the error stream. Only the first call returns `Some`.
    ///
    /// Events queue up in memory until they are received, so a server that
    /// reports errors should have its stream taken and drained.
    pub fn take_error_stream(&self) -> Option<ErrorStream> {
        self.inner.error_stream.lock().take()
    }

    /// Address the listening socket is actually bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Listening { local_addr, .. } => Some(local_addr),
            _ => None,
        }
    }

    /// Configured bind address; origin of listener-level error events.
    pub fn bind_addr(&self) -> &str {
        &self.inner.bind_addr
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Listening { .. })
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn extra(&self) -> &A {
        &self.inner.extra
    }
}

async fn accept_loop<A: Send + Sync + 'static>(
    inner: Arc<Inner<A>>,
    handler: Arc<dyn FrameHandlerDyn<A>>,
    listener: TcpListener,
    root: CancellationToken,
    stop: CancellationToken,
    errors: ErrorSink,
) {
    let listen_addr = listener.local_addr().ok();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(addr = %inner.bind_addr, error = %e, "accept failed, listener stopping");
                errors.emit(ServerError::Accept(e), inner.bind_addr.to_string());
                break;
            }
        };

        let deadlines = inner.deadlines.read().starting_at(Instant::now());
        let local = match (stream.local_addr(), listen_addr) {
            (Ok(local), _) => local,
            (Err(_), Some(listen_addr)) => listen_addr,
            (Err(e), None) => {
                warn!(peer = %peer, error = %e, "dropping connection without local address");
                continue;
            }
        };
        let (read_half, write_half) = stream.into_split();
        let io = Arc::new(ConnectionIo::new(
            peer,
            local,
            inner.delimiter,
            deadlines.write,
            write_half,
        ));

        let token = root.child_token();
        let id = inner.registry.register(io.remote.clone(), token.clone());
        let connection = Connection::new(
            id,
            io,
            token,
            deadlines,
            inner.registry.clone(),
            inner.diversion.link(),
            handler.clone(),
            inner.extra.clone(),
            inner.bind_addr.clone(),
        );
        tokio::spawn(connection.run(read_half));
    }

    drop(listener);
    debug!(addr = %inner.bind_addr, "accept loop stopped");
}

/// Builder for [`Server`].
pub struct ServerBuilder<A> {
    config: ServerConfig,
    handler: Option<Arc<dyn FrameHandlerDyn<A>>>,
    extra: A,
}

impl<A: Send + Sync + 'static> ServerBuilder<A> {
    pub fn new(config: ServerConfig, extra: A) -> Self {
        Self {
            config,
            handler: None,
            extra,
        }
    }

    /// Frame delimiter; `0` reads raw chunks until end of stream.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn handler<H: FrameHandler<A>>(mut self, handler: H) -> Self {
        let handler: Arc<dyn FrameHandlerDyn<A>> = Arc::new(handler);
        self.handler = Some(handler);
        self
    }

    /// Replace the extra value, changing its type.
    ///
    /// A handler is typed over the extra value, so one set before this call
    /// is dropped; call `handler` afterwards.
    pub fn extra<B: Send + Sync + 'static>(self, extra: B) -> ServerBuilder<B> {
        if self.handler.is_some() {
            warn!(addr = %self.config.bind_addr, "extra value replaced, dropping handler");
        }
        ServerBuilder {
            config: self.config,
            handler: None,
            extra,
        }
    }

    pub fn build(self) -> Server<A> {
        let (diversion, error_stream) = ErrorDiversion::new();
        Server {
            inner: Arc::new(Inner {
                bind_addr: self.config.bind_addr.as_str().into(),
                delimiter: self.config.delimiter,
                handler: self.handler,
                extra: Arc::new(self.extra),
                deadlines: RwLock::new(self.config.deadlines()),
                registry: ConnectionRegistry::new(),
                diversion,
                error_stream: Mutex::new(Some(error_stream)),
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }
}
