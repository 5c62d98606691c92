//! Server configuration and per-connection deadlines.

use std::time::Duration;

use tokio::time::Instant;

/// Static server configuration.
///
/// A zero timeout means no deadline. A zero delimiter puts the frame reader
/// into pass-through mode where every read becomes one frame.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:7070` (port 0 for OS-assigned)
    pub bind_addr: String,
    /// Frame delimiter byte
    pub delimiter: u8,
    /// Read deadline applied to each accepted connection
    pub read_timeout: Duration,
    /// Write deadline applied to each accepted connection
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7070".into(),
            delimiter: b'\n',
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub(crate) fn deadlines(&self) -> Deadlines {
        Deadlines {
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }
}

/// Read/write timeouts handed to connections accepted from now on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadlines {
    pub read: Duration,
    pub write: Duration,
}

impl Deadlines {
    /// Turn the timeouts into absolute instants for a connection accepted at `start`.
    pub(crate) fn starting_at(&self, start: Instant) -> ConnectionDeadlines {
        let at = |d: Duration| (!d.is_zero()).then(|| start + d);
        ConnectionDeadlines {
            read: at(self.read),
            write: at(self.write),
        }
    }
}

/// Absolute deadlines fixed when a connection is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConnectionDeadlines {
    pub read: Option<Instant>,
    pub write: Option<Instant>,
}
