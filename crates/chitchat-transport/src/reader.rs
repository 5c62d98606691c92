//! Frame reader — one task per connection pulling frames off the socket.
//!
//! Frames go out on a bounded handoff queue. The reader never reports
//! errors itself: a failed read, an expired read deadline and a clean end of
//! stream all just end the task, and dropping the sender closes the queue
//! exactly once. The connection's teardown is what turns socket trouble into
//! error events.

use bytes::Bytes;
use chitchat_protocol::{FrameCodec, ProtocolError};
use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the handoff queue between reader and dispatcher.
pub(crate) const HANDOFF_DEPTH: usize = 1;

pub(crate) struct FrameReader {
    pub read_half: OwnedReadHalf,
    pub delimiter: u8,
    pub deadline: Option<Instant>,
    pub remote: String,
}

impl FrameReader {
    /// Spawn the reader. Cancelling `stop` stands in for closing the socket
    /// under a blocked read.
    pub fn spawn(self, frames: mpsc::Sender<Bytes>, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(frames, stop))
    }

    async fn run(self, frames: mpsc::Sender<Bytes>, stop: CancellationToken) {
        let remote = self.remote;
        let deadline = self.deadline;
        let mut framed = FramedRead::new(self.read_half, FrameCodec::new(self.delimiter));

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = next_frame(&mut framed, deadline) => next,
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(ReadEnd::Eof) => {
                    debug!(remote = %remote, "end of stream");
                    break;
                }
                Err(ReadEnd::DeadlineExceeded) => {
                    debug!(remote = %remote, "read deadline exceeded");
                    break;
                }
                Err(ReadEnd::Failed(e)) => {
                    debug!(remote = %remote, error = %e, "read failed");
                    break;
                }
            };

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                sent = frames.send(frame) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

enum ReadEnd {
    Eof,
    DeadlineExceeded,
    Failed(ProtocolError),
}

async fn next_frame(
    framed: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    deadline: Option<Instant>,
) -> Result<Bytes, ReadEnd> {
    let next = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, framed.next())
            .await
            .map_err(|_| ReadEnd::DeadlineExceeded)?,
        None => framed.next().await,
    };
    match next {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(ReadEnd::Failed(e)),
        None => Err(ReadEnd::Eof),
    }
}
