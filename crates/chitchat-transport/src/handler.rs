//! Read handler trait.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::context::FrameContext;
use crate::error::HandlerResult;

/// Callback invoked once per frame, in arrival order, for each connection.
///
/// Frames of one connection are never dispatched concurrently: the next frame
/// is only handed over once the previous future has completed. An `Err` is
/// reported on the error stream and the connection keeps running.
///
/// Closures of the shape `Fn(Bytes, FrameContext<A>) -> impl Future` implement
/// this trait directly.
pub trait FrameHandler<A>: Send + Sync + 'static {
    fn on_frame(
        &self,
        frame: Bytes,
        ctx: FrameContext<A>,
    ) -> impl Future<Output = HandlerResult> + Send;
}

impl<A, F, Fut> FrameHandler<A> for F
where
    A: Send + Sync + 'static,
    F: Fn(Bytes, FrameContext<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn on_frame(
        &self,
        frame: Bytes,
        ctx: FrameContext<A>,
    ) -> impl Future<Output = HandlerResult> + Send {
        (self)(frame, ctx)
    }
}

/// Object-safe wrapper for the FrameHandler trait.
pub(crate) trait FrameHandlerDyn<A>: Send + Sync {
    fn on_frame_dyn(
        &self,
        frame: Bytes,
        ctx: FrameContext<A>,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + '_>>;
}

impl<A, H> FrameHandlerDyn<A> for H
where
    A: Send + Sync + 'static,
    H: FrameHandler<A>,
{
    fn on_frame_dyn(
        &self,
        frame: Bytes,
        ctx: FrameContext<A>,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + '_>> {
        Box::pin(self.on_frame(frame, ctx))
    }
}
