//! Reply and flush futures.
//!
//! Both are thin wrappers over `tokio::sync::oneshot` receivers, the
//! single-shot completion primitive of the pipe. A [`ReplyFuture`] resolves
//! with the correlated reply (or a [`PipeError`]); a [`FlushFuture`] resolves
//! once a flush has drained the pipe.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::PipeError;

/// Future that resolves when the matching reply arrives, or with the
/// request's terminal error.
///
/// Created by `RequestPipe::send`. Exactly one terminal value is ever
/// delivered per request.
pub struct ReplyFuture<Resp> {
    rx: oneshot::Receiver<Result<Resp, PipeError>>,
}

impl<Resp> ReplyFuture<Resp> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Resp, PipeError>>) -> Self {
        Self { rx }
    }

    /// A future that fails immediately with the given error.
    ///
    /// Used for the fast-fail paths of `send` (flush in progress, sender not
    /// registered); no request record exists behind it.
    pub(crate) fn failed(error: PipeError) -> Self {
        let (tx, rx) = oneshot::channel();
        // The value is buffered in the channel; the receiver observes it even
        // though the sender is already gone.
        let _ = tx.send(Err(error));
        Self { rx }
    }
}

impl<Resp> Future for ReplyFuture<Resp> {
    type Output = Result<Resp, PipeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The pipe (and with it the request record) was dropped.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PipeError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future that resolves once a flush has drained the pipe.
pub struct FlushFuture {
    rx: Option<oneshot::Receiver<()>>,
}

impl FlushFuture {
    pub(crate) fn new(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A flush that found the pipe already idle.
    pub(crate) fn ready() -> Self {
        Self { rx: None }
    }
}

impl Future for FlushFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.rx {
            None => Poll::Ready(()),
            Some(rx) => match Pin::new(rx).poll(cx) {
                // A closed channel means the pipe was dropped mid-flush;
                // nothing is left to drain either way.
                Poll::Ready(_) => Poll::Ready(()),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_reply_future_resolves_immediately() {
        let future: ReplyFuture<String> = ReplyFuture::failed(PipeError::FlushInProgress);

        let err = future.await.expect_err("carries the error");
        assert!(matches!(err, PipeError::FlushInProgress));
    }

    #[tokio::test]
    async fn test_reply_future_resolves_with_value() {
        let (tx, rx) = oneshot::channel();
        let future: ReplyFuture<String> = ReplyFuture::new(rx);

        tx.send(Ok("pong".to_string())).expect("receiver is alive");

        assert_eq!(future.await.expect("reply delivered"), "pong");
    }

    #[tokio::test]
    async fn test_reply_future_closed_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<Result<String, PipeError>>();
        let future = ReplyFuture::new(rx);

        drop(tx);

        let err = future.await.expect_err("channel closed");
        assert!(matches!(err, PipeError::Closed));
    }

    #[tokio::test]
    async fn test_ready_flush_future_resolves_immediately() {
        FlushFuture::ready().await;
    }

    #[tokio::test]
    async fn test_flush_future_resolves_on_settlement() {
        let (tx, rx) = oneshot::channel();
        let future = FlushFuture::new(rx);

        tx.send(()).expect("receiver is alive");

        future.await;
    }
}
