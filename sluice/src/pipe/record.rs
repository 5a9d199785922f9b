//! Request records in their queued and pending phases.
//!
//! A record is born in `send`, lives in the FIFO queue until a pending slot
//! frees, occupies that slot while in flight, and is dropped on its terminal
//! transition. The reply completion handle is held by value inside the
//! record; completion is idempotent and every exit path cancels the timer.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::envelope::RequestId;
use crate::error::PipeError;

/// Completion handle delivering the terminal result to the caller's
/// `ReplyFuture`.
pub(crate) type ReplySender<Resp> = oneshot::Sender<Result<Resp, PipeError>>;

/// A request accepted by `send` but not yet admitted to a pending slot.
pub(crate) struct QueuedRecord<Req, Resp> {
    pub(crate) id: RequestId,
    pub(crate) message: Req,
    pub(crate) reply: ReplySender<Resp>,
}

impl<Req, Resp> QueuedRecord<Req, Resp> {
    /// Terminate the record before it ever reached a pending slot.
    pub(crate) fn reject(self, error: PipeError) {
        if self.reply.send(Err(error)).is_err() {
            tracing::debug!(id = %self.id, "reply future dropped before rejection");
        }
    }
}

/// A request occupying a pending slot, awaiting its reply.
pub(crate) struct PendingRecord<Req, Resp> {
    /// The original request payload, kept for retries.
    pub(crate) message: Req,

    /// Sender invocations already spent, minus one (0 on the first attempt).
    pub(crate) attempt: u32,

    /// Completion handle, consumed on the terminal transition.
    reply: Option<ReplySender<Resp>>,

    /// Time the record entered the pending set.
    admitted_at: Duration,

    /// Handle of the currently armed timeout task, if any.
    timer: Option<JoinHandle<()>>,
}

impl<Req, Resp> PendingRecord<Req, Resp> {
    /// Admit a queued record into a pending slot.
    pub(crate) fn admit(record: QueuedRecord<Req, Resp>, now: Duration) -> (RequestId, Self) {
        let pending = Self {
            message: record.message,
            attempt: 0,
            reply: Some(record.reply),
            admitted_at: now,
            timer: None,
        };
        (record.id, pending)
    }

    /// Time spent in the pending set.
    pub(crate) fn elapsed_since(&self, now: Duration) -> Duration {
        now.saturating_sub(self.admitted_at)
    }

    /// Deliver the terminal result to the caller.
    ///
    /// Idempotent: only the first completion is delivered. The timer, if
    /// armed, is cancelled.
    pub(crate) fn complete(&mut self, result: Result<Resp, PipeError>) {
        self.cancel_timer();
        if let Some(reply) = self.reply.take()
            && reply.send(result).is_err()
        {
            tracing::debug!("reply future dropped before completion");
        }
    }

    /// Cancel the armed timeout task, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Arm a fresh timeout task, replacing any previous one.
    pub(crate) fn arm_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_timer();
        self.timer = Some(handle);
    }
}

impl<Req, Resp> Drop for PendingRecord<Req, Resp> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: u64) -> (QueuedRecord<String, String>, oneshot::Receiver<Result<String, PipeError>>) {
        let (reply, rx) = oneshot::channel();
        let record = QueuedRecord {
            id: RequestId::new(id),
            message: "ping".to_string(),
            reply,
        };
        (record, rx)
    }

    #[test]
    fn test_reject_delivers_error() {
        let (record, mut rx) = queued(0);

        record.reject(PipeError::SenderMissing);

        let result = rx.try_recv().expect("terminal delivered");
        assert!(matches!(result, Err(PipeError::SenderMissing)));
    }

    #[test]
    fn test_complete_delivers_once() {
        let (record, mut rx) = queued(1);
        let (id, mut pending) = PendingRecord::admit(record, Duration::ZERO);
        assert_eq!(id, RequestId::new(1));
        assert_eq!(pending.attempt, 0);

        pending.complete(Ok("pong".to_string()));
        pending.complete(Ok("late pong".to_string()));
        pending.complete(Err(PipeError::Timeout));

        // First completion wins; the rest are no-ops.
        let result = rx.try_recv().expect("terminal delivered");
        assert_eq!(result.expect("reply"), "pong");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_after_future_dropped_is_harmless() {
        let (record, rx) = queued(2);
        let (_, mut pending) = PendingRecord::admit(record, Duration::ZERO);

        drop(rx);
        pending.complete(Err(PipeError::Timeout));
    }

    #[test]
    fn test_elapsed_since_admission() {
        let (record, _rx) = queued(3);
        let (_, pending) = PendingRecord::admit(record, Duration::from_millis(100));

        assert_eq!(
            pending.elapsed_since(Duration::from_millis(350)),
            Duration::from_millis(250)
        );
        // A clock that has not advanced never reports negative elapsed time.
        assert_eq!(pending.elapsed_since(Duration::ZERO), Duration::ZERO);
    }
}
