//! The request/response pipe: correlation, admission, retry, timeout, flush.
//!
//! # Architecture
//!
//! ```text
//! send(message)
//!   └─> id allocated ─> queue (FIFO)
//!         └─> promotion while a pending slot is free
//!               ├─> timer armed (per attempt)
//!               └─> sender invoked with Envelope { id, message }
//!                     ├─ ReplyReceiver::deliver(envelope) ─> future resolves
//!                     ├─ sender future fails ─> retry engine (same id, same
//!                     │    slot) until max_retries, then Send error
//!                     └─ timer fires ─> Timeout error
//! ```
//!
//! Every terminal transition frees a pending slot, promotes the queue head,
//! and settles an outstanding flush once both sets are empty.
//!
//! # Single-Threaded Design
//!
//! State lives in a `RefCell` behind an `Rc`; the pipe assumes a serialised
//! event-driven runtime (tokio `current_thread` + `LocalSet`). No borrow is
//! ever held across an `await`, and none is held while user code (the sender
//! callable) runs, so a sender that synchronously calls the receiver handle
//! reenters the pipe safely. Timer and dispatch tasks hold only a `Weak`
//! reference to the pipe; dropping the pipe leaves nothing ticking.

mod record;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use sluice_core::{Providers, TaskProvider, TimeProvider};
use tokio::sync::oneshot;

use crate::config::PipeConfig;
use crate::envelope::{Envelope, RequestId, RequestIdFactory};
use crate::error::{PipeError, SendFailure};
use crate::futures::{FlushFuture, ReplyFuture};
use record::{PendingRecord, QueuedRecord};

/// Future returned by a registered sender.
///
/// Resolving `Ok(())` acknowledges dispatch only; the reply must still arrive
/// through the [`ReplyReceiver`]. Failing routes the request through the
/// retry engine.
pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), SendFailure>>>>;

/// Boxed sender callable, shared between the pipe and in-flight dispatches.
type SenderFn<Req> = Rc<dyn Fn(Envelope<Req>) -> SendFuture>;

/// A correlated, bounded, retrying request/response pipe.
///
/// See the crate-level documentation for the full contract. The pipe is
/// parameterised over the outbound message type `Req` (cloned on retries),
/// the reply type `Resp`, and the runtime [`Providers`] bundle.
pub struct RequestPipe<Req, Resp, P>
where
    P: Providers,
{
    shared: Rc<PipeShared<Req, Resp, P>>,
}

/// Inbound handle for delivering replies to the pipe.
///
/// Obtained from [`RequestPipe::receiver`]; the user's transport invokes
/// [`deliver`](ReplyReceiver::deliver) whenever a reply envelope arrives.
/// Cheap to clone; all clones are bound to the same pipe instance.
pub struct ReplyReceiver<Req, Resp, P>
where
    P: Providers,
{
    shared: Rc<PipeShared<Req, Resp, P>>,
}

impl<Req, Resp, P: Providers> Clone for ReplyReceiver<Req, Resp, P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Req, Resp, P> ReplyReceiver<Req, Resp, P>
where
    Req: Clone + 'static,
    Resp: 'static,
    P: Providers,
{
    /// Deliver a reply envelope from the transport.
    ///
    /// A reply whose id is not currently pending (late, duplicate, or never
    /// issued) is silently discarded.
    pub fn deliver(&self, envelope: Envelope<Resp>) {
        self.shared.deliver(envelope);
    }
}

/// State shared between the pipe, its receiver handles, and spawned tasks.
struct PipeShared<Req, Resp, P>
where
    P: Providers,
{
    config: PipeConfig,
    providers: P,
    ids: RequestIdFactory,
    state: RefCell<PipeState<Req, Resp>>,

    /// Weak self-reference handed to spawned timer and dispatch tasks.
    ///
    /// Set once right after construction, before anything can spawn.
    self_ref: RefCell<Option<Weak<PipeShared<Req, Resp, P>>>>,
}

struct PipeState<Req, Resp> {
    /// Registered outbound callable; replaced wholesale by `set_sender`.
    sender: Option<SenderFn<Req>>,

    /// In-flight requests keyed by id. Never exceeds `max_pending` entries.
    pending: HashMap<RequestId, PendingRecord<Req, Resp>>,

    /// Accepted requests awaiting a pending slot, in `send` order.
    queue: VecDeque<QueuedRecord<Req, Resp>>,

    /// Drain mode: set by `flush`, never reset.
    flushing: bool,

    /// Settled once `flushing` holds and both sets are empty.
    flush_waiters: Vec<oneshot::Sender<()>>,
}

/// Resolution of a sender failure for a record that is still pending.
enum FailureOutcome<Req, Resp> {
    /// Re-dispatch the same envelope as the given attempt number.
    Retry(Envelope<Req>, SenderFn<Req>, u32),
    /// Retries exhausted; the record has been removed from the pending set.
    Exhausted(PendingRecord<Req, Resp>),
}

impl<Req, Resp, P> RequestPipe<Req, Resp, P>
where
    Req: Clone + 'static,
    Resp: 'static,
    P: Providers,
{
    /// Create a new pipe with the given configuration.
    pub fn new(providers: P, config: PipeConfig) -> Self {
        let config = PipeConfig {
            max_pending: config.max_pending.max(1),
            ..config
        };
        let shared = Rc::new(PipeShared {
            config,
            providers,
            ids: RequestIdFactory::new(),
            state: RefCell::new(PipeState {
                sender: None,
                pending: HashMap::new(),
                queue: VecDeque::new(),
                flushing: false,
                flush_waiters: Vec::new(),
            }),
            self_ref: RefCell::new(None),
        });
        *shared.self_ref.borrow_mut() = Some(Rc::downgrade(&shared));
        Self { shared }
    }

    /// Create a new pipe with default configuration.
    pub fn with_defaults(providers: P) -> Self {
        Self::new(providers, PipeConfig::default())
    }

    /// Register the outbound sender callable, replacing any previous one.
    ///
    /// The sender receives each outbound `Envelope<Req>` and returns a future
    /// acknowledging dispatch. In-flight retries pick up a replacement sender
    /// on their next attempt.
    pub fn set_sender<F, Fut>(&self, sender: F)
    where
        F: Fn(Envelope<Req>) -> Fut + 'static,
        Fut: Future<Output = Result<(), SendFailure>> + 'static,
    {
        let sender: SenderFn<Req> = Rc::new(move |envelope| Box::pin(sender(envelope)));
        self.shared.state.borrow_mut().sender = Some(sender);
    }

    /// Get an inbound handle bound to this pipe.
    pub fn receiver(&self) -> ReplyReceiver<Req, Resp, P> {
        ReplyReceiver {
            shared: self.shared.clone(),
        }
    }

    /// Submit a request and get a future for its reply.
    ///
    /// `None` is a no-op: nothing is recorded, no id is allocated, and no
    /// future is produced. With a message, the returned [`ReplyFuture`]
    /// carries exactly one terminal event: the correlated reply, or a
    /// [`PipeError`]. While the pipe is flushing (or no sender is
    /// registered), the future fails immediately without creating a record.
    pub fn send(&self, message: impl Into<Option<Req>>) -> Option<ReplyFuture<Resp>> {
        let Some(message) = message.into() else {
            tracing::trace!("send without a message is a no-op");
            return None;
        };

        {
            let state = self.shared.state.borrow();
            if state.flushing {
                tracing::debug!("send rejected, pipe is flushing");
                return Some(ReplyFuture::failed(PipeError::FlushInProgress));
            }
            if state.sender.is_none() {
                tracing::debug!("send rejected, no sender registered");
                return Some(ReplyFuture::failed(PipeError::SenderMissing));
            }
        }

        let id = self.shared.ids.next();
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.borrow_mut();
            state.queue.push_back(QueuedRecord { id, message, reply });
            tracing::debug!(%id, queued = state.queue.len(), "request accepted");
        }
        self.shared.promote_queued();

        Some(ReplyFuture::new(rx))
    }

    /// Enter drain mode and get a future that resolves once the pipe is
    /// empty.
    ///
    /// New `send` calls are rejected immediately, but queued requests keep
    /// promoting as pending slots free: a flush is a drain, not a freeze of
    /// in-flight work. Flushing is one-shot; it is never reset after the
    /// drain completes.
    pub fn flush(&self) -> FlushFuture {
        let mut state = self.shared.state.borrow_mut();
        state.flushing = true;
        if state.pending.is_empty() && state.queue.is_empty() {
            tracing::debug!("flush requested on an idle pipe");
            return FlushFuture::ready();
        }

        tracing::debug!(
            pending = state.pending.len(),
            queued = state.queue.len(),
            "flush requested, draining"
        );
        let (tx, rx) = oneshot::channel();
        state.flush_waiters.push(tx);
        FlushFuture::new(rx)
    }

    /// True iff both the pending set and the queue are empty.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.borrow();
        state.pending.is_empty() && state.queue.is_empty()
    }

    /// Number of in-flight requests.
    pub fn pending(&self) -> usize {
        self.shared.state.borrow().pending.len()
    }

    /// Number of requests waiting for a pending slot.
    pub fn queued(&self) -> usize {
        self.shared.state.borrow().queue.len()
    }

    /// True iff every pending slot is occupied.
    pub fn at_max_pending(&self) -> bool {
        self.pending() == self.shared.config.max_pending
    }

    /// True iff the pipe is in drain mode.
    pub fn is_flushing(&self) -> bool {
        self.shared.state.borrow().flushing
    }
}

impl<Req, Resp, P> PipeShared<Req, Resp, P>
where
    Req: Clone + 'static,
    Resp: 'static,
    P: Providers,
{
    /// Weak reference to hand to spawned tasks.
    fn weak_self(&self) -> Weak<Self> {
        // The fallback dangling Weak never upgrades; it is unreachable after
        // construction.
        self.self_ref.borrow().clone().unwrap_or_else(Weak::new)
    }

    /// Move queue heads into free pending slots and dispatch them.
    ///
    /// Runs after every accepted send and after every terminal transition.
    /// Promotion ignores the flushing flag: a flush drains queued work
    /// instead of stranding it.
    fn promote_queued(&self) {
        loop {
            let admitted = {
                let mut state = self.state.borrow_mut();
                if state.pending.len() >= self.config.max_pending {
                    return;
                }
                let Some(record) = state.queue.pop_front() else {
                    return;
                };
                match state.sender.clone() {
                    Some(sender) => {
                        let envelope = Envelope::new(record.id, record.message.clone());
                        let (id, pending) =
                            PendingRecord::admit(record, self.providers.time().now());
                        state.pending.insert(id, pending);
                        tracing::debug!(
                            %id,
                            pending = state.pending.len(),
                            queued = state.queue.len(),
                            "request admitted"
                        );
                        Some((id, envelope, sender))
                    }
                    None => {
                        // send() fails fast when no sender is registered, so
                        // a queued record can only hit this if the slot was
                        // somehow never filled; reject rather than panic.
                        record.reject(PipeError::SenderMissing);
                        None
                    }
                }
            };

            match admitted {
                Some((id, envelope, sender)) => {
                    self.arm_timer(id, 0);
                    self.dispatch(id, 0, envelope, sender);
                }
                None => self.settle_flush_if_drained(),
            }
        }
    }

    /// Invoke the sender for one attempt and watch its future.
    ///
    /// Called with no borrow held: the sender may synchronously call the
    /// receiver handle (an echo transport does exactly that).
    fn dispatch(&self, id: RequestId, attempt: u32, envelope: Envelope<Req>, sender: SenderFn<Req>) {
        tracing::debug!(%id, attempt, "dispatching request");
        let future = (sender)(envelope);

        let weak = self.weak_self();
        self.providers.task().spawn_task("pipe_dispatch", async move {
            let result = future.await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => tracing::trace!(%id, attempt, "dispatch acknowledged"),
                Err(cause) => shared.on_dispatch_failed(id, attempt, cause),
            }
        });
    }

    /// Arm the per-attempt timeout for a pending record, if configured.
    fn arm_timer(&self, id: RequestId, attempt: u32) {
        let Some(timeout) = self.config.pending_timeout else {
            return;
        };

        let time = self.providers.time().clone();
        let weak = self.weak_self();
        let handle = self.providers.task().spawn_task("pipe_timeout", async move {
            if time.sleep(timeout).await.is_err() {
                // Cancelled sleep: the timer dies with its provider.
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.on_timeout(id, attempt);
            }
        });

        let mut state = self.state.borrow_mut();
        if let Some(record) = state.pending.get_mut(&id) {
            record.arm_timer(handle);
        } else {
            handle.abort();
        }
    }

    /// Terminal or retry transition after a sender failure.
    fn on_dispatch_failed(&self, id: RequestId, attempt: u32, cause: SendFailure) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            let sender = state.sender.clone();
            let Some(record) = state.pending.get_mut(&id) else {
                tracing::debug!(%id, attempt, "sender failure for a completed request, discarding");
                return;
            };
            if record.attempt != attempt {
                // A newer attempt is already in flight; this failure lost the
                // race and must not terminate the request.
                tracing::debug!(
                    %id,
                    attempt,
                    current = record.attempt,
                    "sender failure from a superseded attempt, discarding"
                );
                return;
            }
            record.cancel_timer();
            if record.attempt < self.config.max_retries
                && let Some(sender) = sender
            {
                record.attempt += 1;
                let envelope = Envelope::new(id, record.message.clone());
                FailureOutcome::Retry(envelope, sender, record.attempt)
            } else {
                let Some(record) = state.pending.remove(&id) else {
                    return;
                };
                FailureOutcome::Exhausted(record)
            }
        };

        match outcome {
            FailureOutcome::Retry(envelope, sender, next_attempt) => {
                tracing::warn!(%id, attempt = next_attempt, error = %cause, "sender failed, retrying");
                self.arm_timer(id, next_attempt);
                self.dispatch(id, next_attempt, envelope, sender);
            }
            FailureOutcome::Exhausted(mut record) => {
                let attempts = record.attempt + 1;
                tracing::warn!(%id, attempts, error = %cause, "sender failed, retries exhausted");
                record.complete(Err(PipeError::Send {
                    attempts,
                    source: cause,
                }));
                self.promote_queued();
                self.settle_flush_if_drained();
            }
        }
    }

    /// Terminal transition when a pending attempt's timer fires.
    fn on_timeout(&self, id: RequestId, attempt: u32) {
        let record = {
            let mut state = self.state.borrow_mut();
            // Only the timer of the current attempt may terminate the
            // request; a reply or retry that got here first wins.
            let expired = state
                .pending
                .get(&id)
                .is_some_and(|record| record.attempt == attempt);
            if expired { state.pending.remove(&id) } else { None }
        };
        let Some(mut record) = record else {
            return;
        };

        tracing::warn!(%id, attempt, "pending request timed out");
        record.complete(Err(PipeError::Timeout));
        self.promote_queued();
        self.settle_flush_if_drained();
    }

    /// Terminal transition when a reply envelope arrives.
    fn deliver(&self, envelope: Envelope<Resp>) {
        let id = envelope.id;
        let record = { self.state.borrow_mut().pending.remove(&id) };
        let Some(mut record) = record else {
            tracing::debug!(%id, "reply for an unknown or completed request, discarding");
            return;
        };

        let elapsed = record.elapsed_since(self.providers.time().now());
        tracing::debug!(%id, ?elapsed, "reply delivered");
        record.complete(Ok(envelope.message));
        self.promote_queued();
        self.settle_flush_if_drained();
    }

    /// Settle all flush waiters once the pipe has drained.
    fn settle_flush_if_drained(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if !state.flushing || !state.pending.is_empty() || !state.queue.is_empty() {
                return;
            }
            std::mem::take(&mut state.flush_waiters)
        };
        if waiters.is_empty() {
            return;
        }

        tracing::debug!(waiters = waiters.len(), "flush settled, pipe drained");
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}
