//! Integration tests for request/reply correlation, queueing, retries, and
//! timeouts.
//!
//! These tests exercise the full pipe flow: callers submitting requests via
//! `send()`, a test transport registered via `set_sender()`, and replies
//! delivered back through the `ReplyReceiver` handle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice::{Envelope, PipeConfig, PipeError, RequestPipe, TokioProviders};
use tokio::task::LocalSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
    payload: String,
}

fn ping(seq: u32, payload: &str) -> Ping {
    Ping {
        seq,
        payload: payload.to_string(),
    }
}

type PingPipe = RequestPipe<Ping, Ping, TokioProviders>;

fn pipe_with(config: PipeConfig) -> PingPipe {
    RequestPipe::new(TokioProviders::new(), config)
}

// ============================================================================
// Section 1: Construction and no-op sends
// ============================================================================

#[test]
fn fresh_pipe_is_idle() {
    let pipe = pipe_with(PipeConfig::default());

    assert!(pipe.is_idle());
    assert!(!pipe.at_max_pending());
    assert_eq!(pipe.pending(), 0);
    assert_eq!(pipe.queued(), 0);
    assert!(!pipe.is_flushing());
}

#[test]
fn send_without_message_is_a_noop() {
    let pipe = pipe_with(PipeConfig::default());
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();
    pipe.set_sender(move |_envelope| {
        seen.set(seen.get() + 1);
        async { Ok(()) }
    });

    assert!(pipe.send(None).is_none());

    assert_eq!(pipe.pending(), 0);
    assert_eq!(pipe.queued(), 0);
    assert_eq!(calls.get(), 0);
}

#[tokio::test]
async fn send_before_sender_registration_fails_fast() {
    let pipe = pipe_with(PipeConfig::default());

    let reply = pipe.send(ping(0, "unrouted")).expect("a future is produced");

    let err = reply.await.expect_err("no sender is registered");
    assert!(matches!(err, PipeError::SenderMissing));
    assert!(pipe.is_idle());
}

// ============================================================================
// Section 2: Round trips and correlation
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn echo_round_trip() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::default());
            let receiver = pipe.receiver();
            // The sender calls the receiver synchronously, before its future
            // is even polled.
            pipe.set_sender(move |envelope| {
                receiver.deliver(envelope);
                async { Ok(()) }
            });

            let reply = pipe
                .send(ping(1, "bar"))
                .expect("a message was given")
                .await
                .expect("echo reply");

            assert_eq!(reply, ping(1, "bar"));
            assert!(pipe.is_idle());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn request_ids_increase_from_zero() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::new(4));
            let receiver = pipe.receiver();
            let ids: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
            let seen = ids.clone();
            pipe.set_sender(move |envelope| {
                seen.borrow_mut().push(envelope.id.value());
                receiver.deliver(envelope);
                async { Ok(()) }
            });

            for seq in 0..3 {
                let reply = pipe
                    .send(ping(seq, "seq"))
                    .expect("a message was given")
                    .await
                    .expect("echo reply");
                assert_eq!(reply.seq, seq);
            }

            assert_eq!(*ids.borrow(), vec![0, 1, 2]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn replies_correlate_out_of_order() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::new(2));
            let receiver = pipe.receiver();
            let outbox: Rc<RefCell<Vec<Envelope<Ping>>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = outbox.clone();
            pipe.set_sender(move |envelope| {
                sink.borrow_mut().push(envelope);
                async { Ok(()) }
            });

            let first = pipe.send(ping(0, "first")).expect("a message was given");
            let second = pipe.send(ping(1, "second")).expect("a message was given");
            assert_eq!(pipe.pending(), 2);
            assert!(pipe.at_max_pending());

            // Reply in reverse order; correlation is by id, not arrival
            // order.
            let mut envelopes: Vec<_> = outbox.borrow_mut().drain(..).collect();
            envelopes.reverse();
            for envelope in envelopes {
                receiver.deliver(envelope);
            }

            assert_eq!(first.await.expect("first reply"), ping(0, "first"));
            assert_eq!(second.await.expect("second reply"), ping(1, "second"));
            assert!(pipe.is_idle());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn late_reply_for_unknown_id_is_discarded() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::default());
            let receiver = pipe.receiver();

            // Nothing was ever sent with this id.
            receiver.deliver(Envelope::new(sluice::RequestId::new(99), ping(9, "ghost")));

            assert!(pipe.is_idle());
        })
        .await;
}

// ============================================================================
// Section 3: Admission and queueing
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn second_send_queues_until_slot_frees() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::default()); // max_pending = 1
            let receiver = pipe.receiver();
            // Echo deferred by one scheduler tick, so both sends land before
            // any reply.
            pipe.set_sender(move |envelope| {
                let receiver = receiver.clone();
                async move {
                    tokio::task::yield_now().await;
                    receiver.deliver(envelope);
                    Ok(())
                }
            });

            let first = pipe.send(ping(0, "bar")).expect("a message was given");
            assert_eq!(pipe.pending(), 1);
            assert_eq!(pipe.queued(), 0);
            assert!(pipe.at_max_pending());

            let second = pipe.send(ping(1, "baz")).expect("a message was given");
            assert_eq!(pipe.pending(), 1);
            assert_eq!(pipe.queued(), 1);

            assert_eq!(first.await.expect("first reply"), ping(0, "bar"));
            assert_eq!(second.await.expect("second reply"), ping(1, "baz"));
            assert!(pipe.is_idle());
        })
        .await;
}

// ============================================================================
// Section 4: Timeouts
// ============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn slow_reply_times_out_and_is_discarded() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(
                PipeConfig::default().with_pending_timeout(Duration::from_millis(500)),
            );
            let receiver = pipe.receiver();
            pipe.set_sender(move |envelope| {
                let receiver = receiver.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(700)).await;
                    receiver.deliver(envelope);
                    Ok(())
                }
            });

            let reply = pipe.send(ping(2, "baz")).expect("a message was given");

            let err = reply.await.expect_err("times out before the reply");
            assert!(matches!(err, PipeError::Timeout));

            // Let the 700ms reply arrive; it must be discarded, not become a
            // second terminal.
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(pipe.is_idle());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn each_attempt_gets_a_fresh_timer() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(
                PipeConfig::default()
                    .with_max_retries(1)
                    .with_pending_timeout(Duration::from_millis(100)),
            );
            let receiver = pipe.receiver();
            let calls = Rc::new(Cell::new(0u32));
            let seen = calls.clone();
            pipe.set_sender(move |envelope| {
                let receiver = receiver.clone();
                let call = seen.get();
                seen.set(call + 1);
                async move {
                    if call == 0 {
                        // First attempt fails at t=50ms, inside its budget.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err("flaky transport".into())
                    } else {
                        // Second attempt replies at t=120ms: past the first
                        // attempt's deadline, within its own.
                        tokio::time::sleep(Duration::from_millis(70)).await;
                        receiver.deliver(envelope);
                        Ok(())
                    }
                }
            });

            let reply = pipe.send(ping(3, "retry me")).expect("a message was given");

            assert_eq!(
                reply.await.expect("second attempt replies"),
                ping(3, "retry me")
            );
            assert_eq!(calls.get(), 2);
            assert!(pipe.is_idle());
        })
        .await;
}

// ============================================================================
// Section 5: Retries
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn failing_sender_retries_then_rejects() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::default().with_max_retries(3));
            let attempts: Rc<RefCell<Vec<Envelope<Ping>>>> = Rc::new(RefCell::new(Vec::new()));
            let seen = attempts.clone();
            pipe.set_sender(move |envelope| {
                seen.borrow_mut().push(envelope);
                async { Err("transport unavailable".into()) }
            });

            let reply = pipe.send(ping(4, "baz")).expect("a message was given");

            let err = reply.await.expect_err("retries exhaust");
            match err {
                PipeError::Send { attempts, source } => {
                    assert_eq!(attempts, 4);
                    assert_eq!(source.to_string(), "transport unavailable");
                }
                other => panic!("unexpected error: {other}"),
            }

            // max_retries = 3 means exactly 4 attempts, every one carrying
            // the same envelope.
            let attempts = attempts.borrow();
            assert_eq!(attempts.len(), 4);
            for envelope in attempts.iter() {
                assert_eq!(envelope.id.value(), 0);
                assert_eq!(envelope.message, ping(4, "baz"));
            }

            assert!(pipe.is_idle());
        })
        .await;
}

// ============================================================================
// Section 6: Lifecycle
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn dropping_the_pipe_rejects_outstanding_requests() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let pipe = pipe_with(PipeConfig::default());
            // A black-hole transport: dispatch succeeds, no reply ever comes.
            pipe.set_sender(|_envelope| async { Ok(()) });

            let reply = pipe.send(ping(5, "stranded")).expect("a message was given");
            drop(pipe);

            let err = reply.await.expect_err("pipe is gone");
            assert!(matches!(err, PipeError::Closed));
        })
        .await;
}
