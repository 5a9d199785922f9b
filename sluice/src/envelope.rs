//! Correlation ids and the request/reply envelope.
//!
//! Every request is assigned a [`RequestId`] by the pipe's per-instance
//! [`RequestIdFactory`]; the id is the correlation key that matches a reply
//! back to its request. An [`Envelope`] is the `{id, message}` pair crossing
//! the pipe boundary in both directions.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

/// Correlation key for one in-flight request.
///
/// Unique within a pipe instance and never reused. Ids are allocated
/// monotonically starting at 0, so they double as a send-order stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a request id from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Factory for allocating request ids.
///
/// Post-increment counter starting at 0. Uses `Cell<u64>` for
/// single-threaded increments.
#[derive(Debug)]
pub struct RequestIdFactory {
    next_id: Cell<u64>,
}

impl RequestIdFactory {
    /// Create a new factory starting from 0.
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
        }
    }

    /// Allocate the next request id.
    pub fn next(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        RequestId(id)
    }
}

impl Default for RequestIdFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Request/reply envelope crossing the pipe boundary.
///
/// Outbound the payload is the request message; inbound it is the reply. The
/// pipe never inspects `message`; the serde derives exist so that user
/// transports can put envelopes on a wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Correlation id matching a reply to its request.
    pub id: RequestId,

    /// Caller-opaque payload.
    pub message: T,
}

impl<T> Envelope<T> {
    /// Create an envelope for the given id and payload.
    pub fn new(id: RequestId, message: T) -> Self {
        Self { id, message }
    }
}
