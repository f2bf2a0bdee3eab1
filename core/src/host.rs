//! Host-supplied primitives: the one-shot transport and the timer.
//!
//! # Design
//! The session never performs I/O. It hands a `TransportRequest` plus a
//! `Responder` to the host's `Transport` and waits to be resumed. The
//! responder is a one-shot value whose methods consume it, so the host can
//! only report one of success or failure, and can only run the completion
//! hook after that:
//!
//! ```text
//! Responder --success(r)--> Completion --complete()--> (settled)
//!           \--fail(r)----/
//! ```
//!
//! Dropping an unresolved `Responder` counts as a failed call with an empty
//! response followed by completion; dropping a `Completion` completes it.
//! Either way the session always settles exactly once.

use std::fmt;
use std::time::Duration;

use crate::http::{TransportRequest, TransportResponse};
use crate::session::Continuation;

/// The host's "fire one request, get one terminal callback" primitive.
pub trait Transport {
    /// Start `request`. The host resolves `responder` later (or right away,
    /// before returning) and returns a handle the session may use to abort.
    fn request(&self, request: TransportRequest, responder: Responder) -> Box<dyn TransportTask>;
}

/// Abort capability of an outstanding transport call.
///
/// `abort` may be called after the call completed and must then do nothing.
pub trait TransportTask {
    fn abort(&self);
}

impl<F: Fn()> TransportTask for F {
    fn abort(&self) {
        self()
    }
}

/// A task whose abort does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTask;

impl TransportTask for NoopTask {
    fn abort(&self) {}
}

/// Opaque handle returned by `Timer::schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// The host's timer primitive.
pub trait Timer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle;

    /// Cancelling a handle that already fired, or was never issued, is a
    /// no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// First half of a transport call's continuation: report the outcome.
#[must_use = "an unresolved responder fails the call when dropped"]
pub struct Responder {
    continuation: Option<Continuation>,
}

impl Responder {
    pub(crate) fn new(continuation: Continuation) -> Self {
        Self {
            continuation: Some(continuation),
        }
    }

    /// Report a response. HTTP error statuses are still a success here.
    pub fn success(mut self, response: TransportResponse) -> Completion {
        let continuation = self.continuation.take();
        if let Some(c) = &continuation {
            c.on_success(response);
        }
        Completion { continuation }
    }

    /// Report that the call failed without a usable response.
    pub fn fail(mut self, response: TransportResponse) -> Completion {
        let continuation = self.continuation.take();
        if let Some(c) = &continuation {
            c.on_failure(response);
        }
        Completion { continuation }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(c) = self.continuation.take() {
            tracing::debug!("transport dropped an unresolved responder");
            c.on_failure(TransportResponse::default());
            c.on_complete();
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("pending", &self.continuation.is_some())
            .finish()
    }
}

/// Second half of a transport call's continuation: the terminal hook.
#[must_use = "dropping a completion completes the call immediately"]
pub struct Completion {
    continuation: Option<Continuation>,
}

impl Completion {
    pub fn complete(mut self) {
        if let Some(c) = self.continuation.take() {
            c.on_complete();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(c) = self.continuation.take() {
            c.on_complete();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.continuation.is_some())
            .finish()
    }
}
