//! Deterministic in-memory host primitives.
//!
//! `SimTransport` parks every call until the test resolves it, and
//! `SimTimer` runs on a virtual clock that only moves when told to. Together
//! they let a test order transport callbacks and timer expiry however it
//! needs, without threads or sleeps.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::host::{Responder, Timer, TimerHandle, Transport, TransportTask};
use crate::http::{TransportRequest, TransportResponse};

struct SimCall {
    id: u64,
    request: TransportRequest,
    responder: Responder,
}

#[derive(Default)]
struct SimCalls {
    pending: RefCell<VecDeque<SimCall>>,
    requests: RefCell<Vec<TransportRequest>>,
    aborts: Cell<usize>,
    next_id: Cell<u64>,
}

impl SimCalls {
    fn remove(&self, id: u64) -> Option<SimCall> {
        let mut pending = self.pending.borrow_mut();
        let pos = pending.iter().position(|call| call.id == id)?;
        pending.remove(pos)
    }
}

/// A transport that records requests and waits for the test to answer.
#[derive(Clone, Default)]
pub struct SimTransport {
    calls: Rc<SimCalls>,
    resolve_on_abort: bool,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose abort immediately runs `fail` then `complete` on
    /// the aborted call, the way most mobile hosts behave.
    pub fn resolving_on_abort() -> Self {
        Self {
            resolve_on_abort: true,
            ..Self::default()
        }
    }

    /// Every request ever started, oldest first.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.calls.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.calls.requests.borrow().len()
    }

    pub fn last_request(&self) -> Option<TransportRequest> {
        self.calls.requests.borrow().last().cloned()
    }

    /// Calls started but not yet resolved.
    pub fn pending(&self) -> usize {
        self.calls.pending.borrow().len()
    }

    /// How many times a task's abort capability was invoked.
    pub fn abort_count(&self) -> usize {
        self.calls.aborts.get()
    }

    /// Take the oldest unresolved call's responder.
    pub fn take_responder(&self) -> Option<Responder> {
        let call = self.calls.pending.borrow_mut().pop_front();
        call.map(|call| call.responder)
    }

    /// Resolve the oldest call with `success` then `complete`.
    pub fn succeed(&self, response: TransportResponse) -> bool {
        match self.take_responder() {
            Some(responder) => {
                responder.success(response).complete();
                true
            }
            None => false,
        }
    }

    /// Resolve the oldest call with `fail` then `complete`.
    pub fn fail(&self, response: TransportResponse) -> bool {
        match self.take_responder() {
            Some(responder) => {
                responder.fail(response).complete();
                true
            }
            None => false,
        }
    }
}

impl Transport for SimTransport {
    fn request(&self, request: TransportRequest, responder: Responder) -> Box<dyn TransportTask> {
        let id = self.calls.next_id.get();
        self.calls.next_id.set(id + 1);
        self.calls.requests.borrow_mut().push(request.clone());
        self.calls.pending.borrow_mut().push_back(SimCall {
            id,
            request,
            responder,
        });
        Box::new(SimTask {
            calls: Rc::clone(&self.calls),
            id,
            resolve_on_abort: self.resolve_on_abort,
        })
    }
}

struct SimTask {
    calls: Rc<SimCalls>,
    id: u64,
    resolve_on_abort: bool,
}

impl TransportTask for SimTask {
    fn abort(&self) {
        self.calls.aborts.set(self.calls.aborts.get() + 1);
        if !self.resolve_on_abort {
            return;
        }
        if let Some(call) = self.calls.remove(self.id) {
            tracing::trace!(url = %call.request.url, "sim transport aborting call");
            call.responder.fail(TransportResponse::default()).complete();
        }
    }
}

struct SimTimerEntry {
    handle: TimerHandle,
    deadline: Duration,
    callback: Box<dyn FnOnce()>,
}

/// A timer driven by a virtual clock.
#[derive(Clone, Default)]
pub struct SimTimer {
    now: Rc<Cell<Duration>>,
    entries: Rc<RefCell<Vec<SimTimerEntry>>>,
    next_id: Rc<Cell<u64>>,
}

impl SimTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Timers scheduled and neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Move the clock forward, firing due callbacks in deadline order.
    /// Callbacks scheduled while advancing fire too if they fall due.
    pub fn advance(&self, by: Duration) {
        let target = self.now.get() + by;
        loop {
            let due = {
                let mut entries = self.entries.borrow_mut();
                let next = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.deadline <= target)
                    .min_by_key(|(_, e)| (e.deadline, e.handle))
                    .map(|(pos, _)| pos);
                next.map(|pos| entries.remove(pos))
            };
            let Some(entry) = due else { break };
            self.now.set(entry.deadline);
            (entry.callback)();
        }
        self.now.set(target);
    }
}

impl Timer for SimTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let handle = TimerHandle(self.next_id.get());
        self.next_id.set(handle.0 + 1);
        self.entries.borrow_mut().push(SimTimerEntry {
            handle,
            deadline: self.now.get() + delay,
            callback,
        });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        // Drop outside the borrow: the callback may own a session.
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|e| e.handle == handle)
                .map(|pos| entries.remove(pos))
        };
        drop(removed);
    }
}
