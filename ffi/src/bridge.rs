//! Adapts an `FfiHost` function table to the core `Transport` and `Timer`
//! traits.
//!
//! Continuations cannot cross the C boundary, so the bridge parks them in
//! maps keyed by the ids it hands to the host and looks them up again when
//! the host calls back. No map borrow is held while calling into the host or
//! into the session.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use xhr_core::{Completion, Responder, Timer, TimerHandle, Transport, TransportResponse, TransportTask};

use crate::types::{FfiHost, FfiStatus, OwnedRequest};

enum PendingCall {
    /// Started; waiting for success or fail.
    Waiting(Responder),
    /// Resolved; waiting for complete.
    Resolved(Completion),
}

pub(crate) struct HostBridge {
    host: FfiHost,
    me: Weak<HostBridge>,
    calls: RefCell<HashMap<u64, PendingCall>>,
    timers: RefCell<HashMap<u64, Box<dyn FnOnce()>>>,
    next_call: Cell<u64>,
    next_timer: Cell<u64>,
}

impl HostBridge {
    pub(crate) fn new(host: FfiHost) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            host,
            me: me.clone(),
            calls: RefCell::new(HashMap::new()),
            timers: RefCell::new(HashMap::new()),
            next_call: Cell::new(1),
            next_timer: Cell::new(1),
        })
    }

    fn take_call(&self, call_id: u64) -> Option<PendingCall> {
        self.calls.borrow_mut().remove(&call_id)
    }

    fn is_waiting(&self, call_id: u64) -> bool {
        matches!(self.calls.borrow().get(&call_id), Some(PendingCall::Waiting(_)))
    }

    pub(crate) fn has_pending_calls(&self) -> bool {
        !self.calls.borrow().is_empty()
    }

    fn resolve(
        &self,
        call_id: u64,
        response: TransportResponse,
        report: fn(Responder, TransportResponse) -> Completion,
    ) -> FfiStatus {
        match self.take_call(call_id) {
            Some(PendingCall::Waiting(responder)) => {
                let completion = report(responder, response);
                self.calls
                    .borrow_mut()
                    .insert(call_id, PendingCall::Resolved(completion));
                FfiStatus::Ok
            }
            Some(resolved @ PendingCall::Resolved(_)) => {
                tracing::warn!(call_id, "call already resolved");
                self.calls.borrow_mut().insert(call_id, resolved);
                FfiStatus::InvalidState
            }
            None => FfiStatus::UnknownCall,
        }
    }

    pub(crate) fn succeed(&self, call_id: u64, response: TransportResponse) -> FfiStatus {
        self.resolve(call_id, response, Responder::success)
    }

    pub(crate) fn fail(&self, call_id: u64, response: TransportResponse) -> FfiStatus {
        self.resolve(call_id, response, Responder::fail)
    }

    pub(crate) fn complete(&self, call_id: u64) -> FfiStatus {
        match self.take_call(call_id) {
            Some(PendingCall::Resolved(completion)) => {
                completion.complete();
                FfiStatus::Ok
            }
            Some(PendingCall::Waiting(responder)) => {
                tracing::warn!(call_id, "complete before success or fail, treating as failure");
                drop(responder);
                FfiStatus::Ok
            }
            None => FfiStatus::UnknownCall,
        }
    }

    pub(crate) fn fire_timer(&self, timer_id: u64) -> FfiStatus {
        let callback = self.timers.borrow_mut().remove(&timer_id);
        match callback {
            Some(callback) => {
                callback();
                FfiStatus::Ok
            }
            None => FfiStatus::UnknownCall,
        }
    }

    /// Drop every parked continuation. Each may call back into the bridge
    /// while dropping, so the maps are emptied before anything is dropped.
    pub(crate) fn clear(&self) {
        let calls = std::mem::take(&mut *self.calls.borrow_mut());
        drop(calls);
        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        drop(timers);
    }
}

impl Transport for HostBridge {
    fn request(&self, request: xhr_core::TransportRequest, responder: Responder) -> Box<dyn TransportTask> {
        let call_id = self.next_call.get();
        self.next_call.set(call_id + 1);
        let task = Box::new(HostTask {
            bridge: self.me.clone(),
            call_id,
        });

        let Some(start) = self.host.request else {
            tracing::warn!(call_id, "host has no request callback");
            drop(responder);
            return task;
        };
        // Park first: the host may answer before `start` returns.
        self.calls
            .borrow_mut()
            .insert(call_id, PendingCall::Waiting(responder));
        let owned = OwnedRequest::from_core(request);
        let view = owned.view(call_id);
        unsafe { start(self.host.ctx, &view) };
        task
    }
}

impl Timer for HostBridge {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let timer_id = self.next_timer.get();
        self.next_timer.set(timer_id + 1);
        match self.host.schedule {
            Some(schedule) => {
                self.timers.borrow_mut().insert(timer_id, callback);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                unsafe { schedule(self.host.ctx, timer_id, delay_ms) };
            }
            None => tracing::warn!(timer_id, "host has no schedule callback, timer dropped"),
        }
        TimerHandle(timer_id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let removed = self.timers.borrow_mut().remove(&handle.0);
        if removed.is_none() {
            return;
        }
        drop(removed);
        if let Some(cancel) = self.host.cancel {
            unsafe { cancel(self.host.ctx, handle.0) };
        }
    }
}

struct HostTask {
    bridge: Weak<HostBridge>,
    call_id: u64,
}

impl TransportTask for HostTask {
    fn abort(&self) {
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        if !bridge.is_waiting(self.call_id) {
            return;
        }
        match bridge.host.abort {
            Some(abort) => unsafe { abort(bridge.host.ctx, self.call_id) },
            None => tracing::warn!(call_id = self.call_id, "host has no abort callback"),
        }
    }
}
