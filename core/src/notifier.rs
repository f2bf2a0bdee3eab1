//! Single-slot `on<event>` handlers layered over an `EventBus`.
//!
//! # Design
//! A `NotifierTarget` is parameterised by a closed `Vocabulary` of event
//! kinds. Construction registers one trampoline listener per kind on the
//! bus; the trampoline looks up the kind's slot in a fixed table and invokes
//! whatever handler is stored there. Replacing a handler swaps the slot
//! contents and never touches bus registrations, so `on<event>` assignment
//! and `add_listener` subscriptions coexist independently.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use uuid::Uuid;

use crate::event::{Event, EventBus, Listener};

/// A slot handler, invoked with no arguments.
pub type Handler = Rc<dyn Fn()>;

/// A closed set of event kinds with stable wire names.
pub trait Vocabulary: Copy + Eq + fmt::Debug + 'static {
    /// Every kind, in trampoline registration order.
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;
}

/// Events shared by a session and its `upload` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressEvent {
    Abort,
    Error,
    LoadStart,
    LoadEnd,
    Progress,
    Timeout,
    Load,
}

impl Vocabulary for ProgressEvent {
    const ALL: &'static [Self] = &[
        ProgressEvent::Abort,
        ProgressEvent::Error,
        ProgressEvent::LoadEnd,
        ProgressEvent::LoadStart,
        ProgressEvent::Load,
        ProgressEvent::Timeout,
        ProgressEvent::Progress,
    ];

    fn as_str(self) -> &'static str {
        match self {
            ProgressEvent::Abort => "abort",
            ProgressEvent::Error => "error",
            ProgressEvent::LoadStart => "loadstart",
            ProgressEvent::LoadEnd => "loadend",
            ProgressEvent::Progress => "progress",
            ProgressEvent::Timeout => "timeout",
            ProgressEvent::Load => "load",
        }
    }
}

/// Events a `RequestSession` emits: the progress set plus `readystatechange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    ReadyStateChange,
    Progress(ProgressEvent),
}

impl SessionEvent {
    pub const ABORT: Self = SessionEvent::Progress(ProgressEvent::Abort);
    pub const ERROR: Self = SessionEvent::Progress(ProgressEvent::Error);
    pub const LOAD_START: Self = SessionEvent::Progress(ProgressEvent::LoadStart);
    pub const LOAD_END: Self = SessionEvent::Progress(ProgressEvent::LoadEnd);
    pub const PROGRESS: Self = SessionEvent::Progress(ProgressEvent::Progress);
    pub const TIMEOUT: Self = SessionEvent::Progress(ProgressEvent::Timeout);
    pub const LOAD: Self = SessionEvent::Progress(ProgressEvent::Load);
}

impl From<ProgressEvent> for SessionEvent {
    fn from(event: ProgressEvent) -> Self {
        SessionEvent::Progress(event)
    }
}

impl Vocabulary for SessionEvent {
    const ALL: &'static [Self] = &[
        SessionEvent::ABORT,
        SessionEvent::ERROR,
        SessionEvent::LOAD_END,
        SessionEvent::LOAD_START,
        SessionEvent::LOAD,
        SessionEvent::TIMEOUT,
        SessionEvent::PROGRESS,
        SessionEvent::ReadyStateChange,
    ];

    fn as_str(self) -> &'static str {
        match self {
            SessionEvent::ReadyStateChange => "readystatechange",
            SessionEvent::Progress(event) => event.as_str(),
        }
    }
}

struct SlotTable<V> {
    slots: RefCell<Vec<(V, Option<Handler>)>>,
}

impl<V: Vocabulary> SlotTable<V> {
    fn new() -> Self {
        let noop: Handler = Rc::new(|| {});
        Self {
            slots: RefCell::new(V::ALL.iter().map(|&kind| (kind, Some(Rc::clone(&noop)))).collect()),
        }
    }

    fn get(&self, kind: V) -> Option<Handler> {
        self.slots
            .borrow()
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, handler)| handler.clone())
    }

    fn set(&self, kind: V, handler: Option<Handler>) {
        if let Some(slot) = self.slots.borrow_mut().iter_mut().find(|(k, _)| *k == kind) {
            slot.1 = handler;
        }
    }

    fn invoke(&self, kind: V) {
        // Clone out first: the handler may replace its own slot.
        if let Some(handler) = self.get(kind) {
            handler();
        }
    }
}

/// An `EventBus` with one replaceable handler slot per vocabulary entry.
pub struct NotifierTarget<V: Vocabulary> {
    bus: EventBus,
    slots: Rc<SlotTable<V>>,
}

impl<V: Vocabulary> NotifierTarget<V> {
    pub fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self::with_bus(EventBus::with_id(id))
    }

    fn with_bus(bus: EventBus) -> Self {
        let slots = Rc::new(SlotTable::new());
        for &kind in V::ALL {
            let slots = Rc::clone(&slots);
            bus.add_listener(kind.as_str(), Listener::new(move |_| slots.invoke(kind)));
        }
        Self { bus, slots }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current handler for `kind`; `None` once cleared.
    pub fn handler(&self, kind: V) -> Option<Handler> {
        self.slots.get(kind)
    }

    /// Replace the handler for `kind`. `None` leaves the slot empty, which
    /// the trampoline skips.
    pub fn set_handler(&self, kind: V, handler: Option<Handler>) {
        self.slots.set(kind, handler);
    }

    pub fn on(&self, kind: V, handler: impl Fn() + 'static) {
        self.set_handler(kind, Some(Rc::new(handler)));
    }

    pub fn add_event_listener(&self, event_type: &str, listener: Listener) {
        self.bus.add_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.bus.remove_listener(event_type, listener);
    }

    pub fn dispatch_event(&self, event: &mut Event) -> bool {
        self.bus.dispatch(event)
    }

    /// Dispatch a fresh event of `kind`.
    pub fn notify(&self, kind: V) -> bool {
        self.bus.dispatch(&mut Event::new(kind.as_str()))
    }
}

impl<V: Vocabulary> Default for NotifierTarget<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vocabulary> fmt::Debug for NotifierTarget<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierTarget").field("bus", &self.bus).finish()
    }
}
