//! Named-listener registry with synchronous, ordered dispatch.
//!
//! # Design
//! Listeners are reference-counted closures so they can be removed by
//! identity: keep a clone of the `Listener` you registered and pass it to
//! `remove_listener`. The bus uses interior mutability so a listener may add
//! or remove listeners, or call back into its owner, while a dispatch is in
//! progress. Each dispatch iterates the listener list as it was when the
//! dispatch began.
//!
//! There is no isolation between listeners: a panicking listener unwinds
//! through `dispatch` and the remaining listeners are not invoked.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use uuid::Uuid;

/// An event flowing through an `EventBus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: String,
    target: Option<Uuid>,
    default_prevented: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            target: None,
            default_prevented: false,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Id of the bus that dispatched this event. `None` until dispatched.
    pub fn target(&self) -> Option<Uuid> {
        self.target
    }

    /// Makes `dispatch` report the event as not handled.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// A listener callback, compared by identity.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&mut Event)>);

impl Listener {
    pub fn new(callback: impl Fn(&mut Event) + 'static) -> Self {
        Self(Rc::new(callback))
    }

    fn call(&self, event: &mut Event) {
        (self.0)(event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0))
    }
}

/// Registry mapping event types to ordered listener lists.
pub struct EventBus {
    id: Uuid,
    listeners: RefCell<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            listeners: RefCell::new(HashMap::new()),
        }
    }

    /// Id written into `Event::target` on dispatch.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register `listener` for `event_type`. Duplicates are allowed and fire
    /// once per registration.
    pub fn add_listener(&self, event_type: &str, listener: Listener) {
        self.listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove the first registration of `listener` for `event_type`.
    /// Unknown types and absent listeners are ignored.
    pub fn remove_listener(&self, event_type: &str, listener: &Listener) {
        let mut listeners = self.listeners.borrow_mut();
        let Some(stack) = listeners.get_mut(event_type) else {
            return;
        };
        if let Some(pos) = stack.iter().position(|l| l == listener) {
            stack.remove(pos);
        }
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the event's type, in order.
    ///
    /// Returns `false` only if a listener called `prevent_default`. An event
    /// type nobody ever listened to is reported as handled and its target is
    /// left unset.
    pub fn dispatch(&self, event: &mut Event) -> bool {
        let snapshot = match self.listeners.borrow().get(event.event_type()) {
            Some(stack) => stack.clone(),
            None => return true,
        };
        event.target = Some(self.id);
        tracing::trace!(
            target_id = %self.id,
            event_type = event.event_type(),
            listeners = snapshot.len(),
            "dispatch"
        );
        for listener in &snapshot {
            listener.call(event);
        }
        !event.default_prevented
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.id)
            .field("listeners", &self.listeners.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Rc::clone(log);
        Listener::new(move |event| log.borrow_mut().push(format!("{tag}:{}", event.event_type())))
    }

    #[test]
    fn dispatch_without_listeners_is_handled() {
        let bus = EventBus::new();
        let mut event = Event::new("load");
        assert!(bus.dispatch(&mut event));
        assert_eq!(event.target(), None);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.add_listener("load", recorder(&log, "a"));
        bus.add_listener("load", recorder(&log, "b"));
        bus.add_listener("error", recorder(&log, "c"));

        let mut event = Event::new("load");
        assert!(bus.dispatch(&mut event));
        assert_eq!(*log.borrow(), vec!["a:load", "b:load"]);
        assert_eq!(event.target(), Some(bus.id()));
    }

    #[test]
    fn duplicate_registration_fires_twice() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = recorder(&log, "dup");
        bus.add_listener("load", listener.clone());
        bus.add_listener("load", listener);
        bus.dispatch(&mut Event::new("load"));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn remove_takes_only_the_first_identity_match() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = recorder(&log, "x");
        let other = recorder(&log, "y");
        bus.add_listener("load", listener.clone());
        bus.add_listener("load", other.clone());
        bus.add_listener("load", listener.clone());

        bus.remove_listener("load", &listener);
        assert_eq!(bus.listener_count("load"), 2);
        bus.dispatch(&mut Event::new("load"));
        assert_eq!(*log.borrow(), vec!["y:load", "x:load"]);
    }

    #[test]
    fn remove_unknown_is_a_no_op() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.remove_listener("never", &recorder(&log, "z"));
        bus.add_listener("load", recorder(&log, "a"));
        bus.remove_listener("load", &recorder(&log, "a"));
        assert_eq!(bus.listener_count("load"), 1);
    }

    #[test]
    fn prevent_default_reports_not_handled() {
        let bus = EventBus::new();
        bus.add_listener("submit", Listener::new(|event| event.prevent_default()));
        let mut event = Event::new("submit");
        assert!(!bus.dispatch(&mut event));
        assert!(event.default_prevented());
    }

    #[test]
    fn listener_added_during_dispatch_waits_for_next_dispatch() {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner_bus = Rc::clone(&bus);
        let inner_log = Rc::clone(&log);
        bus.add_listener(
            "tick",
            Listener::new(move |_| {
                inner_log.borrow_mut().push("outer".to_string());
                inner_bus.add_listener("tick", recorder(&inner_log, "late"));
            }),
        );

        bus.dispatch(&mut Event::new("tick"));
        assert_eq!(*log.borrow(), vec!["outer"]);
        bus.dispatch(&mut Event::new("tick"));
        assert_eq!(*log.borrow(), vec!["outer", "outer", "late:tick"]);
    }

    #[test]
    #[should_panic(expected = "listener failed")]
    fn panicking_listener_propagates() {
        let bus = EventBus::new();
        bus.add_listener("load", Listener::new(|_| panic!("listener failed")));
        bus.dispatch(&mut Event::new("load"));
    }
}
