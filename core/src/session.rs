//! The request-lifecycle state machine.
//!
//! # Design
//! `RequestSession` is a cheap-to-clone handle over shared state, because the
//! transport's continuation and the timeout callback must keep the session
//! alive while a call is outstanding. All mutable state sits in one
//! `RefCell` that is never borrowed across a dispatch or a host call, so
//! listeners can call back into the session (even `abort()` or `open()`)
//! from inside an event.
//!
//! Each `open()` starts a new generation. Continuations and timer callbacks
//! carry the generation they were created for and become no-ops once it
//! is stale. Within a generation, `aborted` and `timed_out` decide the race
//! between the transport, the timer and the caller: whichever flag is set
//! first wins and the later arrivals do nothing observable.
//!
//! ```text
//! UNSENT --open--> OPENED --send/complete--> HEADERS_RECEIVED --> LOADING --> DONE
//!    ^                |                                                        |
//!    +----abort-------+--------------------------------------------------------+
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::config::{ResponseType, SessionConfig};
use crate::error::XhrError;
use crate::event::{Event, Listener};
use crate::host::{Responder, Timer, TimerHandle, Transport, TransportTask};
use crate::http::{
    data_type_hint, normalize_headers, render_headers, HttpMethod, Payload, TransportRequest,
    TransportResponse,
};
use crate::notifier::{Handler, NotifierTarget, ProgressEvent, SessionEvent};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReadyState {
    #[default]
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Whether a call that may silently do nothing actually did something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `open()` with a method other than GET, POST, PUT, DELETE.
    UnsupportedMethod,
    /// `open()` on an already opened session aborted it instead.
    Reopened,
    /// `send()` after the request was aborted.
    Aborted,
    /// `send()` after the transport already completed.
    Settled,
    /// `send()` while a transport call is outstanding.
    InFlight,
}

#[derive(Default)]
struct State {
    ready_state: ReadyState,
    status: u16,
    status_text: String,
    response: Option<Payload>,
    response_text: Option<String>,
    response_type: ResponseType,
    response_url: Option<String>,
    timeout_ms: u32,
    with_credentials: bool,

    method: HttpMethod,
    url: String,
    is_async: bool,
    user: Option<String>,
    password: Option<String>,
    request_headers: Vec<(String, String)>,
    response_headers: Vec<(String, String)>,

    generation: u64,
    aborted: bool,
    settled: bool,
    timed_out: bool,
    in_flight: bool,
    task: Option<Rc<dyn TransportTask>>,
    timer: Option<TimerHandle>,
}

impl State {
    /// Whether a transport result for `generation` may still be applied.
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.aborted && !self.timed_out
    }
}

struct Inner {
    id: Uuid,
    transport: Rc<dyn Transport>,
    timer: Rc<dyn Timer>,
    target: NotifierTarget<SessionEvent>,
    upload: NotifierTarget<ProgressEvent>,
    state: RefCell<State>,
}

impl Inner {
    fn notify(&self, event: SessionEvent) -> bool {
        self.target.notify(event)
    }

    fn expire(&self, generation: u64) {
        let task = {
            let mut state = self.state.borrow_mut();
            if state.generation != generation || state.aborted || state.settled {
                return;
            }
            state.timer = None;
            state.timed_out = true;
            state.task.clone()
        };
        tracing::debug!(session = %self.id, "request timed out");
        if let Some(task) = task {
            task.abort();
        }
        self.notify(SessionEvent::TIMEOUT);
    }

    fn on_success(&self, generation: u64, response: TransportResponse) {
        let is_error = {
            let mut state = self.state.borrow_mut();
            if !state.accepts(generation) {
                tracing::debug!(session = %self.id, "ignoring late transport success");
                return;
            }
            state.status = response.status_code;
            state.response_headers = normalize_headers(response.header);
            state.response_text = Some(
                response
                    .data
                    .as_ref()
                    .map(Payload::response_text)
                    .unwrap_or_default(),
            );
            state.response = response.data;
            state.response_url = Some(state.url.clone());
            state.status >= 400
        };
        tracing::debug!(session = %self.id, status = response.status_code, "transport success");
        if is_error {
            self.notify(SessionEvent::ERROR);
        }
    }

    fn on_failure(&self, generation: u64, response: TransportResponse) {
        {
            let mut state = self.state.borrow_mut();
            if !state.accepts(generation) {
                tracing::debug!(session = %self.id, "ignoring late transport failure");
                return;
            }
            state.status = response.status_code;
            state.response_headers = normalize_headers(response.header);
            state.response = response.data;
        }
        tracing::debug!(session = %self.id, status = response.status_code, "transport failure");
        self.notify(SessionEvent::ERROR);
    }

    fn on_complete(&self, generation: u64) {
        let (timer, terminated) = {
            let mut state = self.state.borrow_mut();
            if state.generation != generation {
                tracing::debug!(session = %self.id, "ignoring completion from a previous open()");
                return;
            }
            state.settled = true;
            state.in_flight = false;
            state.task = None;
            (state.timer.take(), state.aborted || state.timed_out)
        };
        if let Some(handle) = timer {
            self.timer.cancel(handle);
        }
        if terminated {
            return;
        }
        for next in [ReadyState::HeadersReceived, ReadyState::Loading, ReadyState::Done] {
            {
                let mut state = self.state.borrow_mut();
                // A listener may have aborted or reopened mid-sequence.
                if state.generation != generation || state.aborted {
                    return;
                }
                state.ready_state = next;
            }
            tracing::debug!(session = %self.id, ready_state = next.as_u8(), "readyState");
            self.notify(SessionEvent::ReadyStateChange);
        }
    }
}

/// Continuation handed to the transport inside a `Responder`.
pub(crate) struct Continuation {
    inner: Rc<Inner>,
    generation: u64,
}

impl Continuation {
    pub(crate) fn on_success(&self, response: TransportResponse) {
        self.inner.on_success(self.generation, response);
    }

    pub(crate) fn on_failure(&self, response: TransportResponse) {
        self.inner.on_failure(self.generation, response);
    }

    pub(crate) fn on_complete(&self) {
        self.inner.on_complete(self.generation);
    }
}

/// An emulated asynchronous HTTP request over a host transport.
#[derive(Clone)]
pub struct RequestSession {
    inner: Rc<Inner>,
}

/// Non-owning handle to a `RequestSession`, for listeners that refer back
/// to their own session.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<Inner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<RequestSession> {
        self.inner.upgrade().map(|inner| RequestSession { inner })
    }
}

impl RequestSession {
    pub fn new(transport: Rc<dyn Transport>, timer: Rc<dyn Timer>) -> Self {
        Self::with_config(transport, timer, &SessionConfig::default())
    }

    pub fn with_config(
        transport: Rc<dyn Transport>,
        timer: Rc<dyn Timer>,
        config: &SessionConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let state = State {
            timeout_ms: config.timeout_ms,
            response_type: config.response_type,
            with_credentials: config.with_credentials,
            ..State::default()
        };
        Self {
            inner: Rc::new(Inner {
                id,
                transport,
                timer,
                target: NotifierTarget::with_id(id),
                upload: NotifierTarget::new(),
                state: RefCell::new(state),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open an asynchronous request without credentials.
    pub fn open(&self, method: &str, url: &str) -> Outcome {
        self.open_with(method, url, true, None, None)
    }

    /// Arm the session for a new request.
    ///
    /// An unsupported method is ignored. Opening a session that is already
    /// at or past OPENED aborts it instead; call `open` again afterwards.
    pub fn open_with(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Outcome {
        let Ok(method) = method.parse::<HttpMethod>() else {
            tracing::debug!(session = %self.inner.id, method, "open() ignored: unsupported method");
            return Outcome::Skipped(SkipReason::UnsupportedMethod);
        };
        if self.ready_state() >= ReadyState::Opened {
            tracing::debug!(session = %self.inner.id, "open() on an open session aborts it");
            self.abort();
            return Outcome::Skipped(SkipReason::Reopened);
        }

        let stale_timer = {
            let mut state = self.inner.state.borrow_mut();
            state.generation += 1;
            state.method = method;
            state.url = url.to_string();
            state.is_async = is_async;
            state.user = user.map(str::to_string);
            state.password = password.map(str::to_string);
            state.request_headers.clear();
            state.response_headers.clear();
            state.response = None;
            state.response_text = None;
            state.response_url = None;
            state.aborted = false;
            state.settled = false;
            state.timed_out = false;
            state.in_flight = false;
            state.task = None;
            state.ready_state = ReadyState::Opened;
            state.timer.take()
        };
        if let Some(handle) = stale_timer {
            self.inner.timer.cancel(handle);
        }
        tracing::debug!(session = %self.inner.id, %method, url, "opened");
        self.inner.notify(SessionEvent::ReadyStateChange);
        Outcome::Applied
    }

    /// Hand the request to the transport.
    ///
    /// Fails with `InvalidState` unless the session is OPENED. Resending an
    /// aborted, settled or in-flight request is a no-op.
    pub fn send(&self, body: Option<Payload>) -> Result<Outcome, XhrError> {
        let (request, timeout_ms, generation) = {
            let mut state = self.inner.state.borrow_mut();
            if state.ready_state != ReadyState::Opened {
                return Err(XhrError::invalid_state(
                    "send",
                    "The object's state must be OPENED.",
                ));
            }
            let skip = if state.aborted {
                Some(SkipReason::Aborted)
            } else if state.settled {
                Some(SkipReason::Settled)
            } else if state.in_flight {
                Some(SkipReason::InFlight)
            } else {
                None
            };
            if let Some(reason) = skip {
                tracing::debug!(session = %self.inner.id, ?reason, "send() ignored");
                return Ok(Outcome::Skipped(reason));
            }
            state.in_flight = true;
            let request = TransportRequest {
                url: state.url.clone(),
                method: state.method,
                header: state.request_headers.clone(),
                data: body,
                data_type: data_type_hint(&state.request_headers),
            };
            (request, state.timeout_ms, state.generation)
        };

        if timeout_ms > 0 {
            let inner = Rc::clone(&self.inner);
            let handle = self.inner.timer.schedule(
                Duration::from_millis(u64::from(timeout_ms)),
                Box::new(move || inner.expire(generation)),
            );
            self.inner.state.borrow_mut().timer = Some(handle);
        }

        tracing::debug!(
            session = %self.inner.id,
            method = %request.method,
            url = %request.url,
            data_type = %request.data_type,
            timeout_ms,
            "sending"
        );
        let responder = Responder::new(Continuation {
            inner: Rc::clone(&self.inner),
            generation,
        });
        let task = self.inner.transport.request(request, responder);

        // The transport may already have completed synchronously.
        let mut state = self.inner.state.borrow_mut();
        if state.generation == generation && state.in_flight {
            state.task = Some(Rc::from(task));
        }
        Ok(Outcome::Applied)
    }

    /// Cancel the request and return to UNSENT.
    ///
    /// Dispatches `readystatechange`; the `abort` event is not dispatched.
    pub fn abort(&self) {
        let task = {
            let mut state = self.inner.state.borrow_mut();
            state.status = 0;
            state.ready_state = ReadyState::Unsent;
            state.aborted = true;
            state.task.clone()
        };
        tracing::debug!(session = %self.inner.id, "aborted");
        if let Some(task) = task {
            task.abort();
        }
        self.inner.notify(SessionEvent::ReadyStateChange);
    }

    // -----------------------------------------------------------------------
    // Headers
    // -----------------------------------------------------------------------

    /// Set a request header. A repeated name replaces the earlier value.
    pub fn set_request_header(&self, name: &str, value: impl ToString) -> Result<(), XhrError> {
        let mut state = self.inner.state.borrow_mut();
        if state.ready_state < ReadyState::Opened {
            return Err(XhrError::invalid_state(
                "setRequestHeader",
                "The object's state must be OPENED.",
            ));
        }
        let value = value.to_string();
        match state.request_headers.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => state.request_headers.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Set the `Content-Type` request header.
    pub fn override_mime_type(&self, mime: &str) -> Result<(), XhrError> {
        let mut state = self.inner.state.borrow_mut();
        if state.ready_state >= ReadyState::HeadersReceived {
            return Err(XhrError::invalid_state(
                "overrideMimeType",
                "Can not apply 'overrideMimeType' after send data.",
            ));
        }
        match state
            .request_headers
            .iter_mut()
            .find(|(n, _)| n == "Content-Type")
        {
            Some(slot) => slot.1 = mime.to_string(),
            None => state
                .request_headers
                .push(("Content-Type".to_string(), mime.to_string())),
        }
        Ok(())
    }

    pub fn request_headers(&self) -> Vec<(String, String)> {
        self.inner.state.borrow().request_headers.clone()
    }

    /// Case-insensitive response header lookup.
    pub fn get_response_header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.inner
            .state
            .borrow()
            .response_headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn get_all_response_headers(&self) -> String {
        render_headers(&self.inner.state.borrow().response_headers)
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.borrow().ready_state
    }

    pub fn status(&self) -> u16 {
        self.inner.state.borrow().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.borrow().status_text.clone()
    }

    pub fn response(&self) -> Option<Payload> {
        self.inner.state.borrow().response.clone()
    }

    pub fn response_text(&self) -> Option<String> {
        self.inner.state.borrow().response_text.clone()
    }

    pub fn response_type(&self) -> ResponseType {
        self.inner.state.borrow().response_type
    }

    pub fn set_response_type(&self, response_type: ResponseType) {
        self.inner.state.borrow_mut().response_type = response_type;
    }

    pub fn response_url(&self) -> Option<String> {
        self.inner.state.borrow().response_url.clone()
    }

    /// Always `None`: no document parsing is performed.
    pub fn response_xml(&self) -> Option<String> {
        None
    }

    /// Timeout in milliseconds; `0` means none.
    pub fn timeout(&self) -> u32 {
        self.inner.state.borrow().timeout_ms
    }

    /// Takes effect on the next `send()`.
    pub fn set_timeout(&self, timeout_ms: u32) {
        self.inner.state.borrow_mut().timeout_ms = timeout_ms;
    }

    pub fn with_credentials(&self) -> bool {
        self.inner.state.borrow().with_credentials
    }

    pub fn set_with_credentials(&self, with_credentials: bool) {
        self.inner.state.borrow_mut().with_credentials = with_credentials;
    }

    pub fn upload(&self) -> &NotifierTarget<ProgressEvent> {
        &self.inner.upload
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_event_listener(&self, event_type: &str, listener: Listener) {
        self.inner.target.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.inner.target.remove_event_listener(event_type, listener);
    }

    pub fn dispatch_event(&self, event: &mut Event) -> bool {
        self.inner.target.dispatch_event(event)
    }

    pub fn handler(&self, event: SessionEvent) -> Option<Handler> {
        self.inner.target.handler(event)
    }

    pub fn set_handler(&self, event: SessionEvent, handler: Option<Handler>) {
        self.inner.target.set_handler(event, handler);
    }

    pub fn set_onreadystatechange(&self, handler: impl Fn() + 'static) {
        self.inner.target.on(SessionEvent::ReadyStateChange, handler);
    }

    pub fn set_onabort(&self, handler: impl Fn() + 'static) {
        self.inner.target.on(SessionEvent::ABORT, handler);
    }

    pub fn set_onerror(&self, handler: impl Fn() + 'static) {
        self.inner.target.on(SessionEvent::ERROR, handler);
    }

    pub fn set_ontimeout(&self, handler: impl Fn() + 'static) {
        self.inner.target.on(SessionEvent::TIMEOUT, handler);
    }
}

impl fmt::Debug for RequestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("RequestSession")
            .field("id", &self.inner.id)
            .field("ready_state", &state.ready_state)
            .field("status", &state.status)
            .field("method", &state.method)
            .field("url", &state.url)
            .field("is_async", &state.is_async)
            .field("user", &state.user)
            .field("has_password", &state.password.is_some())
            .field("aborted", &state.aborted)
            .field("settled", &state.settled)
            .field("timed_out", &state.timed_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoopTask;
    use crate::sim::{SimTimer, SimTransport};
    use serde_json::json;
    use std::cell::Cell;

    struct Harness {
        session: RequestSession,
        transport: SimTransport,
        timer: SimTimer,
        log: Rc<RefCell<Vec<String>>>,
    }

    fn harness_with(transport: SimTransport) -> Harness {
        let timer = SimTimer::new();
        let session = RequestSession::new(Rc::new(transport.clone()), Rc::new(timer.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["readystatechange", "error", "timeout", "abort", "load"] {
            let log = Rc::clone(&log);
            let weak = session.downgrade();
            session.add_event_listener(
                name,
                Listener::new(move |event| {
                    let state = weak.upgrade().map_or(9, |s| s.ready_state().as_u8());
                    log.borrow_mut().push(format!("{}:{state}", event.event_type()));
                }),
            );
        }
        Harness {
            session,
            transport,
            timer,
            log,
        }
    }

    fn harness() -> Harness {
        harness_with(SimTransport::new())
    }

    fn ok_json() -> TransportResponse {
        TransportResponse {
            status_code: 200,
            header: vec![("Content-Type".to_string(), "application/json".to_string())],
            data: Some(Payload::Json(json!({"a": 1}))),
        }
    }

    impl Harness {
        fn events(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    #[test]
    fn successful_get_walks_every_ready_state() {
        let h = harness();
        assert_eq!(h.session.open("GET", "https://api.test/a"), Outcome::Applied);
        assert_eq!(h.session.send(None), Ok(Outcome::Applied));
        assert_eq!(h.session.ready_state(), ReadyState::Opened);

        assert!(h.transport.succeed(ok_json()));

        assert_eq!(h.session.ready_state(), ReadyState::Done);
        assert_eq!(h.session.status(), 200);
        assert_eq!(h.session.response(), Some(Payload::Json(json!({"a": 1}))));
        assert_eq!(h.session.response_text().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(h.session.response_url().as_deref(), Some("https://api.test/a"));
        assert_eq!(
            h.events(),
            vec![
                "readystatechange:1",
                "readystatechange:2",
                "readystatechange:3",
                "readystatechange:4"
            ]
        );
    }

    #[test]
    fn request_descriptor_carries_headers_and_data_type() {
        let h = harness();
        h.session.open("PUT", "https://api.test/items/1");
        h.session.set_request_header("Content-Type", "text/plain").unwrap();
        h.session.set_request_header("X-Retry", 3).unwrap();
        h.session.set_request_header("X-Retry", 4).unwrap();
        h.session.send(Some(Payload::from("body"))).unwrap();

        let request = h.transport.last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.url, "https://api.test/items/1");
        assert_eq!(request.data_type, "plain");
        assert_eq!(request.data, Some(Payload::from("body")));
        assert_eq!(
            request.header,
            vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-Retry".to_string(), "4".to_string())
            ]
        );
    }

    #[test]
    fn data_type_defaults_to_json() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        assert_eq!(h.transport.last_request().unwrap().data_type, "json");
    }

    #[test]
    fn unsupported_method_is_ignored() {
        let h = harness();
        assert_eq!(
            h.session.open("PATCH", "https://api.test/"),
            Outcome::Skipped(SkipReason::UnsupportedMethod)
        );
        assert_eq!(h.session.ready_state(), ReadyState::Unsent);
        assert!(h.events().is_empty());
    }

    #[test]
    fn reopening_aborts_and_requires_another_open() {
        let h = harness();
        h.session.open("GET", "https://api.test/1");
        assert_eq!(
            h.session.open("GET", "https://api.test/2"),
            Outcome::Skipped(SkipReason::Reopened)
        );
        assert_eq!(h.session.ready_state(), ReadyState::Unsent);

        assert_eq!(h.session.open("GET", "https://api.test/2"), Outcome::Applied);
        h.session.send(None).unwrap();
        assert_eq!(h.transport.last_request().unwrap().url, "https://api.test/2");
        assert_eq!(
            h.events(),
            vec!["readystatechange:1", "readystatechange:0", "readystatechange:1"]
        );
    }

    #[test]
    fn open_records_credentials_without_leaking_the_password() {
        let h = harness();
        h.session
            .open_with("POST", "https://api.test/", false, Some("ada"), Some("secret"));
        let debug = format!("{:?}", h.session);
        assert!(debug.contains("method: Post"), "{debug}");
        assert!(debug.contains("is_async: false"), "{debug}");
        assert!(debug.contains(r#"user: Some("ada")"#), "{debug}");
        assert!(debug.contains("has_password: true"), "{debug}");
        assert!(!debug.contains("secret"), "{debug}");
    }

    #[test]
    fn header_before_open_is_invalid_state() {
        let h = harness();
        let err = h.session.set_request_header("X", "1").unwrap_err();
        assert!(err.is_invalid_state());
        assert!(h.session.request_headers().is_empty());
    }

    #[test]
    fn send_before_open_is_invalid_state() {
        let h = harness();
        let err = h.session.send(None).unwrap_err();
        assert!(matches!(err, XhrError::InvalidState { operation: "send", .. }));
        assert_eq!(h.transport.request_count(), 0);
    }

    #[test]
    fn override_mime_type_sets_content_type_until_headers_arrive() {
        let h = harness();
        h.session.open("POST", "https://api.test/");
        h.session.set_request_header("Content-Type", "text/html").unwrap();
        h.session.override_mime_type("application/xml").unwrap();
        assert_eq!(
            h.session.request_headers(),
            vec![("Content-Type".to_string(), "application/xml".to_string())]
        );

        h.session.send(None).unwrap();
        assert_eq!(h.transport.last_request().unwrap().data_type, "xml");
        h.transport.succeed(ok_json());
        let err = h.session.override_mime_type("text/plain").unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn second_send_is_a_no_op() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        assert_eq!(h.session.send(None), Ok(Outcome::Applied));
        assert_eq!(h.session.send(None), Ok(Outcome::Skipped(SkipReason::InFlight)));
        assert_eq!(h.transport.request_count(), 1);
        assert_eq!(h.transport.pending(), 1);
    }

    #[test]
    fn send_after_settle_cannot_resend() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        let completion = h.transport.take_responder().unwrap().success(ok_json());
        // Resolved but not completed: still in flight.
        assert_eq!(h.session.send(None), Ok(Outcome::Skipped(SkipReason::InFlight)));
        completion.complete();
        // DONE now, so the state guard fires first.
        assert!(h.session.send(None).unwrap_err().is_invalid_state());
        assert_eq!(h.transport.request_count(), 1);
    }

    #[test]
    fn onreadystatechange_sees_every_transition() {
        let h = harness();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (log, weak) = (Rc::clone(&seen), h.session.downgrade());
        h.session.set_onreadystatechange(move || {
            if let Some(s) = weak.upgrade() {
                log.borrow_mut().push(s.ready_state().as_u8());
            }
        });
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        h.transport.succeed(ok_json());
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn http_error_status_dispatches_error_and_still_completes() {
        let h = harness();
        let errors = Rc::new(Cell::new(0));
        let e = Rc::clone(&errors);
        h.session.set_onerror(move || e.set(e.get() + 1));
        h.session.open("GET", "https://api.test/missing");
        h.session.send(None).unwrap();
        h.transport.succeed(TransportResponse {
            status_code: 404,
            header: Vec::new(),
            data: Some(Payload::from("not found")),
        });

        assert_eq!(errors.get(), 1);
        assert_eq!(h.session.status(), 404);
        assert_eq!(h.session.response_text().as_deref(), Some("not found"));
        assert_eq!(h.session.ready_state(), ReadyState::Done);
        assert_eq!(h.events()[1], "error:1");
    }

    #[test]
    fn transport_failure_keeps_payload_but_not_text() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        h.transport.fail(TransportResponse {
            status_code: 0,
            header: vec![("X-Reason".to_string(), "dns".to_string())],
            data: None,
        });

        assert_eq!(h.session.status(), 0);
        assert_eq!(h.session.response(), None);
        assert_eq!(h.session.response_text(), None);
        assert_eq!(h.session.get_response_header("x-reason").as_deref(), Some("dns"));
        assert_eq!(h.session.ready_state(), ReadyState::Done);
        assert_eq!(
            h.events(),
            vec![
                "readystatechange:1",
                "error:1",
                "readystatechange:2",
                "readystatechange:3",
                "readystatechange:4"
            ]
        );
    }

    #[test]
    fn success_without_payload_has_empty_text() {
        let h = harness();
        h.session.open("DELETE", "https://api.test/1");
        h.session.send(None).unwrap();
        h.transport.succeed(TransportResponse {
            status_code: 204,
            ..TransportResponse::default()
        });
        assert_eq!(h.session.response(), None);
        assert_eq!(h.session.response_text().as_deref(), Some(""));
    }

    #[test]
    fn response_headers_are_case_insensitive_and_render_in_order() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        h.transport.succeed(TransportResponse {
            status_code: 200,
            header: vec![
                ("X-Foo".to_string(), "bar".to_string()),
                ("Content-Type".to_string(), "text/plain".to_string()),
            ],
            data: Some(Payload::from("ok")),
        });

        assert_eq!(h.session.get_response_header("x-foo").as_deref(), Some("bar"));
        assert_eq!(h.session.get_response_header("X-FOO").as_deref(), Some("bar"));
        assert_eq!(h.session.get_response_header("missing"), None);

        let rendered = h.session.get_all_response_headers();
        assert_eq!(rendered, "x-foo: bar\ncontent-type: text/plain");
        let parsed: Vec<(String, String)> = rendered
            .split('\n')
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            parsed,
            vec![
                ("x-foo".to_string(), "bar".to_string()),
                ("content-type".to_string(), "text/plain".to_string())
            ]
        );
    }

    #[test]
    fn timeout_freezes_ready_state_and_ignores_late_result() {
        let h = harness();
        let timeouts = Rc::new(Cell::new(0));
        let t = Rc::clone(&timeouts);
        h.session.set_ontimeout(move || t.set(t.get() + 1));
        h.session.open("POST", "https://api.test/slow");
        h.session.set_timeout(50);
        h.session.send(None).unwrap();

        h.timer.advance(Duration::from_millis(49));
        assert_eq!(timeouts.get(), 0);
        h.timer.advance(Duration::from_millis(1));
        assert_eq!(timeouts.get(), 1);
        assert_eq!(h.transport.abort_count(), 1);

        h.transport.succeed(ok_json());
        assert_eq!(h.session.ready_state(), ReadyState::Opened);
        assert_eq!(h.session.status(), 0);
        assert_eq!(h.session.response(), None);
        assert_eq!(h.events(), vec!["readystatechange:1", "timeout:1"]);

        h.timer.advance(Duration::from_secs(10));
        assert_eq!(timeouts.get(), 1);
    }

    #[test]
    fn completion_cancels_the_timer() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.set_timeout(100);
        h.session.send(None).unwrap();
        assert_eq!(h.timer.pending(), 1);
        h.transport.succeed(ok_json());
        assert_eq!(h.timer.pending(), 0);
        h.timer.advance(Duration::from_secs(1));
        assert!(!h.events().iter().any(|e| e.starts_with("timeout")));
    }

    #[test]
    fn timeout_with_host_that_resolves_aborted_calls() {
        let h = harness_with(SimTransport::resolving_on_abort());
        h.session.open("GET", "https://api.test/");
        h.session.set_timeout(10);
        h.session.send(None).unwrap();
        h.timer.advance(Duration::from_millis(10));

        assert_eq!(h.transport.pending(), 0);
        assert_eq!(h.session.ready_state(), ReadyState::Opened);
        assert_eq!(h.events(), vec!["readystatechange:1", "timeout:1"]);
        // Settled by the abort-driven completion: no resend.
        assert_eq!(h.session.send(None), Ok(Outcome::Skipped(SkipReason::Settled)));
    }

    #[test]
    fn abort_before_transport_result_wins() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        h.session.abort();
        assert_eq!(h.transport.abort_count(), 1);

        h.transport.succeed(ok_json());
        assert_eq!(h.session.ready_state(), ReadyState::Unsent);
        assert_eq!(h.session.status(), 0);
        assert_eq!(h.session.response(), None);
        assert_eq!(h.events(), vec!["readystatechange:1", "readystatechange:0"]);
    }

    #[test]
    fn abort_between_success_and_complete_wins() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        let completion = h.transport.take_responder().unwrap().success(ok_json());
        assert_eq!(h.session.status(), 200);

        h.session.abort();
        completion.complete();

        assert_eq!(h.session.ready_state(), ReadyState::Unsent);
        assert_eq!(h.session.status(), 0);
        assert_eq!(h.events(), vec!["readystatechange:1", "readystatechange:0"]);
    }

    #[test]
    fn timeout_between_success_and_complete_freezes_state() {
        let h = harness();
        h.session.set_timeout(10);
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        let completion = h.transport.take_responder().unwrap().success(ok_json());

        h.timer.advance(Duration::from_millis(10));
        completion.complete();

        assert_eq!(h.session.ready_state(), ReadyState::Opened);
        assert_eq!(h.session.status(), 200);
        assert_eq!(h.session.response_text().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(h.events(), vec!["readystatechange:1", "timeout:1"]);
        assert_eq!(h.timer.pending(), 0);
    }

    #[test]
    fn abort_without_host_cancellation_still_discards_the_answer() {
        #[derive(Default)]
        struct Unabortable {
            parked: RefCell<Option<Responder>>,
        }
        impl Transport for Unabortable {
            fn request(&self, _: TransportRequest, responder: Responder) -> Box<dyn TransportTask> {
                *self.parked.borrow_mut() = Some(responder);
                Box::new(NoopTask)
            }
        }

        let transport = Rc::new(Unabortable::default());
        let session = RequestSession::new(transport.clone(), Rc::new(SimTimer::new()));
        session.open("GET", "https://api.test/");
        session.send(None).unwrap();
        session.abort();

        let parked = transport.parked.borrow_mut().take();
        parked.unwrap().success(ok_json()).complete();
        assert_eq!(session.ready_state(), ReadyState::Unsent);
        assert_eq!(session.status(), 0);
        assert_eq!(session.response(), None);
    }

    #[test]
    fn abort_never_dispatches_abort_event() {
        let h = harness();
        let aborts = Rc::new(Cell::new(0));
        let a = Rc::clone(&aborts);
        h.session.set_onabort(move || a.set(a.get() + 1));
        h.session.open("GET", "https://api.test/");
        h.session.abort();
        assert_eq!(aborts.get(), 0);
        assert!(!h.events().iter().any(|e| e.starts_with("abort")));
    }

    #[test]
    fn abort_then_timer_fire_is_silent() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.set_timeout(5);
        h.session.send(None).unwrap();
        h.session.abort();
        h.timer.advance(Duration::from_millis(5));
        assert!(!h.events().iter().any(|e| e.starts_with("timeout")));
    }

    #[test]
    fn stale_completion_cannot_touch_a_reopened_session() {
        let h = harness();
        h.session.open("GET", "https://api.test/old");
        h.session.send(None).unwrap();
        let old = h.transport.take_responder().unwrap();

        h.session.abort();
        h.session.open("GET", "https://api.test/new");
        old.success(ok_json()).complete();

        assert_eq!(h.session.ready_state(), ReadyState::Opened);
        assert_eq!(h.session.status(), 0);
        assert_eq!(h.session.send(None), Ok(Outcome::Applied));
        let urls: Vec<String> = h.transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, ["https://api.test/old", "https://api.test/new"]);
    }

    #[test]
    fn abort_inside_readystatechange_stops_the_sequence() {
        let h = harness();
        let weak = h.session.downgrade();
        h.session.add_event_listener(
            "readystatechange",
            Listener::new(move |_| {
                if let Some(session) = weak.upgrade() {
                    if session.ready_state() == ReadyState::HeadersReceived {
                        session.abort();
                    }
                }
            }),
        );
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        h.transport.succeed(ok_json());

        assert_eq!(h.session.ready_state(), ReadyState::Unsent);
        assert_eq!(
            h.events(),
            vec![
                "readystatechange:1",
                "readystatechange:2",
                "readystatechange:0"
            ]
        );
        assert_eq!(h.session.open("GET", "https://api.test/again"), Outcome::Applied);
    }

    fn must_not_abort() {
        panic!("abort after completion");
    }

    #[test]
    fn synchronous_transport_completes_inside_send() {
        struct Immediate;
        impl Transport for Immediate {
            fn request(&self, _: TransportRequest, responder: Responder) -> Box<dyn TransportTask> {
                responder
                    .success(TransportResponse {
                        status_code: 201,
                        header: Vec::new(),
                        data: Some(Payload::from("made")),
                    })
                    .complete();
                Box::new(must_not_abort as fn())
            }
        }

        let session = RequestSession::new(Rc::new(Immediate), Rc::new(SimTimer::new()));
        session.open("POST", "https://api.test/");
        assert_eq!(session.send(None), Ok(Outcome::Applied));
        assert_eq!(session.ready_state(), ReadyState::Done);
        assert_eq!(session.status(), 201);
        // The finished task was not retained.
        session.abort();
    }

    #[test]
    fn dropped_responder_fails_the_call() {
        let h = harness();
        h.session.open("GET", "https://api.test/");
        h.session.send(None).unwrap();
        drop(h.transport.take_responder());
        assert_eq!(h.session.ready_state(), ReadyState::Done);
        assert_eq!(h.events()[1], "error:1");
    }

    #[test]
    fn config_seeds_properties() {
        let config = SessionConfig {
            timeout_ms: 30,
            response_type: ResponseType::Text,
            with_credentials: true,
        };
        let session = RequestSession::with_config(
            Rc::new(SimTransport::new()),
            Rc::new(SimTimer::new()),
            &config,
        );
        assert_eq!(session.timeout(), 30);
        assert_eq!(session.response_type(), ResponseType::Text);
        assert!(session.with_credentials());
        assert_eq!(session.status_text(), "");
        assert_eq!(session.response_xml(), None);

        session.set_response_type(ResponseType::ArrayBuffer);
        session.set_with_credentials(false);
        assert_eq!(session.response_type(), ResponseType::ArrayBuffer);
        assert!(!session.with_credentials());
    }

    #[test]
    fn upload_target_is_independent() {
        let h = harness();
        let hits = Rc::new(Cell::new(0));
        let c = Rc::clone(&hits);
        h.session.upload().on(ProgressEvent::Progress, move || c.set(c.get() + 1));
        h.session.upload().notify(ProgressEvent::Progress);
        assert_eq!(hits.get(), 1);
        assert_ne!(h.session.upload().bus().id(), h.session.id());
    }

    #[test]
    fn event_target_is_the_session_id() {
        let h = harness();
        let seen = Rc::new(Cell::new(None));
        let s = Rc::clone(&seen);
        h.session
            .add_event_listener("custom", Listener::new(move |event| s.set(event.target())));
        assert!(h.session.dispatch_event(&mut Event::new("custom")));
        assert_eq!(seen.get(), Some(h.session.id()));
    }
}
