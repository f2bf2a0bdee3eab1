//! Asynchronous HTTP request emulation over a host-supplied transport.
//!
//! # Overview
//! Emulates the familiar `XMLHttpRequest` contract (readyState progression,
//! `on<event>` handlers plus listener lists, header accumulation, abort and
//! timeout) on top of a host primitive that only knows "fire one request, get
//! one terminal callback". The core performs no I/O: the host implements
//! `Transport` and `Timer` and resumes the session through a `Responder`.
//!
//! # Design
//! - `EventBus` is a named-listener registry with synchronous, ordered
//!   dispatch.
//! - `NotifierTarget` adds one replaceable handler slot per event of a closed
//!   vocabulary, driven by a trampoline listener on the bus.
//! - `RequestSession` owns the state machine and the single outstanding
//!   transport call, and resolves the race between transport completion,
//!   timer expiry and `abort()`.
//! - `sim` provides deterministic host primitives for tests and examples.
//!
//! ```
//! use std::rc::Rc;
//! use xhr_core::sim::{SimTimer, SimTransport};
//! use xhr_core::{Payload, ReadyState, RequestSession, TransportResponse};
//!
//! let transport = SimTransport::new();
//! let session = RequestSession::new(Rc::new(transport.clone()), Rc::new(SimTimer::new()));
//! session.open("GET", "https://example.test/items");
//! session.send(None).unwrap();
//!
//! transport.succeed(TransportResponse {
//!     status_code: 200,
//!     header: vec![("Content-Type".into(), "text/plain".into())],
//!     data: Some(Payload::from("hello")),
//! });
//! assert_eq!(session.ready_state(), ReadyState::Done);
//! assert_eq!(session.response_text().as_deref(), Some("hello"));
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod http;
pub mod notifier;
pub mod session;
pub mod sim;

pub use config::{ResponseType, SessionConfig};
pub use error::XhrError;
pub use event::{Event, EventBus, Listener};
pub use host::{Completion, NoopTask, Responder, Timer, TimerHandle, Transport, TransportTask};
pub use http::{HttpMethod, Payload, TransportRequest, TransportResponse};
pub use notifier::{Handler, NotifierTarget, ProgressEvent, SessionEvent, Vocabulary};
pub use session::{Outcome, ReadyState, RequestSession, SkipReason, WeakSession};
