//! C-ABI wrapper around `xhr-core`.
//!
//! # Overview
//! A C host drives `RequestSession`s through `extern "C"` functions. The
//! host supplies its transport and timer as an `FfiHost` function table;
//! the library calls `request`/`schedule` and the host answers later with
//! `xhr_call_*` and `xhr_timer_fire`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Sessions are single-threaded: every call for one session, including
//!   host answers, must come from the thread that created it.
//! - Returned strings are owned by the caller and released with
//!   `xhr_free_string`.

mod bridge;
pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use xhr_core::{
    Listener, Outcome, Payload, ReadyState, RequestSession, SessionConfig, TransportResponse,
    XhrError,
};

use bridge::HostBridge;
use types::*;

/// Opaque session handle. C callers receive a pointer to this and pass it
/// back into every `xhr_session_*` function.
pub struct FfiSession {
    session: RequestSession,
    bridge: Rc<HostBridge>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn guarded(name: &str, f: impl FnOnce() -> Result<FfiStatus, FfiStatus>) -> FfiStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(status)) | Ok(Err(status)) => status,
        Err(_) => {
            tracing::error!(function = name, "panic caught at the FFI boundary");
            FfiStatus::Panic
        }
    }
}

fn session_ref<'a>(session: *const FfiSession) -> Result<&'a FfiSession, FfiStatus> {
    if session.is_null() {
        return Err(FfiStatus::NullArg);
    }
    Ok(unsafe { &*session })
}

fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str, FfiStatus> {
    if ptr.is_null() {
        return Err(FfiStatus::NullArg);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiStatus::InvalidArg)
}

fn outcome_status(outcome: Outcome) -> FfiStatus {
    match outcome {
        Outcome::Applied => FfiStatus::Ok,
        Outcome::Skipped(_) => FfiStatus::Skipped,
    }
}

fn error_status(err: XhrError) -> FfiStatus {
    if err.is_invalid_state() {
        FfiStatus::InvalidState
    } else {
        FfiStatus::InvalidArg
    }
}

fn into_raw_string(s: String) -> *mut c_char {
    c_string(s).into_raw()
}

/// Copy the host's response, treating null as an empty response.
fn read_response(response: *const FfiTransportResponse) -> TransportResponse {
    if response.is_null() {
        return TransportResponse::default();
    }
    unsafe { (*response).to_core() }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Create a session bound to `host`.
///
/// `config_json` is a `SessionConfig` as JSON, or null for defaults.
/// Returns null if `host` is null, the config does not parse, or an internal
/// panic occurs. Free the result with `xhr_session_free`.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_new(
    host: *const FfiHost,
    config_json: *const c_char,
) -> *mut FfiSession {
    catch_unwind(AssertUnwindSafe(|| {
        if host.is_null() {
            return std::ptr::null_mut();
        }
        let host = unsafe { *host };
        let config = if config_json.is_null() {
            SessionConfig::default()
        } else {
            let parsed = unsafe { CStr::from_ptr(config_json) }
                .to_str()
                .map_err(|e| XhrError::Config(e.to_string()))
                .and_then(SessionConfig::from_json);
            match parsed {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(%err, "rejecting session config");
                    return std::ptr::null_mut();
                }
            }
        };
        let bridge = HostBridge::new(host);
        let session = RequestSession::with_config(bridge.clone(), bridge.clone(), &config);
        tracing::debug!(session = %session.id(), "ffi session created");
        Box::into_raw(Box::new(FfiSession { session, bridge }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a session. An outstanding request is aborted first. Safe to call
/// with null.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_free(session: *mut FfiSession) {
    if session.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let owned = unsafe { Box::from_raw(session) };
        let unsent = owned.session.ready_state() == ReadyState::Unsent;
        if owned.bridge.has_pending_calls() && !unsent {
            owned.session.abort();
        }
        // Parked continuations keep the session alive; release them.
        owned.bridge.clear();
        drop(owned);
    }));
}

// ---------------------------------------------------------------------------
// Session calls
// ---------------------------------------------------------------------------

/// `open(method, url)`. An unsupported method or reopening an open session
/// returns `Skipped`.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_open(
    session: *const FfiSession,
    method: *const c_char,
    url: *const c_char,
) -> FfiStatus {
    guarded("xhr_session_open", || {
        let s = session_ref(session)?;
        let method = str_arg(method)?;
        let url = str_arg(url)?;
        Ok(outcome_status(s.session.open(method, url)))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_set_request_header(
    session: *const FfiSession,
    name: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    guarded("xhr_session_set_request_header", || {
        let s = session_ref(session)?;
        let name = str_arg(name)?;
        let value = str_arg(value)?;
        s.session
            .set_request_header(name, value)
            .map_err(error_status)?;
        Ok(FfiStatus::Ok)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_override_mime_type(
    session: *const FfiSession,
    mime: *const c_char,
) -> FfiStatus {
    guarded("xhr_session_override_mime_type", || {
        let s = session_ref(session)?;
        let mime = str_arg(mime)?;
        s.session.override_mime_type(mime).map_err(error_status)?;
        Ok(FfiStatus::Ok)
    })
}

/// Timeout in milliseconds for the next `send`; 0 disables it.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_set_timeout(session: *const FfiSession, timeout_ms: u32) -> FfiStatus {
    guarded("xhr_session_set_timeout", || {
        let s = session_ref(session)?;
        s.session.set_timeout(timeout_ms);
        Ok(FfiStatus::Ok)
    })
}

/// `send(body)` with a text body, or no body when `body` is null.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_send(session: *const FfiSession, body: *const c_char) -> FfiStatus {
    guarded("xhr_session_send", || {
        let s = session_ref(session)?;
        let body = if body.is_null() {
            None
        } else {
            Some(Payload::Text(str_arg(body)?.to_string()))
        };
        let outcome = s.session.send(body).map_err(error_status)?;
        Ok(outcome_status(outcome))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_abort(session: *const FfiSession) -> FfiStatus {
    guarded("xhr_session_abort", || {
        let s = session_ref(session)?;
        s.session.abort();
        Ok(FfiStatus::Ok)
    })
}

/// Current readyState (0..=4). Returns 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_ready_state(session: *const FfiSession) -> u8 {
    catch_unwind(AssertUnwindSafe(|| {
        session_ref(session).map_or(0, |s| s.session.ready_state().as_u8())
    }))
    .unwrap_or(0)
}

/// Current HTTP status. Returns 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_status(session: *const FfiSession) -> u16 {
    catch_unwind(AssertUnwindSafe(|| {
        session_ref(session).map_or(0, |s| s.session.status())
    }))
    .unwrap_or(0)
}

/// `responseText`, or null when unset. Free with `xhr_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_response_text(session: *const FfiSession) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        session_ref(session)
            .ok()
            .and_then(|s| s.session.response_text())
            .map_or(std::ptr::null_mut(), into_raw_string)
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Case-insensitive response header lookup; null when absent.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_get_response_header(
    session: *const FfiSession,
    name: *const c_char,
) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        let (Ok(s), Ok(name)) = (session_ref(session), str_arg(name)) else {
            return std::ptr::null_mut();
        };
        s.session
            .get_response_header(name)
            .map_or(std::ptr::null_mut(), into_raw_string)
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// All response headers as `name: value` lines. Null only for a null
/// session.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_get_all_response_headers(session: *const FfiSession) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| match session_ref(session) {
        Ok(s) => into_raw_string(s.session.get_all_response_headers()),
        Err(_) => std::ptr::null_mut(),
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Session id as a hyphenated UUID string. Free with `xhr_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_id(session: *const FfiSession) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| match session_ref(session) {
        Ok(s) => into_raw_string(s.session.id().to_string()),
        Err(_) => std::ptr::null_mut(),
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Register `callback` for `event_type` (`readystatechange`, `timeout`,
/// `error`, ...). It receives `user`, the event type and the readyState at
/// dispatch time. `user` must stay valid for the session's lifetime.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_session_add_listener(
    session: *const FfiSession,
    event_type: *const c_char,
    callback: FfiEventCallback,
    user: *mut c_void,
) -> FfiStatus {
    guarded("xhr_session_add_listener", || {
        let s = session_ref(session)?;
        let event_type = str_arg(event_type)?;
        let callback = callback.ok_or(FfiStatus::NullArg)?;
        let name = c_string(event_type);
        let weak = s.session.downgrade();
        s.session.add_event_listener(
            event_type,
            Listener::new(move |_| {
                let ready_state = weak.upgrade().map_or(0, |s| s.ready_state().as_u8());
                unsafe { callback(user, name.as_ptr(), ready_state) };
            }),
        );
        Ok(FfiStatus::Ok)
    })
}

// ---------------------------------------------------------------------------
// Host resumption
// ---------------------------------------------------------------------------

/// Report a response for `call_id`. HTTP error statuses are still a
/// success here. A null `response` is an empty one.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_call_succeed(
    session: *const FfiSession,
    call_id: u64,
    response: *const FfiTransportResponse,
) -> FfiStatus {
    guarded("xhr_call_succeed", || {
        let s = session_ref(session)?;
        Ok(s.bridge.succeed(call_id, read_response(response)))
    })
}

/// Report that `call_id` failed without a usable response.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_call_fail(
    session: *const FfiSession,
    call_id: u64,
    response: *const FfiTransportResponse,
) -> FfiStatus {
    guarded("xhr_call_fail", || {
        let s = session_ref(session)?;
        Ok(s.bridge.fail(call_id, read_response(response)))
    })
}

/// Run the terminal hook for `call_id`. Must follow succeed or fail; a call
/// completed without either is treated as failed.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_call_complete(session: *const FfiSession, call_id: u64) -> FfiStatus {
    guarded("xhr_call_complete", || {
        let s = session_ref(session)?;
        Ok(s.bridge.complete(call_id))
    })
}

/// Fire the timer the library scheduled as `timer_id`.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_timer_fire(session: *const FfiSession, timer_id: u64) -> FfiStatus {
    guarded("xhr_timer_fire", || {
        let s = session_ref(session)?;
        Ok(s.bridge.fire_timer(timer_id))
    })
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn xhr_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
