//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible representations: C
//! strings instead of `String`, pointer plus length instead of `Vec`, and
//! enums with explicit discriminants. Data flowing out to the host
//! (`FfiTransportRequest`) is borrowed for the duration of one callback;
//! data flowing in (`FfiTransportResponse`) is read and copied, never freed.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use xhr_core::{HttpMethod, Payload, TransportRequest, TransportResponse};

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Result of every status-returning `xhr_*` function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStatus {
    Ok = 0,
    /// The call was a tolerated no-op (second send, reopen, bad method).
    Skipped = 1,
    /// `InvalidStateError` in the core.
    InvalidState = 2,
    NullArg = 3,
    /// A string argument was not valid UTF-8.
    InvalidArg = 4,
    /// No pending transport call or timer has that id.
    UnknownCall = 5,
    Panic = 6,
}

// ---------------------------------------------------------------------------
// Host callbacks
// ---------------------------------------------------------------------------

/// Function table the C host fills in. `ctx` is passed back unchanged as
/// the first argument of every callback.
///
/// - `request`: start a transport call. Answer it later (or before
///   returning) with `xhr_call_succeed`/`xhr_call_fail` followed by
///   `xhr_call_complete`, passing the same `call_id`.
/// - `abort`: best-effort cancellation of `call_id`.
/// - `schedule`: call `xhr_timer_fire(session, timer_id)` after `delay_ms`.
/// - `cancel`: forget `timer_id`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiHost {
    pub ctx: *mut c_void,
    pub request: Option<unsafe extern "C" fn(ctx: *mut c_void, request: *const FfiTransportRequest)>,
    pub abort: Option<unsafe extern "C" fn(ctx: *mut c_void, call_id: u64)>,
    pub schedule: Option<unsafe extern "C" fn(ctx: *mut c_void, timer_id: u64, delay_ms: u64)>,
    pub cancel: Option<unsafe extern "C" fn(ctx: *mut c_void, timer_id: u64)>,
}

/// Listener callback registered with `xhr_session_add_listener`.
pub type FfiEventCallback =
    Option<unsafe extern "C" fn(user: *mut c_void, event_type: *const c_char, ready_state: u8)>;

// ---------------------------------------------------------------------------
// Shared plain data
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
        }
    }
}

/// A single header as a pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub name: *const c_char,
    pub value: *const c_char,
}

/// How the bytes of a body are to be interpreted.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiPayloadKind {
    None = 0,
    Text = 1,
    Json = 2,
    Bytes = 3,
}

// ---------------------------------------------------------------------------
// Outgoing request
// ---------------------------------------------------------------------------

/// A transport request handed to `FfiHost::request`.
///
/// Every pointer is valid only until the callback returns; the host copies
/// what it keeps.
#[repr(C)]
pub struct FfiTransportRequest {
    pub call_id: u64,
    pub method: FfiHttpMethod,
    pub url: *const c_char,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body_kind: FfiPayloadKind,
    pub body: *const u8,
    pub body_len: usize,
    pub data_type: *const c_char,
}

/// Owned backing storage for an `FfiTransportRequest`.
pub(crate) struct OwnedRequest {
    method: FfiHttpMethod,
    url: CString,
    header_strings: Vec<(CString, CString)>,
    headers: Vec<FfiHeader>,
    body_kind: FfiPayloadKind,
    body: Vec<u8>,
    data_type: CString,
}

impl OwnedRequest {
    pub(crate) fn from_core(req: TransportRequest) -> Self {
        let header_strings: Vec<(CString, CString)> = req
            .header
            .into_iter()
            .map(|(name, value)| (c_string(name), c_string(value)))
            .collect();
        let headers = header_strings
            .iter()
            .map(|(name, value)| FfiHeader {
                name: name.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();
        let (body_kind, body) = match req.data {
            None => (FfiPayloadKind::None, Vec::new()),
            Some(Payload::Text(text)) => (FfiPayloadKind::Text, text.into_bytes()),
            Some(Payload::Json(value)) => (FfiPayloadKind::Json, value.to_string().into_bytes()),
            Some(Payload::Bytes(bytes)) => (FfiPayloadKind::Bytes, bytes),
        };
        Self {
            method: req.method.into(),
            url: c_string(req.url),
            header_strings,
            headers,
            body_kind,
            body,
            data_type: c_string(req.data_type),
        }
    }

    /// Borrowed view for the host callback. Must not outlive `self`.
    pub(crate) fn view(&self, call_id: u64) -> FfiTransportRequest {
        debug_assert_eq!(self.headers.len(), self.header_strings.len());
        FfiTransportRequest {
            call_id,
            method: self.method,
            url: self.url.as_ptr(),
            headers: if self.headers.is_empty() {
                std::ptr::null()
            } else {
                self.headers.as_ptr()
            },
            headers_len: self.headers.len() as u32,
            body_kind: self.body_kind,
            body: if self.body.is_empty() {
                std::ptr::null()
            } else {
                self.body.as_ptr()
            },
            body_len: self.body.len(),
            data_type: self.data_type.as_ptr(),
        }
    }
}

// ---------------------------------------------------------------------------
// Incoming response (caller-provided, not freed by us)
// ---------------------------------------------------------------------------

/// A transport response described by the host.
///
/// The host builds this on its stack and passes a pointer to
/// `xhr_call_succeed` or `xhr_call_fail`. A `Json` body that does not parse
/// is kept as text.
#[repr(C)]
pub struct FfiTransportResponse {
    pub status_code: u16,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body_kind: FfiPayloadKind,
    pub body: *const u8,
    pub body_len: usize,
}

impl FfiTransportResponse {
    /// Copy into a core response.
    ///
    /// # Safety
    /// `headers` must point to `headers_len` headers whose strings are
    /// NUL-terminated, and `body` to `body_len` readable bytes (either may be
    /// null when its length is zero).
    pub(crate) unsafe fn to_core(&self) -> TransportResponse {
        let header = if self.headers.is_null() || self.headers_len == 0 {
            Vec::new()
        } else {
            let headers =
                unsafe { std::slice::from_raw_parts(self.headers, self.headers_len as usize) };
            headers
                .iter()
                .filter(|h| !h.name.is_null())
                .map(|h| unsafe { (lossy(h.name), lossy(h.value)) })
                .collect()
        };
        let bytes = if self.body.is_null() || self.body_len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(self.body, self.body_len) }.to_vec()
        };
        let data = match self.body_kind {
            FfiPayloadKind::None => None,
            FfiPayloadKind::Bytes => Some(Payload::Bytes(bytes)),
            FfiPayloadKind::Text => Some(Payload::Text(String::from_utf8_lossy(&bytes).into_owned())),
            FfiPayloadKind::Json => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                match serde_json::from_str(&text) {
                    Ok(value) => Some(Payload::Json(value)),
                    Err(_) => Some(Payload::Text(text)),
                }
            }
        };
        TransportResponse {
            status_code: self.status_code,
            header,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// String helpers
// ---------------------------------------------------------------------------

/// Build a `CString`, dropping interior NUL bytes.
pub(crate) fn c_string(s: impl Into<Vec<u8>>) -> CString {
    CString::new(s).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string.
unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
