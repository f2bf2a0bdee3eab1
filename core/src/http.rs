//! Transport descriptor types exchanged with the host.
//!
//! # Design
//! Requests and responses are plain data. The session builds a
//! `TransportRequest` and hands it to the host's `Transport`; the host
//! answers with a `TransportResponse`. All fields use owned types so values
//! can cross an FFI boundary without lifetime concerns.
//!
//! Headers are kept as ordered `(name, value)` pairs rather than a map so the
//! rendering of `getAllResponseHeaders()` follows insertion order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP method accepted by `open()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method string is not one of GET, POST, PUT, DELETE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedMethod(pub String);

impl fmt::Display for UnsupportedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported method: {}", self.0)
    }
}

impl std::error::Error for UnsupportedMethod {}

impl FromStr for HttpMethod {
    type Err = UnsupportedMethod;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

/// A request or response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Text view of a response payload.
    ///
    /// Text is returned as-is, structured JSON is serialized (so JSON `null`
    /// renders as `"null"`), and anything else yields an empty string.
    pub fn response_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Json(serde_json::Value::String(text)) => text.clone(),
            Payload::Json(
                value @ (serde_json::Value::Object(_)
                | serde_json::Value::Array(_)
                | serde_json::Value::Null),
            ) => value.to_string(),
            Payload::Json(_) | Payload::Bytes(_) => String::new(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// The descriptor handed to the host's `Transport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub url: String,
    pub method: HttpMethod,
    pub header: Vec<(String, String)>,
    pub data: Option<Payload>,
    #[serde(rename = "dataType")]
    pub data_type: String,
}

/// What the host reports back through `success` or `fail`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
    #[serde(default)]
    pub header: Vec<(String, String)>,
    #[serde(default)]
    pub data: Option<Payload>,
}

/// Fallback `dataType` when the request has no `Content-Type` with a `/`.
pub const DEFAULT_DATA_TYPE: &str = "json";

/// Derive the transport's `dataType` hint from the request headers.
///
/// Takes the second `/`-separated segment of the exact `Content-Type`
/// header, parameters included: `application/json; charset=utf-8` gives
/// `json; charset=utf-8`, `text/` gives an empty hint.
pub fn data_type_hint(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .find(|(name, _)| name == "Content-Type")
        .and_then(|(_, value)| value.split('/').nth(1))
        .unwrap_or(DEFAULT_DATA_TYPE)
        .to_string()
}

/// Lowercase every header name. A later duplicate overwrites the value but
/// keeps the position of the first occurrence.
pub fn normalize_headers(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut normalized: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        match normalized.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => normalized.push((name, value)),
        }
    }
    normalized
}

/// Render headers as `name: value` lines joined by `\n`.
pub fn render_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {value}", name.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join("\n")
}
