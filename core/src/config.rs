//! Session configuration.
//!
//! Hosts usually carry these settings around as JSON (the C ABI takes a
//! JSON string), so `SessionConfig` deserializes with every field optional.

use serde::{Deserialize, Serialize};

use crate::error::XhrError;

/// How the caller intends to read `response`. Stored and reported only;
/// the transport's payload shape decides what `response` actually holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    ArrayBuffer,
    Blob,
    Document,
    #[default]
    Json,
    Text,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Blob => "blob",
            ResponseType::Document => "document",
            ResponseType::Json => "json",
            ResponseType::Text => "text",
        }
    }
}

/// Initial values for a session's caller-settable properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Request timeout in milliseconds; `0` disables the timer.
    pub timeout_ms: u32,
    pub response_type: ResponseType,
    pub with_credentials: bool,
}

impl SessionConfig {
    pub fn from_json(raw: &str) -> Result<Self, XhrError> {
        serde_json::from_str(raw).map_err(|e| XhrError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.response_type, ResponseType::Json);
        assert_eq!(config.timeout_ms, 0);
    }

    #[test]
    fn fields_are_read_by_name() {
        let config = SessionConfig::from_json(
            r#"{"timeout_ms": 250, "response_type": "arraybuffer", "with_credentials": true}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.response_type, ResponseType::ArrayBuffer);
        assert!(config.with_credentials);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = SessionConfig::from_json(r#"{"timeout_ms": "soon"}"#).unwrap_err();
        assert!(matches!(err, XhrError::Config(_)));
    }
}
