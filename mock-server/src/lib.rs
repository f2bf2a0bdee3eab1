use std::time::Duration;

use axum::{
    extract::Path,
    http::{HeaderMap, Method, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

/// Longest delay `/delay/{ms}` will honour.
pub const MAX_DELAY_MS: u64 = 10_000;

/// Body returned by `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub content_type: Option<String>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/json", get(json_payload))
        .route("/text", get(text_payload))
        .route("/status/{code}", get(with_status))
        .route("/delay/{ms}", get(delayed))
        .route("/echo", get(echo).post(echo).put(echo).delete(echo))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn json_payload() -> ([(&'static str, String); 1], Json<Value>) {
    let id = Uuid::new_v4();
    tracing::debug!(%id, "json");
    ([("X-Request-Id", id.to_string())], Json(json!({"a": 1})))
}

async fn text_payload() -> ([(&'static str, &'static str); 1], &'static str) {
    ([("Content-Type", "text/plain; charset=utf-8")], "hello")
}

async fn with_status(Path(code): Path<u16>) -> (StatusCode, Json<Value>) {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, Json(json!({ "status": code }))),
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid status {code}") })),
        ),
    }
}

async fn delayed(Path(ms): Path<u64>) -> Json<Value> {
    let ms = ms.min(MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "delayed_ms": ms }))
}

async fn echo(method: Method, headers: HeaderMap, body: String) -> Json<Echo> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(Echo {
        method: method.to_string(),
        content_type,
        body,
    })
}
