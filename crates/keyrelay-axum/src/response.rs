//! The admin API response envelope.

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Wrap a payload in the success envelope: `{"success": true, "data": ...}`.
pub fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// A bare success message, for mutations with nothing to return.
pub fn message(text: &str) -> Json<Value> {
    success(json!({ "message": text }))
}
