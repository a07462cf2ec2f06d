pub mod accounts;
pub mod interactions;
pub mod products;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Liveness check, outside the response envelope
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
