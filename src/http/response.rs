//! Gateway-generated responses.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::http::request::X_REQUEST_ID;

/// JSON error body: `{"error": ..., "request_id": ...}` with the id echoed as a header.
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let mut response = (
        status,
        Json(json!({
            "error": message,
            "request_id": request_id,
        })),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}
