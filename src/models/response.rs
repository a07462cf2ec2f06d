use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Success envelope shared by every business endpoint.
///
/// Errors use the same shape (see [`crate::error::AppError`]) with a
/// non-zero `error_code` and a `message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error_code: u16,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error_code: 0,
        }
    }
}

impl Envelope<()> {
    /// Success without a payload, rendered as `"data": null`
    pub fn empty() -> Self {
        Self {
            data: None,
            error_code: 0,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_envelope_serializes_null_data() {
        let json = serde_json::to_value(Envelope::empty()).unwrap();
        assert_eq!(json, serde_json::json!({ "data": null, "error_code": 0 }));
    }

    #[test]
    fn test_ok_envelope() {
        let json = serde_json::to_value(Envelope::ok(vec!["a"])).unwrap();
        assert_eq!(json["data"], serde_json::json!(["a"]));
        assert_eq!(json["error_code"], 0);
    }
}
