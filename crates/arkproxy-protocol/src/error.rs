use bytes::Bytes;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// `{"error": "<message>"}`, the single error shape used on every path.
pub fn error_body(message: &str) -> Bytes {
    serde_json::to_vec(&ErrorBody { error: message })
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(b"{\"error\":\"internal error\"}"))
}
