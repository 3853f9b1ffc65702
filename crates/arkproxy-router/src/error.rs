use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use arkproxy_protocol::{RequestError, error_body};

/// Rejections raised before any upstream call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    InvalidAuthorization,
    InvalidJson,
    MissingParameters,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidAuthorization => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidJson | GatewayError::MissingParameters => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            GatewayError::InvalidAuthorization => "Invalid Authorization header",
            GatewayError::InvalidJson => "Invalid JSON format",
            GatewayError::MissingParameters => "Missing required parameters",
        }
    }
}

impl From<RequestError> for GatewayError {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::InvalidJson => GatewayError::InvalidJson,
            RequestError::MissingParameters => GatewayError::MissingParameters,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        json_response(self.status(), error_body(self.message()))
    }
}

pub(crate) fn json_response(status: StatusCode, body: bytes::Bytes) -> Response {
    let mut resp = (status, body).into_response();
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}
