use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use arkproxy_common::ErrorPolicy;
use arkproxy_core::{ProxyEngine, ResponseHandle};
use arkproxy_protocol::{ChatCompletionRequest, error_body};

use crate::error::{GatewayError, json_response};

const REQUEST_ID_HEADER: &str = "x-arkproxy-request-id";
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<ProxyEngine>,
}

#[derive(Clone)]
struct RequestTraceId(String);

#[derive(Clone)]
struct CallerCredential(String);

pub fn proxy_router(engine: Arc<ProxyEngine>) -> Router {
    let state = ProxyState { engine };

    Router::new()
        .route(
            "/v1/chat/completions",
            post(chat_completions).layer(middleware::from_fn(require_bearer)),
        )
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Tags every request with a trace id and logs the outcome.
async fn access_log(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut()
        .insert(RequestTraceId(trace_id.clone()));

    let started_at = Instant::now();
    let mut resp = next.run(req).await;
    let status = resp.status().as_u16();
    let elapsed_ms = started_at.elapsed().as_millis();
    let is_stream = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|value| value.as_bytes().starts_with(b"text/event-stream"));

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    if status >= 500 {
        error!(
            event = "downstream_responded",
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status,
            elapsed_ms,
            is_stream
        );
    } else {
        info!(
            event = "downstream_responded",
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status,
            elapsed_ms,
            is_stream
        );
    }
    resp
}

/// Runs ahead of the handler's extractors, so the body is never read for an
/// unauthenticated caller.
async fn require_bearer(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let Some(credential) = extract_bearer(req.headers()) else {
        let trace_id = req
            .extensions()
            .get::<RequestTraceId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        warn!(event = "downstream_rejected", trace_id = %trace_id, reason = "authorization");
        return GatewayError::InvalidAuthorization.into_response();
    };
    req.extensions_mut().insert(CallerCredential(credential));
    next.run(req).await
}

async fn chat_completions(
    State(state): State<ProxyState>,
    Extension(RequestTraceId(trace_id)): Extension<RequestTraceId>,
    Extension(CallerCredential(credential)): Extension<CallerCredential>,
    body: Bytes,
) -> Response {
    debug!(trace_id = %trace_id, body = %String::from_utf8_lossy(&body), "downstream body");
    let request = match ChatCompletionRequest::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(event = "downstream_rejected", trace_id = %trace_id, reason = %err);
            return GatewayError::from(err).into_response();
        }
    };

    let is_stream = request.stream;
    let call = state.engine.prepare(trace_id, credential, request);
    info!(
        event = "downstream_received",
        trace_id = %call.trace_id,
        model = %call.request.model_name(),
        resolved_model = %call.resolved_model,
        is_stream,
        messages = call.request.message_count(),
        extra = ?call.request.extra_keys()
    );

    let handle = state.engine.handle(call).await;
    to_axum_response(handle, is_stream, state.engine.config().error_policy)
}

/// `Authorization: Bearer <token>`; the scheme match is exact.
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

/// The only place the error policy is consulted.
fn to_axum_response(handle: ResponseHandle, is_stream: bool, policy: ErrorPolicy) -> Response {
    if let (ErrorPolicy::Strict, ResponseHandle::Failed(failure)) = (policy, &handle) {
        return json_response(StatusCode::BAD_GATEWAY, error_body(&failure.to_string()));
    }

    let content_type = if is_stream {
        "text/event-stream"
    } else {
        "application/json"
    };
    let stream = handle.into_chunks().map(Ok::<_, Infallible>);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if is_stream {
        // Hint common reverse proxies to avoid buffering SSE responses.
        builder = builder
            .header(header::CACHE_CONTROL, "no-cache")
            .header("x-accel-buffering", "no");
    }

    builder.body(Body::from_stream(stream)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}
