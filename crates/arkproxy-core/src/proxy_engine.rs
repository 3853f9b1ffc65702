use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use arkproxy_common::GlobalConfig;
use arkproxy_protocol::ChatCompletionRequest;

use crate::relay::{ResponseHandle, line_stream};
use crate::upstream_client::{
    Headers, UpstreamBody, UpstreamByteStream, UpstreamClient, UpstreamFailure,
    UpstreamHttpRequest, UpstreamTransportErrorKind,
};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// One validated inbound call, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ProxyCall {
    pub trace_id: String,
    /// Caller's bearer token, forwarded to the upstream untouched.
    pub credential: String,
    /// Upstream model id, resolved once in [`ProxyEngine::prepare`].
    pub resolved_model: String,
    pub request: ChatCompletionRequest,
}

pub struct ProxyEngine {
    config: Arc<GlobalConfig>,
    client: Arc<dyn UpstreamClient>,
}

impl ProxyEngine {
    pub fn new(config: Arc<GlobalConfig>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn resolve_model(&self, name: &str) -> &str {
        self.config.models.resolve(name)
    }

    pub fn upstream_url(&self) -> String {
        format!("{}{}", self.config.upstream_base_url, CHAT_COMPLETIONS_PATH)
    }

    pub fn prepare(
        &self,
        trace_id: String,
        credential: String,
        request: ChatCompletionRequest,
    ) -> ProxyCall {
        let resolved_model = self.resolve_model(request.model_name()).to_string();
        ProxyCall {
            trace_id,
            credential,
            resolved_model,
            request,
        }
    }

    /// Forwards one call upstream. Never errors at the type level: every
    /// failure before the first chunk is reported as [`ResponseHandle::Failed`].
    pub async fn handle(&self, call: ProxyCall) -> ResponseHandle {
        let ProxyCall {
            trace_id,
            credential,
            resolved_model,
            request,
        } = call;
        let is_stream = request.stream;

        let payload = request.into_upstream_payload(&resolved_model);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => Bytes::from(body),
            Err(err) => {
                return ResponseHandle::Failed(UpstreamFailure::Transport {
                    kind: UpstreamTransportErrorKind::Other,
                    message: format!("encode upstream payload: {err}"),
                });
            }
        };
        debug!(trace_id = %trace_id, body = %String::from_utf8_lossy(&body), "upstream payload");

        let req = UpstreamHttpRequest {
            url: self.upstream_url(),
            headers: upstream_headers(&credential),
            body,
            is_stream,
        };

        let started_at = Instant::now();
        let handle = match self.client.send(req).await {
            Ok(resp) if !resp.is_success() => {
                let body = match resp.body {
                    UpstreamBody::Bytes(bytes) => truncate_body(&bytes),
                    UpstreamBody::Stream(_) => String::new(),
                };
                ResponseHandle::Failed(UpstreamFailure::Status {
                    status: resp.status,
                    body,
                })
            }
            Ok(resp) => match resp.body {
                UpstreamBody::Stream(upstream) if is_stream => {
                    ResponseHandle::Chunks(line_stream(upstream, trace_id.clone()))
                }
                UpstreamBody::Bytes(bytes) if is_stream => {
                    let upstream: UpstreamByteStream = Box::pin(futures_util::stream::once(
                        async move { Ok::<_, UpstreamFailure>(bytes) },
                    ));
                    ResponseHandle::Chunks(line_stream(upstream, trace_id.clone()))
                }
                UpstreamBody::Bytes(bytes) => buffered_json(&bytes),
                UpstreamBody::Stream(_) => ResponseHandle::Failed(UpstreamFailure::Decode {
                    message: "unexpected streamed body for non-streaming request".to_string(),
                }),
            },
            Err(failure) => ResponseHandle::Failed(failure),
        };

        match handle.failure() {
            Some(failure) => warn!(
                event = "upstream_failed",
                trace_id = %trace_id,
                elapsed_ms = started_at.elapsed().as_millis(),
                error = %failure
            ),
            None => info!(
                event = "upstream_responded",
                trace_id = %trace_id,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream
            ),
        }
        handle
    }
}

fn upstream_headers(credential: &str) -> Headers {
    vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("authorization".to_string(), format!("Bearer {credential}")),
    ]
}

/// Parses the full upstream body and re-serializes it as the single chunk.
fn buffered_json(bytes: &[u8]) -> ResponseHandle {
    let value: JsonValue = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            return ResponseHandle::Failed(UpstreamFailure::Decode {
                message: err.to_string(),
            });
        }
    };
    match serde_json::to_vec(&value) {
        Ok(body) => ResponseHandle::single(Bytes::from(body)),
        Err(err) => ResponseHandle::Failed(UpstreamFailure::Decode {
            message: err.to_string(),
        }),
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.chars().count() <= MAX_ERROR_BODY_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push_str("...");
    out
}
