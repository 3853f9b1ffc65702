use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use tracing::warn;

use arkproxy_protocol::{LineSplitter, error_body};

use crate::upstream_client::{UpstreamByteStream, UpstreamFailure};

/// Chunks bound for the caller, in upstream order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Result of one upstream call.
pub enum ResponseHandle {
    Chunks(ChunkStream),
    Failed(UpstreamFailure),
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseHandle::Chunks(_) => f.debug_tuple("Chunks").field(&"<opaque>").finish(),
            ResponseHandle::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

impl ResponseHandle {
    pub fn single(chunk: Bytes) -> Self {
        ResponseHandle::Chunks(Box::pin(stream::once(async move { chunk })))
    }

    pub fn failure(&self) -> Option<&UpstreamFailure> {
        match self {
            ResponseHandle::Chunks(_) => None,
            ResponseHandle::Failed(failure) => Some(failure),
        }
    }

    /// Always yields chunks: a failure becomes one `{"error": ...}` chunk.
    pub fn into_chunks(self) -> ChunkStream {
        match self {
            ResponseHandle::Chunks(chunks) => chunks,
            ResponseHandle::Failed(failure) => {
                let chunk = error_body(&failure.to_string());
                Box::pin(stream::once(async move { chunk }))
            }
        }
    }
}

struct LineState {
    upstream: Option<UpstreamByteStream>,
    splitter: LineSplitter,
    ready: VecDeque<Bytes>,
    trace_id: String,
}

/// Pull-based relay over an upstream body: each upstream line is yielded as
/// soon as its terminating newline arrives, and nothing beyond the current
/// partial line is buffered.
///
/// A transport error ends the stream; lines already yielded stay intact and
/// the partial line is discarded.
pub fn line_stream(upstream: UpstreamByteStream, trace_id: impl Into<String>) -> ChunkStream {
    let state = LineState {
        upstream: Some(upstream),
        splitter: LineSplitter::new(),
        ready: VecDeque::new(),
        trace_id: trace_id.into(),
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((line, state));
            }
            let upstream = state.upstream.as_mut()?;
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.splitter.push_bytes(&chunk));
                }
                Some(Err(err)) => {
                    warn!(
                        event = "upstream_stream_aborted",
                        trace_id = %state.trace_id,
                        dropped_bytes = state.splitter.pending(),
                        error = %err
                    );
                    state.upstream = None;
                }
                None => {
                    state.upstream = None;
                    state.ready.extend(state.splitter.finish());
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream_client::UpstreamTransportErrorKind;

    fn upstream_of(items: Vec<Result<&'static str, UpstreamFailure>>) -> UpstreamByteStream {
        Box::pin(stream::iter(
            items
                .into_iter()
                .map(|item| item.map(|text| Bytes::from_static(text.as_bytes()))),
        ))
    }

    async fn collect(chunks: ChunkStream) -> Vec<Bytes> {
        chunks.collect().await
    }

    #[tokio::test]
    async fn relays_lines_in_order() {
        let upstream = upstream_of(vec![
            Ok("data: 1\n\ndata: "),
            Ok("2\n\n"),
            Ok("data: [DONE]"),
        ]);
        let lines = collect(line_stream(upstream, "t")).await;
        assert_eq!(lines, vec!["data: 1\n", "data: 2\n", "data: [DONE]\n"]);
    }

    #[tokio::test]
    async fn transport_error_stops_without_partial_line() {
        let upstream = upstream_of(vec![
            Ok("data: 1\n\ndata: par"),
            Err(UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::Other,
                message: "reset".to_string(),
            }),
            Ok("tial\n"),
        ]);
        let lines = collect(line_stream(upstream, "t")).await;
        assert_eq!(lines, vec!["data: 1\n"]);
    }

    struct DropFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_relay_drops_upstream_body() {
        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let upstream: UpstreamByteStream = Box::pin(
            stream::iter(vec![Ok::<_, UpstreamFailure>(Bytes::from_static(b"data: 1\n"))])
                .chain(stream::pending())
                .map(move |item| {
                    let _keep = &flag;
                    item
                }),
        );

        let mut relay = line_stream(upstream, "t");
        assert_eq!(relay.next().await.unwrap(), "data: 1\n");
        assert!(!dropped.load(std::sync::atomic::Ordering::SeqCst));

        drop(relay);
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_becomes_single_error_chunk() {
        let handle = ResponseHandle::Failed(UpstreamFailure::Status {
            status: 500,
            body: "oops".to_string(),
        });
        assert!(handle.failure().is_some());
        let chunks = collect(handle.into_chunks()).await;
        assert_eq!(chunks.len(), 1);
        let value: serde_json::Value = serde_json::from_slice(&chunks[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"error": "upstream returned status 500: oops"})
        );
    }

    #[tokio::test]
    async fn single_chunk_handle_yields_once() {
        let chunks = collect(ResponseHandle::single(Bytes::from_static(b"{}")).into_chunks()).await;
        assert_eq!(chunks, vec!["{}"]);
    }
}
