//! Data-plane forwarding and usage capture.
//!
//! Requests flow bearer auth → rate gate → quota gate → forwarder →
//! usage capture. The response body streams straight through to the
//! client while a capped tee buffer collects provider usage metadata;
//! the accounting row commits when the stream ends (or, for dropped
//! connections, from the stream's drop guard). Accounting is
//! best-effort and never fails the user response.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt, future::BoxFuture, stream::BoxStream};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{error, warn};

use tollgate_db::{UsageRecord, UsageRepository, UsageStatus, User};

use crate::error::ApiError;
use crate::middleware::{RateDecision, rate_limit};
use crate::oauth;
use crate::sidecar::SidecarError;
use crate::state::AppState;

/// Upper bound on body bytes retained for usage extraction.
const CAPTURE_CAP: usize = 512 * 1024;

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    model: Option<String>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct RequestBody {
    model: Option<String>,
}

/// Map a model name onto its upstream provider family.
pub fn extract_provider_from_model(model: &str) -> &'static str {
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        "openai"
    } else if model.starts_with("claude-") {
        "claude"
    } else if model.starts_with("gemini-") {
        "gemini"
    } else {
        "unknown"
    }
}

/// Forward a data-plane request to the sidecar.
///
/// `capture` enables usage accounting (the completion family); model
/// listing forwards without writing a log row.
pub async fn forward(
    state: &Arc<AppState>,
    user: User,
    path: &str,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    capture: bool,
) -> Result<Response, ApiError> {
    let (limit, remaining) = match state.rate_gate.check(user.id) {
        RateDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            return Err(ApiError::RateLimited {
                limit,
                retry_after_secs,
            });
        }
        RateDecision::Allowed { limit, remaining } => (limit, remaining),
    };

    if let Some(quota) = user.quota_tokens {
        if user.used_tokens >= quota {
            return Err(ApiError::QuotaExceeded);
        }
    }

    let fwd_headers = forward_headers(&headers, &state.internal_key);
    let management = Arc::clone(state.supervisor.management());

    let mut upstream = management
        .forward(path, method.clone(), fwd_headers.clone(), body.clone())
        .await
        .map_err(|e| ApiError::Provider(format!("Sidecar unreachable: {}", e)))?;

    // Upstream credential expiry: refresh the provider's accounts and
    // retry exactly once.
    if upstream.status == 401 && capture {
        let provider = serde_json::from_slice::<RequestBody>(&body)
            .ok()
            .and_then(|b| b.model)
            .map(|m| extract_provider_from_model(&m).to_string());

        if let Some(provider) = provider {
            if oauth::refresh_provider_accounts(state, &provider).await? {
                if let Err(e) = state.supervisor.reload().await {
                    warn!("Sidecar reload after token refresh failed: {}", e);
                }
                upstream = management
                    .forward(path, method, fwd_headers, body.clone())
                    .await
                    .map_err(|e| ApiError::Provider(format!("Sidecar unreachable: {}", e)))?;
            } else {
                return Err(ApiError::Provider(
                    "Upstream credentials expired".to_string(),
                ));
            }
        }
    }

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let sse = upstream
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false);

    let capture_state = capture.then(|| CaptureState {
        pool: state.db.pool().clone(),
        user_id: user.id,
        started: Instant::now(),
        upstream_ok: status.is_success(),
        sse,
        buf: Vec::new(),
    });

    let stream = CaptureStream::new(upstream.body, capture_state);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers.iter() {
        if name == header::TRANSFER_ENCODING || name == header::CONNECTION {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }

    let mut response = builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    rate_limit::apply_headers(&mut response, limit, remaining);
    Ok(response)
}

/// Build the header set forwarded to the sidecar. The client bearer is
/// terminated here; the sidecar trusts only the internal gateway key.
fn forward_headers(headers: &HeaderMap, internal_key: &str) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::ACCEPT] {
        if let Some(value) = headers.get(&name).cloned() {
            out.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", internal_key)) {
        out.insert(header::AUTHORIZATION, value);
    }
    out
}

/// Accumulates body bytes until the stream settles, then writes the
/// accounting row.
struct CaptureState {
    pool: SqlitePool,
    user_id: i64,
    started: Instant,
    upstream_ok: bool,
    sse: bool,
    buf: Vec<u8>,
}

impl CaptureState {
    fn ingest(&mut self, chunk: &[u8]) {
        let room = CAPTURE_CAP.saturating_sub(self.buf.len());
        if room > 0 {
            self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    fn finalize(self, stream_ok: bool) -> BoxFuture<'static, ()> {
        async move {
            let (model, tokens_input, tokens_output) = if self.sse {
                parse_sse_usage(&self.buf)
            } else {
                parse_json_usage(&self.buf)
            };

            let error = if !self.upstream_ok {
                Some("upstream returned an error status".to_string())
            } else if !stream_ok {
                Some("response stream interrupted".to_string())
            } else {
                None
            };

            let record = UsageRecord {
                user_id: self.user_id,
                provider: extract_provider_from_model(&model).to_string(),
                model,
                tokens_input,
                tokens_output,
                duration_ms: self.started.elapsed().as_millis() as i64,
                status: if error.is_none() {
                    UsageStatus::Success
                } else {
                    UsageStatus::Error
                },
                error,
            };

            if let Err(e) = UsageRepository::record(&self.pool, &record).await {
                // Best-effort: the user response already went out
                error!("Failed to record usage: {}", e);
            }
        }
        .boxed()
    }
}

/// Parse token counts from a buffered JSON completion response.
///
/// Responses without usage metadata record zeros; counts are never
/// estimated.
fn parse_json_usage(buf: &[u8]) -> (String, i64, i64) {
    match serde_json::from_slice::<CompletionBody>(buf) {
        Ok(body) => {
            let model = body.model.unwrap_or_else(|| "unknown".to_string());
            let usage = body.usage.unwrap_or(UsageInfo {
                prompt_tokens: None,
                completion_tokens: None,
            });
            (
                model,
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            )
        }
        Err(_) => ("unknown".to_string(), 0, 0),
    }
}

/// Accumulate token counts across server-sent-event chunks. The latest
/// non-null values win.
///
/// Two stream shapes carry usage: the OpenAI convention (a final chunk
/// with `usage.prompt_tokens`/`usage.completion_tokens`) and the
/// Anthropic convention (`message_start` nesting the opening counts
/// under `message.usage` as `input_tokens`, then `message_delta`
/// events updating `usage.output_tokens`).
fn parse_sse_usage(buf: &[u8]) -> (String, i64, i64) {
    let text = String::from_utf8_lossy(buf);
    let mut model = None;
    let mut tokens_input = None;
    let mut tokens_output = None;

    for line in text.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            continue;
        };

        if model.is_none() {
            model = event["model"]
                .as_str()
                .or_else(|| event["message"]["model"].as_str())
                .map(str::to_string);
        }

        for usage in [event.get("usage"), event["message"].get("usage")]
            .into_iter()
            .flatten()
            .filter(|u| !u.is_null())
        {
            if let Some(v) = usage["prompt_tokens"]
                .as_i64()
                .or_else(|| usage["input_tokens"].as_i64())
            {
                tokens_input = Some(v);
            }
            if let Some(v) = usage["completion_tokens"]
                .as_i64()
                .or_else(|| usage["output_tokens"].as_i64())
            {
                tokens_output = Some(v);
            }
        }
    }

    (
        model.unwrap_or_else(|| "unknown".to_string()),
        tokens_input.unwrap_or(0),
        tokens_output.unwrap_or(0),
    )
}

enum Phase {
    Streaming,
    Finalizing(BoxFuture<'static, ()>),
    Done,
}

/// Body stream that tees chunks through the capture buffer and commits
/// the accounting row before reporting end-of-stream.
struct CaptureStream {
    inner: BoxStream<'static, Result<Bytes, SidecarError>>,
    capture: Option<CaptureState>,
    phase: Phase,
}

impl CaptureStream {
    fn new(
        inner: BoxStream<'static, Result<Bytes, SidecarError>>,
        capture: Option<CaptureState>,
    ) -> Self {
        Self {
            inner,
            capture,
            phase: Phase::Streaming,
        }
    }
}

impl Stream for CaptureStream {
    type Item = Result<Bytes, SidecarError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.phase {
                Phase::Streaming => match this.inner.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        if let Some(capture) = &mut this.capture {
                            capture.ingest(&chunk);
                        }
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        // The drop guard accounts for the interruption
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => match this.capture.take() {
                        Some(capture) => this.phase = Phase::Finalizing(capture.finalize(true)),
                        None => this.phase = Phase::Done,
                    },
                    Poll::Pending => return Poll::Pending,
                },
                Phase::Finalizing(fut) => match fut.poll_unpin(cx) {
                    Poll::Ready(()) => {
                        this.phase = Phase::Done;
                        return Poll::Ready(None);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // Disconnected clients still get an accounting row
        if let Some(capture) = self.capture.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(capture.finalize(false));
            }
        }
    }
}
