//! Stream transport endpoint.
//!
//! `POST /api/stream` owns one worker for the lifetime of one request and
//! relays its output as a framed event stream over a single long-lived
//! chunked response. Frames travel through a bounded channel, so the pump
//! never buffers unboundedly ahead of the caller, and each frame reaches the
//! transport as soon as it exists so the caller can render progress live.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::Config;
use crate::errors::FrameError;
use crate::stream::{LineFramer, StreamEvent, classify_line, encode_frame};
use crate::worker::{WorkerHandle, exit_code};

/// Frames buffered between the pump and the response body. `send` suspends
/// once this fills, which is the backpressure bound.
const CHANNEL_CAPACITY: usize = 32;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

/// A caller's submission. Discarded once the worker is spawned.
#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub topic: String,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/stream", post(stream_plan))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

// ── Streaming handler ─────────────────────────────────────────────────

async fn stream_plan(
    State(state): State<SharedState>,
    Json(request): Json<GenerationRequest>,
) -> Response {
    let topic = request.topic.trim().to_string();
    if topic.is_empty() {
        return (StatusCode::BAD_REQUEST, "Error: Topic is required").into_response();
    }

    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    let config = state.config.clone();
    tokio::spawn(async move {
        pump(config, topic, tx).await;
    });

    event_stream_response(rx)
}

/// Wrap the frame channel as a chunked `text/event-stream` response.
fn event_stream_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

// ── Worker pump ───────────────────────────────────────────────────────

/// Drive one worker from spawn to terminal frame.
///
/// Every exit path either emits exactly one terminal frame and closes the
/// channel, or detects that the caller is gone and kills the worker. Spawn
/// and runtime failures are reported in-band so the caller always reaches a
/// deterministic end state instead of an abrupt connection drop.
async fn pump(config: Config, topic: String, tx: mpsc::Sender<Bytes>) {
    let mut worker = match WorkerHandle::spawn(&config, &topic) {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, "worker spawn failed");
            send_event(
                &tx,
                &StreamEvent::Failure {
                    exit_code: -1,
                    message: format!("failed to start worker: {e}"),
                },
            )
            .await;
            return;
        }
    };

    let mut framer = LineFramer::new(config.max_line_len);
    loop {
        let chunk = match timeout(config.idle_timeout, worker.next_chunk()).await {
            Err(_) => {
                tracing::warn!(topic = %topic, "worker idle timeout, killing");
                worker.shutdown().await;
                send_event(
                    &tx,
                    &StreamEvent::Failure {
                        exit_code: -1,
                        message: format!(
                            "worker produced no output for {}s",
                            config.idle_timeout.as_secs()
                        ),
                    },
                )
                .await;
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed reading worker stdout");
                worker.shutdown().await;
                send_event(
                    &tx,
                    &StreamEvent::Failure {
                        exit_code: -1,
                        message: format!("failed reading worker output: {e}"),
                    },
                )
                .await;
                return;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(chunk))) => chunk,
        };

        let lines = match framer.push(&chunk) {
            Ok(lines) => lines,
            Err(FrameError::LineTooLong { limit }) => {
                tracing::warn!(topic = %topic, limit, "worker output line exceeded bound, killing");
                worker.shutdown().await;
                send_event(
                    &tx,
                    &StreamEvent::Failure {
                        exit_code: -1,
                        message: format!("worker output line exceeded {limit} bytes"),
                    },
                )
                .await;
                return;
            }
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            if !send_event(&tx, &classify_line(&line)).await {
                // Caller disconnected; stop the worker instead of leaking it.
                tracing::info!(topic = %topic, "caller disconnected, killing worker");
                worker.shutdown().await;
                return;
            }
        }
    }

    // Residual unterminated bytes still count as the worker's final line.
    if let Some(rest) = framer.finish()
        && !rest.trim().is_empty()
        && !send_event(&tx, &classify_line(&rest)).await
    {
        worker.shutdown().await;
        return;
    }

    let terminal = match worker.wait().await {
        Ok(status) if status.success() => StreamEvent::Done,
        Ok(status) => {
            let code = exit_code(&status);
            tracing::warn!(topic = %topic, code, "worker exited abnormally");
            StreamEvent::Failure {
                exit_code: code,
                message: format!("worker exited with code {code}"),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to reap worker");
            StreamEvent::Failure {
                exit_code: -1,
                message: format!("failed to reap worker: {e}"),
            }
        }
    };
    send_event(&tx, &terminal).await;
    // tx drops here, which closes the response exactly once.
}

/// Encode and forward one event. Returns false once the receiver is gone.
async fn send_event(tx: &mpsc::Sender<Bytes>, event: &StreamEvent) -> bool {
    match encode_frame(event) {
        Ok(frame) => tx.send(frame).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode frame, skipping event");
            true
        }
    }
}
