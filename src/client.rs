//! Client stream consumer.
//!
//! Reads the response body incrementally, reassembles frames across
//! arbitrary chunk boundaries, and drives a per-request [`Session`] state
//! machine. The session always reaches a deterministic end state, `Ready`
//! with a validated plan or `Errored` with a human-readable reason, even
//! when the transport dies before the terminal event.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::json;

use crate::errors::{ConsumeError, PlanError};
use crate::plan::PlanDocument;
use crate::stream::{FRAME_DELIMITER, StreamEvent, decode_frame};

// ── Frame decoding ────────────────────────────────────────────────────

/// Splits a byte stream into decoded events, carrying partial frames over
/// between reads. Tolerant of any chunk boundary the transport picks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every event whose frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..pos + FRAME_DELIMITER.len()).collect();
            let frame = String::from_utf8_lossy(&frame[..pos]);
            if frame.trim().is_empty() {
                continue;
            }
            match decode_frame(&frame) {
                Some(event) => events.push(event),
                None => tracing::warn!(frame = %frame, "skipping undecodable frame"),
            }
        }
        events
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

// ── Session state machine ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Loading,
    Ready,
    Errored { reason: String },
}

/// Per-request client state. Owned by one caller; transitions happen
/// strictly sequentially as events are decoded.
#[derive(Debug)]
pub struct Session {
    pub status: SessionStatus,
    pub log_messages: Vec<String>,
    pub plan: Option<PlanDocument>,
    /// Step number selected for display; set to the first module on `Ready`.
    pub active_step: i64,
    parse_error: Option<String>,
    saw_terminal: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            log_messages: Vec::new(),
            plan: None,
            active_step: 1,
            parse_error: None,
            saw_terminal: false,
        }
    }

    /// Mark submission; the caller is now waiting on the stream.
    pub fn start(&mut self) {
        self.status = SessionStatus::Loading;
    }

    pub fn saw_terminal(&self) -> bool {
        self.saw_terminal
    }

    /// Apply one decoded event.
    ///
    /// A malformed result is recorded but does not abort the stream: the
    /// consumer keeps reading to reach the terminal marker, and the failure
    /// surfaces as the `Errored` reason if no valid plan ever lands.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Log { text } => self.log_messages.push(text.clone()),
            StreamEvent::Result { text } => match parse_plan(text) {
                Ok(plan) => {
                    self.plan = Some(plan);
                    self.parse_error = None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "result payload rejected");
                    self.parse_error = Some(e.to_string());
                }
            },
            StreamEvent::Done => {
                self.saw_terminal = true;
                match &self.plan {
                    Some(plan) => {
                        // Validation guarantees at least one module.
                        if let Some(first) = plan.modules.first() {
                            self.active_step = first.step_number;
                        }
                        self.status = SessionStatus::Ready;
                    }
                    None => {
                        let reason = self
                            .parse_error
                            .clone()
                            .unwrap_or_else(|| "no plan produced".to_string());
                        self.status = SessionStatus::Errored { reason };
                    }
                }
            }
            StreamEvent::Failure { exit_code, message } => {
                self.saw_terminal = true;
                self.status = SessionStatus::Errored {
                    reason: format!("worker failed (exit code {exit_code}): {message}"),
                };
            }
        }
    }

    /// Handle end-of-data. Without a terminal event the stream was cut
    /// short, which counts as an implicit failure.
    pub fn finish(&mut self) {
        if !self.saw_terminal {
            self.status = SessionStatus::Errored {
                reason: "stream truncated before a terminal event".to_string(),
            };
        }
    }
}

/// Decode and validate a result payload.
fn parse_plan(text: &str) -> Result<PlanDocument, ConsumeError> {
    let plan: PlanDocument =
        serde_json::from_str(text).map_err(|e| ConsumeError::MalformedPayload {
            reason: format!("invalid plan JSON: {e}"),
        })?;
    plan.validate().map_err(|e: PlanError| ConsumeError::MalformedPayload {
        reason: e.to_string(),
    })?;
    Ok(plan)
}

// ── Consume loop ──────────────────────────────────────────────────────

/// Drive a session from a byte stream until end-of-data.
///
/// `on_event` fires for every decoded event before it is applied, so a
/// caller can render progress live. Truncation leaves the session `Errored`
/// and is also reported as [`ConsumeError::TruncatedStream`].
pub async fn consume<S, E, F>(
    mut stream: S,
    session: &mut Session,
    mut on_event: F,
) -> Result<(), ConsumeError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    F: FnMut(&StreamEvent),
{
    session.start();
    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let reason = format!("transport error: {e}");
                session.status = SessionStatus::Errored {
                    reason: reason.clone(),
                };
                return Err(ConsumeError::Transport(reason));
            }
        };
        for event in decoder.push(&chunk) {
            on_event(&event);
            session.apply(&event);
        }
    }
    session.finish();
    if session.saw_terminal() {
        Ok(())
    } else {
        Err(ConsumeError::TruncatedStream)
    }
}

/// Submit a topic and consume the resulting stream.
///
/// The session is returned for every in-band outcome, truncation included;
/// its status already carries the reason. Only request-level failures
/// (connection refused, non-200 status) are hard errors.
pub async fn fetch<F>(
    base_url: &str,
    topic: &str,
    on_event: F,
) -> Result<Session, ConsumeError>
where
    F: FnMut(&StreamEvent),
{
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/stream", base_url.trim_end_matches('/')))
        .json(&json!({ "topic": topic }))
        .send()
        .await
        .map_err(|e| ConsumeError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ConsumeError::Http {
            status: status.as_u16(),
            message,
        });
    }

    let mut session = Session::new();
    let body = Box::pin(response.bytes_stream());
    match consume(body, &mut session, on_event).await {
        Ok(()) | Err(ConsumeError::TruncatedStream) => Ok(session),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::encode_frame;

    const PLAN_JSON: &str = r#"{"id":"plan-1","topic":"rust","modules":[{"id":"m1","stepNumber":1,"title":"Intro","isComplete":false,"article":{"title":"The Book","link":"https://doc.rust-lang.org/book/","reason":"canonical"},"videos":{}}]}"#;

    fn encode_all(events: &[StreamEvent]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for event in events {
            bytes.extend_from_slice(&encode_frame(event).unwrap());
        }
        bytes
    }

    fn log(text: &str) -> StreamEvent {
        StreamEvent::Log {
            text: text.to_string(),
        }
    }

    fn drive(events: &[StreamEvent], eof: bool) -> Session {
        let mut session = Session::new();
        session.start();
        for event in events {
            session.apply(event);
        }
        if eof {
            session.finish();
        }
        session
    }

    #[test]
    fn happy_path_reaches_ready() {
        let session = drive(
            &[
                log("a"),
                log("b"),
                StreamEvent::Result {
                    text: PLAN_JSON.to_string(),
                },
                StreamEvent::Done,
            ],
            true,
        );
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(session.log_messages, vec!["a", "b"]);
        assert_eq!(session.plan.as_ref().unwrap().topic, "rust");
        assert_eq!(session.active_step, 1);
    }

    #[test]
    fn failure_preserves_exit_code() {
        let session = drive(
            &[StreamEvent::Failure {
                exit_code: 1,
                message: "worker exited with code 1".to_string(),
            }],
            true,
        );
        match &session.status {
            SessionStatus::Errored { reason } => assert!(reason.contains("exit code 1")),
            other => panic!("Expected Errored, got {other:?}"),
        }
    }

    #[test]
    fn done_without_result_is_an_error() {
        let session = drive(&[log("thinking"), StreamEvent::Done], true);
        assert_eq!(
            session.status,
            SessionStatus::Errored {
                reason: "no plan produced".to_string()
            }
        );
    }

    #[test]
    fn malformed_result_then_done_never_reaches_ready() {
        let session = drive(
            &[
                StreamEvent::Result {
                    text: r#"{"id":"p","topic":"t","modules":[]}"#.to_string(),
                },
                StreamEvent::Done,
            ],
            true,
        );
        match &session.status {
            SessionStatus::Errored { reason } => {
                assert!(reason.contains("no modules"), "reason: {reason}");
            }
            other => panic!("Expected Errored, got {other:?}"),
        }
        assert!(session.plan.is_none());
    }

    #[test]
    fn eof_without_terminal_is_truncation() {
        let session = drive(&[log("started")], true);
        match &session.status {
            SessionStatus::Errored { reason } => assert!(reason.contains("truncated")),
            other => panic!("Expected Errored, got {other:?}"),
        }
    }

    #[test]
    fn later_result_replaces_earlier_candidate() {
        // A misbehaving worker printed a JSON-shaped log before the real plan.
        let session = drive(
            &[
                StreamEvent::Result {
                    text: r#"{"looks":"like json"}"#.to_string(),
                },
                StreamEvent::Result {
                    text: PLAN_JSON.to_string(),
                },
                StreamEvent::Done,
            ],
            true,
        );
        assert_eq!(session.status, SessionStatus::Ready);
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let bytes = encode_all(&[log("x"), StreamEvent::Done]);
        let mut decoder = FrameDecoder::new();
        let mut events = decoder.push(&bytes[..5]);
        events.extend(decoder.push(&bytes[5..]));
        assert_eq!(events, vec![log("x"), StreamEvent::Done]);
    }

    #[test]
    fn chunk_boundary_independence() {
        let bytes = encode_all(&[
            log("x"),
            StreamEvent::Result {
                text: PLAN_JSON.to_string(),
            },
            StreamEvent::Done,
        ]);
        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut events = decoder.push(&bytes[..split]);
            events.extend(decoder.push(&bytes[split..]));

            let mut session = Session::new();
            session.start();
            for event in &events {
                session.apply(event);
            }
            session.finish();

            assert_eq!(session.status, SessionStatus::Ready, "split at {split}");
            assert_eq!(session.log_messages, vec!["x"], "split at {split}");
        }
    }

    #[test]
    fn decoder_skips_junk_frames() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = b"not a frame\n\n".to_vec();
        bytes.extend_from_slice(&encode_all(&[StreamEvent::Done]));
        assert_eq!(decoder.push(&bytes), vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn consume_reports_truncation() {
        let bytes = encode_all(&[log("partial")]);
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(bytes))]);
        let mut session = Session::new();
        let err = consume(stream, &mut session, |_| {}).await.unwrap_err();
        assert!(matches!(err, ConsumeError::TruncatedStream));
        assert!(matches!(session.status, SessionStatus::Errored { .. }));
    }

    #[tokio::test]
    async fn consume_fires_event_hook_in_order() {
        let bytes = encode_all(&[log("one"), log("two"), StreamEvent::Done]);
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(bytes))]);
        let mut session = Session::new();
        let mut seen = Vec::new();
        consume(stream, &mut session, |event| seen.push(event.clone()))
            .await
            .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last(), Some(&StreamEvent::Done));
        // No result event arrived, so terminal success still errors out.
        assert_eq!(
            session.status,
            SessionStatus::Errored {
                reason: "no plan produced".to_string()
            }
        );
    }
}
