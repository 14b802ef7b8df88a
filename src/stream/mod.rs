//! Wire protocol between the server and the streaming client.
//!
//! Every event travels as one frame `data: <json>\n\n`, where `<json>` is the
//! tagged serialization of [`StreamEvent`]. The explicit `type` tag, not
//! frame content, decides how the client treats a frame, and
//! JSON string escaping guarantees that a log line containing the `\n\n`
//! delimiter (or text that merely looks like JSON) cannot break framing or be
//! misread as a result.
//!
//! [`LineFramer`] sits on the server side of the protocol: worker stdout
//! arrives as arbitrary byte chunks, and only complete `\n`-terminated
//! records may become events.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::FrameError;

/// Delimiter between frames on the wire.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";
/// Prefix carried by every frame.
pub const DATA_PREFIX: &str = "data: ";

/// One event in a generation stream.
///
/// Exactly one terminal event (`Done` or `Failure`) ends every stream; any
/// number of `Log` events precede it, and `Result`, if present, precedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A human-readable progress line from the worker.
    Log { text: String },
    /// The terminal structured artifact, carried untouched as raw text.
    /// The server classifies it syntactically and never parses it; decoding
    /// and validation belong to the consumer.
    Result { text: String },
    /// Successful terminal marker.
    Done,
    /// Abnormal terminal marker.
    Failure { exit_code: i32, message: String },
}

impl StreamEvent {
    /// True for `Done` and `Failure`, after which no further events occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Failure { .. })
    }
}

/// Classify one complete worker output line.
///
/// A line that, after trimming, both starts with `{` and ends with `}` is the
/// result candidate; that is the worker's documented output contract (its
/// last meaningful line is single-line JSON). Everything else is progress.
pub fn classify_line(line: &str) -> StreamEvent {
    let trimmed = line.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        StreamEvent::Result {
            text: trimmed.to_string(),
        }
    } else {
        StreamEvent::Log {
            text: line.to_string(),
        }
    }
}

/// Serialize an event into its wire frame.
pub fn encode_frame(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("{DATA_PREFIX}{json}\n\n")))
}

/// Decode one frame body (delimiter already stripped). Returns `None` for
/// frames that do not carry a well-formed tagged event.
pub fn decode_frame(frame: &str) -> Option<StreamEvent> {
    let payload = frame.trim().strip_prefix(DATA_PREFIX.trim_end())?.trim_start();
    serde_json::from_str(payload).ok()
}

/// Reassembles `\n`-terminated records from arbitrarily chunked bytes.
///
/// A single worker write may span multiple chunks, and one chunk may carry
/// several lines; nothing is emitted until a terminator arrives. The buffer
/// is bounded: a line growing past `max_len` fails the stream instead of
/// buffering without limit.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Feed one chunk; returns every line completed by it, in order.
    /// Trailing `\r` is stripped, invalid UTF-8 is replaced lossily.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let record: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(to_line(&record[..pos]));
        }
        if self.buf.len() > self.max_len {
            return Err(FrameError::LineTooLong {
                limit: self.max_len,
            });
        }
        Ok(lines)
    }

    /// Flush the unterminated residue at end of output, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(to_line(&rest))
    }
}

fn to_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_json_looking_line_as_result() {
        let event = classify_line(r#"  {"id":"p1","topic":"rust","modules":[]}  "#);
        assert!(matches!(event, StreamEvent::Result { .. }));
    }

    #[test]
    fn classify_plain_line_as_log() {
        let event = classify_line("Searching for articles...");
        assert_eq!(
            event,
            StreamEvent::Log {
                text: "Searching for articles...".to_string()
            }
        );
    }

    #[test]
    fn classify_half_open_brace_as_log() {
        assert!(matches!(
            classify_line("{truncated json"),
            StreamEvent::Log { .. }
        ));
    }

    #[test]
    fn frame_round_trips_through_codec() {
        let event = StreamEvent::Failure {
            exit_code: 3,
            message: "worker exited with code 3".to_string(),
        };
        let frame = encode_frame(&event).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.ends_with("\n\n"));
        let decoded = decode_frame(text.trim_end()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn log_containing_delimiter_survives_framing() {
        // JSON escaping keeps the raw delimiter off the wire.
        let event = StreamEvent::Log {
            text: "first\n\nsecond".to_string(),
        };
        let frame = encode_frame(&event).unwrap();
        let body = &frame[..frame.len() - FRAME_DELIMITER.len()];
        assert!(!body.windows(2).any(|w| w == FRAME_DELIMITER));
        assert_eq!(decode_frame(std::str::from_utf8(body).unwrap()), Some(event));
    }

    #[test]
    fn log_that_looks_like_json_stays_a_log_on_the_wire() {
        let event = StreamEvent::Log {
            text: r#"{"not":"a result"}"#.to_string(),
        };
        let frame = encode_frame(&event).unwrap();
        let decoded = decode_frame(std::str::from_utf8(&frame).unwrap()).unwrap();
        assert!(matches!(decoded, StreamEvent::Log { .. }));
    }

    #[test]
    fn decode_rejects_untagged_frames() {
        assert_eq!(decode_frame("data: {\"text\":\"no type\"}"), None);
        assert_eq!(decode_frame("garbage"), None);
    }

    #[test]
    fn framer_joins_split_lines() {
        let mut framer = LineFramer::new(1024);
        assert!(framer.push(b"hel").unwrap().is_empty());
        assert_eq!(framer.push(b"lo\nwor").unwrap(), vec!["hello"]);
        assert_eq!(framer.push(b"ld\n").unwrap(), vec!["world"]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn framer_splits_multi_line_chunk() {
        let mut framer = LineFramer::new(1024);
        assert_eq!(framer.push(b"a\nb\nc").unwrap(), vec!["a", "b"]);
        assert_eq!(framer.finish(), Some("c".to_string()));
    }

    #[test]
    fn framer_strips_carriage_returns() {
        let mut framer = LineFramer::new(1024);
        assert_eq!(framer.push(b"dos line\r\n").unwrap(), vec!["dos line"]);
    }

    #[test]
    fn framer_enforces_line_bound() {
        let mut framer = LineFramer::new(8);
        let err = framer.push(b"0123456789abcdef").unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { limit: 8 }));
    }

    #[test]
    fn framer_bound_ignores_completed_lines() {
        let mut framer = LineFramer::new(8);
        // 20 bytes in one chunk, but every line terminates within the bound.
        assert_eq!(
            framer.push(b"aaaa\nbbbb\ncccc\ndddd\n").unwrap().len(),
            4
        );
    }

    #[test]
    fn terminal_detection() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(
            StreamEvent::Failure {
                exit_code: 1,
                message: String::new()
            }
            .is_terminal()
        );
        assert!(
            !StreamEvent::Log {
                text: String::new()
            }
            .is_terminal()
        );
    }
}
