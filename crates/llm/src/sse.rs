//! Line decoder for the chat endpoint's `data: ` event stream.
//!
//! The body arrives in arbitrary byte fragments. The decoder buffers raw bytes until a
//! newline shows up, so a record (or a multi-byte character) split across fragments is
//! only decoded once it is complete.

use serde::Deserialize;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded `data: ` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// A `{"text": ...}` payload; missing or null text decodes as an empty fragment.
    Fragment(String),
    /// The `[DONE]` sentinel.
    Done,
    /// A `data: ` line whose payload is not a text object.
    Malformed { payload: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct FragmentPayload {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a body fragment and returns the records of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.pending.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let line_end = consumed + offset;
            let line = String::from_utf8_lossy(&self.pending[consumed..line_end]);
            if let Some(record) = decode_line(&line) {
                records.push(record);
            }
            consumed = line_end + 1;
        }

        self.pending.drain(..consumed);
        records
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Ends decoding and reports how many unterminated trailing bytes were dropped.
    pub fn finish(self) -> usize {
        self.pending.len()
    }
}

/// Decodes one complete line; lines without the `data: ` prefix are ignored.
pub fn decode_line(line: &str) -> Option<SseRecord> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();

    if payload == DONE_SENTINEL {
        return Some(SseRecord::Done);
    }

    let record = match serde_json::from_str::<FragmentPayload>(payload) {
        Ok(parsed) => SseRecord::Fragment(parsed.text.unwrap_or_default()),
        Err(error) => SseRecord::Malformed {
            payload: payload.to_string(),
            reason: error.to_string(),
        },
    };
    Some(record)
}
