use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream::{self, StreamExt};

use super::backend::{
    BackendResult, ChatBackend, ReplyRequest, ReplyStreamHandle, ReplyWorker, drive_reply_body,
    make_event_stream,
};

pub const SCRIPTED_BACKEND_ID: &str = "scripted";

/// One step of a scripted reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedChunk {
    Bytes(Vec<u8>),
    TransportError(String),
    /// Never yields again; the reply only ends through cancellation.
    Stall,
}

impl ScriptedChunk {
    pub fn text(raw: impl Into<String>) -> Self {
        Self::Bytes(raw.into().into_bytes())
    }

    /// A complete `data: {"text": ...}` line.
    pub fn fragment(text: &str) -> Self {
        let payload = serde_json::json!({ "text": text });
        Self::text(format!("data: {payload}\n"))
    }

    pub fn done() -> Self {
        Self::text("data: [DONE]\n")
    }
}

/// Replays canned reply bodies through the same decoding path as the HTTP backend.
///
/// Each request takes the next queued script; with the queue empty the query is echoed.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<ScriptedChunk>>>,
    requests: Mutex<Vec<ReplyRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: Vec<ScriptedChunk>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }

    pub fn push_reply(&self, fragments: &[&str]) {
        let mut script = fragments
            .iter()
            .map(|fragment| ScriptedChunk::fragment(fragment))
            .collect::<Vec<_>>();
        script.push(ScriptedChunk::done());
        self.push_script(script);
    }

    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_script(&self, request: &ReplyRequest) -> Vec<ScriptedChunk> {
        let queued = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front());

        queued.unwrap_or_else(|| {
            vec![
                ScriptedChunk::fragment(&request.query),
                ScriptedChunk::done(),
            ]
        })
    }
}

impl ChatBackend for ScriptedBackend {
    fn id(&self) -> &str {
        SCRIPTED_BACKEND_ID
    }

    fn stream_reply(&self, request: ReplyRequest) -> BackendResult<ReplyStreamHandle> {
        let script = self.next_script(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let stalls = script.contains(&ScriptedChunk::Stall);
        let chunks = script
            .into_iter()
            .take_while(|chunk| *chunk != ScriptedChunk::Stall)
            .map(|chunk| match chunk {
                ScriptedChunk::Bytes(bytes) => Ok(bytes),
                ScriptedChunk::TransportError(message) => Err(message),
                ScriptedChunk::Stall => Err(String::new()),
            })
            .collect::<Vec<Result<Vec<u8>, String>>>();

        let body = if stalls {
            stream::iter(chunks).chain(stream::pending()).boxed()
        } else {
            stream::iter(chunks).boxed()
        };

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target.clone());
        let worker: ReplyWorker = Box::pin(async move {
            drive_reply_body(request.target, body, event_tx, cancel_rx).await;
        });

        Ok(ReplyStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ReplyEventPayload, ReplyTarget};

    #[tokio::test]
    async fn echoes_the_query_without_a_script() {
        let backend = ScriptedBackend::new();
        let handle = backend
            .stream_reply(ReplyRequest::new(ReplyTarget::new("c", "m"), "ping"))
            .expect("scripted stream");
        let mut stream = handle.stream;
        handle.worker.await;

        let mut payloads = Vec::new();
        while let Some(event) = stream.try_recv() {
            payloads.push(event.payload);
        }
        assert_eq!(
            payloads,
            vec![
                ReplyEventPayload::Delta("ping".to_string()),
                ReplyEventPayload::Completed("ping".to_string()),
            ]
        );
        assert_eq!(backend.requests().len(), 1);
    }

    #[test]
    fn fragment_lines_escape_json() {
        assert_eq!(
            ScriptedChunk::fragment("say \"hi\"\n"),
            ScriptedChunk::text("data: {\"text\":\"say \\\"hi\\\"\\n\"}\n")
        );
    }
}
