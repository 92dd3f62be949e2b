use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::sse::{SseDecoder, SseRecord};

/// Routing key for one reply: the conversation and the message pair it answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyTarget {
    pub conversation_id: String,
    pub message_id: String,
}

impl ReplyTarget {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub target: ReplyTarget,
    pub query: String,
}

impl ReplyRequest {
    pub fn new(target: ReplyTarget, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
        }
    }
}

/// Backend-agnostic reply payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEventPayload {
    /// A freshly decoded fragment, in arrival order.
    Delta(String),
    /// The full accumulated reply; emitted at most once and always last.
    Completed(String),
    /// Transport failure; no completion follows.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEvent {
    pub target: ReplyTarget,
    pub payload: ReplyEventPayload,
}

pub type ReplyWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("reply request for {target:?} has an empty query"))]
    EmptyQuery {
        stage: &'static str,
        target: ReplyTarget,
    },
    #[snafu(display("access token cannot be sent as a header"))]
    InvalidAccessToken {
        stage: &'static str,
        source: reqwest::header::InvalidHeaderValue,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    ReplyStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("chat endpoint did not answer within {timeout_ms}ms"))]
    RequestTimeout { stage: &'static str, timeout_ms: u64 },
}

/// Receiving side of one reply. Dropping it cancels the worker.
pub struct ReplyEventStream {
    target: ReplyTarget,
    events: mpsc::UnboundedReceiver<ReplyEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ReplyStreamHandle {
    pub stream: ReplyEventStream,
    pub worker: ReplyWorker,
}

impl ReplyEventStream {
    pub(crate) fn new(
        target: ReplyTarget,
        events: mpsc::UnboundedReceiver<ReplyEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> &ReplyTarget {
        &self.target
    }

    pub async fn recv(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ReplyEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Stream for ReplyEventStream {
    type Item = ReplyEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for ReplyEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait ChatBackend: Send + Sync {
    fn id(&self) -> &str;
    fn stream_reply(&self, request: ReplyRequest) -> BackendResult<ReplyStreamHandle>;
}

pub(crate) fn make_event_stream(
    target: ReplyTarget,
) -> (
    mpsc::UnboundedSender<ReplyEvent>,
    ReplyEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ReplyEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}

/// How a reply body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Reads a chunked reply body to its end, emitting one `Delta` per decoded fragment.
///
/// The accumulated text lives only here; callers see it through the returned outcome.
pub async fn consume_reply_body<S, B, E>(
    target: &ReplyTarget,
    body: S,
    event_tx: &mpsc::UnboundedSender<ReplyEvent>,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> BodyOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    let mut result = String::new();

    loop {
        tokio::select! {
            _ = &mut *cancel_rx => {
                tracing::debug!(reply = ?target, "reply stream cancelled");
                return BodyOutcome::Cancelled;
            }
            next_chunk = body.next() => {
                match next_chunk {
                    Some(Ok(chunk)) => {
                        for record in decoder.push(chunk.as_ref()) {
                            match record {
                                SseRecord::Fragment(text) => {
                                    result.push_str(&text);
                                    let delta = ReplyEvent {
                                        target: target.clone(),
                                        payload: ReplyEventPayload::Delta(text),
                                    };
                                    if event_tx.send(delta).is_err() {
                                        // Nobody is listening any more; treat like cancellation.
                                        return BodyOutcome::Cancelled;
                                    }
                                }
                                SseRecord::Done => return BodyOutcome::Completed(result),
                                SseRecord::Malformed { payload, reason } => {
                                    tracing::warn!(
                                        reply = ?target,
                                        payload = %payload,
                                        reason = %reason,
                                        "skipping malformed reply fragment"
                                    );
                                }
                            }
                        }
                    }
                    Some(Err(error)) => {
                        return BodyOutcome::Failed(error.to_string());
                    }
                    None => {
                        let dropped_bytes = decoder.finish();
                        if dropped_bytes > 0 {
                            tracing::debug!(
                                reply = ?target,
                                dropped_bytes,
                                "reply body ended inside an unterminated line"
                            );
                        }
                        return BodyOutcome::Completed(result);
                    }
                }
            }
        }
    }
}

/// Consumes a reply body and emits the terminal event for its outcome.
pub async fn drive_reply_body<S, B, E>(
    target: ReplyTarget,
    body: S,
    event_tx: mpsc::UnboundedSender<ReplyEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> BodyOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let outcome = consume_reply_body(&target, body, &event_tx, &mut cancel_rx).await;
    emit_terminal_event(&event_tx, &target, &outcome);
    outcome
}

pub(crate) fn emit_terminal_event(
    event_tx: &mpsc::UnboundedSender<ReplyEvent>,
    target: &ReplyTarget,
    outcome: &BodyOutcome,
) {
    let payload = match outcome {
        BodyOutcome::Completed(text) => ReplyEventPayload::Completed(text.clone()),
        BodyOutcome::Failed(message) => {
            tracing::error!(reply = ?target, error = %message, "reply stream failed");
            ReplyEventPayload::Failed(message.clone())
        }
        BodyOutcome::Cancelled => return,
    };

    let _ = event_tx.send(ReplyEvent {
        target: target.clone(),
        payload,
    });
}
