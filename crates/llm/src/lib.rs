use std::sync::Arc;

mod backend;
mod http;
#[cfg(any(test, feature = "scripted"))]
mod scripted;
pub mod sse;

pub use backend::{
    BackendError, BackendResult, BodyOutcome, ChatBackend, ReplyEvent, ReplyEventPayload,
    ReplyEventStream, ReplyRequest, ReplyStreamHandle, ReplyTarget, ReplyWorker,
    consume_reply_body, drive_reply_body,
};
pub use http::{
    DEFAULT_CHAT_PATH, DEFAULT_REQUEST_TIMEOUT, HTTP_BACKEND_ID, HttpBackendConfig,
    HttpChatBackend,
};
#[cfg(any(test, feature = "scripted"))]
pub use scripted::{SCRIPTED_BACKEND_ID, ScriptedBackend, ScriptedChunk};

pub fn create_backend(config: HttpBackendConfig) -> BackendResult<Arc<dyn ChatBackend>> {
    Ok(Arc::new(HttpChatBackend::new(config)?))
}
