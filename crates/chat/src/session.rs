use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wayground_llm::{
    BackendError, ChatBackend, ReplyEventPayload, ReplyEventStream, ReplyRequest, ReplyTarget,
};

use crate::conversation::Conversation;
use crate::ids::{ConversationId, MessageId};
use crate::response::ResponseView;
use crate::scroll::{ScrollCoordinator, ScrollMetrics};
use crate::store::{BotResponse, ConversationStore};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("query is empty on `{stage}`"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display(
        "conversation {conversation_id} is still waiting for a reply on `{stage}`"
    ))]
    ReplyPending {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("no conversation is selected on `{stage}`"))]
    NoConversation { stage: &'static str },
    #[snafu(display("failed to start reply on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
}

/// What changed after one reply event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// `follow` asks the renderer to jump to the bottom of the message list.
    Fragment {
        conversation_id: ConversationId,
        message_id: MessageId,
        fragment: String,
        follow: bool,
    },
    /// `applied` is false when the conversation was deleted mid-reply.
    Completed {
        conversation_id: ConversationId,
        message_id: MessageId,
        applied: bool,
    },
    Failed {
        conversation_id: ConversationId,
        message_id: MessageId,
        message: String,
    },
}

const READER_CLOSED_MESSAGE: &str = "reply stream ended before a terminal event";

/// Reader output tagged with the pair it belongs to. `None` marks a closed reader.
struct RoutedEvent {
    conversation_id: ConversationId,
    message_id: MessageId,
    payload: Option<ReplyEventPayload>,
}

/// Tasks of one in-flight reply. Dropping it aborts both, which also drops
/// the event stream and signals the worker to stop.
struct ActiveReply {
    conversation_id: ConversationId,
    reader: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Drop for ActiveReply {
    fn drop(&mut self) {
        self.reader.abort();
        self.worker.abort();
    }
}

/// Ties the conversation store to a streaming backend.
///
/// Each pending pair gets exactly one reply per session; its events are
/// funnelled through one channel and applied by [`ChatSession::next_update`].
pub struct ChatSession {
    store: ConversationStore,
    backend: Arc<dyn ChatBackend>,
    scroll: ScrollCoordinator,
    active: HashMap<MessageId, ActiveReply>,
    started: HashSet<MessageId>,
    views: HashMap<MessageId, ResponseView>,
    event_tx: mpsc::UnboundedSender<RoutedEvent>,
    event_rx: mpsc::UnboundedReceiver<RoutedEvent>,
}

impl ChatSession {
    pub fn new(store: ConversationStore, backend: Arc<dyn ChatBackend>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            store,
            backend,
            scroll: ScrollCoordinator::new(),
            active: HashMap::new(),
            started: HashSet::new(),
            views: HashMap::new(),
            event_tx,
            event_rx,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.store.current_conversation()
    }

    pub fn scroll(&self) -> &ScrollCoordinator {
        &self.scroll
    }

    /// Records a scroll made by the user; returns whether the list still follows its tail.
    pub fn user_scrolled(&mut self, metrics: ScrollMetrics) -> bool {
        self.scroll.on_user_scroll(metrics)
    }

    /// Scroll top to apply after the message list grew, if it follows its tail.
    pub fn content_changed(&self, metrics: ScrollMetrics) -> Option<f32> {
        self.scroll.on_content_changed(metrics)
    }

    /// Scroll top that keeps the visible messages in place after older ones
    /// were inserted above them.
    pub fn older_content_loaded(&self, before: ScrollMetrics, after: ScrollMetrics) -> f32 {
        self.scroll.preserve_anchor(before, after)
    }

    pub fn response_view(&self, message_id: MessageId) -> Option<&ResponseView> {
        self.views.get(&message_id)
    }

    pub fn is_streaming(&self, message_id: MessageId) -> bool {
        self.active.contains_key(&message_id)
    }

    pub fn active_replies(&self) -> usize {
        self.active.len()
    }

    /// Sends `query` in the current conversation and starts its reply.
    pub fn submit(&mut self, query: &str) -> SessionResult<MessageId> {
        ensure!(!query.trim().is_empty(), EmptyQuerySnafu { stage: "submit" });

        let conversation_id = self
            .store
            .current_conversation_id()
            .context(NoConversationSnafu { stage: "submit" })?;
        ensure!(
            !self.store.has_pending_reply(conversation_id),
            ReplyPendingSnafu {
                stage: "submit",
                conversation_id,
            }
        );

        let message_id = self
            .store
            .add_message_pair(Some(conversation_id), query)
            .context(NoConversationSnafu {
                stage: "submit-add-message",
            })?;
        tracing::debug!(%conversation_id, %message_id, "query submitted");

        self.start_reply(conversation_id, message_id, query.to_string())?;
        Ok(message_id)
    }

    /// Starts replies for pending pairs of the current conversation that
    /// this session has not started yet. Returns how many were started.
    pub fn observe_current(&mut self) -> SessionResult<usize> {
        let Some(conversation) = self.store.current_conversation() else {
            return Ok(0);
        };

        let conversation_id = conversation.id;
        let unstarted = conversation
            .pending_pairs()
            .filter(|pair| !self.started.contains(&pair.id))
            .map(|pair| (pair.id, pair.query.clone()))
            .collect::<Vec<_>>();

        let count = unstarted.len();
        for (message_id, query) in unstarted {
            self.start_reply(conversation_id, message_id, query)?;
        }
        Ok(count)
    }

    pub fn new_conversation(&mut self) -> ConversationId {
        self.scroll.reset();
        self.store.add_conversation()
    }

    /// Selects a conversation and resumes any of its unanswered pairs.
    pub fn select_conversation(&mut self, conversation_id: ConversationId) -> SessionResult<bool> {
        if !self.store.select_conversation(conversation_id) {
            return Ok(false);
        }

        self.scroll.reset();
        self.observe_current()?;
        Ok(true)
    }

    /// Cancels the conversation's replies, then deletes it along with the
    /// session state kept for its messages.
    pub fn delete_conversation(&mut self, conversation_id: ConversationId) -> bool {
        let cancelled = self
            .active
            .iter()
            .filter(|(_, reply)| reply.conversation_id == conversation_id)
            .map(|(message_id, _)| *message_id)
            .collect::<Vec<_>>();
        for message_id in cancelled {
            self.active.remove(&message_id);
            self.views.remove(&message_id);
            tracing::debug!(%conversation_id, %message_id, "reply cancelled");
        }

        let message_ids = self
            .store
            .conversation(conversation_id)
            .map(|conversation| {
                conversation
                    .messages
                    .iter()
                    .map(|pair| pair.id)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let was_current = self.store.current_conversation_id() == Some(conversation_id);
        let deleted = self.store.delete_conversation(conversation_id);
        if !deleted {
            return false;
        }

        for message_id in message_ids {
            self.started.remove(&message_id);
            self.views.remove(&message_id);
        }
        if was_current {
            self.scroll.reset();
        }
        true
    }

    /// Waits for the next event of any active reply and applies it.
    ///
    /// Events of cancelled replies are skipped. Pending forever when nothing
    /// is streaming, so it is meant to be raced against other input.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.event_rx.recv().await?;
            if let Some(update) = self.apply_event(event) {
                return Some(update);
            }
        }
    }

    fn apply_event(&mut self, event: RoutedEvent) -> Option<SessionUpdate> {
        let RoutedEvent {
            conversation_id,
            message_id,
            payload,
        } = event;

        if !self.active.contains_key(&message_id) {
            tracing::trace!(%message_id, "skipped event of an inactive reply");
            return None;
        }

        match payload {
            Some(ReplyEventPayload::Delta(fragment)) => {
                self.views
                    .entry(message_id)
                    .or_default()
                    .append(&fragment);
                let follow = self.store.current_conversation_id() == Some(conversation_id)
                    && self.scroll.is_following_bottom();
                Some(SessionUpdate::Fragment {
                    conversation_id,
                    message_id,
                    fragment,
                    follow,
                })
            }
            Some(ReplyEventPayload::Completed(response)) => {
                self.active.remove(&message_id);
                self.views.remove(&message_id);
                let applied = self.store.apply_bot_response(BotResponse {
                    response,
                    conversation_id,
                    message_id,
                });
                Some(SessionUpdate::Completed {
                    conversation_id,
                    message_id,
                    applied,
                })
            }
            // The view of a failed reply stays so its partial text can be shown.
            Some(ReplyEventPayload::Failed(message)) => {
                self.active.remove(&message_id);
                tracing::error!(%conversation_id, %message_id, error = %message, "reply failed");
                Some(SessionUpdate::Failed {
                    conversation_id,
                    message_id,
                    message,
                })
            }
            None => {
                self.active.remove(&message_id);
                tracing::error!(%conversation_id, %message_id, "{READER_CLOSED_MESSAGE}");
                Some(SessionUpdate::Failed {
                    conversation_id,
                    message_id,
                    message: READER_CLOSED_MESSAGE.to_string(),
                })
            }
        }
    }

    fn start_reply(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        query: String,
    ) -> SessionResult<()> {
        if !self.started.insert(message_id) {
            return Ok(());
        }

        let request = ReplyRequest::new(
            ReplyTarget::new(conversation_id.to_string(), message_id.to_string()),
            query,
        );
        let handle = self
            .backend
            .stream_reply(request)
            .context(BackendSnafu {
                stage: "start-reply",
            })?;

        let worker = tokio::spawn(handle.worker);
        let reader = tokio::spawn(forward_reply_events(
            conversation_id,
            message_id,
            handle.stream,
            self.event_tx.clone(),
        ));

        tracing::debug!(
            %conversation_id,
            %message_id,
            backend = self.backend.id(),
            "reply started"
        );
        self.views.insert(message_id, ResponseView::new());
        self.active.insert(
            message_id,
            ActiveReply {
                conversation_id,
                reader,
                worker,
            },
        );
        Ok(())
    }
}

async fn forward_reply_events(
    conversation_id: ConversationId,
    message_id: MessageId,
    mut stream: ReplyEventStream,
    event_tx: mpsc::UnboundedSender<RoutedEvent>,
) {
    while let Some(event) = stream.recv().await {
        let routed = RoutedEvent {
            conversation_id,
            message_id,
            payload: Some(event.payload),
        };
        if event_tx.send(routed).is_err() {
            return;
        }
    }

    let _ = event_tx.send(RoutedEvent {
        conversation_id,
        message_id,
        payload: None,
    });
}
