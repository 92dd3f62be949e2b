use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 30;
pub const TITLE_ELLIPSIS: &str = "...";

/// One user query and the bot reply it is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePair {
    pub id: MessageId,
    pub query: String,
    /// `None` while the reply is outstanding; an empty string is a finished reply.
    pub response: Option<String>,
    pub conversation_id: ConversationId,
    pub timestamp: u64,
}

impl MessagePair {
    pub fn new(conversation_id: ConversationId, query: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            query: query.into(),
            response: None,
            conversation_id,
            timestamp: now_unix_millis(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.response.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<MessagePair>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Conversation {
    pub fn new() -> Self {
        let now = now_unix_millis();
        Self {
            id: ConversationId::new_v7(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last pair, when it still waits for its reply.
    pub fn pending_pair(&self) -> Option<&MessagePair> {
        self.messages.last().filter(|pair| pair.is_pending())
    }

    pub fn has_pending_reply(&self) -> bool {
        self.pending_pair().is_some()
    }

    pub fn pending_pairs(&self) -> impl Iterator<Item = &MessagePair> {
        self.messages.iter().filter(|pair| pair.is_pending())
    }

    pub fn message(&self, message_id: MessageId) -> Option<&MessagePair> {
        self.messages.iter().find(|pair| pair.id == message_id)
    }

    pub(crate) fn push_pair(&mut self, pair: MessagePair) {
        self.messages.push(pair);
        self.touch();
    }

    pub(crate) fn set_response(&mut self, message_id: MessageId, response: String) -> bool {
        let Some(pair) = self.messages.iter_mut().find(|pair| pair.id == message_id) else {
            return false;
        };
        pair.response = Some(response);
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = now_unix_millis().max(self.updated_at);
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Title shown for a conversation whose first query is `query`.
pub fn derive_title(query: &str) -> String {
    let mut chars = query.chars();
    let head = chars.by_ref().take(TITLE_MAX_CHARS).collect::<String>();
    if chars.next().is_some() {
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        head
    }
}

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
