use std::sync::Arc;

use wayground_storage::KeyValueStore;

use crate::conversation::{Conversation, MessagePair, derive_title};
use crate::ids::{ConversationId, MessageId};

pub const CONVERSATIONS_STORAGE_KEY: &str = "chatbot_conversations";
pub const CORRUPT_BACKUP_STORAGE_KEY: &str = "chatbot_conversations.corrupt";

/// A finished reply routed back to the pair that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotResponse {
    pub response: String,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

/// Owns every conversation plus the current selection and mirrors the
/// persisted list into a [`KeyValueStore`] after each change.
///
/// A fresh conversation stays transient until its first message pair lands,
/// so empty conversations never reach storage.
pub struct ConversationStore {
    storage: Arc<dyn KeyValueStore>,
    conversations: Vec<Conversation>,
    transient: Option<Conversation>,
    current_id: Option<ConversationId>,
}

impl ConversationStore {
    /// Reads the persisted list and picks the initial selection: the newest
    /// persisted conversation, or a new transient one when nothing is stored.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let conversations = read_conversations(storage.as_ref());
        let mut store = Self {
            storage,
            conversations,
            transient: None,
            current_id: None,
        };

        match store.conversations.first() {
            Some(newest) => store.current_id = Some(newest.id),
            None => {
                store.add_conversation();
            }
        }

        tracing::debug!(
            conversations = store.conversations.len(),
            "conversation store loaded"
        );
        store
    }

    /// Persisted conversations, newest first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn transient_conversation(&self) -> Option<&Conversation> {
        self.transient.as_ref()
    }

    pub fn current_conversation_id(&self) -> Option<ConversationId> {
        self.current_id
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.conversation(self.current_id?)
    }

    /// Looks up a conversation whether it is transient or persisted.
    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        if let Some(transient) = &self.transient
            && transient.id == conversation_id
        {
            return Some(transient);
        }

        self.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
    }

    /// Replaces the transient conversation with a new one and selects it.
    pub fn add_conversation(&mut self) -> ConversationId {
        let conversation = Conversation::new();
        let conversation_id = conversation.id;
        if let Some(discarded) = self.transient.replace(conversation) {
            tracing::trace!(conversation_id = %discarded.id, "discarded empty conversation");
        }
        self.current_id = Some(conversation_id);
        conversation_id
    }

    pub fn select_conversation(&mut self, conversation_id: ConversationId) -> bool {
        if self.conversation(conversation_id).is_none() {
            tracing::debug!(%conversation_id, "ignored selection of unknown conversation");
            return false;
        }

        self.current_id = Some(conversation_id);
        true
    }

    /// Removes a persisted conversation; deleting the selected one selects a
    /// fresh transient conversation.
    pub fn delete_conversation(&mut self, conversation_id: ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations
            .retain(|conversation| conversation.id != conversation_id);
        if self.conversations.len() == before {
            tracing::debug!(%conversation_id, "ignored delete of unknown conversation");
            return false;
        }

        self.persist();
        if self.current_id == Some(conversation_id) {
            self.add_conversation();
        }
        true
    }

    /// Appends a pending pair. `None` targets the transient conversation.
    ///
    /// The query is stored exactly as given. Returns `None` without changing
    /// anything when the query is blank, the target is unknown, or the target
    /// still waits for a reply.
    pub fn add_message_pair(
        &mut self,
        conversation_id: Option<ConversationId>,
        query: &str,
    ) -> Option<MessageId> {
        if query.trim().is_empty() {
            return None;
        }

        let targets_transient = self.transient.as_ref().is_some_and(|transient| {
            conversation_id.is_none_or(|conversation_id| conversation_id == transient.id)
        });

        if targets_transient {
            let mut promoted = self.transient.take()?;
            let pair = MessagePair::new(promoted.id, query);
            let message_id = pair.id;
            promoted.title = derive_title(query);
            promoted.push_pair(pair);

            tracing::debug!(conversation_id = %promoted.id, "promoted transient conversation");
            self.current_id = Some(promoted.id);
            self.conversations.insert(0, promoted);
            self.persist();
            return Some(message_id);
        }

        let conversation_id = conversation_id?;
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
        else {
            tracing::debug!(%conversation_id, "ignored message for unknown conversation");
            return None;
        };

        if conversation.has_pending_reply() {
            tracing::debug!(%conversation_id, "ignored message while a reply is pending");
            return None;
        }

        let pair = MessagePair::new(conversation_id, query);
        let message_id = pair.id;
        conversation.push_pair(pair);
        self.persist();
        Some(message_id)
    }

    /// Stores a finished reply. Replies for deleted conversations are dropped.
    pub fn apply_bot_response(&mut self, update: BotResponse) -> bool {
        let applied = self
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == update.conversation_id)
            .is_some_and(|conversation| {
                conversation.set_response(update.message_id, update.response)
            });

        if applied {
            self.persist();
        } else {
            tracing::debug!(
                conversation_id = %update.conversation_id,
                message_id = %update.message_id,
                "dropped reply for a missing message"
            );
        }
        applied
    }

    pub fn has_pending_reply(&self, conversation_id: ConversationId) -> bool {
        self.conversation(conversation_id)
            .is_some_and(Conversation::has_pending_reply)
    }

    pub fn pending_pairs(&self, conversation_id: ConversationId) -> Vec<&MessagePair> {
        self.conversation(conversation_id)
            .map(|conversation| conversation.pending_pairs().collect())
            .unwrap_or_default()
    }

    fn persist(&self) {
        let payload = match serde_json::to_string(&self.conversations) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, "failed to serialize conversations");
                return;
            }
        };

        if let Err(error) = self.storage.set(CONVERSATIONS_STORAGE_KEY, &payload) {
            tracing::error!(%error, "failed to persist conversations");
        }
    }
}

fn read_conversations(storage: &dyn KeyValueStore) -> Vec<Conversation> {
    let payload = match storage.get(CONVERSATIONS_STORAGE_KEY) {
        Ok(Some(payload)) => payload,
        Ok(None) => return Vec::new(),
        Err(error) => {
            tracing::error!(%error, "failed to read conversations, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Conversation>>(&payload) {
        Ok(conversations) => conversations,
        Err(error) => {
            tracing::warn!(
                %error,
                backup_key = CORRUPT_BACKUP_STORAGE_KEY,
                "stored conversations are unreadable, starting empty"
            );
            if let Err(error) = storage.set(CORRUPT_BACKUP_STORAGE_KEY, &payload) {
                tracing::error!(%error, "failed to back up unreadable conversations");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayground_storage::MemoryStore;

    fn empty_store() -> (Arc<MemoryStore>, ConversationStore) {
        let storage = Arc::new(MemoryStore::new());
        let store = ConversationStore::load(storage.clone());
        (storage, store)
    }

    fn stored_conversations(storage: &MemoryStore) -> Vec<Conversation> {
        let payload = storage
            .get(CONVERSATIONS_STORAGE_KEY)
            .expect("read")
            .expect("conversations were persisted");
        serde_json::from_str(&payload).expect("valid payload")
    }

    fn respond(store: &mut ConversationStore, conversation_id: ConversationId, text: &str) {
        let message_id = store
            .conversation(conversation_id)
            .and_then(Conversation::pending_pair)
            .map(|pair| pair.id)
            .expect("pending pair");
        assert!(store.apply_bot_response(BotResponse {
            response: text.to_string(),
            conversation_id,
            message_id,
        }));
    }

    #[test]
    fn empty_storage_boots_into_a_transient_conversation() {
        let (storage, store) = empty_store();

        let transient = store.transient_conversation().expect("transient");
        assert_eq!(store.current_conversation_id(), Some(transient.id));
        assert!(store.conversations().is_empty());
        assert_eq!(storage.get(CONVERSATIONS_STORAGE_KEY).expect("read"), None);
    }

    #[test]
    fn stored_conversations_boot_into_the_newest_one() {
        let (storage, mut store) = empty_store();
        store.add_message_pair(None, "older");
        let older = store.current_conversation_id().expect("current");
        respond(&mut store, older, "ok");
        store.add_conversation();
        store.add_message_pair(None, "newer");
        let newer = store.current_conversation_id().expect("current");

        let reloaded = ConversationStore::load(storage);
        assert_eq!(reloaded.current_conversation_id(), Some(newer));
        assert!(reloaded.transient_conversation().is_none());
        assert_eq!(reloaded.conversations().len(), 2);
    }

    #[test]
    fn repeated_add_conversation_never_persists_empty_ones() {
        let (storage, mut store) = empty_store();
        let first = store.add_conversation();
        let second = store.add_conversation();

        assert_ne!(first, second);
        assert!(store.conversations().is_empty());
        assert!(store.conversation(first).is_none());
        assert_eq!(store.current_conversation_id(), Some(second));
        assert_eq!(storage.get(CONVERSATIONS_STORAGE_KEY).expect("read"), None);
    }

    #[test]
    fn first_message_promotes_the_transient_conversation() {
        let (storage, mut store) = empty_store();
        let conversation_id = store.add_conversation();

        let message_id = store.add_message_pair(None, "Hi").expect("added");

        assert!(store.transient_conversation().is_none());
        let conversations = stored_conversations(&storage);
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, conversation_id);
        assert_eq!(conversations[0].title, "Hi");
        assert_eq!(conversations[0].messages.len(), 1);
        assert_eq!(conversations[0].messages[0].id, message_id);
        assert_eq!(conversations[0].messages[0].response, None);

        store.apply_bot_response(BotResponse {
            response: "Hello there".to_string(),
            conversation_id,
            message_id,
        });
        let conversations = stored_conversations(&storage);
        assert_eq!(
            conversations[0].messages[0].response.as_deref(),
            Some("Hello there")
        );
    }

    #[test]
    fn title_is_derived_once_from_the_first_query() {
        let (_, mut store) = empty_store();
        store.add_message_pair(None, "This is a very long user question that exceeds thirty chars");
        let conversation_id = store.current_conversation_id().expect("current");
        respond(&mut store, conversation_id, "answer");
        store.add_message_pair(Some(conversation_id), "second question");

        let conversation = store.conversation(conversation_id).expect("persisted");
        assert_eq!(conversation.title, "This is a very long user quest...");
        assert_eq!(conversation.messages.len(), 2);
    }

    #[test]
    fn queries_keep_their_leading_whitespace() {
        let (storage, mut store) = empty_store();
        let query = "    let x = 1; // indented code\n";

        store.add_message_pair(None, query).expect("added");

        let conversations = stored_conversations(&storage);
        assert_eq!(conversations[0].messages[0].query, query);
        assert_eq!(conversations[0].title, derive_title(query));
    }

    #[test]
    fn a_second_pending_pair_is_refused() {
        let (_, mut store) = empty_store();
        store.add_message_pair(None, "first");
        let conversation_id = store.current_conversation_id().expect("current");

        assert_eq!(store.add_message_pair(Some(conversation_id), "second"), None);
        assert_eq!(store.pending_pairs(conversation_id).len(), 1);

        respond(&mut store, conversation_id, "done");
        assert!(store.add_message_pair(Some(conversation_id), "second").is_some());

        let conversation = store.conversation(conversation_id).expect("persisted");
        let pending = conversation.pending_pairs().collect::<Vec<_>>();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].query, "second");
        assert_eq!(conversation.messages.last().map(|pair| pair.id), Some(pending[0].id));
    }

    #[test]
    fn blank_queries_and_unknown_targets_are_ignored() {
        let (storage, mut store) = empty_store();
        assert_eq!(store.add_message_pair(None, "   "), None);
        assert_eq!(store.add_message_pair(Some(ConversationId::new_v7()), "hi"), None);
        assert!(store.transient_conversation().is_some());
        assert_eq!(storage.get(CONVERSATIONS_STORAGE_KEY).expect("read"), None);
    }

    #[test]
    fn deleting_the_current_conversation_selects_a_new_transient_one() {
        let (_, mut store) = empty_store();
        store.add_message_pair(None, "to be deleted");
        let deleted = store.current_conversation_id().expect("current");

        assert!(store.delete_conversation(deleted));

        let current = store.current_conversation().expect("selection never dangles");
        assert_ne!(current.id, deleted);
        assert!(current.is_empty());
        assert_eq!(store.transient_conversation().map(|c| c.id), Some(current.id));
        assert!(store.conversations().is_empty());
    }

    #[test]
    fn deleting_another_conversation_keeps_the_selected_one() {
        let (storage, mut store) = empty_store();
        store.add_message_pair(None, "first");
        let first = store.current_conversation_id().expect("current");
        respond(&mut store, first, "one");
        store.add_conversation();
        store.add_message_pair(None, "second");
        let second = store.current_conversation_id().expect("current");
        let selected_before = store.conversation(second).cloned();

        assert!(store.delete_conversation(first));

        assert_eq!(store.current_conversation_id(), Some(second));
        assert_eq!(store.conversation(second).cloned(), selected_before);
        assert_eq!(stored_conversations(&storage).len(), 1);
        assert!(!store.delete_conversation(first));
    }

    #[test]
    fn responses_for_deleted_conversations_are_dropped() {
        let (_, mut store) = empty_store();
        let message_id = store.add_message_pair(None, "hello").expect("added");
        let conversation_id = store.current_conversation_id().expect("current");
        store.delete_conversation(conversation_id);

        assert!(!store.apply_bot_response(BotResponse {
            response: "late".to_string(),
            conversation_id,
            message_id,
        }));
    }

    #[test]
    fn selection_accepts_known_ids_only() {
        let (_, mut store) = empty_store();
        store.add_message_pair(None, "persisted");
        let persisted = store.current_conversation_id().expect("current");
        let transient = store.add_conversation();

        assert!(store.select_conversation(persisted));
        assert_eq!(store.current_conversation_id(), Some(persisted));
        assert!(store.select_conversation(transient));
        assert!(!store.select_conversation(ConversationId::new_v7()));
        assert_eq!(store.current_conversation_id(), Some(transient));
    }

    #[test]
    fn unreadable_payload_is_backed_up_and_ignored() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(CONVERSATIONS_STORAGE_KEY, "[{not json")
            .expect("seed");

        let store = ConversationStore::load(storage.clone());

        assert!(store.conversations().is_empty());
        assert!(store.transient_conversation().is_some());
        assert_eq!(
            storage.get(CORRUPT_BACKUP_STORAGE_KEY).expect("read").as_deref(),
            Some("[{not json")
        );
    }
}
