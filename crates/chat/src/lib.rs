pub mod command;
pub mod conversation;
pub mod ids;
pub mod response;
pub mod scroll;
pub mod session;
pub mod settings;
pub mod store;

pub use command::Command;
pub use conversation::{Conversation, DEFAULT_CONVERSATION_TITLE, MessagePair, derive_title};
pub use ids::{ConversationId, MessageId, ParseIdError};
pub use response::ResponseView;
pub use scroll::{AUTO_SCROLL_THRESHOLD_PX, ScrollCoordinator, ScrollMetrics};
pub use session::{ChatSession, SessionError, SessionResult, SessionUpdate};
pub use settings::{Settings, SettingsError, SettingsStore, StorageBackendKind, StorageSettings};
pub use store::{BotResponse, CONVERSATIONS_STORAGE_KEY, ConversationStore};
