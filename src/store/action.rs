use chrono::{DateTime, Utc};

use crate::domain::{
    conversation::{Conversation, ConversationPatch},
    message::{Message, MessageStatus},
    status::ConnectionStatus,
    typing::TypingIndicator,
};

/// Field-level patch for a stored message. Absent fields are untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub is_edited: Option<bool>,
}

/// The closed union of every state mutation the store accepts. All writes,
/// local optimistic ones and remote-derived ones alike, funnel through
/// these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    SetConversations(Vec<Conversation>),
    AddConversation(Conversation),
    UpdateConversation {
        conversation_id: String,
        patch: ConversationPatch,
    },
    RemoveConversation {
        conversation_id: String,
    },

    /// Bulk page-load merge: de-duplicated by id and re-sorted, so repeated
    /// or overlapping pages are idempotent.
    SetMessages {
        conversation_id: String,
        messages: Vec<Message>,
    },
    /// Ordered insert; a duplicate id replaces the stored message in place.
    AddMessage(Message),
    UpdateMessage {
        conversation_id: String,
        message_id: String,
        patch: MessagePatch,
    },
    /// Soft delete: the message keeps its slot for ordering.
    DeleteMessage {
        conversation_id: String,
        message_id: String,
    },
    /// Reconciliation of an optimistic send with its server ack.
    ReplaceMessage {
        conversation_id: String,
        temp_id: String,
        message: Message,
    },

    SetDraft {
        conversation_id: String,
        text: String,
    },
    ClearDraft {
        conversation_id: String,
    },

    SetTyping(TypingIndicator),
    RemoveTyping {
        conversation_id: String,
        user_id: String,
    },

    SetUserOnline {
        user_id: String,
    },
    SetUserOffline {
        user_id: String,
    },

    SetConnectionStatus(ConnectionStatus),

    SetError {
        message: String,
    },
    ClearError,

    MarkRead {
        conversation_id: String,
        user_id: String,
        at: DateTime<Utc>,
    },
}
