//! Wire envelope codec.
//!
//! Every frame, inbound or outbound, is the same outer wrapper:
//! `{ "type", "payload", "timestamp", "conversationId"? }`. The payload is
//! decoded in a second stage keyed on the outer type, so an unknown outer
//! type can be logged and dropped without failing the whole codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::message::{Message, MessageStatus};

pub const KIND_MESSAGE: &str = "MESSAGE";
pub const KIND_TYPING: &str = "TYPING";
pub const KIND_CONVERSATION_UPDATE: &str = "CONVERSATION_UPDATE";
pub const KIND_USER_STATUS: &str = "USER_STATUS";
pub const KIND_CONNECTION: &str = "CONNECTION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Nested payload of `MESSAGE` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum MessageEvent {
    /// Server ack for a sent message; `temp_id` correlates the optimistic
    /// local copy when present.
    MessageSent {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    MessageReceived {
        message: Message,
    },
    MessageUpdated {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<MessageStatus>,
    },
    MessageDeleted {
        message_id: String,
    },
    /// Read receipt: `user_id` has read up to `message_id`.
    MessageRead {
        message_id: String,
        user_id: String,
    },
}

/// Nested payload of `TYPING` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum TypingEvent {
    TypingStart { user_id: String, user_name: String },
    TypingStop { user_id: String },
}

/// Payload of `USER_STATUS` envelopes (no nested type tag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusEvent {
    pub user_id: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Nested payload of `CONNECTION` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ConnectionEvent {
    Ping,
    Pong,
    JoinConversation { conversation_id: String },
    LeaveConversation { conversation_id: String },
}

impl Envelope {
    fn wrap(
        kind: &str,
        payload: serde_json::Value,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            kind: kind.to_owned(),
            payload,
            timestamp: Utc::now(),
            conversation_id,
        }
    }

    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    // Outbound convenience constructors. All of them produce the generic
    // envelope; the payload shape mirrors what the dispatcher accepts.

    pub fn chat_message(message: &Message) -> Self {
        Self::wrap(
            KIND_MESSAGE,
            json!(MessageEvent::MessageSent {
                message: message.clone(),
                temp_id: message.is_pending().then(|| message.id.clone()),
            }),
            Some(message.conversation_id.clone()),
        )
    }

    pub fn typing_started(conversation_id: &str, user_id: &str, user_name: &str) -> Self {
        Self::wrap(
            KIND_TYPING,
            json!(TypingEvent::TypingStart {
                user_id: user_id.to_owned(),
                user_name: user_name.to_owned(),
            }),
            Some(conversation_id.to_owned()),
        )
    }

    pub fn typing_stopped(conversation_id: &str, user_id: &str) -> Self {
        Self::wrap(
            KIND_TYPING,
            json!(TypingEvent::TypingStop {
                user_id: user_id.to_owned(),
            }),
            Some(conversation_id.to_owned()),
        )
    }

    pub fn join_conversation(conversation_id: &str) -> Self {
        Self::wrap(
            KIND_CONNECTION,
            json!(ConnectionEvent::JoinConversation {
                conversation_id: conversation_id.to_owned(),
            }),
            Some(conversation_id.to_owned()),
        )
    }

    pub fn leave_conversation(conversation_id: &str) -> Self {
        Self::wrap(
            KIND_CONNECTION,
            json!(ConnectionEvent::LeaveConversation {
                conversation_id: conversation_id.to_owned(),
            }),
            Some(conversation_id.to_owned()),
        )
    }

    pub fn mark_read(conversation_id: &str, message_id: &str, user_id: &str) -> Self {
        Self::wrap(
            KIND_MESSAGE,
            json!(MessageEvent::MessageRead {
                message_id: message_id.to_owned(),
                user_id: user_id.to_owned(),
            }),
            Some(conversation_id.to_owned()),
        )
    }

    pub fn presence(user_id: &str, online: bool) -> Self {
        Self::wrap(
            KIND_USER_STATUS,
            json!(UserStatusEvent {
                user_id: user_id.to_owned(),
                status: if online {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                },
            }),
            None,
        )
    }

    pub fn ping() -> Self {
        Self::wrap(KIND_CONNECTION, json!(ConnectionEvent::Ping), None)
    }

    pub fn pong() -> Self {
        Self::wrap(KIND_CONNECTION, json!(ConnectionEvent::Pong), None)
    }
}
