use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

/// Kind of conversation for routing and rendering purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    /// Private 1-to-1 conversation.
    #[default]
    Direct,
    /// Multi-member group conversation.
    Group,
    /// One-to-many creator broadcast.
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Creator,
    Moderator,
    #[default]
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPermissions {
    pub can_send: bool,
    pub can_moderate: bool,
}

impl Default for ParticipantPermissions {
    fn default() -> Self {
        Self {
            can_send: true,
            can_moderate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(default)]
    pub permissions: ParticipantPermissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    /// Exactly one entry per distinct user id; see [`Conversation::upsert_participant`].
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Box<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Per-user high-water mark for read receipts, keyed by user id.
    #[serde(default)]
    pub last_read_at: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_pinned: bool,
    /// Whether an active subscription to the creator is required to post.
    #[serde(default)]
    pub requires_subscription: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    /// Derived counter; only ever decreased by an explicit mark-read.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    pub fn new(id: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Self::default()
        }
    }

    /// Adds or replaces the entry for the participant's user id, keeping the
    /// one-entry-per-user invariant.
    pub fn upsert_participant(&mut self, participant: Participant) {
        match self
            .participants
            .iter_mut()
            .find(|existing| existing.user_id == participant.user_id)
        {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    /// Records `message` as the most recent one, keeping `last_message_at`
    /// in sync with the referenced message's timestamp.
    pub fn record_last_message(&mut self, message: &Message) {
        self.last_message_at = Some(message.timestamp);
        self.last_message = Some(Box::new(message.clone()));
    }
}

/// Shallow-merge patch applied by `CONVERSATION_UPDATE` events. Absent fields
/// leave the current value untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_subscription: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
}

impl ConversationPatch {
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(archived) = self.is_archived {
            conversation.is_archived = archived;
        }

        if let Some(muted) = self.is_muted {
            conversation.is_muted = muted;
        }

        if let Some(pinned) = self.is_pinned {
            conversation.is_pinned = pinned;
        }

        if let Some(gated) = self.requires_subscription {
            conversation.requires_subscription = gated;
        }

        if let Some(ref participants) = self.participants {
            conversation.participants.clear();
            for participant in participants {
                conversation.upsert_participant(participant.clone());
            }
        }
    }
}
