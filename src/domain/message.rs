use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    File,
    System,
}

/// Delivery status of a message. `Failed` is terminal; the others advance
/// `Sending → Sent → Delivered → Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Denormalized sender info embedded in every message so the UI can render
/// without a user lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderSnapshot {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Reference to already-uploaded media. The upload itself happens outside
/// this crate; only the resulting URL and declared metadata are carried.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A local attachment handed to the external uploader. Owned by the upload
/// bridge; this crate only consumes the final URL it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub id: String,
    pub local_uri: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Temp id (`tmp-…`) while pending, replaced by the server id on ack.
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender: SenderSnapshot,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Message {
    /// Whether this message still carries a locally generated id.
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Generates a fresh temporary message id for optimistic sends.
pub fn new_temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: "u1".to_owned(),
            sender: SenderSnapshot {
                user_id: "u1".to_owned(),
                display_name: "Avery".to_owned(),
                avatar_url: None,
            },
            kind: MessageKind::Text,
            content: "hi".to_owned(),
            media: None,
            status: MessageStatus::Sending,
            timestamp: Utc::now(),
            is_edited: false,
            is_deleted: false,
            reply_to: None,
        }
    }

    #[test]
    fn temp_ids_are_unique_and_prefixed() {
        let a = new_temp_id();
        let b = new_temp_id();

        assert!(a.starts_with(TEMP_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn pending_is_derived_from_the_id_prefix() {
        assert!(message(&new_temp_id()).is_pending());
        assert!(!message("m42").is_pending());
    }

    #[test]
    fn serializes_with_camel_case_wire_fields() {
        let json = serde_json::to_value(message("m1")).expect("message must serialize");

        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["kind"], "TEXT");
        assert_eq!(json["status"], "SENDING");
        assert_eq!(json["sender"]["displayName"], "Avery");
    }
}
