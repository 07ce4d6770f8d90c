//! Seams between the chat session and the outside world.
//!
//! The controller talks to the REST backend through [`MessageApi`] and to
//! the socket through [`RealtimeSink`], so its whole flow is testable with
//! stub implementations.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::{MediaAttachment, MediaRef, Message, MessageKind};
use crate::realtime::connection::{ConnectionManager, SendError};
use crate::realtime::envelope::Envelope;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authorized")]
    Unauthorized,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outbound message as the REST backend accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<MediaRef>,
    pub reply_to: Option<String>,
    /// Local correlation id, echoed back in the server ack.
    pub temp_id: String,
}

/// REST surface the session depends on. Implemented by the platform's HTTP
/// client outside this crate.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Loads one history page, newest-first offset semantics: `offset` is
    /// the number of already-loaded messages.
    async fn load_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError>;

    /// Persists a message and returns the server copy.
    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ApiError>;

    /// Uploads an attachment and returns the hosted reference.
    async fn upload_media(
        &self,
        conversation_id: &str,
        attachment: MediaAttachment,
    ) -> Result<MediaRef, ApiError>;
}

/// Fire-and-forget socket sends. The session never blocks on the socket;
/// a failed send falls back to REST.
pub trait RealtimeSink: Send + Sync {
    fn send(&self, envelope: &Envelope) -> Result<(), SendError>;
    fn is_connected(&self) -> bool;
}

impl RealtimeSink for ConnectionManager {
    fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        ConnectionManager::send(self, envelope)
    }

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}

impl<T: RealtimeSink + ?Sized> RealtimeSink for &T {
    fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        (*self).send(envelope)
    }

    fn is_connected(&self) -> bool {
        (*self).is_connected()
    }
}
