//! One open conversation: drafts, typing, optimistic sends, history paging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::domain::message::{
    new_temp_id, MediaAttachment, MediaRef, Message, MessageKind, MessageStatus, SenderSnapshot,
};
use crate::infra::config::SessionConfig;
use crate::realtime::envelope::Envelope;
use crate::store::{ConversationStore, MessagePatch, StoreAction};

use super::contracts::{ApiError, MessageApi, RealtimeSink, SendMessageRequest};
use super::typing::TypingMonitor;

const SESSION_SOCKET_SEND_FAILED: &str = "SESSION_SOCKET_SEND_FAILED";
const SESSION_REST_FALLBACK: &str = "SESSION_REST_FALLBACK";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendMessageError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("message {0} is not retryable")]
    NotRetryable(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("service is temporarily unavailable")]
    TemporarilyUnavailable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadMessagesError {
    #[error("not authorized")]
    Unauthorized,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("service is temporarily unavailable")]
    TemporarilyUnavailable,
}

fn map_send_error(error: ApiError) -> SendMessageError {
    match error {
        ApiError::Unauthorized => SendMessageError::Unauthorized,
        ApiError::ConversationNotFound => SendMessageError::ConversationNotFound,
        ApiError::RateLimited => SendMessageError::RateLimited,
        ApiError::Unavailable(_) | ApiError::Other(_) => SendMessageError::TemporarilyUnavailable,
    }
}

fn map_load_error(error: ApiError) -> LoadMessagesError {
    match error {
        ApiError::Unauthorized => LoadMessagesError::Unauthorized,
        ApiError::ConversationNotFound => LoadMessagesError::ConversationNotFound,
        ApiError::RateLimited | ApiError::Unavailable(_) | ApiError::Other(_) => {
            LoadMessagesError::TemporarilyUnavailable
        }
    }
}

/// Controller for one open conversation. All state lives in the store;
/// the controller only sequences the side effects around it.
pub struct ChatSessionController {
    conversation_id: String,
    local_user_id: String,
    local_user_name: String,
    store: ConversationStore,
    api: Arc<dyn MessageApi>,
    sink: Arc<dyn RealtimeSink>,
    typing: TypingMonitor,
    page_size: usize,
    history_exhausted: AtomicBool,
}

impl ChatSessionController {
    /// Opens the session: announces the subscription on the socket and arms
    /// the typing watchdog.
    pub fn open(
        conversation_id: impl Into<String>,
        local_user_name: impl Into<String>,
        store: ConversationStore,
        api: Arc<dyn MessageApi>,
        sink: Arc<dyn RealtimeSink>,
        config: &SessionConfig,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let local_user_id = store.local_user_id();

        send_best_effort(&*sink, &Envelope::join_conversation(&conversation_id));

        let typing = {
            let sink = Arc::clone(&sink);
            let conversation_id = conversation_id.clone();
            let user_id = local_user_id.clone();
            TypingMonitor::spawn(Duration::from_millis(config.typing_timeout_ms), move || {
                send_best_effort(&*sink, &Envelope::typing_stopped(&conversation_id, &user_id));
            })
        };

        Self {
            conversation_id,
            local_user_id,
            local_user_name: local_user_name.into(),
            store,
            api,
            sink,
            typing,
            page_size: config.page_size,
            history_exhausted: AtomicBool::new(false),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Mirrors the composer text into the draft and debounces the typing
    /// announcement. Clearing the composer ends the typing run.
    pub fn on_input(&self, text: &str) {
        if text.is_empty() {
            self.store.dispatch(StoreAction::ClearDraft {
                conversation_id: self.conversation_id.clone(),
            });
            self.stop_typing();
            return;
        }

        self.store.dispatch(StoreAction::SetDraft {
            conversation_id: self.conversation_id.clone(),
            text: text.to_owned(),
        });
        if self.typing.poke() {
            send_best_effort(
                &*self.sink,
                &Envelope::typing_started(
                    &self.conversation_id,
                    &self.local_user_id,
                    &self.local_user_name,
                ),
            );
        }
    }

    /// Optimistic text send. The local copy appears immediately with a temp
    /// id; the socket ack (or the REST response) replaces it with the server
    /// copy. Returns the temp id so a failed send can be retried. The draft
    /// is cleared only once delivery is accepted; on failure it stays so
    /// the text is not lost.
    pub async fn send_text(&self, text: &str) -> Result<String, SendMessageError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendMessageError::EmptyMessage);
        }

        self.stop_typing();

        let optimistic = self.optimistic_message(MessageKind::Text, text.to_owned(), None);
        let temp_id = optimistic.id.clone();
        self.store
            .dispatch(StoreAction::AddMessage(optimistic.clone()));

        self.deliver(optimistic).await?;
        self.store.dispatch(StoreAction::ClearDraft {
            conversation_id: self.conversation_id.clone(),
        });
        Ok(temp_id)
    }

    /// Re-runs delivery for a message that previously failed.
    pub async fn retry(&self, temp_id: &str) -> Result<(), SendMessageError> {
        let message = self
            .store
            .find_message(&self.conversation_id, temp_id)
            .filter(|message| message.is_pending() && message.status == MessageStatus::Failed)
            .ok_or_else(|| SendMessageError::NotRetryable(temp_id.to_owned()))?;

        self.store.dispatch(StoreAction::UpdateMessage {
            conversation_id: self.conversation_id.clone(),
            message_id: temp_id.to_owned(),
            patch: MessagePatch {
                status: Some(MessageStatus::Sending),
                ..MessagePatch::default()
            },
        });

        let mut retried = message;
        retried.status = MessageStatus::Sending;
        let content = retried.content.clone();
        self.deliver(retried).await?;

        // The draft kept the failed text; drop it now that it went out,
        // unless the composer has moved on to something new.
        if self.store.draft(&self.conversation_id).as_deref() == Some(content.as_str()) {
            self.store.dispatch(StoreAction::ClearDraft {
                conversation_id: self.conversation_id.clone(),
            });
        }
        Ok(())
    }

    /// Uploads an attachment, then sends the message over REST. The
    /// optimistic copy references the local file until the server copy
    /// replaces it.
    pub async fn send_media(
        &self,
        attachment: MediaAttachment,
        caption: &str,
    ) -> Result<String, SendMessageError> {
        let kind = kind_for_mime(&attachment.mime_type);
        let local_ref = MediaRef {
            url: attachment.local_uri.clone(),
            mime_type: Some(attachment.mime_type.clone()),
            size_bytes: Some(attachment.size_bytes),
            duration_ms: attachment.duration_ms,
        };
        let optimistic =
            self.optimistic_message(kind, caption.trim().to_owned(), Some(local_ref));
        let temp_id = optimistic.id.clone();
        self.store
            .dispatch(StoreAction::AddMessage(optimistic.clone()));

        let uploaded = match self
            .api
            .upload_media(&self.conversation_id, attachment)
            .await
        {
            Ok(media) => media,
            Err(error) => {
                self.mark_failed(&temp_id);
                return Err(map_send_error(error));
            }
        };

        let mut request = self.request_for(&optimistic);
        request.media = Some(uploaded);
        match self.api.send_message(request).await {
            Ok(server_message) => {
                self.store.dispatch(StoreAction::ReplaceMessage {
                    conversation_id: self.conversation_id.clone(),
                    temp_id: temp_id.clone(),
                    message: server_message,
                });
                Ok(temp_id)
            }
            Err(error) => {
                self.mark_failed(&temp_id);
                Err(map_send_error(error))
            }
        }
    }

    /// Loads the next history page. Returns how many messages the page
    /// held; `Ok(0)` once the backend has no older messages.
    pub async fn load_more(&self) -> Result<usize, LoadMessagesError> {
        if self.history_exhausted.load(Ordering::Acquire) {
            return Ok(0);
        }

        let offset = self.store.message_count(&self.conversation_id);
        let page = self
            .api
            .load_messages(&self.conversation_id, offset, self.page_size)
            .await
            .map_err(map_load_error)?;

        if page.len() < self.page_size {
            self.history_exhausted.store(true, Ordering::Release);
        }
        let loaded = page.len();
        if loaded > 0 {
            self.store.dispatch(StoreAction::SetMessages {
                conversation_id: self.conversation_id.clone(),
                messages: page,
            });
        }
        Ok(loaded)
    }

    /// Marks the conversation read up to its newest incoming message, both
    /// locally and on the wire.
    pub fn mark_read(&self) {
        let newest_incoming = self
            .store
            .messages(&self.conversation_id)
            .into_iter()
            .rev()
            .find(|message| message.sender_id != self.local_user_id);
        let Some(newest) = newest_incoming else {
            return;
        };

        self.store.dispatch(StoreAction::MarkRead {
            conversation_id: self.conversation_id.clone(),
            user_id: self.local_user_id.clone(),
            at: Utc::now(),
        });
        send_best_effort(
            &*self.sink,
            &Envelope::mark_read(&self.conversation_id, &newest.id, &self.local_user_id),
        );
    }

    /// Ends the session: stops typing, leaves the socket subscription. The
    /// draft survives for the next open.
    pub fn close(&self) {
        self.stop_typing();
        self.typing.shutdown();
        send_best_effort(
            &*self.sink,
            &Envelope::leave_conversation(&self.conversation_id),
        );
    }

    fn stop_typing(&self) {
        if self.typing.stop() {
            send_best_effort(
                &*self.sink,
                &Envelope::typing_stopped(&self.conversation_id, &self.local_user_id),
            );
        }
    }

    fn optimistic_message(
        &self,
        kind: MessageKind,
        content: String,
        media: Option<MediaRef>,
    ) -> Message {
        Message {
            id: new_temp_id(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.local_user_id.clone(),
            sender: SenderSnapshot {
                user_id: self.local_user_id.clone(),
                display_name: self.local_user_name.clone(),
                avatar_url: None,
            },
            kind,
            content,
            media,
            status: MessageStatus::Sending,
            timestamp: Utc::now(),
            is_edited: false,
            is_deleted: false,
            reply_to: None,
        }
    }

    fn request_for(&self, message: &Message) -> SendMessageRequest {
        SendMessageRequest {
            conversation_id: message.conversation_id.clone(),
            kind: message.kind,
            content: message.content.clone(),
            media: message.media.clone(),
            reply_to: message.reply_to.clone(),
            temp_id: message.id.clone(),
        }
    }

    /// Socket first, REST as fallback. The socket path resolves through the
    /// ack frame; the REST path reconciles inline.
    async fn deliver(&self, optimistic: Message) -> Result<(), SendMessageError> {
        if self.sink.is_connected()
            && self
                .sink
                .send(&Envelope::chat_message(&optimistic))
                .is_ok()
        {
            return Ok(());
        }

        tracing::debug!(
            code = SESSION_REST_FALLBACK,
            conversation_id = %self.conversation_id,
            "socket unavailable, sending over rest"
        );
        match self.api.send_message(self.request_for(&optimistic)).await {
            Ok(server_message) => {
                self.store.dispatch(StoreAction::ReplaceMessage {
                    conversation_id: self.conversation_id.clone(),
                    temp_id: optimistic.id,
                    message: server_message,
                });
                Ok(())
            }
            Err(error) => {
                self.mark_failed(&optimistic.id);
                Err(map_send_error(error))
            }
        }
    }

    fn mark_failed(&self, temp_id: &str) {
        self.store.dispatch(StoreAction::UpdateMessage {
            conversation_id: self.conversation_id.clone(),
            message_id: temp_id.to_owned(),
            patch: MessagePatch {
                status: Some(MessageStatus::Failed),
                ..MessagePatch::default()
            },
        });
    }
}

fn kind_for_mime(mime_type: &str) -> MessageKind {
    if mime_type.starts_with("image/") {
        MessageKind::Image
    } else if mime_type.starts_with("audio/") {
        MessageKind::Audio
    } else if mime_type.starts_with("video/") {
        MessageKind::Video
    } else {
        MessageKind::File
    }
}

fn send_best_effort(sink: &dyn RealtimeSink, envelope: &Envelope) {
    if let Err(error) = sink.send(envelope) {
        tracing::debug!(
            code = SESSION_SOCKET_SEND_FAILED,
            error = %error,
            "dropping non-critical frame"
        );
    }
}
