use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::{
    conversation::Conversation,
    message::Message,
    status::ConnectionStatus,
    typing::TypingIndicator,
};

use super::action::{MessagePatch, StoreAction};

const PATCH_UNKNOWN_CONVERSATION: &str = "STORE_PATCH_UNKNOWN_CONVERSATION";
const UPDATE_UNKNOWN_MESSAGE: &str = "STORE_UPDATE_UNKNOWN_MESSAGE";
const DELETE_UNKNOWN_MESSAGE: &str = "STORE_DELETE_UNKNOWN_MESSAGE";
const REPLACE_MISSING_TEMP: &str = "STORE_REPLACE_MISSING_TEMP";

/// In-memory session state owned exclusively by the store for the life of
/// the session. Mutated only through [`reduce`].
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub(crate) local_user_id: String,
    pub(crate) conversations: HashMap<String, Conversation>,
    pub(crate) messages: HashMap<String, Vec<Message>>,
    pub(crate) drafts: HashMap<String, String>,
    pub(crate) typing: HashMap<String, Vec<TypingIndicator>>,
    pub(crate) online_users: HashSet<String>,
    pub(crate) connection_status: ConnectionStatus,
    pub(crate) last_error: Option<String>,
}

impl StoreState {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            ..Self::default()
        }
    }
}

/// Applies one action to the state. Every transition lives in this match so
/// the full mutation surface is replayable and unit-testable.
pub fn reduce(state: &mut StoreState, action: StoreAction) {
    match action {
        StoreAction::SetConversations(conversations) => {
            state.conversations = conversations
                .into_iter()
                .map(|conversation| (conversation.id.clone(), conversation))
                .collect();
        }
        StoreAction::AddConversation(conversation) => {
            state
                .conversations
                .insert(conversation.id.clone(), conversation);
        }
        StoreAction::UpdateConversation {
            conversation_id,
            patch,
        } => match state.conversations.get_mut(&conversation_id) {
            Some(conversation) => patch.apply_to(conversation),
            None => tracing::warn!(
                code = PATCH_UNKNOWN_CONVERSATION,
                conversation_id,
                "conversation update dropped: id not in store"
            ),
        },
        StoreAction::RemoveConversation { conversation_id } => {
            state.conversations.remove(&conversation_id);
            state.messages.remove(&conversation_id);
            state.drafts.remove(&conversation_id);
            state.typing.remove(&conversation_id);
        }

        StoreAction::SetMessages {
            conversation_id,
            messages,
        } => {
            let list = state.messages.entry(conversation_id).or_default();
            for incoming in messages {
                match list.iter_mut().find(|stored| stored.id == incoming.id) {
                    Some(stored) => *stored = incoming,
                    None => list.push(incoming),
                }
            }
            list.sort_by_key(|message| message.timestamp);
        }
        StoreAction::AddMessage(message) => add_message(state, message),
        StoreAction::UpdateMessage {
            conversation_id,
            message_id,
            patch,
        } => update_message(state, &conversation_id, &message_id, patch),
        StoreAction::DeleteMessage {
            conversation_id,
            message_id,
        } => delete_message(state, &conversation_id, &message_id),
        StoreAction::ReplaceMessage {
            conversation_id,
            temp_id,
            message,
        } => replace_message(state, &conversation_id, &temp_id, message),

        StoreAction::SetDraft {
            conversation_id,
            text,
        } => {
            state.drafts.insert(conversation_id, text);
        }
        StoreAction::ClearDraft { conversation_id } => {
            state.drafts.remove(&conversation_id);
        }

        StoreAction::SetTyping(indicator) => {
            let list = state
                .typing
                .entry(indicator.conversation_id.clone())
                .or_default();
            match list
                .iter_mut()
                .find(|existing| existing.user_id == indicator.user_id)
            {
                Some(existing) => *existing = indicator,
                None => list.push(indicator),
            }
        }
        StoreAction::RemoveTyping {
            conversation_id,
            user_id,
        } => {
            if let Some(list) = state.typing.get_mut(&conversation_id) {
                list.retain(|indicator| indicator.user_id != user_id);
            }
        }

        StoreAction::SetUserOnline { user_id } => {
            state.online_users.insert(user_id);
        }
        StoreAction::SetUserOffline { user_id } => {
            state.online_users.remove(&user_id);
        }

        StoreAction::SetConnectionStatus(status) => {
            state.connection_status = status;
            if !status.is_connected() {
                // Presence is rebuilt from the stream each session.
                state.online_users.clear();
            }
        }

        StoreAction::SetError { message } => {
            state.last_error = Some(message);
        }
        StoreAction::ClearError => {
            state.last_error = None;
        }

        StoreAction::MarkRead {
            conversation_id,
            user_id,
            at,
        } => mark_read(state, &conversation_id, &user_id, at),
    }
}

fn add_message(state: &mut StoreState, message: Message) {
    let conversation_id = message.conversation_id.clone();
    let list = state.messages.entry(conversation_id.clone()).or_default();

    if let Some(stored) = list.iter_mut().find(|stored| stored.id == message.id) {
        // Duplicate delivery: replace in place, no side effects.
        *stored = message;
        return;
    }

    let insert_at = list.partition_point(|stored| stored.timestamp <= message.timestamp);
    list.insert(insert_at, message.clone());

    // The sender's own message ends any typing indicator they had.
    if let Some(typing) = state.typing.get_mut(&conversation_id) {
        typing.retain(|indicator| indicator.user_id != message.sender_id);
    }

    if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
        let is_latest = conversation
            .last_message_at
            .is_none_or(|at| message.timestamp >= at);
        if is_latest {
            conversation.record_last_message(&message);
        }

        if message.sender_id != state.local_user_id {
            conversation.unread_count += 1;
        }
    }
}

fn update_message(
    state: &mut StoreState,
    conversation_id: &str,
    message_id: &str,
    patch: MessagePatch,
) {
    let Some(stored) = state
        .messages
        .get_mut(conversation_id)
        .and_then(|list| list.iter_mut().find(|message| message.id == message_id))
    else {
        tracing::warn!(
            code = UPDATE_UNKNOWN_MESSAGE,
            conversation_id,
            message_id,
            "message update dropped: id not in store"
        );
        return;
    };

    if let Some(content) = patch.content {
        stored.content = content;
    }

    if let Some(status) = patch.status {
        stored.status = status;
    }

    if let Some(edited) = patch.is_edited {
        stored.is_edited = edited;
    }
}

fn delete_message(state: &mut StoreState, conversation_id: &str, message_id: &str) {
    let Some(stored) = state
        .messages
        .get_mut(conversation_id)
        .and_then(|list| list.iter_mut().find(|message| message.id == message_id))
    else {
        tracing::warn!(
            code = DELETE_UNKNOWN_MESSAGE,
            conversation_id,
            message_id,
            "message delete dropped: id not in store"
        );
        return;
    };

    stored.is_deleted = true;

    if let Some(conversation) = state.conversations.get_mut(conversation_id) {
        if let Some(last) = conversation.last_message.as_deref_mut() {
            if last.id == message_id {
                last.is_deleted = true;
            }
        }
    }
}

fn replace_message(
    state: &mut StoreState,
    conversation_id: &str,
    temp_id: &str,
    message: Message,
) {
    let list = state
        .messages
        .entry(conversation_id.to_owned())
        .or_default();

    let had_temp = list.iter().any(|stored| stored.id == temp_id);
    if !had_temp {
        tracing::warn!(
            code = REPLACE_MISSING_TEMP,
            conversation_id,
            temp_id,
            "reconciliation found no pending message; applying ack as upsert"
        );
    }

    // Never leave two ids for one logical message behind.
    list.retain(|stored| stored.id != temp_id && stored.id != message.id);
    let insert_at = list.partition_point(|stored| stored.timestamp <= message.timestamp);
    list.insert(insert_at, message.clone());

    if let Some(conversation) = state.conversations.get_mut(conversation_id) {
        let last_refers_here = conversation
            .last_message
            .as_deref()
            .is_some_and(|last| last.id == temp_id || last.id == message.id);
        let is_latest = conversation
            .last_message_at
            .is_none_or(|at| message.timestamp >= at);
        if last_refers_here || is_latest {
            conversation.record_last_message(&message);
        }
    }
}

fn mark_read(state: &mut StoreState, conversation_id: &str, user_id: &str, at: DateTime<Utc>) {
    let Some(conversation) = state.conversations.get_mut(conversation_id) else {
        return;
    };

    // Idempotent: the read watermark only moves forward, and the counter is
    // already clamped at zero.
    let watermark = conversation
        .last_read_at
        .entry(user_id.to_owned())
        .or_insert(at);
    if at > *watermark {
        *watermark = at;
    }

    if user_id == state.local_user_id {
        conversation.unread_count = 0;
    }
}
