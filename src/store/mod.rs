//! Reducer-style conversation store: the single owner of all session state.
//!
//! Every mutation, local optimistic or remote-derived, goes through
//! [`ConversationStore::dispatch`], which applies the pure [`reduce`]
//! function under one lock. Components never read-modify-write fields
//! directly, so there is a total order of state transitions.

mod action;
mod reducer;

pub use action::{MessagePatch, StoreAction};
pub use reducer::{reduce, StoreState};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;

use crate::domain::{
    conversation::Conversation, message::Message, status::ConnectionStatus,
    typing::TypingIndicator,
};

/// Clonable handle to the shared store. Subscribers observe a bumped
/// revision after every dispatch and re-query the snapshot they need.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<StoreState>>,
    revision_tx: Arc<watch::Sender<u64>>,
}

impl ConversationStore {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(StoreState::new(local_user_id))),
            revision_tx: Arc::new(revision_tx),
        }
    }

    /// Applies one action and notifies subscribers.
    pub fn dispatch(&self, action: StoreAction) {
        if let Ok(mut state) = self.inner.lock() {
            reduce(&mut state, action);
        }
        self.revision_tx.send_modify(|revision| *revision += 1);
    }

    /// Change notification: the value is a revision counter, not state.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    fn read<T>(&self, query: impl FnOnce(&StoreState) -> T) -> T
    where
        T: Default,
    {
        self.inner
            .lock()
            .map(|state| query(&state))
            .unwrap_or_default()
    }

    pub fn local_user_id(&self) -> String {
        self.read(|state| state.local_user_id.clone())
    }

    /// Conversation list view: pinned first, then most recent activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.read(|state| {
            let mut conversations: Vec<Conversation> =
                state.conversations.values().cloned().collect();
            conversations.sort_by(|a, b| {
                b.is_pinned
                    .cmp(&a.is_pinned)
                    .then(b.last_message_at.cmp(&a.last_message_at))
                    .then(a.id.cmp(&b.id))
            });
            conversations
        })
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.read(|state| state.conversations.get(conversation_id).cloned())
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.read(|state| {
            state
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_default()
        })
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.read(|state| {
            state
                .messages
                .get(conversation_id)
                .map(Vec::len)
                .unwrap_or_default()
        })
    }

    pub fn find_message(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        self.read(|state| {
            state
                .messages
                .get(conversation_id)
                .and_then(|list| list.iter().find(|message| message.id == message_id))
                .cloned()
        })
    }

    pub fn draft(&self, conversation_id: &str) -> Option<String> {
        self.read(|state| state.drafts.get(conversation_id).cloned())
    }

    /// Users typing in the conversation right now, with expired indicators
    /// pruned at read time.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<TypingIndicator> {
        let now = Utc::now();
        self.read(|state| {
            state
                .typing
                .get(conversation_id)
                .map(|list| {
                    list.iter()
                        .filter(|indicator| indicator.is_active_at(now))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn online_users(&self) -> HashSet<String> {
        self.read(|state| state.online_users.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.read(|state| state.online_users.contains(user_id))
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.read(|state| state.connection_status)
    }

    pub fn last_error(&self) -> Option<String> {
        self.read(|state| state.last_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::{
        conversation::ConversationKind,
        message::{MessageKind, MessageStatus, SenderSnapshot},
    };

    use super::*;

    fn conversation(id: &str, pinned: bool, last_at_seconds: Option<i64>) -> Conversation {
        let mut conversation = Conversation::new(id, ConversationKind::Direct);
        conversation.is_pinned = pinned;
        conversation.last_message_at = last_at_seconds
            .map(|s| Utc.timestamp_opt(1_700_000_000 + s, 0).single().expect("valid timestamp"));
        conversation
    }

    #[test]
    fn conversation_view_sorts_pinned_first_then_recent_first() {
        let store = ConversationStore::new("me");
        store.dispatch(StoreAction::AddConversation(conversation("stale", false, Some(1))));
        store.dispatch(StoreAction::AddConversation(conversation("fresh", false, Some(9))));
        store.dispatch(StoreAction::AddConversation(conversation("pinned", true, Some(2))));
        store.dispatch(StoreAction::AddConversation(conversation("empty", false, None)));

        let order: Vec<String> = store
            .conversations()
            .into_iter()
            .map(|c| c.id)
            .collect();

        assert_eq!(order, vec!["pinned", "fresh", "stale", "empty"]);
    }

    #[test]
    fn dispatch_bumps_the_revision_for_subscribers() {
        let store = ConversationStore::new("me");
        let rx = store.subscribe();
        let before = *rx.borrow();

        store.dispatch(StoreAction::SetConnectionStatus(ConnectionStatus::Connecting));

        assert_eq!(*rx.borrow(), before + 1);
    }

    #[test]
    fn typing_query_prunes_expired_indicators() {
        let store = ConversationStore::new("me");
        let now = Utc::now();
        store.dispatch(StoreAction::SetTyping(TypingIndicator {
            conversation_id: "c1".to_owned(),
            user_id: "fresh".to_owned(),
            user_name: "fresh".to_owned(),
            timestamp: now,
        }));
        store.dispatch(StoreAction::SetTyping(TypingIndicator {
            conversation_id: "c1".to_owned(),
            user_id: "stale".to_owned(),
            user_name: "stale".to_owned(),
            timestamp: now - Duration::seconds(10),
        }));

        let typing = store.typing_users("c1");

        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].user_id, "fresh");
    }

    #[test]
    fn drafts_survive_reads_from_independent_handles() {
        let store = ConversationStore::new("me");
        store.dispatch(StoreAction::SetDraft {
            conversation_id: "c1".to_owned(),
            text: "half-typed thought".to_owned(),
        });

        let other_handle = store.clone();

        assert_eq!(
            other_handle.draft("c1").as_deref(),
            Some("half-typed thought")
        );
    }

    #[test]
    fn message_queries_reflect_store_contents() {
        let store = ConversationStore::new("me");
        store.dispatch(StoreAction::AddConversation(conversation("c1", false, None)));
        store.dispatch(StoreAction::AddMessage(Message {
            id: "m1".to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: "u1".to_owned(),
            sender: SenderSnapshot {
                user_id: "u1".to_owned(),
                display_name: "u1".to_owned(),
                avatar_url: None,
            },
            kind: MessageKind::Text,
            content: "hello".to_owned(),
            media: None,
            status: MessageStatus::Sent,
            timestamp: Utc::now(),
            is_edited: false,
            is_deleted: false,
            reply_to: None,
        }));

        assert_eq!(store.message_count("c1"), 1);
        assert_eq!(store.message_count("ghost"), 0);
        assert!(store.find_message("c1", "m1").is_some());
        assert!(store.find_message("c1", "m2").is_none());
    }
}
