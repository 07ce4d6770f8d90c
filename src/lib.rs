//! Realtime synchronization layer for a creator-chat client.
//!
//! The crate keeps one shared [`store::ConversationStore`] in sync with a
//! chat backend over a WebSocket plus a REST fallback:
//!
//! - [`realtime::ConnectionManager`] owns the socket: reconnects with
//!   exponential backoff, heartbeats, and close-code handling.
//! - [`realtime::dispatcher`] decodes inbound frames into store actions.
//! - [`store`] is a reducer over all conversation, message, draft, typing
//!   and presence state.
//! - [`session::ChatSessionController`] drives one open conversation:
//!   drafts, typing debounce, optimistic sends and history paging.
//!
//! The HTTP client and the UI live outside this crate, behind the
//! [`session::MessageApi`] and [`store::ConversationStore::subscribe`] seams.

pub mod domain;
pub mod infra;
pub mod realtime;
pub mod session;
pub mod store;
