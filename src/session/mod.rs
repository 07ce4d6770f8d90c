//! Per-conversation session flow on top of the store and the socket.

pub mod contracts;
pub mod controller;
pub mod typing;

pub use contracts::{ApiError, MessageApi, RealtimeSink, SendMessageRequest};
pub use controller::{ChatSessionController, LoadMessagesError, SendMessageError};
pub use typing::TypingMonitor;
