//! Inbound frame routing.
//!
//! [`route`] is a pure function from one raw frame to the store actions it
//! implies, so the whole wire-to-state mapping is testable without a socket.
//! [`spawn_dispatch_loop`] is the thin async pump that feeds it.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::message::MessageStatus;
use crate::domain::typing::TypingIndicator;
use crate::store::{ConversationStore, MessagePatch, StoreAction};

use super::connection::{ConnectionManager, SocketEvent};
use super::envelope::{
    ConnectionEvent, Envelope, MessageEvent, PresenceStatus, TypingEvent, UserStatusEvent,
    KIND_CONNECTION, KIND_CONVERSATION_UPDATE, KIND_MESSAGE, KIND_TYPING, KIND_USER_STATUS,
};

const DISPATCH_FRAME_REJECTED: &str = "DISPATCH_FRAME_REJECTED";
const DISPATCH_PONG_REPLY_FAILED: &str = "DISPATCH_PONG_REPLY_FAILED";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown envelope type {0:?}")]
    UnknownKind(String),
    #[error("{kind} envelope is missing conversationId")]
    MissingConversationId { kind: String },
}

/// What one inbound frame asks the client to do.
#[derive(Debug, PartialEq)]
pub enum Routed {
    Apply(StoreAction),
    ReplyPong,
    PongReceived,
}

/// Maps a raw frame to its effects. A bad frame poisons only itself: the
/// caller logs the error and keeps the loop running.
pub fn route(frame: &str) -> Result<Vec<Routed>, ProtocolError> {
    let envelope = Envelope::parse(frame)?;
    match envelope.kind.as_str() {
        KIND_MESSAGE => route_message(&envelope),
        KIND_TYPING => route_typing(&envelope),
        KIND_CONVERSATION_UPDATE => route_conversation_update(&envelope),
        KIND_USER_STATUS => route_user_status(&envelope),
        KIND_CONNECTION => route_connection(&envelope),
        other => Err(ProtocolError::UnknownKind(other.to_owned())),
    }
}

fn require_conversation_id(envelope: &Envelope) -> Result<String, ProtocolError> {
    envelope
        .conversation_id
        .clone()
        .ok_or_else(|| ProtocolError::MissingConversationId {
            kind: envelope.kind.clone(),
        })
}

fn route_message(envelope: &Envelope) -> Result<Vec<Routed>, ProtocolError> {
    let event: MessageEvent = serde_json::from_value(envelope.payload.clone())?;
    let routed = match event {
        MessageEvent::MessageSent {
            message,
            temp_id: Some(temp_id),
        } => vec![Routed::Apply(StoreAction::ReplaceMessage {
            conversation_id: message.conversation_id.clone(),
            temp_id,
            message,
        })],
        // An ack without a correlation id cannot be matched to an optimistic
        // copy; it is stored as a plain upsert.
        MessageEvent::MessageSent {
            message,
            temp_id: None,
        } => vec![Routed::Apply(StoreAction::AddMessage(message))],
        MessageEvent::MessageReceived { message } => {
            vec![Routed::Apply(StoreAction::AddMessage(message))]
        }
        MessageEvent::MessageUpdated {
            message_id,
            content,
            status,
        } => {
            let conversation_id = require_conversation_id(envelope)?;
            let is_edited = if content.is_some() { Some(true) } else { None };
            vec![Routed::Apply(StoreAction::UpdateMessage {
                conversation_id,
                message_id,
                patch: MessagePatch {
                    content,
                    status,
                    is_edited,
                },
            })]
        }
        MessageEvent::MessageDeleted { message_id } => {
            let conversation_id = require_conversation_id(envelope)?;
            vec![Routed::Apply(StoreAction::DeleteMessage {
                conversation_id,
                message_id,
            })]
        }
        MessageEvent::MessageRead {
            message_id,
            user_id,
        } => {
            let conversation_id = require_conversation_id(envelope)?;
            vec![
                Routed::Apply(StoreAction::MarkRead {
                    conversation_id: conversation_id.clone(),
                    user_id,
                    at: envelope.timestamp,
                }),
                Routed::Apply(StoreAction::UpdateMessage {
                    conversation_id,
                    message_id,
                    patch: MessagePatch {
                        status: Some(MessageStatus::Read),
                        ..MessagePatch::default()
                    },
                }),
            ]
        }
    };
    Ok(routed)
}

fn route_typing(envelope: &Envelope) -> Result<Vec<Routed>, ProtocolError> {
    let conversation_id = require_conversation_id(envelope)?;
    let event: TypingEvent = serde_json::from_value(envelope.payload.clone())?;
    let action = match event {
        TypingEvent::TypingStart { user_id, user_name } => {
            StoreAction::SetTyping(TypingIndicator {
                conversation_id,
                user_id,
                user_name,
                timestamp: envelope.timestamp,
            })
        }
        TypingEvent::TypingStop { user_id } => StoreAction::RemoveTyping {
            conversation_id,
            user_id,
        },
    };
    Ok(vec![Routed::Apply(action)])
}

fn route_conversation_update(envelope: &Envelope) -> Result<Vec<Routed>, ProtocolError> {
    let conversation_id = require_conversation_id(envelope)?;
    let patch = serde_json::from_value(envelope.payload.clone())?;
    Ok(vec![Routed::Apply(StoreAction::UpdateConversation {
        conversation_id,
        patch,
    })])
}

fn route_user_status(envelope: &Envelope) -> Result<Vec<Routed>, ProtocolError> {
    let event: UserStatusEvent = serde_json::from_value(envelope.payload.clone())?;
    let action = match event.status {
        PresenceStatus::Online => StoreAction::SetUserOnline {
            user_id: event.user_id,
        },
        PresenceStatus::Offline => StoreAction::SetUserOffline {
            user_id: event.user_id,
        },
    };
    Ok(vec![Routed::Apply(action)])
}

fn route_connection(envelope: &Envelope) -> Result<Vec<Routed>, ProtocolError> {
    let event: ConnectionEvent = serde_json::from_value(envelope.payload.clone())?;
    let routed = match event {
        ConnectionEvent::Ping => vec![Routed::ReplyPong],
        ConnectionEvent::Pong => vec![Routed::PongReceived],
        // Join/leave only travel client-to-server; inbound copies are noise.
        ConnectionEvent::JoinConversation { .. } | ConnectionEvent::LeaveConversation { .. } => {
            Vec::new()
        }
    };
    Ok(routed)
}

/// Bridges the socket event stream into the store until the connection
/// manager is dropped.
pub fn spawn_dispatch_loop(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    store: ConversationStore,
    manager: ConnectionManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SocketEvent::Status(status) => {
                    store.dispatch(StoreAction::SetConnectionStatus(status));
                }
                SocketEvent::Frame(frame) => match route(&frame) {
                    Ok(routed) => {
                        for step in routed {
                            match step {
                                Routed::Apply(action) => store.dispatch(action),
                                Routed::ReplyPong => {
                                    if let Err(error) = manager.send(&Envelope::pong()) {
                                        tracing::debug!(
                                            code = DISPATCH_PONG_REPLY_FAILED,
                                            error = %error,
                                            "could not answer server ping"
                                        );
                                    }
                                }
                                Routed::PongReceived => manager.pong_received(),
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            code = DISPATCH_FRAME_REJECTED,
                            error = %error,
                            "dropping undecodable frame"
                        );
                    }
                },
                SocketEvent::ReconnectExhausted => {
                    store.dispatch(StoreAction::SetError {
                        message: "realtime connection lost, reconnect required".to_owned(),
                    });
                }
                SocketEvent::AuthRejected => {
                    store.dispatch(StoreAction::SetError {
                        message: "realtime session rejected, sign in again".to_owned(),
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::domain::message::{Message, MessageKind, MessageStatus, SenderSnapshot};

    use super::*;

    fn message(id: &str, conversation_id: &str) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: conversation_id.to_owned(),
            sender_id: "u2".to_owned(),
            sender: SenderSnapshot {
                user_id: "u2".to_owned(),
                display_name: "Sam".to_owned(),
                avatar_url: None,
            },
            kind: MessageKind::Text,
            content: "hi".to_owned(),
            media: None,
            status: MessageStatus::Sent,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            is_edited: false,
            is_deleted: false,
            reply_to: None,
        }
    }

    fn frame(kind: &str, payload: serde_json::Value, conversation_id: Option<&str>) -> String {
        let mut value = json!({
            "type": kind,
            "payload": payload,
            "timestamp": "2026-03-01T12:00:00Z",
        });
        if let Some(id) = conversation_id {
            value["conversationId"] = json!(id);
        }
        value.to_string()
    }

    #[test]
    fn received_message_becomes_an_add() {
        let payload = json!({
            "type": "MESSAGE_RECEIVED",
            "message": message("m1", "c1"),
        });

        let routed = route(&frame("MESSAGE", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::AddMessage(message("m1", "c1")))]
        );
    }

    #[test]
    fn ack_with_temp_id_becomes_a_replace() {
        let payload = json!({
            "type": "MESSAGE_SENT",
            "message": message("m42", "c1"),
            "tempId": "tmp-1",
        });

        let routed = route(&frame("MESSAGE", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::ReplaceMessage {
                conversation_id: "c1".to_owned(),
                temp_id: "tmp-1".to_owned(),
                message: message("m42", "c1"),
            })]
        );
    }

    #[test]
    fn ack_without_temp_id_falls_back_to_an_upsert() {
        let payload = json!({
            "type": "MESSAGE_SENT",
            "message": message("m42", "c1"),
        });

        let routed = route(&frame("MESSAGE", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::AddMessage(message("m42", "c1")))]
        );
    }

    #[test]
    fn read_receipt_marks_read_and_updates_the_message() {
        let payload = json!({
            "type": "MESSAGE_READ",
            "messageId": "m1",
            "userId": "u2",
        });

        let routed = route(&frame("MESSAGE", payload, Some("c1"))).expect("route");
        assert_eq!(routed.len(), 2);
        assert!(matches!(
            routed[0],
            Routed::Apply(StoreAction::MarkRead { ref conversation_id, ref user_id, .. })
                if conversation_id == "c1" && user_id == "u2"
        ));
        assert!(matches!(
            routed[1],
            Routed::Apply(StoreAction::UpdateMessage { ref message_id, ref patch, .. })
                if message_id == "m1" && patch.status == Some(MessageStatus::Read)
        ));
    }

    #[test]
    fn edits_flag_the_message_as_edited() {
        let payload = json!({
            "type": "MESSAGE_UPDATED",
            "messageId": "m1",
            "content": "fixed",
        });

        let routed = route(&frame("MESSAGE", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::UpdateMessage {
                conversation_id: "c1".to_owned(),
                message_id: "m1".to_owned(),
                patch: MessagePatch {
                    content: Some("fixed".to_owned()),
                    status: None,
                    is_edited: Some(true),
                },
            })]
        );
    }

    #[test]
    fn message_update_without_conversation_id_is_rejected() {
        let payload = json!({
            "type": "MESSAGE_UPDATED",
            "messageId": "m1",
            "content": "fixed",
        });

        let error = route(&frame("MESSAGE", payload, None)).expect_err("must fail");
        assert!(matches!(
            error,
            ProtocolError::MissingConversationId { ref kind } if kind == "MESSAGE"
        ));
    }

    #[test]
    fn typing_start_carries_the_envelope_timestamp() {
        let payload = json!({
            "type": "TYPING_START",
            "userId": "u2",
            "userName": "Sam",
        });

        let routed = route(&frame("TYPING", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::SetTyping(TypingIndicator {
                conversation_id: "c1".to_owned(),
                user_id: "u2".to_owned(),
                user_name: "Sam".to_owned(),
                timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            }))]
        );
    }

    #[test]
    fn typing_stop_removes_the_indicator() {
        let payload = json!({ "type": "TYPING_STOP", "userId": "u2" });

        let routed = route(&frame("TYPING", payload, Some("c1"))).expect("route");
        assert_eq!(
            routed,
            vec![Routed::Apply(StoreAction::RemoveTyping {
                conversation_id: "c1".to_owned(),
                user_id: "u2".to_owned(),
            })]
        );
    }

    #[test]
    fn conversation_update_becomes_a_patch() {
        let payload = json!({ "isPinned": true });

        let routed = route(&frame("CONVERSATION_UPDATE", payload, Some("c1"))).expect("route");
        assert!(matches!(
            routed[0],
            Routed::Apply(StoreAction::UpdateConversation { ref conversation_id, ref patch })
                if conversation_id == "c1" && patch.is_pinned == Some(true)
        ));
    }

    #[test]
    fn presence_toggles_online_state() {
        let online = json!({ "userId": "u2", "status": "ONLINE" });
        let offline = json!({ "userId": "u2", "status": "OFFLINE" });

        assert_eq!(
            route(&frame("USER_STATUS", online, None)).expect("route"),
            vec![Routed::Apply(StoreAction::SetUserOnline {
                user_id: "u2".to_owned()
            })]
        );
        assert_eq!(
            route(&frame("USER_STATUS", offline, None)).expect("route"),
            vec![Routed::Apply(StoreAction::SetUserOffline {
                user_id: "u2".to_owned()
            })]
        );
    }

    #[test]
    fn server_ping_asks_for_a_pong() {
        let payload = json!({ "type": "PING" });
        let routed = route(&frame("CONNECTION", payload, None)).expect("route");
        assert_eq!(routed, vec![Routed::ReplyPong]);
    }

    #[test]
    fn server_pong_feeds_the_liveness_tracker() {
        let payload = json!({ "type": "PONG" });
        let routed = route(&frame("CONNECTION", payload, None)).expect("route");
        assert_eq!(routed, vec![Routed::PongReceived]);
    }

    #[test]
    fn unknown_envelope_kind_is_an_error() {
        let error = route(&frame("TELEMETRY", json!({}), None)).expect_err("must fail");
        assert!(matches!(error, ProtocolError::UnknownKind(ref kind) if kind == "TELEMETRY"));
    }

    #[test]
    fn garbage_frame_is_a_decode_error() {
        let error = route("not json").expect_err("must fail");
        assert!(matches!(error, ProtocolError::Decode(_)));
    }

    mod pump {
        use std::collections::VecDeque;
        use std::sync::{Arc, Mutex};

        use async_trait::async_trait;
        use tokio::sync::mpsc;

        use crate::domain::status::ConnectionStatus;
        use crate::infra::config::RealtimeConfig;
        use crate::realtime::transport::{Transport, TransportError, TransportFrame, TransportLink};

        use super::*;

        /// Always-succeeding transport; the server side of each opened link
        /// is kept for the test to drive and observe.
        struct StubTransport {
            sessions: Mutex<VecDeque<(mpsc::UnboundedSender<TransportFrame>, mpsc::UnboundedReceiver<String>)>>,
        }

        impl StubTransport {
            fn new() -> Arc<Self> {
                Arc::new(Self {
                    sessions: Mutex::new(VecDeque::new()),
                })
            }

            fn next_session(
                &self,
            ) -> (mpsc::UnboundedSender<TransportFrame>, mpsc::UnboundedReceiver<String>) {
                self.sessions
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .expect("a session must have been opened")
            }
        }

        #[async_trait]
        impl Transport for StubTransport {
            async fn open(&self, _url: &str) -> Result<TransportLink, TransportError> {
                let (outbound_tx, from_client) = mpsc::unbounded_channel();
                let (to_client, inbound_rx) = mpsc::unbounded_channel();
                self.sessions
                    .lock()
                    .expect("lock")
                    .push_back((to_client, from_client));
                Ok(TransportLink {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                })
            }
        }

        fn manager() -> (ConnectionManager, Arc<StubTransport>) {
            let transport = StubTransport::new();
            let (manager, _events) =
                ConnectionManager::spawn(RealtimeConfig::default(), "tok", transport.clone());
            (manager, transport)
        }

        #[tokio::test(start_paused = true)]
        async fn pump_applies_statuses_and_frames_to_the_store() {
            let store = ConversationStore::new("me");
            let (manager, _transport) = manager();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let pump = spawn_dispatch_loop(event_rx, store.clone(), manager);

            let received = frame(
                "MESSAGE",
                json!({ "type": "MESSAGE_RECEIVED", "message": message("m1", "c1") }),
                Some("c1"),
            );
            event_tx
                .send(SocketEvent::Status(ConnectionStatus::Connected))
                .expect("send status");
            event_tx
                .send(SocketEvent::Frame("not json".to_owned()))
                .expect("send garbage");
            event_tx
                .send(SocketEvent::Frame(received))
                .expect("send frame");

            drop(event_tx);
            pump.await.expect("pump must finish");

            // The bad frame was dropped without killing the loop.
            assert_eq!(store.connection_status(), ConnectionStatus::Connected);
            assert!(store.find_message("c1", "m1").is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn pump_surfaces_terminal_connection_events_as_errors() {
            let store = ConversationStore::new("me");
            let (manager, _transport) = manager();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let pump = spawn_dispatch_loop(event_rx, store.clone(), manager);

            event_tx
                .send(SocketEvent::ReconnectExhausted)
                .expect("send exhausted");
            drop(event_tx);
            pump.await.expect("pump must finish");

            assert!(store
                .last_error()
                .expect("an error must be surfaced")
                .contains("reconnect"));
        }

        #[tokio::test(start_paused = true)]
        async fn pump_answers_server_pings_over_the_socket() {
            let store = ConversationStore::new("me");
            let (manager, transport) = manager();
            manager.connect().await.expect("connect");
            let (_to_client, mut from_client) = transport.next_session();

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let pump = spawn_dispatch_loop(event_rx, store, manager);

            event_tx
                .send(SocketEvent::Frame(frame(
                    "CONNECTION",
                    json!({ "type": "PING" }),
                    None,
                )))
                .expect("send ping");
            drop(event_tx);
            pump.await.expect("pump must finish");

            let reply = from_client.recv().await.expect("pong frame");
            assert!(reply.contains("\"PONG\""));
        }
    }
}
