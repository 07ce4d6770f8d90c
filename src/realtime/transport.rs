use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// RFC 6455 normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// No close frame received (connection dropped).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// No status code present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Private-range close code the server uses to reject an invalid token.
pub const CLOSE_AUTH_REJECTED: u16 = 4401;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

/// A frame delivered by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Closed { code: u16 },
}

/// Channel pair for one open connection. Dropping `outbound` asks the
/// bridge to close the socket with a normal-closure code.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportFrame>,
}

/// Seam between the connection manager and the concrete socket, so tests
/// can drive an in-memory link.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// Production transport over `tokio-tungstenite`. `open` spawns a bridge
/// task that pumps the split sink/stream to the link's channels.
#[derive(Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|error| TransportError::Handshake(error.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportFrame>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(text) => {
                            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                                let _ = inbound_tx.send(TransportFrame::Closed { code: CLOSE_ABNORMAL });
                                break;
                            }
                        }
                        // Manager dropped the link: close politely.
                        None => {
                            let _ = sink
                                .send(WsMessage::Close(Some(CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "".into(),
                                })))
                                .await;
                            break;
                        }
                    },
                    message = source.next() => match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            if inbound_tx.send(TransportFrame::Text(text.to_string())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame
                                .map(|frame| u16::from(frame.code))
                                .unwrap_or(CLOSE_NO_STATUS);
                            let _ = inbound_tx.send(TransportFrame::Closed { code });
                            break;
                        }
                        // Binary and protocol-level ping/pong frames are not
                        // part of the envelope grammar.
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            tracing::debug!(error = %error, "websocket read failed");
                            let _ = inbound_tx.send(TransportFrame::Closed { code: CLOSE_ABNORMAL });
                            break;
                        }
                        None => {
                            let _ = inbound_tx.send(TransportFrame::Closed { code: CLOSE_ABNORMAL });
                            break;
                        }
                    },
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Builds the connection URL: base plus `token`, `client`, and `version`
/// query parameters.
pub fn build_socket_url(base: &str, token: &str, client: &str, version: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}token={token}&client={client}&version={version}")
}
