use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use crate::domain::status::ConnectionStatus;
use crate::infra::config::RealtimeConfig;

use super::envelope::Envelope;
use super::transport::{
    build_socket_url, Transport, TransportError, TransportFrame, TransportLink,
    CLOSE_AUTH_REJECTED, CLOSE_NORMAL,
};

const CONNECTION_OPEN_FAILED: &str = "CONNECTION_OPEN_FAILED";
const CONNECTION_CLOSED_ABNORMALLY: &str = "CONNECTION_CLOSED_ABNORMALLY";
const CONNECTION_RECONNECT_SCHEDULED: &str = "CONNECTION_RECONNECT_SCHEDULED";
const CONNECTION_RECONNECT_EXHAUSTED: &str = "CONNECTION_RECONNECT_EXHAUSTED";
const CONNECTION_HEARTBEAT_TIMEOUT: &str = "CONNECTION_HEARTBEAT_TIMEOUT";
const CONNECTION_AUTH_REJECTED: &str = "CONNECTION_AUTH_REJECTED";
const CONNECTION_SEND_DROPPED: &str = "CONNECTION_SEND_DROPPED";
const CONNECTION_ESTABLISHED: &str = "CONNECTION_ESTABLISHED";

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("a connection attempt is already in flight")]
    AlreadyConnecting,
    #[error("connection attempt timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("connection manager task is gone")]
    ManagerClosed,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport is not open")]
    NotConnected,
    #[error("failed to encode outbound envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Out-of-band notifications from the connection task. Frames carry raw
/// payloads; decoding them is the dispatcher's job.
#[derive(Debug)]
pub enum SocketEvent {
    Status(ConnectionStatus),
    Frame(String),
    /// Automatic reconnection gave up; a user-initiated `connect` is required.
    ReconnectExhausted,
    /// The server closed the socket with the auth close code. The token must
    /// be refreshed before reconnecting.
    AuthRejected,
}

enum Cmd {
    Connect {
        done: oneshot::Sender<Result<(), ConnectError>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Send {
        frame: String,
    },
    PongReceived,
}

/// Handle to the socket task. Cloneable; all clones drive the same socket.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ConnectionManager {
    /// Spawns the socket task and returns the handle plus the event stream.
    /// The task owns the socket; the handle only passes commands to it.
    pub fn spawn(
        config: RealtimeConfig,
        token: &str,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let url = build_socket_url(&config.url, token, &config.client, &config.version);
        let task = ConnectionTask {
            url,
            config,
            transport,
            events: event_tx,
            status: status_tx,
        };
        tokio::spawn(task.run(cmd_rx));
        (Self { cmd_tx, status_rx }, event_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Opens the socket. Resolves once the handshake finishes (or fails).
    /// Rejected outright while another attempt is in flight; a no-op when
    /// already connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.status() == ConnectionStatus::Connecting {
            return Err(ConnectError::AlreadyConnecting);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Connect { done: done_tx })
            .map_err(|_| ConnectError::ManagerClosed)?;
        done_rx.await.map_err(|_| ConnectError::ManagerClosed)?
    }

    /// Closes the socket politely and cancels any pending reconnect.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Disconnect { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if !self.status().is_connected() {
            return Err(SendError::NotConnected);
        }
        let frame = envelope.to_json()?;
        self.cmd_tx
            .send(Cmd::Send { frame })
            .map_err(|_| SendError::NotConnected)
    }

    /// Liveness signal, fed back by the dispatcher when a pong arrives.
    pub fn pong_received(&self) {
        let _ = self.cmd_tx.send(Cmd::PongReceived);
    }
}

/// Delay before reconnect attempt `n` (1-based): base doubled per attempt,
/// capped.
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(cmp::min(exp, cap_ms))
}

struct ConnectionTask {
    url: String,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<SocketEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionTask {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
        let _ = self.events.send(SocketEvent::Status(status));
    }

    async fn open(&self) -> Result<TransportLink, ConnectError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match time::timeout(timeout, self.transport.open(&self.url)).await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(error)) => Err(ConnectError::Transport(error)),
            Err(_) => Err(ConnectError::Timeout(self.config.connect_timeout_ms)),
        }
    }

    /// Counts the next reconnect attempt and either arms its timer or gives
    /// up. Status goes to `Connecting` while a retry is pending so the rest
    /// of the app treats the gap as in-flight.
    fn schedule_reconnect(
        &self,
        attempts: &mut u32,
        reconnect_at: &mut Option<Instant>,
        immediate: bool,
    ) {
        *attempts += 1;
        if *attempts >= self.config.max_reconnect_attempts {
            tracing::error!(
                code = CONNECTION_RECONNECT_EXHAUSTED,
                attempts = *attempts,
                "giving up on automatic reconnection"
            );
            let _ = self.events.send(SocketEvent::ReconnectExhausted);
            *reconnect_at = None;
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }
        let delay = if immediate {
            Duration::ZERO
        } else {
            backoff_delay(
                *attempts,
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
            )
        };
        tracing::info!(
            code = CONNECTION_RECONNECT_SCHEDULED,
            attempt = *attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        *reconnect_at = Some(Instant::now() + delay);
        self.set_status(ConnectionStatus::Connecting);
    }

    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        // A peer that misses two heartbeat windows is considered gone.
        let liveness_window = heartbeat_interval * 2;

        let mut link: Option<TransportLink> = None;
        let mut attempts: u32 = 0;
        let mut reconnect_at: Option<Instant> = None;
        let mut last_pong = Instant::now();
        let mut heartbeat_at = Instant::now() + heartbeat_interval;

        loop {
            if let Some(ref mut active) = link {
                let heartbeat = time::sleep_until(heartbeat_at);
                tokio::pin!(heartbeat);

                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        None => return,
                        Some(Cmd::Connect { done }) => {
                            // Already connected.
                            let _ = done.send(Ok(()));
                        }
                        Some(Cmd::Disconnect { done }) => {
                            self.set_status(ConnectionStatus::Disconnecting);
                            // Dropping the link closes the socket with a
                            // normal close code.
                            link = None;
                            reconnect_at = None;
                            attempts = 0;
                            self.set_status(ConnectionStatus::Disconnected);
                            let _ = done.send(());
                        }
                        Some(Cmd::Send { frame }) => {
                            if active.outbound.send(frame).is_err() {
                                tracing::warn!(
                                    code = CONNECTION_SEND_DROPPED,
                                    "outbound frame dropped: transport bridge is gone"
                                );
                            }
                        }
                        Some(Cmd::PongReceived) => {
                            last_pong = Instant::now();
                        }
                    },
                    frame = active.inbound.recv() => match frame {
                        Some(TransportFrame::Text(text)) => {
                            let _ = self.events.send(SocketEvent::Frame(text));
                        }
                        Some(TransportFrame::Closed { code }) if code == CLOSE_NORMAL => {
                            link = None;
                            self.set_status(ConnectionStatus::Disconnected);
                        }
                        Some(TransportFrame::Closed { code }) if code == CLOSE_AUTH_REJECTED => {
                            tracing::error!(
                                code = CONNECTION_AUTH_REJECTED,
                                close_code = code,
                                "server rejected the session token"
                            );
                            link = None;
                            let _ = self.events.send(SocketEvent::AuthRejected);
                            self.set_status(ConnectionStatus::Disconnected);
                        }
                        Some(TransportFrame::Closed { code }) => {
                            tracing::warn!(
                                code = CONNECTION_CLOSED_ABNORMALLY,
                                close_code = code,
                                "transport closed abnormally"
                            );
                            link = None;
                            self.schedule_reconnect(&mut attempts, &mut reconnect_at, false);
                        }
                        None => {
                            // Bridge vanished without a close frame.
                            tracing::warn!(
                                code = CONNECTION_CLOSED_ABNORMALLY,
                                "transport bridge ended without a close frame"
                            );
                            link = None;
                            self.schedule_reconnect(&mut attempts, &mut reconnect_at, false);
                        }
                    },
                    _ = &mut heartbeat => {
                        if Instant::now().duration_since(last_pong) > liveness_window {
                            tracing::warn!(
                                code = CONNECTION_HEARTBEAT_TIMEOUT,
                                "no pong within the liveness window, forcing reconnect"
                            );
                            link = None;
                            self.schedule_reconnect(&mut attempts, &mut reconnect_at, true);
                        } else {
                            match Envelope::ping().to_json() {
                                Ok(frame) => {
                                    let _ = active.outbound.send(frame);
                                }
                                Err(error) => tracing::warn!(
                                    code = CONNECTION_SEND_DROPPED,
                                    error = %error,
                                    "failed to encode heartbeat ping"
                                ),
                            }
                            heartbeat_at = Instant::now() + heartbeat_interval;
                        }
                    }
                }
            } else if let Some(at) = reconnect_at {
                let delay = time::sleep_until(at);
                tokio::pin!(delay);

                tokio::select! {
                    biased;
                    cmd = cmd_rx.recv() => match cmd {
                        None => return,
                        Some(Cmd::Connect { done }) => {
                            let _ = done.send(Err(ConnectError::AlreadyConnecting));
                        }
                        Some(Cmd::Disconnect { done }) => {
                            reconnect_at = None;
                            attempts = 0;
                            self.set_status(ConnectionStatus::Disconnected);
                            let _ = done.send(());
                        }
                        Some(Cmd::Send { .. }) => {
                            tracing::debug!(
                                code = CONNECTION_SEND_DROPPED,
                                "outbound frame dropped while reconnecting"
                            );
                        }
                        Some(Cmd::PongReceived) => {}
                    },
                    _ = &mut delay => {
                        reconnect_at = None;
                        match self.open().await {
                            Ok(new_link) => {
                                tracing::info!(
                                    code = CONNECTION_ESTABLISHED,
                                    attempt = attempts,
                                    "reconnected"
                                );
                                link = Some(new_link);
                                attempts = 0;
                                last_pong = Instant::now();
                                heartbeat_at = Instant::now() + heartbeat_interval;
                                self.set_status(ConnectionStatus::Connected);
                            }
                            Err(error) => {
                                tracing::warn!(
                                    code = CONNECTION_OPEN_FAILED,
                                    attempt = attempts,
                                    error = %error,
                                    "reconnect attempt failed"
                                );
                                self.schedule_reconnect(&mut attempts, &mut reconnect_at, false);
                            }
                        }
                    }
                }
            } else {
                match cmd_rx.recv().await {
                    None => return,
                    Some(Cmd::Connect { done }) => {
                        self.set_status(ConnectionStatus::Connecting);
                        match self.open().await {
                            Ok(new_link) => {
                                tracing::info!(code = CONNECTION_ESTABLISHED, "connected");
                                link = Some(new_link);
                                attempts = 0;
                                last_pong = Instant::now();
                                heartbeat_at = Instant::now() + heartbeat_interval;
                                self.set_status(ConnectionStatus::Connected);
                                let _ = done.send(Ok(()));
                            }
                            Err(error) => {
                                tracing::warn!(
                                    code = CONNECTION_OPEN_FAILED,
                                    error = %error,
                                    "connect failed"
                                );
                                self.set_status(ConnectionStatus::Disconnected);
                                let _ = done.send(Err(error));
                            }
                        }
                    }
                    Some(Cmd::Disconnect { done }) => {
                        let _ = done.send(());
                    }
                    Some(Cmd::Send { .. }) => {
                        tracing::debug!(
                            code = CONNECTION_SEND_DROPPED,
                            "outbound frame dropped while disconnected"
                        );
                    }
                    Some(Cmd::PongReceived) => {}
                }
            }
        }
    }
}
