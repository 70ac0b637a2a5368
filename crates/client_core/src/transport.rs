//! Persistent Socket.IO connection with explicit reconnect backoff.
//!
//! The transport owns the connection lifecycle only. Event packets are
//! broadcast as raw [`PushFrame`]s; connectivity is published on a watch
//! channel that only notifies on change. A connection that stays silent for
//! longer than the server's ping interval plus ping timeout is treated as
//! lost. Events missed while disconnected are not replayed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::frame::{
    connect_packet, Handshake, Packet, PushFrame, DEFAULT_NAMESPACE, ENGINE_PONG,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capped exponential backoff: `min(initial * multiplier^attempt, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            multiplier: 2.0,
            max: Duration::from_millis(5000),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// HTTP(S) base url of the control server.
    pub server_url: String,
    pub namespace: String,
    pub backoff: BackoffPolicy,
    pub frame_buffer: usize,
}

impl TransportConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            backoff: BackoffPolicy::default(),
            frame_buffer: 256,
        }
    }

    pub fn socket_url(&self) -> Result<String, ClientError> {
        let server_url = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
            server_url.to_string()
        } else {
            return Err(ClientError::InvalidUrl(self.server_url.clone()));
        };
        let url = format!("{base}/socket.io/?EIO=4&transport=websocket");
        url::Url::parse(&url).map_err(|_| ClientError::InvalidUrl(self.server_url.clone()))?;
        Ok(url)
    }
}

pub struct Transport {
    connectivity: watch::Receiver<bool>,
    frames: broadcast::Sender<PushFrame>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Starts the connection loop on the current tokio runtime.
    pub fn spawn(config: TransportConfig) -> Result<Self, ClientError> {
        let url = config.socket_url()?;
        let (connected_tx, connectivity) = watch::channel(false);
        let (frames, _) = broadcast::channel(config.frame_buffer.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            url,
            config.namespace,
            config.backoff,
            connected_tx,
            frames.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            connectivity,
            frames,
            shutdown,
            task: Some(task),
        })
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<PushFrame> {
        self.frames.subscribe()
    }

    /// Stops reconnecting, closes the socket and waits for the loop to finish.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "transport: connection task ended abnormally");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

async fn run(
    url: String,
    namespace: String,
    backoff: BackoffPolicy,
    connected: watch::Sender<bool>,
    frames: broadcast::Sender<PushFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connecting = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown.changed() => break,
        };

        match connecting {
            Ok((stream, _response)) => {
                debug!(%url, "transport: websocket open");
                let end = drive(
                    stream,
                    &namespace,
                    &connected,
                    &frames,
                    &mut shutdown,
                    &mut attempt,
                )
                .await;
                set_connected(&connected, false);
                if let SessionEnd::Shutdown = end {
                    break;
                }
                warn!(%url, "transport: connection lost");
            }
            Err(err) => {
                warn!(%url, attempt, error = %err, "transport: connect failed");
            }
        }

        if !backoff.allows(attempt) {
            error!(
                %url,
                attempts = attempt,
                "transport: reconnect attempts exhausted; staying disconnected"
            );
            break;
        }
        let delay = backoff.delay_for_attempt(attempt);
        attempt += 1;
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt,
            "transport: reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    set_connected(&connected, false);
    debug!(%url, "transport: connection loop stopped");
}

async fn drive(
    stream: WsStream,
    namespace: &str,
    connected: &watch::Sender<bool>,
    frames: &broadcast::Sender<PushFrame>,
    shutdown: &mut watch::Receiver<bool>,
    attempt: &mut u32,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();
    // Until the open packet says otherwise, assume the Engine.IO defaults.
    let mut silence_limit = Handshake::default().silence_limit();

    loop {
        let next = tokio::select! {
            msg = tokio::time::timeout(silence_limit, read.next()) => match msg {
                Ok(msg) => msg,
                Err(_) => {
                    warn!(
                        silence_ms = silence_limit.as_millis() as u64,
                        "transport: no packets from server, treating connection as dead"
                    );
                    return SessionEnd::Lost;
                }
            },
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(error = %err, "transport: websocket read failed");
                return SessionEnd::Lost;
            }
        };

        let reply = match Packet::parse(&text) {
            Ok(Packet::Open(handshake)) => {
                silence_limit = handshake.silence_limit();
                Some(connect_packet(namespace))
            }
            Ok(Packet::Ping) => Some(ENGINE_PONG.to_string()),
            Ok(Packet::Connected { namespace: ns }) if ns == namespace => {
                *attempt = 0;
                set_connected(connected, true);
                info!(namespace, "transport: connected");
                None
            }
            Ok(Packet::Event { namespace: ns, frame }) if ns == namespace => {
                debug!(event = %frame.name, "transport: push frame");
                // No receivers just means nobody is routing yet.
                let _ = frames.send(frame);
                None
            }
            Ok(Packet::Disconnected { namespace: ns }) if ns == namespace => {
                return SessionEnd::Lost;
            }
            Ok(Packet::ConnectError { message, .. }) => {
                warn!(%message, "transport: namespace connect refused");
                return SessionEnd::Lost;
            }
            Ok(Packet::Close) => return SessionEnd::Lost,
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "transport: ignoring undecodable frame");
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(err) = write.send(Message::Text(reply.into())).await {
                warn!(error = %err, "transport: send failed");
                return SessionEnd::Lost;
            }
        }
    }
}

fn set_connected(connected: &watch::Sender<bool>, value: bool) {
    connected.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
