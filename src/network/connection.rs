//! Connection supervision: one logical websocket connection whose lifetime
//! is owned by the pipeline, with unbounded capped-backoff reconnects.

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and data events the supervisor emits to the pipeline.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A connect attempt failed; the worker keeps retrying on its own.
    ConnectError(String),
    /// A raw inbound frame.
    Message(String),
}

/// Owns the single logical connection to the update source.
///
/// `start` spawns a background worker running a connect/read/reconnect loop;
/// `stop` tears it down. Both are idempotent, so the pipeline can drive them
/// straight from authentication transitions.
pub struct ConnectionSupervisor {
    endpoint: Url,
    initial_delay: Duration,
    max_delay: Duration,
    event_tx: mpsc::Sender<TransportEvent>,
    shutdown: Option<watch::Sender<bool>>,
}

impl ConnectionSupervisor {
    pub fn new(
        endpoint: &str,
        config: &PipelineConfig,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            initial_delay: config.reconnect_initial_delay,
            max_delay: config.reconnect_max_delay,
            event_tx,
            shutdown: None,
        })
    }

    /// Establish the connection using `credential`. No-op while a worker
    /// is already live.
    ///
    /// A credential that cannot form a valid `Authorization` header is
    /// rejected up front: a `ConnectError` event is emitted, no worker is
    /// spawned, and `is_running` stays false until the next start.
    pub fn start(&mut self, credential: &str) {
        if self.is_running() {
            debug!("Connection supervisor already running, start ignored");
            return;
        }

        let auth_header = match bearer_header(credential) {
            Ok(value) => value,
            Err(e) => {
                error!("Rejecting credential unusable as a header: {}", e);
                let _ = self
                    .event_tx
                    .try_send(TransportEvent::ConnectError(e.to_string()));
                return;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let worker = ConnectionWorker {
            endpoint: self.endpoint.clone(),
            auth_header,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            event_tx: self.event_tx.clone(),
            shutdown: shutdown_rx,
        };
        tokio::spawn(worker.run());
    }

    /// Tear down the connection if present. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
            info!("Connection supervisor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        // The worker holds the only receiver; once it exits the channel closes.
        self.shutdown.as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }
}

/// Why a connected session ended.
enum SessionEnd {
    /// Transport dropped; the worker should reconnect.
    Dropped,
    /// Shutdown was requested or the pipeline went away; the worker exits.
    Finished,
}

struct ConnectionWorker {
    endpoint: Url,
    auth_header: HeaderValue,
    initial_delay: Duration,
    max_delay: Duration,
    event_tx: mpsc::Sender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut delay = self.initial_delay;

        loop {
            let request = match self.handshake_request() {
                Ok(request) => request,
                Err(e) => {
                    error!("Cannot build handshake request: {}", e);
                    let _ = self
                        .event_tx
                        .send(TransportEvent::ConnectError(e.to_string()))
                        .await;
                    return;
                }
            };

            info!("Connecting to {}...", self.endpoint);

            let connected = tokio::select! {
                res = connect_async(request) => res,
                _ = self.shutdown.changed() => return,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    info!("Connected to update stream");
                    delay = self.initial_delay;
                    if self.event_tx.send(TransportEvent::Connected).await.is_err() {
                        return; // pipeline dropped, stop worker
                    }

                    match self.pump(ws_stream).await {
                        SessionEnd::Finished => return,
                        SessionEnd::Dropped => {
                            if self.event_tx.send(TransportEvent::Disconnected).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Connection failed: {}. Retrying in {:?}", e, delay);
                    if self
                        .event_tx
                        .send(TransportEvent::ConnectError(e.to_string()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            tokio::select! {
                _ = sleep(jittered(delay)) => {}
                _ = self.shutdown.changed() => return,
            }
            delay = (delay * 2).min(self.max_delay);
        }
    }

    /// Read frames until the transport drops or shutdown is requested.
    async fn pump(&mut self, ws_stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self
                                .event_tx
                                .send(TransportEvent::Message(text.to_string()))
                                .await
                                .is_err()
                            {
                                return SessionEnd::Finished;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("Server closed the connection");
                            return SessionEnd::Dropped;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            return SessionEnd::Dropped;
                        }
                        None => {
                            warn!("Stream ended unexpectedly");
                            return SessionEnd::Dropped;
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Finished;
                }
            }
        }
    }

    fn handshake_request(&self) -> Result<Request, PipelineError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, self.auth_header.clone());
        Ok(request)
    }
}

fn bearer_header(credential: &str) -> Result<HeaderValue, PipelineError> {
    HeaderValue::from_str(&format!("Bearer {}", credential))
        .map_err(|e| PipelineError::CredentialError(e.to_string()))
}

/// Spread the reconnect delay by a random offset of up to +25% so clients
/// dropped by the same outage do not reconnect in lockstep.
fn jittered(delay: Duration) -> Duration {
    let spread_ms = (delay.as_millis() as u64 / 4).max(1);
    let offset_ms = rand::thread_rng().gen_range(0..=spread_ms);
    delay + Duration::from_millis(offset_ms)
}
