use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, instrument, trace, warn};

use super::{ConnectionState, ReconnectPolicy};
use crate::backend::BackendClient;
use crate::config::Config;
use crate::dispatch::HandlerRegistry;
use crate::error::{
    malformed_frame, reconnect_exhausted, server_error, subscription_auth_failed,
    transport_closed, transport_connect_failed, transport_connect_timeout, transport_send_failed,
};
use crate::message_log::MessageLog;
use crate::wire::{self, ConnectionEstablished, Empty, InboundEnvelope, ServerError, SubscribeRequest};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Silence tolerated before pinging, until the server announces its own value
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Time given to the writer to flush a close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Time given to the connection task to stop on disconnect
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens the raw WebSocket
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> anyhow::Result<WsStream>;
}

/// Production connector over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<WsStream> {
        let (stream, _response) = connect_async(url).await?;
        Ok(stream)
    }
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub channel: String,
    pub policy: ReconnectPolicy,
    pub pong_timeout: Duration,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            url: config.backend.ws_url.clone(),
            channel: config.backend.channel_name(),
            policy: ReconnectPolicy::from(&config.reconnect),
            pong_timeout: config.reconnect.pong_timeout(),
        }
    }
}

enum Attempt {
    Connected(WsStream),
    Failed,
    Cancelled,
}

enum SessionEnd {
    Shutdown,
    Closed(String),
}

struct Inner {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn BackendClient>,
    handlers: HandlerRegistry,
    message_log: Arc<MessageLog>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    socket_id: Mutex<Option<String>>,
    reconnect_attempts: AtomicUsize,
    connect_attempts: AtomicUsize,
}

/// Reconnecting client for a Pusher-protocol channel
///
/// One task owns the socket. It answers protocol events itself and hands
/// every application event to the [`HandlerRegistry`] in arrival order,
/// finishing each dispatch before reading the next frame.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn BackendClient>,
        handlers: HandlerRegistry,
        message_log: Arc<MessageLog>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                backend,
                handlers,
                message_log,
                state,
                outbound: Mutex::new(None),
                socket_id: Mutex::new(None),
                reconnect_attempts: AtomicUsize::new(0),
                connect_attempts: AtomicUsize::new(0),
            }),
            shutdown: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the connection task; `false` if one is already running
    pub async fn connect(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Connection task already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&self.shutdown) = Some(shutdown_tx);

        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run(shutdown_rx)));
        true
    }

    /// Close the socket and cancel any pending reconnect
    pub async fn disconnect(&self) {
        let Some(mut handle) = self.task.lock().await.take() else {
            self.inner.set_state(ConnectionState::Disconnected);
            return;
        };

        if !handle.is_finished() {
            self.inner.set_state(ConnectionState::Disconnecting);
        }
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(true);
        }

        if timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err() {
            warn!("Connection task did not stop in time, aborting");
            handle.abort();
        }

        self.inner.clear_session();
        self.inner.set_state(ConnectionState::Disconnected);
        info!("Disconnected");
    }

    /// Queue a frame for the socket; `false` when there is no open socket
    pub fn send<T: Serialize>(&self, event: &str, data: &T) -> bool {
        self.inner.send(event, data)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state equals `target`, giving up after `limit`
    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> bool {
        let mut rx = self.subscribe_state();
        timeout(limit, rx.wait_for(|state| *state == target))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    pub fn socket_id(&self) -> Option<String> {
        lock(&self.inner.socket_id).clone()
    }

    /// Reconnect attempts made since the last `connect`
    pub fn reconnect_attempts(&self) -> usize {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Raw connect attempts made over the manager's lifetime
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> &str {
        &self.inner.settings.channel
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hand an encoded frame to the socket writer, logging it when the writer is gone
fn forward(
    outbound: Option<&mpsc::UnboundedSender<WsMessage>>,
    event: &str,
    frame: String,
    message_log: &MessageLog,
) -> bool {
    let Some(tx) = outbound else {
        message_log.register(transport_send_failed(event, "no socket writer"), Some("connection"));
        return false;
    };
    match tx.send(WsMessage::Text(frame.into())) {
        Ok(()) => true,
        Err(e) => {
            message_log.register(transport_send_failed(event, e), Some("connection"));
            false
        }
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    fn clear_session(&self) {
        *lock(&self.outbound) = None;
        *lock(&self.socket_id) = None;
    }

    fn send<T: Serialize>(&self, event: &str, data: &T) -> bool {
        if !self.state.borrow().is_connected() {
            debug!(event, "Not connected, dropping outbound frame");
            return false;
        }

        let frame = match wire::encode(event, data, None) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event, error = %e, "Failed to encode outbound frame");
                return false;
            }
        };

        let outbound = lock(&self.outbound).clone();
        forward(outbound.as_ref(), event, frame, &self.message_log)
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut stream = match self.attempt(&mut shutdown).await {
            Attempt::Connected(ws) => Some(ws),
            Attempt::Failed => None,
            Attempt::Cancelled => {
                self.finish();
                return;
            }
        };

        loop {
            if let Some(ws) = stream.take() {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);

                match self.run_session(ws, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Closed(reason) => {
                        self.message_log
                            .register(transport_closed(&reason), Some("connection"));
                    }
                }
            }

            self.clear_session();
            self.set_state(ConnectionState::Disconnected);

            match self.reconnect(&mut shutdown).await {
                Some(ws) => stream = Some(ws),
                None => break,
            }
        }

        self.finish();
    }

    fn finish(&self) {
        self.clear_session();
        self.set_state(ConnectionState::Disconnected);
        debug!("Connection task stopped");
    }

    /// One connect attempt bounded by the connect timeout
    #[instrument(skip(self, shutdown), fields(url = %self.settings.url), level = "debug")]
    async fn attempt(&self, shutdown: &mut watch::Receiver<bool>) -> Attempt {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let limit = self.settings.policy.connect_timeout;

        tokio::select! {
            _ = shutdown.changed() => Attempt::Cancelled,
            result = timeout(limit, self.connector.connect(&self.settings.url)) => match result {
                Ok(Ok(ws)) => {
                    info!("WebSocket connected");
                    Attempt::Connected(ws)
                }
                Ok(Err(e)) => {
                    self.message_log.register(
                        transport_connect_failed(&self.settings.url, e),
                        Some("connection"),
                    );
                    Attempt::Failed
                }
                Err(_) => {
                    self.message_log.register(
                        transport_connect_timeout(&self.settings.url, limit.as_secs()),
                        Some("connection"),
                    );
                    Attempt::Failed
                }
            }
        }
    }

    /// Bounded backoff loop; `None` once exhausted or cancelled
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<WsStream> {
        let policy = &self.settings.policy;

        for attempt in 1..=policy.max_attempts {
            if *shutdown.borrow() {
                return None;
            }

            self.set_state(ConnectionState::Reconnecting);
            self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);

            let delay = policy.delay(attempt);
            info!(attempt, max = policy.max_attempts, ?delay, "Reconnecting");

            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Reconnect cancelled");
                    return None;
                }
                _ = sleep(delay) => {}
            }

            match self.attempt(shutdown).await {
                Attempt::Connected(ws) => return Some(ws),
                Attempt::Cancelled => return None,
                Attempt::Failed => {}
            }
        }

        self.message_log.register(
            reconnect_exhausted(policy.max_attempts),
            Some("connection"),
        );
        None
    }

    async fn run_session(
        self: &Arc<Self>,
        ws: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *lock(&self.outbound) = Some(tx);

        let mut writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to write frame");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut activity_timeout = DEFAULT_ACTIVITY_TIMEOUT;
        let mut awaiting_pong = false;
        let mut subscribe_task: Option<JoinHandle<()>> = None;

        let end = loop {
            let wait = if awaiting_pong {
                self.settings.pong_timeout
            } else {
                activity_timeout
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    if let Some(tx) = lock(&self.outbound).as_ref() {
                        let _ = tx.send(WsMessage::Close(None));
                    }
                    break SessionEnd::Shutdown;
                }
                frame = timeout(wait, source.next()) => match frame {
                    Err(_) if awaiting_pong => break SessionEnd::Closed("no reply to ping".to_string()),
                    Err(_) => {
                        trace!("Connection idle, sending ping");
                        awaiting_pong = true;
                        self.send(wire::PING, &Empty {});
                    }
                    Ok(None) => break SessionEnd::Closed("stream ended".to_string()),
                    Ok(Some(Err(e))) => break SessionEnd::Closed(e.to_string()),
                    Ok(Some(Ok(message))) => {
                        awaiting_pong = false;
                        match message {
                            WsMessage::Text(text) => {
                                if let Some(task) = self.handle_text(text.as_str(), &mut activity_timeout).await {
                                    if let Some(previous) = subscribe_task.replace(task) {
                                        previous.abort();
                                    }
                                }
                            }
                            WsMessage::Ping(payload) => {
                                if let Some(tx) = lock(&self.outbound).as_ref() {
                                    let _ = tx.send(WsMessage::Pong(payload));
                                }
                            }
                            WsMessage::Close(frame) => {
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .unwrap_or_else(|| "closed by server".to_string());
                                break SessionEnd::Closed(reason);
                            }
                            _ => {}
                        }
                    }
                }
            }
        };

        if let Some(task) = subscribe_task {
            task.abort();
        }

        // Dropping the sender lets the writer drain and close
        *lock(&self.outbound) = None;
        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        *lock(&self.socket_id) = None;

        end
    }

    /// Handle one text frame; returns the subscribe task if one was started
    async fn handle_text(
        self: &Arc<Self>,
        text: &str,
        activity_timeout: &mut Duration,
    ) -> Option<JoinHandle<()>> {
        let envelope = match wire::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.message_log.register(malformed_frame(e), Some("connection"));
                return None;
            }
        };

        match envelope.event_name.as_str() {
            wire::CONNECTION_ESTABLISHED => return self.on_established(&envelope, activity_timeout),
            wire::SUBSCRIPTION_SUCCEEDED | wire::INTERNAL_SUBSCRIPTION_SUCCEEDED => {
                if envelope.channel.as_deref() == Some(self.settings.channel.as_str()) {
                    info!(channel = %self.settings.channel, "Subscribed");
                    self.set_state(ConnectionState::Subscribed);
                } else {
                    debug!(channel = ?envelope.channel, "Subscription ack for another channel");
                }
            }
            wire::PING => {
                if !self.send(wire::PONG, &Empty {}) {
                    debug!("Pong not sent");
                }
            }
            wire::PONG => trace!("Pong received"),
            wire::ERROR => {
                let err = envelope.data::<ServerError>().unwrap_or(ServerError {
                    message: envelope.raw_payload.clone(),
                    code: None,
                });
                self.message_log
                    .register(server_error(err.code, err.message), Some("connection"));
            }
            _ => {
                self.handlers.dispatch(&envelope).await;
            }
        }

        None
    }

    fn on_established(
        self: &Arc<Self>,
        envelope: &InboundEnvelope,
        activity_timeout: &mut Duration,
    ) -> Option<JoinHandle<()>> {
        let Some(established) = envelope.data::<ConnectionEstablished>() else {
            self.message_log.register(
                malformed_frame("connection_established without socket_id"),
                Some("connection"),
            );
            return None;
        };

        if let Some(seconds) = established.activity_timeout.filter(|s| *s > 0) {
            *activity_timeout = Duration::from_secs(seconds);
        }
        info!(socket_id = %established.socket_id, "Connection established");
        *lock(&self.socket_id) = Some(established.socket_id.clone());

        self.set_state(ConnectionState::Subscribing);
        let inner = Arc::clone(self);
        Some(tokio::spawn(async move {
            inner.subscribe(established.socket_id).await;
        }))
    }

    async fn subscribe(&self, socket_id: String) {
        let channel = self.settings.channel.clone();

        match self.backend.authorize_channel(&socket_id, &channel).await {
            Some(auth) => {
                if !self.send(wire::SUBSCRIBE, &SubscribeRequest { auth, channel }) {
                    warn!("Subscribe frame not sent");
                }
            }
            None => {
                self.message_log
                    .register(subscription_auth_failed(&channel), Some("connection"));
                self.state.send_if_modified(|state| {
                    if *state == ConnectionState::Subscribing {
                        *state = ConnectionState::Connected;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }
}
