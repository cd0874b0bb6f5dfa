// Transport channel for chatsync
// Owns the single persistent link to the messaging endpoint, shared by all conversations

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::lock_or_recover;
use super::protocol::{self, ClientEvent, ServerEvent};
use crate::error::ChatError;
use crate::models::{MessageRecord, UserId};

/// Both halves of an open link. Dropping `outbound` closes the link; `inbound`
/// ending means the remote side went away.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Link, ChatError>;
}

/// Connector speaking JSON text frames over a WebSocket
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: &str) -> Self {
        WebSocketConnector {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Link, ChatError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            ChatError::Connection(format!("failed to connect websocket {}: {}", self.url, e))
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let frame = match protocol::encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("{}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_writer.send(WsMessage::Text(frame)).await {
                    warn!("Failed to write websocket frame: {}", e);
                    break;
                }
            }
            // Sender side dropped: close the stream so the reader ends too
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match protocol::decode(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping inbound frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Websocket receive failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Websocket reader finished");
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Only entered when a `ReconnectPolicy` is configured
    Reconnecting { attempt: u32 },
}

/// Inbound event classes delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    MessageReceived(MessageRecord),
}

/// Bounded automatic reconnect after an unexpected drop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Exponential backoff: base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(2u64.pow(exponent)))
    }
}

pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct LinkState {
    state: ConnectionState,
    // Bumped on every connect/disconnect so stale tasks can tell they lost ownership
    epoch: u64,
    user_id: Option<UserId>,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    pump: Option<JoinHandle<()>>,
}

struct ChannelInner {
    connector: Arc<dyn Connector>,
    reconnect: Option<ReconnectPolicy>,
    link: Mutex<LinkState>,
    handlers: Mutex<Vec<EventHandler>>,
    dispatch_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<ChannelInner>,
}

impl TransportChannel {
    pub fn new(connector: Arc<dyn Connector>, reconnect: Option<ReconnectPolicy>) -> Self {
        TransportChannel {
            inner: Arc::new(ChannelInner {
                connector,
                reconnect,
                link: Mutex::new(LinkState {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    user_id: None,
                    outbound: None,
                    pump: None,
                }),
                handlers: Mutex::new(Vec::new()),
                dispatch_lock: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock_or_recover(&self.inner.link).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to inbound events. Handlers run in subscription order, one
    /// event at a time. A handler must not call back into the channel.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        lock_or_recover(&self.inner.handlers).push(Arc::new(handler));
    }

    /// Open the link and register `user_id` with the endpoint.
    ///
    /// No-op when already connected or connecting. Without a user id nothing is
    /// attempted. Failures are logged and reported through `ChannelEvent::Disconnected`.
    pub async fn connect(&self, user_id: Option<UserId>) -> ConnectionState {
        let user_id = match user_id {
            Some(id) => id,
            None => {
                error!("User ID is not set, cannot open the transport channel");
                return self.state();
            }
        };

        let epoch = {
            let mut link = lock_or_recover(&self.inner.link);
            if link.state != ConnectionState::Disconnected {
                debug!("Transport channel already {:?}, connect is a no-op", link.state);
                return link.state;
            }
            link.state = ConnectionState::Connecting;
            link.epoch += 1;
            link.user_id = Some(user_id);
            link.epoch
        };

        info!("Connecting transport channel for user {}", user_id);
        match self.inner.connector.open().await {
            Ok(link) => match self.inner.install(epoch, user_id, link) {
                Some(inbound) => {
                    info!("Connected to messaging endpoint as user {}", user_id);
                    self.inner.dispatch(&ChannelEvent::Connected);
                    let pump = tokio::spawn(Arc::clone(&self.inner).drive(epoch, inbound));
                    let mut state = lock_or_recover(&self.inner.link);
                    if state.epoch == epoch {
                        state.pump = Some(pump);
                    } else {
                        pump.abort();
                    }
                    state.state
                }
                None => self.state(),
            },
            Err(e) => {
                error!("Failed to open transport channel: {}", e);
                if self.inner.abandon(epoch) {
                    self.inner.dispatch(&ChannelEvent::Disconnected);
                }
                self.state()
            }
        }
    }

    /// Best-effort send. Dropped with a warning when not connected; never queued.
    pub fn emit(&self, event: ClientEvent) -> Result<(), ChatError> {
        let link = lock_or_recover(&self.inner.link);
        match (&link.state, &link.outbound) {
            (ConnectionState::Connected, Some(tx)) => tx.send(event).map_err(|e| {
                warn!("Transport link closed, dropping {:?}", e.0);
                ChatError::Connection("transport link closed".to_string())
            }),
            _ => {
                warn!("Transport channel is not connected, dropping {:?}", event);
                Err(ChatError::Connection(
                    "transport channel is not connected".to_string(),
                ))
            }
        }
    }

    /// Tear down the link. Idempotent; also cancels a pending reconnect.
    pub fn disconnect(&self) {
        let was_live = {
            let mut link = lock_or_recover(&self.inner.link);
            let was_live = link.state != ConnectionState::Disconnected;
            link.state = ConnectionState::Disconnected;
            link.epoch += 1;
            link.outbound = None;
            if let Some(pump) = link.pump.take() {
                pump.abort();
            }
            was_live
        };
        if was_live {
            info!("Transport channel disconnected");
            self.inner.dispatch(&ChannelEvent::Disconnected);
        }
    }
}

impl ChannelInner {
    fn dispatch(&self, event: &ChannelEvent) {
        let _serial = lock_or_recover(&self.dispatch_lock);
        let handlers: Vec<EventHandler> = lock_or_recover(&self.handlers).clone();
        for handler in handlers.iter() {
            handler(event);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        lock_or_recover(&self.link).epoch == epoch
    }

    /// Make `link` the live link if `epoch` still owns the channel and send the
    /// registerUser handshake. Returns the inbound half for the pump.
    fn install(
        &self,
        epoch: u64,
        user_id: UserId,
        link: Link,
    ) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        let Link { outbound, inbound } = link;
        let mut state = lock_or_recover(&self.link);
        if state.epoch != epoch {
            debug!("Connection attempt superseded, dropping fresh link");
            return None;
        }
        if outbound.send(ClientEvent::RegisterUser(user_id)).is_err() {
            error!("Link closed before registerUser could be sent");
            state.state = ConnectionState::Disconnected;
            drop(state);
            self.dispatch(&ChannelEvent::Disconnected);
            return None;
        }
        debug!("Sent registerUser for {}", user_id);
        state.state = ConnectionState::Connected;
        state.outbound = Some(outbound);
        Some(inbound)
    }

    fn abandon(&self, epoch: u64) -> bool {
        let mut state = lock_or_recover(&self.link);
        if state.epoch != epoch {
            return false;
        }
        state.state = ConnectionState::Disconnected;
        state.outbound = None;
        true
    }

    fn mark_dropped(&self, epoch: u64) -> bool {
        let mut state = lock_or_recover(&self.link);
        if state.epoch != epoch || state.state != ConnectionState::Connected {
            return false;
        }
        state.state = ConnectionState::Disconnected;
        state.outbound = None;
        true
    }

    // Pump loop: one task per live link, reused across reconnects
    async fn drive(self: Arc<Self>, epoch: u64, inbound: mpsc::UnboundedReceiver<ServerEvent>) {
        let mut epoch = epoch;
        let mut inbound = inbound;
        loop {
            while let Some(event) = inbound.recv().await {
                if !self.is_current(epoch) {
                    return;
                }
                match event {
                    ServerEvent::NewMessage(record) => {
                        self.dispatch(&ChannelEvent::MessageReceived(record));
                    }
                    ServerEvent::Disconnect => {
                        info!("Server closed the session");
                        break;
                    }
                }
            }

            if !self.mark_dropped(epoch) {
                return;
            }
            warn!("Transport channel dropped");
            self.dispatch(&ChannelEvent::Disconnected);

            let policy = match self.reconnect {
                Some(policy) => policy,
                None => return,
            };
            match self.reconnect_with(policy, epoch).await {
                Some((next_epoch, next_inbound)) => {
                    epoch = next_epoch;
                    inbound = next_inbound;
                }
                None => return,
            }
        }
    }

    fn begin_attempt(&self, epoch: u64, attempt: u32) -> bool {
        let mut state = lock_or_recover(&self.link);
        let idle = matches!(
            state.state,
            ConnectionState::Disconnected | ConnectionState::Reconnecting { .. }
        );
        if state.epoch != epoch || !idle {
            return false;
        }
        state.state = ConnectionState::Reconnecting { attempt };
        true
    }

    async fn reconnect_with(
        &self,
        policy: ReconnectPolicy,
        epoch: u64,
    ) -> Option<(u64, mpsc::UnboundedReceiver<ServerEvent>)> {
        let user_id = lock_or_recover(&self.link).user_id?;

        for attempt in 1..=policy.max_attempts {
            if !self.begin_attempt(epoch, attempt) {
                debug!("Reconnect cancelled");
                return None;
            }
            let delay = policy.delay_for(attempt);
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, attempt, policy.max_attempts
            );
            tokio::time::sleep(delay).await;
            if !self.is_current(epoch) {
                return None;
            }

            match self.connector.open().await {
                Ok(link) => {
                    let next_epoch = {
                        let mut state = lock_or_recover(&self.link);
                        if state.epoch != epoch {
                            return None;
                        }
                        state.epoch += 1;
                        state.epoch
                    };
                    let inbound = self.install(next_epoch, user_id, link)?;
                    info!("Reconnected to messaging endpoint as user {}", user_id);
                    self.dispatch(&ChannelEvent::Connected);
                    return Some((next_epoch, inbound));
                }
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        error!(
            "Giving up on reconnect after {} attempts",
            policy.max_attempts
        );
        if self.abandon(epoch) {
            self.dispatch(&ChannelEvent::Disconnected);
        }
        None
    }
}
