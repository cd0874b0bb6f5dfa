// Chat synchronization engine for chatsync
// Wires the transport channel, history loader, store and sender together

pub mod connection;
pub mod directory;
pub mod history;
pub mod outbound;
pub mod presence;
pub mod protocol;
pub mod store;

use log::{debug, error, info};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::alerts::AlertSink;
use crate::api::ApiClient;
use crate::config::EngineConfig;
use crate::error::ChatError;
use crate::models::{Contact, ConversationPreview, Message, SessionContext, UserId};

pub use connection::{
    ChannelEvent, Connector, ConnectionState, Link, ReconnectPolicy, TransportChannel,
    WebSocketConnector,
};
pub use directory::{ContactSource, Directory, DirectoryPayload};
pub use history::{HistoryLoader, HistorySource};
pub use outbound::{OutboundSender, SendOutcome};
pub use presence::BadgeVariant;
pub use store::{ConversationStore, IncomingOutcome, SelectOutcome, Selection, StoreUpdate};

/// Lock a mutex, taking the data back if a holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One logged-in chat session
pub struct ChatClient {
    channel: TransportChannel,
    store: Arc<ConversationStore>,
    sender: OutboundSender,
    contacts: Arc<dyn ContactSource>,
    image_base_url: Option<String>,
}

impl ChatClient {
    pub fn new(
        config: &EngineConfig,
        connector: Arc<dyn Connector>,
        history: Arc<dyn HistorySource>,
        contacts: Arc<dyn ContactSource>,
    ) -> Self {
        let channel = TransportChannel::new(connector, config.reconnect);
        let store = Arc::new(ConversationStore::new(
            HistoryLoader::new(history),
            config.echo_tolerance_ms,
        ));

        let sink = Arc::clone(&store);
        channel.subscribe(move |event| match event {
            ChannelEvent::MessageReceived(record) => {
                sink.apply_incoming(record.clone());
            }
            ChannelEvent::Connected => debug!("Socket connected"),
            ChannelEvent::Disconnected => info!("Socket disconnected"),
        });

        let sender = OutboundSender::new(channel.clone(), Arc::clone(&store));
        ChatClient {
            channel,
            store,
            sender,
            contacts,
            image_base_url: config.image_base_url.clone(),
        }
    }

    /// Client backed by the websocket endpoint and the REST API from `config`
    pub fn from_config(config: &EngineConfig, alerts: Arc<dyn AlertSink>) -> Result<Self, ChatError> {
        let api = Arc::new(ApiClient::new(config, alerts)?);
        let connector = Arc::new(WebSocketConnector::new(&config.socket_url));
        Ok(ChatClient::new(config, connector, api.clone(), api))
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn channel(&self) -> &TransportChannel {
        &self.channel
    }

    pub fn subscribe(&self) -> mpsc::Receiver<StoreUpdate> {
        self.store.subscribe()
    }

    pub fn session(&self) -> SessionContext {
        self.store.session()
    }

    pub fn login(&self, user_id: UserId) {
        self.store.set_session(user_id);
    }

    /// Open the transport for the session user; reused when already up
    pub async fn connect(&self) -> ConnectionState {
        self.channel.connect(self.store.session().user_id).await
    }

    /// Switch to `peer`, make sure the transport is up, then load its history.
    ///
    /// The switch is recorded before any await, so selections take effect in
    /// call order even while the first connect is still in flight.
    pub async fn select_conversation(&self, peer: UserId) -> SelectOutcome {
        let selection = self.store.begin_selection(peer);
        self.connect().await;
        self.store.load_selection(selection).await
    }

    pub fn send(&self, body: &str) -> SendOutcome {
        self.sender.send(body)
    }

    /// Fetch contacts and conversation previews matching `query`.
    ///
    /// Returns the number of contacts applied. A failed fetch is logged and
    /// leaves the current directory in place.
    pub async fn refresh_directory(&self, query: &str) -> usize {
        let user_id = match self.store.session().user_id {
            Some(id) => id,
            None => {
                debug!("No session user, skipping directory refresh");
                return 0;
            }
        };
        match self.contacts.fetch_directory(query, user_id).await {
            Ok(payload) => {
                let directory = payload.into_directory(self.image_base_url.as_deref());
                let count = directory.contacts.len();
                self.store.apply_directory(directory);
                count
            }
            Err(e) => {
                error!("Failed to fetch chats and contacts: {}", e);
                0
            }
        }
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.store.contacts()
    }

    pub fn previews(&self) -> Vec<ConversationPreview> {
        self.store.previews()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.active_messages()
    }

    pub fn disconnect(&self) {
        self.channel.disconnect();
    }

    /// Close the transport and forget everything tied to the session
    pub fn logout(&self) {
        self.channel.disconnect();
        self.store.reset();
        info!("Logged out");
    }
}
