// Common test utilities for integration tests
// In-memory endpoints standing in for the websocket and REST services

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, LevelFilter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use chatsync::chat::protocol::{ClientEvent, ServerEvent};
use chatsync::chat::{
    ChatClient, Connector, ContactSource, DirectoryPayload, HistorySource, Link, StoreUpdate,
};
use chatsync::config::EngineConfig;
use chatsync::error::ChatError;
use chatsync::models::{MessageRecord, RecordId, UserId};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
}

pub fn record(id: i64, sender: i64, receiver: i64, body: &str, secs: i64) -> MessageRecord {
    MessageRecord {
        id: Some(RecordId::Num(id)),
        sender_id: Some(UserId(sender)),
        receiver_id: Some(UserId(receiver)),
        message: Some(body.to_string()),
        created_at: Some(at(secs)),
        ..MessageRecord::default()
    }
}

/// Server side of one link opened through `MockConnector`
pub struct ServerEnd {
    pub from_client: mpsc::UnboundedReceiver<ClientEvent>,
    pub to_client: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerEnd {
    pub fn push(&self, record: MessageRecord) {
        self.to_client
            .send(ServerEvent::NewMessage(record))
            .expect("client side of the link is gone");
    }

    /// Every event the client has emitted so far
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.from_client.try_recv() {
            events.push(event);
        }
        events
    }
}

#[derive(Default)]
pub struct MockConnector {
    refuse: AtomicBool,
    attempts: AtomicU32,
    opened: Mutex<Vec<ServerEnd>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockConnector {
    pub fn refusing() -> Self {
        let connector = MockConnector::default();
        connector.refuse.store(true, Ordering::SeqCst);
        connector
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Keep the next `open` pending until the returned sender fires
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn take_end(&self) -> ServerEnd {
        self.opened.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Link, ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Connection("connection refused".to_string()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(ServerEnd {
            from_client: out_rx,
            to_client: in_tx,
        });
        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// History endpoint keyed by peer; a held peer answers only once released
#[derive(Default)]
pub struct MockHistory {
    records: Mutex<HashMap<UserId, Vec<MessageRecord>>>,
    gates: Mutex<HashMap<UserId, oneshot::Receiver<()>>>,
    failing: AtomicBool,
}

impl MockHistory {
    pub fn set(&self, peer: i64, records: Vec<MessageRecord>) {
        self.records.lock().unwrap().insert(UserId(peer), records);
    }

    /// Delay the next response for `peer` until the returned sender fires
    pub fn hold(&self, peer: i64) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(UserId(peer), rx);
        tx
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn fetch_history(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageRecord>, ChatError> {
        debug!("Mock history request {} -> {}", sender_id, receiver_id);
        let gate = self.gates.lock().unwrap().remove(&receiver_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Fetch("history endpoint unavailable".to_string()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&receiver_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MockContacts {
    payload: Mutex<Option<String>>,
    queries: Mutex<Vec<(String, UserId)>>,
}

impl MockContacts {
    /// Respond with this JSON body; `None` makes the endpoint fail
    pub fn respond_with(&self, body: Option<&str>) {
        *self.payload.lock().unwrap() = body.map(str::to_string);
    }

    pub fn queries(&self) -> Vec<(String, UserId)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContactSource for MockContacts {
    async fn fetch_directory(
        &self,
        query: &str,
        user_id: UserId,
    ) -> Result<DirectoryPayload, ChatError> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), user_id));
        match self.payload.lock().unwrap().as_deref() {
            Some(body) => serde_json::from_str(body).map_err(|e| ChatError::Fetch(e.to_string())),
            None => Err(ChatError::Fetch("contacts endpoint unavailable".to_string())),
        }
    }
}

pub struct Harness {
    pub client: ChatClient,
    pub connector: Arc<MockConnector>,
    pub history: Arc<MockHistory>,
    pub contacts: Arc<MockContacts>,
    pub updates: mpsc::Receiver<StoreUpdate>,
}

pub fn harness_with(connector: MockConnector, config: EngineConfig) -> Harness {
    setup_logging();
    let connector = Arc::new(connector);
    let history = Arc::new(MockHistory::default());
    let contacts = Arc::new(MockContacts::default());
    let client = ChatClient::new(&config, connector.clone(), history.clone(), contacts.clone());
    let updates = client.subscribe();
    Harness {
        client,
        connector,
        history,
        contacts,
        updates,
    }
}

pub fn harness() -> Harness {
    harness_with(MockConnector::default(), EngineConfig::default())
}

/// Wait for the first update matching `pred`, skipping the others
pub async fn wait_for_update<F>(updates: &mut mpsc::Receiver<StoreUpdate>, pred: F) -> StoreUpdate
where
    F: Fn(&StoreUpdate) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match updates.recv().await {
                Some(update) if pred(&update) => return update,
                Some(_) => continue,
                None => panic!("store update channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for store update")
}

/// Push a marker message through `end` and wait until the store has applied it.
/// Everything pushed before it has been processed by then.
pub async fn flush_inbound(
    end: &ServerEnd,
    updates: &mut mpsc::Receiver<StoreUpdate>,
    from: i64,
    to: i64,
    secs: i64,
) {
    end.push(record(10_000 + secs, from, to, "__marker__", secs));
    wait_for_update(updates, |u| match u {
        StoreUpdate::MessageAppended { message, .. } => message.body == "__marker__",
        StoreUpdate::PreviewUpdated { message, .. } => message.body == "__marker__",
        _ => false,
    })
    .await;
}
