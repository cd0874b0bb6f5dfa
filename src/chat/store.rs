// Conversation store for chatsync
// Single authoritative in-memory projection of contacts and conversations.
// Mutations happen under one lock that is never held across an await.

use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::directory::Directory;
use super::history::HistoryLoader;
use super::lock_or_recover;
use crate::error::ChatError;
use crate::models::{
    Contact, Conversation, ConversationPreview, Message, MessageOrigin, MessageRecord,
    PreviewLine, SessionContext, UserId,
};

pub const DEFAULT_ECHO_TOLERANCE_MS: i64 = 5000;

const SUBSCRIBER_CAPACITY: usize = 256;

/// One committed mutation, sent to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    SessionChanged(SessionContext),
    DirectoryRefreshed { contacts: usize },
    ConversationSelected(UserId),
    HistoryApplied { peer: UserId, messages: usize },
    MessageAppended { peer: UserId, message: Message },
    PreviewUpdated { peer: UserId, message: Message },
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingOutcome {
    /// Added to the active conversation
    Appended,
    /// Already present (optimistic echo or repeated delivery)
    Duplicate,
    /// Belongs to a non-active conversation; only its preview changed
    Previewed,
    Rejected(ChatError),
}

/// Ticket for one conversation switch, see `ConversationStore::begin_selection`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub peer: UserId,
    epoch: u64,
    user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    Loaded { messages: usize },
    /// The active conversation changed while the history was in flight
    Stale,
    /// No session user, so no history could be requested
    NoSession,
}

struct StoreState {
    session: SessionContext,
    contacts: Vec<Contact>,
    previews: Vec<ConversationPreview>,
    profile: Option<Contact>,
    conversations: HashMap<UserId, Conversation>,
    active: Option<UserId>,
    selection_epoch: u64,
    malformed: u64,
}

impl StoreState {
    fn new() -> Self {
        StoreState {
            session: SessionContext::default(),
            contacts: Vec::new(),
            previews: Vec::new(),
            profile: None,
            conversations: HashMap::new(),
            active: None,
            selection_epoch: 0,
            malformed: 0,
        }
    }

    fn lookup_contact(&self, peer: UserId) -> Contact {
        self.contacts
            .iter()
            .chain(self.previews.iter().map(|p| &p.contact))
            .find(|c| c.id == peer)
            .cloned()
            .unwrap_or_else(|| Contact::placeholder(peer))
    }

    fn conversation_mut(&mut self, peer: UserId) -> &mut Conversation {
        let contact = self.lookup_contact(peer);
        let conversation = self
            .conversations
            .entry(peer)
            .or_insert_with(|| Conversation::new(contact.clone()));
        if conversation.contact.placeholder || !contact.placeholder {
            conversation.contact = contact;
        }
        conversation
    }

    fn touch_preview(&mut self, peer: UserId, message: &Message, count_unseen: bool) {
        let line = PreviewLine::from(message);
        match self.previews.iter_mut().find(|p| p.contact.id == peer) {
            Some(preview) => {
                preview.last_message = Some(line);
                if count_unseen {
                    preview.unseen += 1;
                }
            }
            None => {
                let contact = self.lookup_contact(peer);
                self.previews.push(ConversationPreview {
                    contact,
                    last_message: Some(line),
                    unseen: if count_unseen { 1 } else { 0 },
                });
            }
        }
    }
}

fn insert_sorted(messages: &mut Vec<Message>, message: Message) {
    let key = message.ordering_key();
    let position = messages.partition_point(|m| m.ordering_key() <= key);
    messages.insert(position, message);
}

impl Conversation {
    fn refresh_last_message(&mut self) {
        if let Some(last) = self.messages.last() {
            self.last_message = Some(last.clone());
        }
    }

    fn append(&mut self, message: Message) {
        insert_sorted(&mut self.messages, message);
        self.refresh_last_message();
    }

    /// Keep the newest message as the preview without touching the sequence
    fn note_last(&mut self, message: Message) {
        let newer = match &self.last_message {
            Some(last) => message.ordering_key() >= last.ordering_key(),
            None => true,
        };
        if newer {
            self.last_message = Some(message);
        }
    }

    /// Match `incoming` against an unconfirmed optimistic send
    fn take_echo(&mut self, incoming: &Message, tolerance: Duration) -> bool {
        let found = self
            .messages
            .iter()
            .find(|m| {
                m.origin == MessageOrigin::Optimistic
                    && !self.confirmed.contains_key(&m.seq)
                    && m.same_payload(incoming, tolerance)
            })
            .map(|m| m.seq);
        match found {
            Some(seq) => {
                self.confirmed.insert(seq, incoming.clone());
                true
            }
            None => false,
        }
    }

    /// Same server message as one already present or already absorbed as an echo
    fn already_delivered(&self, incoming: &Message) -> bool {
        self.messages
            .iter()
            .filter(|m| m.origin != MessageOrigin::Optimistic)
            .any(|m| m.is_duplicate_of(incoming))
            || self
                .confirmed
                .values()
                .any(|echo| echo.is_duplicate_of(incoming))
    }

    /// Install a freshly loaded history as the base sequence, layering on top
    /// every message applied since the load was issued. Each live message is
    /// matched one-to-one against history so repeated identical texts survive.
    fn replace_with_history(&mut self, history: Vec<Message>, tolerance: Duration) -> usize {
        let live = std::mem::take(&mut self.messages);
        let mut matched = vec![false; history.len()];
        let mut unmatched = Vec::new();

        for message in live {
            let slot = history
                .iter()
                .enumerate()
                .find(|(i, base)| {
                    !matched[*i]
                        && match message.origin {
                            // the server copy wins over the local one
                            MessageOrigin::Optimistic => base.same_payload(&message, tolerance),
                            _ => base.is_duplicate_of(&message),
                        }
                })
                .map(|(i, _)| i);
            match slot {
                Some(i) => matched[i] = true,
                None => unmatched.push(message),
            }
        }

        self.messages = history;
        for message in unmatched {
            insert_sorted(&mut self.messages, message);
        }
        let seqs: Vec<u64> = self.messages.iter().map(|m| m.seq).collect();
        self.confirmed.retain(|seq, _| seqs.contains(seq));
        self.refresh_last_message();
        self.messages.len()
    }
}

pub struct ConversationStore {
    state: Mutex<StoreState>,
    subscribers: Mutex<Vec<mpsc::Sender<StoreUpdate>>>,
    history: HistoryLoader,
    echo_tolerance: Duration,
}

impl ConversationStore {
    pub fn new(history: HistoryLoader, echo_tolerance_ms: i64) -> Self {
        ConversationStore {
            state: Mutex::new(StoreState::new()),
            subscribers: Mutex::new(Vec::new()),
            history,
            echo_tolerance: Duration::milliseconds(echo_tolerance_ms),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock_or_recover(&self.state)
    }

    /// Receive every committed mutation
    pub fn subscribe(&self) -> mpsc::Receiver<StoreUpdate> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        lock_or_recover(&self.subscribers).push(tx);
        rx
    }

    fn notify(&self, update: StoreUpdate) {
        let mut subscribers = lock_or_recover(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Store subscriber is lagging, dropping update");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn set_session(&self, user_id: UserId) {
        let session = {
            let mut state = self.lock();
            state.session.user_id = Some(user_id);
            state.session
        };
        info!("Session user set to {}", user_id);
        self.notify(StoreUpdate::SessionChanged(session));
    }

    pub fn session(&self) -> SessionContext {
        self.lock().session
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.lock().contacts.clone()
    }

    pub fn previews(&self) -> Vec<ConversationPreview> {
        self.lock().previews.clone()
    }

    pub fn profile(&self) -> Option<Contact> {
        self.lock().profile.clone()
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.lock().active
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        let state = self.lock();
        state
            .active
            .and_then(|peer| state.conversations.get(&peer).cloned())
    }

    pub fn active_messages(&self) -> Vec<Message> {
        self.active_conversation()
            .map(|c| c.messages)
            .unwrap_or_default()
    }

    pub fn conversation(&self, peer: UserId) -> Option<Conversation> {
        self.lock().conversations.get(&peer).cloned()
    }

    /// Inbound events dropped for missing routing fields
    pub fn malformed_count(&self) -> u64 {
        self.lock().malformed
    }

    /// Replace the contact set wholesale and upgrade placeholder contacts
    pub fn apply_directory(&self, directory: Directory) {
        let count = directory.contacts.len();
        {
            let mut state = self.lock();
            state.contacts = directory.contacts;
            state.previews = directory.previews;
            if directory.profile.is_some() {
                state.profile = directory.profile;
            }
            let peers: Vec<UserId> = state.conversations.keys().copied().collect();
            for peer in peers {
                state.conversation_mut(peer);
            }
        }
        info!("Contact directory refreshed with {} contacts", count);
        self.notify(StoreUpdate::DirectoryRefreshed { contacts: count });
    }

    /// Make `peer` the active conversation and load its history as the new base
    pub async fn select_conversation(&self, peer: UserId) -> SelectOutcome {
        let selection = self.begin_selection(peer);
        self.load_selection(selection).await
    }

    /// Switch the active conversation without loading anything yet.
    ///
    /// The returned ticket orders this selection against later ones; only the
    /// newest ticket may install a history.
    pub fn begin_selection(&self, peer: UserId) -> Selection {
        let selection = {
            let mut state = self.lock();
            state.selection_epoch += 1;
            state.active = Some(peer);
            state.session.peer_id = Some(peer);
            let conversation = state.conversation_mut(peer);
            conversation.messages.clear();
            conversation.confirmed.clear();
            if let Some(preview) = state.previews.iter_mut().find(|p| p.contact.id == peer) {
                preview.unseen = 0;
            }
            Selection {
                peer,
                epoch: state.selection_epoch,
                user_id: state.session.user_id,
            }
        };
        self.notify(StoreUpdate::ConversationSelected(peer));
        selection
    }

    fn is_current(&self, selection: &Selection) -> bool {
        self.lock().selection_epoch == selection.epoch
    }

    /// Fetch the history for `selection` and install it if nothing newer was selected
    pub async fn load_selection(&self, selection: Selection) -> SelectOutcome {
        let peer = selection.peer;
        if !self.is_current(&selection) {
            debug!("Selection of {} superseded before its history was requested", peer);
            return SelectOutcome::Stale;
        }

        let user_id = match selection.user_id {
            Some(id) => id,
            None => {
                warn!("No session user, skipping history load for {}", peer);
                return SelectOutcome::NoSession;
            }
        };

        let history = self.history.load_history(user_id, peer).await;

        let applied = {
            let mut state = self.lock();
            if state.selection_epoch != selection.epoch {
                None
            } else {
                let tolerance = self.echo_tolerance;
                Some(state.conversation_mut(peer).replace_with_history(history, tolerance))
            }
        };

        match applied {
            Some(count) => {
                self.notify(StoreUpdate::HistoryApplied {
                    peer,
                    messages: count,
                });
                SelectOutcome::Loaded { messages: count }
            }
            None => {
                debug!("Discarding stale history for {}", peer);
                SelectOutcome::Stale
            }
        }
    }

    /// Apply one inbound push event
    pub fn apply_incoming(&self, record: MessageRecord) -> IncomingOutcome {
        let message = match Message::from_record(&record, MessageOrigin::Push, Utc::now()) {
            Ok(message) => message,
            Err(e) => {
                let dropped = {
                    let mut state = self.lock();
                    state.malformed += 1;
                    state.malformed
                };
                warn!("Dropping malformed inbound message ({} so far): {}", dropped, e);
                return IncomingOutcome::Rejected(e);
            }
        };

        let tolerance = self.echo_tolerance;
        let (outcome, update) = {
            let mut state = self.lock();
            let me = state.session.user_id;
            match state.active.filter(|peer| message.involves(*peer)) {
                Some(active) => {
                    let conversation = state.conversation_mut(active);
                    if conversation.already_delivered(&message) {
                        debug!("Dropping repeated delivery of a message");
                        (IncomingOutcome::Duplicate, None)
                    } else if conversation.take_echo(&message, tolerance) {
                        debug!("Server echo matched an optimistic send");
                        (IncomingOutcome::Duplicate, None)
                    } else {
                        conversation.append(message.clone());
                        state.touch_preview(active, &message, false);
                        (
                            IncomingOutcome::Appended,
                            Some(StoreUpdate::MessageAppended {
                                peer: active,
                                message,
                            }),
                        )
                    }
                }
                None => {
                    let peer = message.peer_of(me);
                    state.conversation_mut(peer).note_last(message.clone());
                    let unseen = Some(message.sender_id) != me;
                    state.touch_preview(peer, &message, unseen);
                    (
                        IncomingOutcome::Previewed,
                        Some(StoreUpdate::PreviewUpdated { peer, message }),
                    )
                }
            }
        };

        if let Some(update) = update {
            self.notify(update);
        }
        outcome
    }

    /// Append a locally composed message before the server acknowledges it
    pub fn apply_optimistic_send(&self, message: Message) -> bool {
        let appended = {
            let mut state = self.lock();
            match state.active.filter(|peer| message.involves(*peer)) {
                Some(active) => {
                    state.conversation_mut(active).append(message.clone());
                    state.touch_preview(active, &message, false);
                    Some(active)
                }
                None => None,
            }
        };
        match appended {
            Some(peer) => {
                self.notify(StoreUpdate::MessageAppended { peer, message });
                true
            }
            None => {
                warn!("No active conversation for optimistic send");
                false
            }
        }
    }

    /// Session teardown: forget identity, contacts and conversations
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            let epoch = state.selection_epoch + 1;
            *state = StoreState::new();
            // Pending history loads must still see a changed context
            state.selection_epoch = epoch;
        }
        info!("Conversation store reset");
        self.notify(StoreUpdate::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::history::HistorySource;
    use crate::models::{Presence, RecordId};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::Arc;

    struct StaticHistory(Vec<MessageRecord>);

    #[async_trait]
    impl HistorySource for StaticHistory {
        async fn fetch_history(
            &self,
            _sender_id: UserId,
            _receiver_id: UserId,
        ) -> Result<Vec<MessageRecord>, ChatError> {
            Ok(self.0.clone())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(sender: i64, receiver: i64, body: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            sender_id: Some(UserId(sender)),
            receiver_id: Some(UserId(receiver)),
            message: Some(body.to_string()),
            created_at: Some(at(secs)),
            ..Default::default()
        }
    }

    fn store_with(history: Vec<MessageRecord>) -> ConversationStore {
        let loader = HistoryLoader::new(Arc::new(StaticHistory(history)));
        let store = ConversationStore::new(loader, DEFAULT_ECHO_TOLERANCE_MS);
        store.set_session(UserId(3));
        store
    }

    fn is_sorted(messages: &[Message]) -> bool {
        messages
            .windows(2)
            .all(|w| w[0].ordering_key() <= w[1].ordering_key())
    }

    #[tokio::test]
    async fn test_interleaved_arrivals_stay_sorted() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        for secs in [50, 10, 30, 15, 70, 20] {
            store.apply_incoming(record(7, 3, &format!("push {}", secs), secs));
            store.apply_optimistic_send(Message::new(
                UserId(3),
                UserId(7),
                &format!("local {}", secs),
                at(secs + 1),
                MessageOrigin::Optimistic,
            ));
        }

        let messages = store.active_messages();
        assert_eq!(messages.len(), 12);
        assert!(is_sorted(&messages));
    }

    #[tokio::test]
    async fn test_echo_of_optimistic_send_is_discarded() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        store.apply_optimistic_send(Message::new(
            UserId(3),
            UserId(7),
            "hi",
            at(0),
            MessageOrigin::Optimistic,
        ));
        let outcome = store.apply_incoming(record(3, 7, "hi", 2));

        assert_eq!(outcome, IncomingOutcome::Duplicate);
        assert_eq!(store.active_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_each_echo_confirms_one_send() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        for _ in 0..2 {
            store.apply_optimistic_send(Message::new(
                UserId(3),
                UserId(7),
                "ok",
                at(0),
                MessageOrigin::Optimistic,
            ));
        }
        let echo = |id: i64| MessageRecord {
            id: Some(RecordId::Num(id)),
            ..record(3, 7, "ok", 1)
        };
        assert_eq!(store.apply_incoming(echo(1)), IncomingOutcome::Duplicate);
        assert_eq!(store.apply_incoming(echo(2)), IncomingOutcome::Duplicate);
        // A third "ok" has no pending send left to match
        assert_eq!(store.apply_incoming(echo(3)), IncomingOutcome::Appended);
        assert_eq!(store.active_messages().len(), 3);
    }

    #[tokio::test]
    async fn test_redelivered_echo_is_dropped() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        store.apply_optimistic_send(Message::new(
            UserId(3),
            UserId(7),
            "hi",
            at(0),
            MessageOrigin::Optimistic,
        ));
        let echo = MessageRecord {
            id: Some(RecordId::Num(77)),
            ..record(3, 7, "hi", 1)
        };
        assert_eq!(store.apply_incoming(echo.clone()), IncomingOutcome::Duplicate);
        assert_eq!(store.apply_incoming(echo), IncomingOutcome::Duplicate);

        assert_eq!(store.active_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_echo_without_id_is_dropped() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        store.apply_optimistic_send(Message::new(
            UserId(3),
            UserId(7),
            "hi",
            at(0),
            MessageOrigin::Optimistic,
        ));
        assert_eq!(store.apply_incoming(record(3, 7, "hi", 2)), IncomingOutcome::Duplicate);
        assert_eq!(store.apply_incoming(record(3, 7, "hi", 2)), IncomingOutcome::Duplicate);
        assert_eq!(store.active_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_selection_skips_history_request() {
        let store = store_with(vec![record(7, 3, "from seven", 1)]);

        let first = store.begin_selection(UserId(9));
        let second = store.begin_selection(UserId(7));

        assert_eq!(store.load_selection(first).await, SelectOutcome::Stale);
        assert_eq!(store.active_peer(), Some(UserId(7)));
        assert!(store.active_messages().is_empty());
        assert_eq!(
            store.load_selection(second).await,
            SelectOutcome::Loaded { messages: 1 }
        );
    }

    #[tokio::test]
    async fn test_echo_outside_tolerance_is_kept() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        store.apply_optimistic_send(Message::new(
            UserId(3),
            UserId(7),
            "hi",
            at(0),
            MessageOrigin::Optimistic,
        ));
        assert_eq!(store.apply_incoming(record(3, 7, "hi", 60)), IncomingOutcome::Appended);
    }

    #[tokio::test]
    async fn test_repeated_push_with_same_id_is_dropped() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        let mut push = record(7, 3, "hello", 5);
        push.id = Some(crate::models::RecordId::Num(41));
        assert_eq!(store.apply_incoming(push.clone()), IncomingOutcome::Appended);
        assert_eq!(store.apply_incoming(push), IncomingOutcome::Duplicate);
        assert_eq!(store.active_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_push_for_other_peer_updates_preview_only() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        let outcome = store.apply_incoming(record(9, 3, "psst", 5));
        assert_eq!(outcome, IncomingOutcome::Previewed);
        assert!(store.active_messages().is_empty());

        let other = store.conversation(UserId(9)).unwrap();
        assert!(other.messages.is_empty());
        assert_eq!(other.last_message.unwrap().body, "psst");
        // Unknown sender gets a placeholder contact
        assert!(other.contact.placeholder);

        let preview = store
            .previews()
            .into_iter()
            .find(|p| p.contact.id == UserId(9))
            .unwrap();
        assert_eq!(preview.unseen, 1);
        assert_eq!(preview.last_message.unwrap().body, "psst");
    }

    #[tokio::test]
    async fn test_selecting_clears_unseen() {
        let store = store_with(vec![record(9, 3, "psst", 5)]);
        store.apply_incoming(record(9, 3, "psst", 5));
        store.select_conversation(UserId(9)).await;

        let preview = store
            .previews()
            .into_iter()
            .find(|p| p.contact.id == UserId(9))
            .unwrap();
        assert_eq!(preview.unseen, 0);
        assert_eq!(store.active_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_push_is_counted_and_dropped() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;

        let mut broken = record(7, 3, "hi", 1);
        broken.sender_id = None;
        assert!(matches!(
            store.apply_incoming(broken),
            IncomingOutcome::Rejected(ChatError::MalformedEvent(_))
        ));
        assert!(store.active_messages().is_empty());
        assert_eq!(store.malformed_count(), 1);
    }

    #[test]
    fn test_history_merge_keeps_live_messages_and_drops_local_copies() {
        let mut conversation = Conversation::new(Contact::placeholder(UserId(7)));
        conversation.append(Message::new(
            UserId(3),
            UserId(7),
            "hi",
            at(2),
            MessageOrigin::Optimistic,
        ));
        conversation.append(
            Message::from_record(&record(7, 3, "yo", 4), MessageOrigin::Push, at(4)).unwrap(),
        );

        let history = vec![
            Message::from_record(&record(7, 3, "earlier", 0), MessageOrigin::History, at(0))
                .unwrap(),
            Message::from_record(&record(3, 7, "hi", 3), MessageOrigin::History, at(0)).unwrap(),
        ];
        let count = conversation.replace_with_history(history, Duration::milliseconds(5000));

        assert_eq!(count, 3);
        let bodies: Vec<&str> = conversation.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["earlier", "hi", "yo"]);
        assert!(conversation
            .messages
            .iter()
            .all(|m| m.origin != MessageOrigin::Optimistic));
        assert_eq!(conversation.last_message.unwrap().body, "yo");
    }

    #[tokio::test]
    async fn test_directory_upgrades_placeholder() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;
        assert!(store.active_conversation().unwrap().contact.placeholder);

        store.apply_directory(Directory {
            contacts: vec![Contact::new(UserId(7), "Felecia", Presence::Online)],
            previews: Vec::new(),
            profile: None,
        });

        let contact = store.active_conversation().unwrap().contact;
        assert!(!contact.placeholder);
        assert_eq!(contact.label(), "Felecia");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates_and_closed_ones_are_pruned() {
        let store = store_with(Vec::new());
        let mut rx = store.subscribe();
        drop(store.subscribe());

        store.select_conversation(UserId(7)).await;
        assert_eq!(rx.recv().await, Some(StoreUpdate::ConversationSelected(UserId(7))));
        assert_eq!(
            rx.recv().await,
            Some(StoreUpdate::HistoryApplied {
                peer: UserId(7),
                messages: 0
            })
        );
        assert_eq!(lock_or_recover(&store.subscribers).len(), 1);
    }

    #[tokio::test]
    async fn test_reset_forgets_everything() {
        let store = store_with(Vec::new());
        store.select_conversation(UserId(7)).await;
        store.apply_incoming(record(7, 3, "hi", 1));

        store.reset();
        assert_eq!(store.session(), SessionContext::default());
        assert!(store.active_conversation().is_none());
        assert!(store.conversation(UserId(7)).is_none());
    }
}
