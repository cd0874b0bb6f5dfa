use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ChatError;

// Arrival order across the whole process, used to break timestamp ties
static ARRIVAL_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(UserId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    Online,
    Busy,
    Away,
    #[default]
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub about: Option<String>,
    pub presence: Presence,
    // Synthesized from a bare id, not from the directory
    pub placeholder: bool,
}

impl Contact {
    pub fn new(id: UserId, display_name: &str, presence: Presence) -> Self {
        Contact {
            id,
            display_name: Some(display_name.to_string()),
            avatar: None,
            about: None,
            presence,
            placeholder: false,
        }
    }

    /// Minimal contact for a peer that is not in the known contact set
    pub fn placeholder(id: UserId) -> Self {
        Contact {
            id,
            display_name: None,
            avatar: None,
            about: None,
            presence: Presence::Offline,
            placeholder: true,
        }
    }

    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("user {}", self.id),
        }
    }
}

/// Server-side message id; backends hand out either integers or strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Num(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Num(n) => write!(f, "{}", n),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Message as it travels over the wire, both on push and in history responses.
/// Routing fields are optional here so malformed payloads can be rejected by the
/// store instead of failing deserialization of the whole frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    History,
    Push,
    Optimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderingKey {
    pub millis: i64,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<RecordId>,
    pub local_id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
    pub origin: MessageOrigin,
}

impl Message {
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
        created_at: DateTime<Utc>,
        origin: MessageOrigin,
    ) -> Self {
        Message {
            id: None,
            local_id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            receiver_id,
            body: body.to_string(),
            created_at,
            seq: ARRIVAL_SEQ.fetch_add(1, Ordering::Relaxed),
            origin,
        }
    }

    /// Build a message from a wire record.
    ///
    /// Records without a `createdAt` are stamped with `received_at`.
    pub fn from_record(
        record: &MessageRecord,
        origin: MessageOrigin,
        received_at: DateTime<Utc>,
    ) -> Result<Self, ChatError> {
        let sender_id = record
            .sender_id
            .ok_or_else(|| ChatError::MalformedEvent("missing sender_id".to_string()))?;
        let receiver_id = record
            .receiver_id
            .ok_or_else(|| ChatError::MalformedEvent("missing receiver_id".to_string()))?;
        let created_at = record.created_at.unwrap_or(received_at);
        let mut message = Message::new(
            sender_id,
            receiver_id,
            record.message.as_deref().unwrap_or(""),
            created_at,
            origin,
        );
        message.id = record.id.clone();
        Ok(message)
    }

    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            millis: self.created_at.timestamp_millis(),
            seq: self.seq,
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    /// The other party of this message from the point of view of `me`
    pub fn peer_of(&self, me: Option<UserId>) -> UserId {
        match me {
            Some(me) if self.sender_id == me => self.receiver_id,
            _ => self.sender_id,
        }
    }

    /// Same sender, receiver and body with timestamps no further apart than `tolerance`
    pub fn same_payload(&self, other: &Message, tolerance: Duration) -> bool {
        self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.body == other.body
            && (self.created_at - other.created_at).num_milliseconds().abs()
                <= tolerance.num_milliseconds()
    }

    /// Two deliveries of the same server message
    pub fn is_duplicate_of(&self, other: &Message) -> bool {
        if let (Some(a), Some(b)) = (&self.id, &other.id) {
            return a == b;
        }
        self.same_payload(other, Duration::zero())
    }
}

/// Last-message line shown next to a contact in the chat list
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewLine {
    pub body: String,
    pub at: Option<DateTime<Utc>>,
    pub sender_id: Option<UserId>,
}

impl From<&Message> for PreviewLine {
    fn from(message: &Message) -> Self {
        PreviewLine {
            body: message.body.clone(),
            at: Some(message.created_at),
            sender_id: Some(message.sender_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPreview {
    pub contact: Contact,
    pub last_message: Option<PreviewLine>,
    pub unseen: u32,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub contact: Contact,
    pub messages: Vec<Message>,
    pub last_message: Option<Message>,
    // optimistic send seq -> the server echo that confirmed it
    pub(crate) confirmed: HashMap<u64, Message>,
}

impl Conversation {
    pub fn new(contact: Contact) -> Self {
        Conversation {
            contact,
            messages: Vec::new(),
            last_message: None,
            confirmed: HashMap::new(),
        }
    }

    pub fn peer(&self) -> UserId {
        self.contact.id
    }
}

/// Who is logged in and who they are talking to
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionContext {
    pub user_id: Option<UserId>,
    pub peer_id: Option<UserId>,
}

impl SessionContext {
    pub fn new(user_id: UserId) -> Self {
        SessionContext {
            user_id: Some(user_id),
            peer_id: None,
        }
    }
}
