// Wire protocol for the messaging endpoint
// Every frame is a JSON text frame of the form {"event": <name>, "data": <payload>}

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::{MessageRecord, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
}

/// Client → server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "registerUser")]
    RegisterUser(UserId),
    #[serde(rename = "sendMessage")]
    SendMessage(OutgoingMessage),
}

/// Server → client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "newMessage")]
    NewMessage(MessageRecord),
    #[serde(rename = "disconnect")]
    Disconnect,
}

pub fn encode(event: &ClientEvent) -> Result<String, ChatError> {
    serde_json::to_string(event)
        .map_err(|e| ChatError::Connection(format!("failed to encode {:?}: {}", event, e)))
}

pub fn decode(frame: &str) -> Result<ServerEvent, ChatError> {
    serde_json::from_str(frame)
        .map_err(|e| ChatError::MalformedEvent(format!("undecodable frame: {}", e)))
}
