// Outbound sender for chatsync
// Validates a composed message, emits it and echoes it locally

use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

use super::connection::TransportChannel;
use super::protocol::{ClientEvent, OutgoingMessage};
use super::store::ConversationStore;
use crate::error::ChatError;
use crate::models::{Message, MessageOrigin};

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Emitted and echoed locally
    Sent(Message),
    /// Echoed locally but the emit was dropped; the copy is never delivered
    Undelivered { message: Message, error: ChatError },
    /// Nothing emitted, nothing appended
    Rejected(ChatError),
}

impl SendOutcome {
    pub fn message(&self) -> Option<&Message> {
        match self {
            SendOutcome::Sent(message) => Some(message),
            SendOutcome::Undelivered { message, .. } => Some(message),
            SendOutcome::Rejected(_) => None,
        }
    }
}

pub struct OutboundSender {
    channel: TransportChannel,
    store: Arc<ConversationStore>,
}

impl OutboundSender {
    pub fn new(channel: TransportChannel, store: Arc<ConversationStore>) -> Self {
        OutboundSender { channel, store }
    }

    /// Send `body` to the active peer. Never fails towards the caller.
    ///
    /// There is no acknowledgment: when the channel is down the emit is dropped
    /// but the optimistic copy stays in the conversation.
    pub fn send(&self, body: &str) -> SendOutcome {
        if body.trim().is_empty() {
            let error = ChatError::Validation("message body is empty".to_string());
            warn!("{}", error);
            return SendOutcome::Rejected(error);
        }

        let sender_id = match self.store.session().user_id {
            Some(id) => id,
            None => {
                let error = ChatError::Validation("no session user".to_string());
                warn!("{}", error);
                return SendOutcome::Rejected(error);
            }
        };
        let receiver_id = match self.store.active_peer() {
            Some(peer) => peer,
            None => {
                let error = ChatError::Validation("no active conversation".to_string());
                warn!("{}", error);
                return SendOutcome::Rejected(error);
            }
        };

        let emitted = self.channel.emit(ClientEvent::SendMessage(OutgoingMessage {
            sender_id,
            receiver_id,
            message: body.to_string(),
        }));

        let message = Message::new(
            sender_id,
            receiver_id,
            body,
            Utc::now(),
            MessageOrigin::Optimistic,
        );
        self.store.apply_optimistic_send(message.clone());

        match emitted {
            Ok(()) => {
                info!("Sent message to {}", receiver_id);
                SendOutcome::Sent(message)
            }
            Err(error) => {
                warn!(
                    "Message to {} shown locally but not delivered: {}",
                    receiver_id, error
                );
                SendOutcome::Undelivered { message, error }
            }
        }
    }
}
