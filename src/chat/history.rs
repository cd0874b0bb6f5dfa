// History loader for chatsync
// Fetches the backlog of one conversation through a request/response call

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{Message, MessageOrigin, MessageRecord, UserId};

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageRecord>, ChatError>;
}

pub struct HistoryLoader {
    source: Arc<dyn HistorySource>,
}

impl HistoryLoader {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        HistoryLoader { source }
    }

    /// Load the backlog between `sender_id` and `receiver_id`
    ///
    /// The result is sorted ascending by ordering key regardless of the order the
    /// endpoint returned. On failure the error is logged and an empty sequence is
    /// returned, so an empty result means "unknown", not "no history".
    pub async fn load_history(&self, sender_id: UserId, receiver_id: UserId) -> Vec<Message> {
        info!("Fetching chat history between {} and {}", sender_id, receiver_id);

        let records = match self.source.fetch_history(sender_id, receiver_id).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to get chat history: {}", e);
                return Vec::new();
            }
        };

        let received_at = Utc::now();
        let mut messages: Vec<Message> = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                match Message::from_record(record, MessageOrigin::History, received_at) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!("Skipping history record {}: {}", index, e);
                        None
                    }
                }
            })
            .collect();

        // seq follows the raw order, so equal timestamps keep it
        messages.sort_by_key(|m| m.ordering_key());

        info!(
            "Loaded {} of {} history records for {}",
            messages.len(),
            records.len(),
            receiver_id
        );
        messages
    }
}
