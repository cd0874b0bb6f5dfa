// Contact directory for chatsync
// Maps the chats-and-contacts payload into the store's identity model

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;

use super::presence::parse_status;
use crate::error::ChatError;
use crate::models::{Contact, ConversationPreview, PreviewLine, UserId};

#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn fetch_directory(
        &self,
        query: &str,
        user_id: UserId,
    ) -> Result<DirectoryPayload, ChatError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContact {
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default, alias = "name")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLastMessage {
    #[serde(default)]
    pub message: Option<String>,
    // Kept as a string: backends disagree on the format
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub sender_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChat {
    #[serde(default)]
    pub unseen_msgs: u32,
    #[serde(default)]
    pub last_message: Option<RawLastMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChatContact {
    #[serde(flatten)]
    pub contact: RawContact,
    #[serde(default)]
    pub chat: Option<RawChat>,
}

/// Response body of the contact/profile endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryPayload {
    #[serde(default)]
    pub contacts: Vec<RawContact>,
    #[serde(default)]
    pub chats_contacts: Vec<RawChatContact>,
    #[serde(default)]
    pub profile_user: Option<RawContact>,
}

/// Directory after mapping, ready to seed the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
    pub contacts: Vec<Contact>,
    pub previews: Vec<ConversationPreview>,
    pub profile: Option<Contact>,
}

/// Prefix relative avatar paths with the image base URL
pub fn resolve_avatar(image_base: Option<&str>, avatar: &str) -> String {
    let absolute = avatar.starts_with("http://")
        || avatar.starts_with("https://")
        || avatar.starts_with("data:");
    match image_base {
        Some(base) if !absolute && !base.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            avatar.trim_start_matches('/')
        ),
        _ => avatar.to_string(),
    }
}

fn map_contact(raw: &RawContact, image_base: Option<&str>) -> Option<Contact> {
    let id = match raw.id {
        Some(id) => id,
        None => {
            warn!("Skipping directory contact without id: {:?}", raw.full_name);
            return None;
        }
    };
    Some(Contact {
        id,
        display_name: raw.full_name.clone(),
        avatar: raw
            .avatar
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| resolve_avatar(image_base, a)),
        about: raw.about.clone(),
        presence: parse_status(raw.status.as_deref()),
        placeholder: false,
    })
}

fn map_last_message(raw: &RawLastMessage) -> PreviewLine {
    let at = raw
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    PreviewLine {
        body: raw.message.clone().unwrap_or_default(),
        at,
        sender_id: raw.sender_id,
    }
}

impl DirectoryPayload {
    pub fn into_directory(self, image_base: Option<&str>) -> Directory {
        let contacts = self
            .contacts
            .iter()
            .filter_map(|raw| map_contact(raw, image_base))
            .collect();

        let previews = self
            .chats_contacts
            .iter()
            .filter_map(|raw| {
                let contact = map_contact(&raw.contact, image_base)?;
                let chat = raw.chat.clone().unwrap_or_default();
                Some(ConversationPreview {
                    contact,
                    last_message: chat.last_message.as_ref().map(map_last_message),
                    unseen: chat.unseen_msgs,
                })
            })
            .collect();

        let profile = self
            .profile_user
            .as_ref()
            .and_then(|raw| map_contact(raw, image_base));

        Directory {
            contacts,
            previews,
            profile,
        }
    }
}
