// REST client for chatsync
// History and contact endpoints, with request logging and error alerts

use async_trait::async_trait;
use log::{error, info};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertLevel, AlertSink};
use crate::chat::directory::{ContactSource, DirectoryPayload};
use crate::chat::history::HistorySource;
use crate::config::EngineConfig;
use crate::error::ChatError;
use crate::models::{MessageRecord, UserId};

pub struct ApiClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    alerts: Arc<dyn AlertSink>,
}

impl ApiClient {
    pub fn new(config: &EngineConfig, alerts: Arc<dyn AlertSink>) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(ApiClient {
            http,
            base_url: config.api_base_url.clone(),
            access_token: config.access_token.clone(),
            alerts,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn fail(&self, message: String) -> ChatError {
        self.alerts.show_alert(&message, AlertLevel::Error);
        ChatError::Fetch(message)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChatError> {
        let url = self.url(path);
        let mut request = self.http.get(&url).query(query);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        info!("[API REQUEST] GET {} {:?}", url, query);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("[API REQUEST ERROR] GET {}: {}", url, e);
                return Err(self.fail(format!("Request failed: {}", e)));
            }
        };

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();
        let server_message = body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if !status.is_success() {
            let message = server_message
                .unwrap_or_else(|| format!("Response error: {}", status.as_u16()));
            error!("[API RESPONSE ERROR] GET {} {}: {}", url, status, message);
            return Err(self.fail(message));
        }
        info!("[API RESPONSE] GET {} {}", url, status);

        let body = match body {
            Some(body) => body,
            None => {
                error!("[API RESPONSE ERROR] GET {}: body is not JSON", url);
                return Err(self.fail(format!("Invalid response from {}", path)));
            }
        };
        // Only the server's own wording is surfaced on success
        if let Some(message) = server_message {
            self.alerts.show_alert(&message, AlertLevel::Success);
        }

        serde_json::from_value(body).map_err(|e| {
            error!("[API RESPONSE ERROR] GET {}: {}", url, e);
            self.fail(format!("Invalid response from {}: {}", path, e))
        })
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch_history(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageRecord>, ChatError> {
        self.get_json(
            "chats",
            &[
                ("senderId", sender_id.to_string()),
                ("receiverId", receiver_id.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl ContactSource for ApiClient {
    async fn fetch_directory(
        &self,
        query: &str,
        user_id: UserId,
    ) -> Result<DirectoryPayload, ChatError> {
        self.get_json(
            "chats/chats-and-contacts",
            &[("q", query.to_string()), ("userId", user_id.to_string())],
        )
        .await
    }
}
