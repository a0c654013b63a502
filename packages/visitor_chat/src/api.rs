//! REST side of the chat backend: session bootstrap, history, and the
//! multipart fallback used for file sends and while the socket is down.

use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::model::{Message, StagedFile};
use crate::protocol::{ApiResponse, HistoryItem, InitSessionRequest, SessionInit};

#[derive(Clone, Debug)]
pub struct ChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(api_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// `POST /api/sessions/init` → session token.
    pub async fn init_session(&self, name: &str, email: &str) -> Result<String, ChatError> {
        let url = format!("{}/api/sessions/init", self.base_url);
        debug!("Initializing chat session at {}", url);

        let response: ApiResponse<SessionInit> = self
            .client
            .post(&url)
            .json(&InitSessionRequest { name, email })
            .send()
            .await?
            .json()
            .await?;

        let token = response
            .data
            .as_ref()
            .and_then(|d| d.session_token.clone())
            .filter(|t| !t.is_empty());
        match token {
            Some(token) if response.success => Ok(token),
            _ => Err(ChatError::Rejected(response.failure_reason())),
        }
    }

    /// `GET /api/messages/{token}` → history in server order.
    pub async fn fetch_history(&self, token: &str) -> Result<Vec<Message>, ChatError> {
        let url = format!("{}/api/messages/{}", self.base_url, token);
        debug!("Loading message history from {}", url);

        let response: ApiResponse<Vec<serde_json::Value>> =
            self.client.get(&url).send().await?.json().await?;

        if !response.success {
            return Err(ChatError::Rejected(response.failure_reason()));
        }
        // Decode per item so one bad row doesn't cost the whole page
        Ok(response
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<HistoryItem>(item) {
                Ok(item) => Some(Message::from(item)),
                Err(e) => {
                    warn!("Skipping malformed history item: {}", e);
                    None
                }
            })
            .collect())
    }

    /// `POST /api/messages/send` as multipart form.
    pub async fn send_message(
        &self,
        token: &str,
        message: Option<&str>,
        file: Option<StagedFile>,
    ) -> Result<(), ChatError> {
        let url = format!("{}/api/messages/send", self.base_url);

        let mut form = Form::new().text("session_token", token.to_string());
        if let Some(text) = message.filter(|m| !m.is_empty()) {
            form = form.text("message", text.to_string());
        }
        if let Some(file) = file {
            debug!("Attaching {} ({} bytes)", file.file_name, file.bytes.len());
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime)?;
            form = form.part("file", part);
        }

        let response: ApiResponse<serde_json::Value> = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(ChatError::Rejected(response.failure_reason()))
        }
    }
}
