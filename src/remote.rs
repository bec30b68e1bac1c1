//! HTTP client for a remote portal instance: the chat backend, the sync
//! mirror, and the user endpoints, all behind one bearer-token session.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::chat::ChatBackend;
use crate::error::{ErrorKind, PortalError};
use crate::sync::{Connectivity, RemoteMirror};
use crate::types::{Chat, ChatCategory, ChatSummary, MessagePair, Notice, User, VoiceFeedback};

pub struct PortalClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl PortalClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Send, surface non-2xx as classified errors, unwrap the portal's
    /// `{success, data}` envelope.
    async fn execute(&self, builder: RequestBuilder) -> Result<Value, PortalError> {
        let resp = builder.send().await.map_err(|e| PortalError::network(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| PortalError::network(&e))?;
        if !status.is_success() {
            return Err(PortalError::from_status(status.as_u16(), &text));
        }
        let envelope: Value = serde_json::from_str(&text)
            .map_err(|e| PortalError::new(ErrorKind::Unknown, e.to_string()))?;
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, PortalError> {
        serde_json::from_value(data).map_err(|e| PortalError::new(ErrorKind::Unknown, e.to_string()))
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        language: &str,
    ) -> Result<User, PortalError> {
        let builder = self.request(Method::POST, "/api/users/register").await.json(&json!({
            "name": name,
            "email": email,
            "password": password,
            "language": language,
        }));
        let data = self.execute(builder).await?;
        let token: String = Self::decode(data["token"].clone())?;
        let user: User = Self::decode(data["user"].clone())?;
        self.set_token(token).await;
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, PortalError> {
        let builder = self.request(Method::POST, "/api/users/login").await.json(&json!({
            "email": email,
            "password": password,
        }));
        let data = self.execute(builder).await?;
        let token: String = Self::decode(data["token"].clone())?;
        let user: User = Self::decode(data["user"].clone())?;
        self.set_token(token).await;
        Ok(user)
    }

    pub async fn me(&self) -> Result<User, PortalError> {
        let builder = self.request(Method::GET, "/api/users/me").await;
        Self::decode(self.execute(builder).await?)
    }

    pub async fn update_profile(
        &self,
        name: Option<&str>,
        language: Option<&str>,
    ) -> Result<User, PortalError> {
        let mut body = serde_json::Map::new();
        if let Some(name) = name {
            body.insert("name".to_string(), json!(name));
        }
        if let Some(language) = language {
            body.insert("language".to_string(), json!(language));
        }
        let builder = self
            .request(Method::PUT, "/api/users/profile")
            .await
            .json(&Value::Object(body));
        Self::decode(self.execute(builder).await?)
    }
}

#[async_trait]
impl ChatBackend for PortalClient {
    async fn create_chat(
        &self,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError> {
        let builder = self.request(Method::POST, "/api/chat").await.json(&json!({
            "title": title,
            "category": category,
            "language": language,
        }));
        Self::decode(self.execute(builder).await?)
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, PortalError> {
        let builder = self.request(Method::GET, "/api/chat").await;
        Self::decode(self.execute(builder).await?)
    }

    async fn get_chat(&self, id: &str) -> Result<Chat, PortalError> {
        let builder = self.request(Method::GET, &format!("/api/chat/{}", id)).await;
        Self::decode(self.execute(builder).await?)
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<MessagePair, PortalError> {
        let builder = self
            .request(Method::POST, &format!("/api/chat/{}/message", chat_id))
            .await
            .json(&json!({ "content": content }));
        Self::decode(self.execute(builder).await?)
    }

    async fn delete_chat(&self, id: &str) -> Result<(), PortalError> {
        let builder = self.request(Method::DELETE, &format!("/api/chat/{}", id)).await;
        self.execute(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteMirror for PortalClient {
    async fn push_notices(&self, notices: &[Notice]) -> Result<(), PortalError> {
        debug!(count = notices.len(), "Pushing notices to mirror");
        let builder = self
            .request(Method::PUT, "/api/sync/notices")
            .await
            .json(&json!({ "items": notices }));
        self.execute(builder).await?;
        Ok(())
    }

    async fn push_feedback(&self, feedback: &[VoiceFeedback]) -> Result<(), PortalError> {
        debug!(count = feedback.len(), "Pushing feedback to mirror");
        let builder = self
            .request(Method::PUT, "/api/sync/feedback")
            .await
            .json(&json!({ "items": feedback }));
        self.execute(builder).await?;
        Ok(())
    }

    async fn pull_notices(&self) -> Result<Vec<Notice>, PortalError> {
        let builder = self.request(Method::GET, "/api/sync/notices").await;
        Self::decode(self.execute(builder).await?)
    }

    async fn pull_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError> {
        let builder = self.request(Method::GET, "/api/sync/feedback").await;
        Self::decode(self.execute(builder).await?)
    }
}

/// Probes the portal's health endpoint to decide whether we are online.
pub struct HttpConnectivity {
    client: Client,
    health_url: String,
}

impl HttpConnectivity {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            health_url: format!("{}/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
