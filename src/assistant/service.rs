//! In-process chat service: the server-authoritative side of the chat
//! contract, persisting conversations in SQLite and answering through a
//! `ReplyGenerator`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::assistant::ReplyGenerator;
use crate::chat::ChatBackend;
use crate::error::PortalError;
use crate::types::{Chat, ChatCategory, ChatSummary, Message, MessagePair};

pub struct ChatService {
    pool: SqlitePool,
    generator: Arc<dyn ReplyGenerator>,
}

impl ChatService {
    pub async fn new(pool: SqlitePool, generator: Arc<dyn ReplyGenerator>) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                language TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at)")
            .execute(&pool)
            .await?;
        Ok(Self { pool, generator })
    }

    pub async fn create_chat(
        &self,
        user_id: &str,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError> {
        let now = Utc::now();
        let chat = Chat {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: if title.trim().is_empty() {
                "New Conversation".to_string()
            } else {
                title.to_string()
            },
            category,
            language: if language.is_empty() {
                "en".to_string()
            } else {
                language.to_string()
            },
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO chats (id, user_id, title, category, language, messages, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.category.as_str())
        .bind(&chat.language)
        .bind("[]")
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await
        .map_err(|e| PortalError::storage(e.to_string()))?;

        info!(id = %chat.id, user_id = %user_id, "Conversation created");
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>, PortalError> {
        let rows = sqlx::query(
            "SELECT id, title, category, language, created_at, updated_at
             FROM chats WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortalError::storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ChatSummary {
                    id: row.get("id"),
                    title: row.get("title"),
                    category: parse_category(&row.get::<String, _>("category"))?,
                    language: row.get("language"),
                    created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                    updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
                })
            })
            .collect()
    }

    /// Fetch one conversation. NotFound for unknown ids, Forbidden when the
    /// caller does not own it (enforced here, server-side).
    pub async fn get_chat(&self, user_id: &str, id: &str) -> Result<Chat, PortalError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?
            .ok_or_else(|| PortalError::not_found("Chat not found"))?;

        let owner: String = row.get("user_id");
        if owner != user_id {
            return Err(PortalError::forbidden("Not authorized to access this chat"));
        }

        let messages: Vec<Message> =
            serde_json::from_str(&row.get::<String, _>("messages"))
                .map_err(|e| PortalError::storage(e.to_string()))?;

        Ok(Chat {
            id: row.get("id"),
            user_id: owner,
            title: row.get("title"),
            category: parse_category(&row.get::<String, _>("category"))?,
            language: row.get("language"),
            messages,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        })
    }

    /// Append the user message, generate the assistant reply, persist both
    /// and return the canonical pair. The generator never surfaces transport
    /// errors, so a degraded model shows up as a fallback reply, not a 500.
    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        content: &str,
    ) -> Result<MessagePair, PortalError> {
        if content.trim().is_empty() {
            return Err(PortalError::validation("Please provide message content"));
        }

        let mut chat = self.get_chat(user_id, chat_id).await?;

        let user_message = Message::user(content);
        chat.messages.push(user_message.clone());

        let reply = self
            .generator
            .reply(&chat.messages, chat.category, &chat.language)
            .await;
        let assistant_message = Message::assistant(reply);
        chat.messages.push(assistant_message.clone());

        let raw = serde_json::to_string(&chat.messages)
            .map_err(|e| PortalError::storage(e.to_string()))?;
        sqlx::query("UPDATE chats SET messages = ?, updated_at = ? WHERE id = ?")
            .bind(&raw)
            .bind(fmt_ts(Utc::now()))
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;

        Ok(MessagePair {
            user_message,
            assistant_message,
        })
    }

    pub async fn delete_chat(&self, user_id: &str, id: &str) -> Result<(), PortalError> {
        // Ownership check first so a foreign id yields 403, not a silent 200.
        self.get_chat(user_id, id).await?;
        sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        info!(id = %id, "Conversation deleted");
        Ok(())
    }
}

/// Fixed-width RFC3339 so `ORDER BY updated_at` on the TEXT column sorts
/// chronologically.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_category(raw: &str) -> Result<ChatCategory, PortalError> {
    ChatCategory::parse(raw)
        .ok_or_else(|| PortalError::storage(format!("unknown chat category: {}", raw)))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, PortalError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PortalError::storage(e.to_string()))
}

/// `ChatBackend` adapter binding a `ChatService` to one authenticated user,
/// for running the session manager against the in-process service.
#[allow(dead_code)]
pub struct UserScopedChatService {
    service: Arc<ChatService>,
    user_id: String,
}

#[allow(dead_code)]
impl UserScopedChatService {
    pub fn new(service: Arc<ChatService>, user_id: impl Into<String>) -> Self {
        Self {
            service,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl ChatBackend for UserScopedChatService {
    async fn create_chat(
        &self,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError> {
        self.service
            .create_chat(&self.user_id, title, category, language)
            .await
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, PortalError> {
        self.service.list_chats(&self.user_id).await
    }

    async fn get_chat(&self, id: &str) -> Result<Chat, PortalError> {
        self.service.get_chat(&self.user_id, id).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<MessagePair, PortalError> {
        self.service
            .send_message(&self.user_id, chat_id, content)
            .await
    }

    async fn delete_chat(&self, id: &str) -> Result<(), PortalError> {
        self.service.delete_chat(&self.user_id, id).await
    }
}
