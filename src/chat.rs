//! Chat session manager: the authenticated user's conversation list and the
//! active conversation, kept consistent with a remote chat backend.
//!
//! Sends are optimistic: the user message is appended locally before the
//! remote confirms, then replaced by the canonical user/assistant pair. On
//! failure the provisional entry is discarded and the active chat is
//! re-fetched from the remote (rollback-by-reload, not fine-grained undo).
//!
//! Send state machine per session:
//!
//! Idle/Confirmed --send--> Sending --ok--> Confirmed
//!                                  --err--> RollingBack --reload--> Idle
//!
//! A second send while Sending or RollingBack is rejected.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, PortalError};
use crate::types::{Chat, ChatCategory, ChatSummary, Message, MessagePair};

/// The remote chat service contract. Implementations: `remote::PortalClient`
/// (HTTP, scoped by bearer token) and `assistant::service::UserScopedChatService`
/// (in-process, scoped by user id).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_chat(
        &self,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError>;
    /// Summaries ordered most-recently-updated first (server-determined).
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, PortalError>;
    async fn get_chat(&self, id: &str) -> Result<Chat, PortalError>;
    /// Returns the canonical user message plus the generated assistant reply.
    async fn send_message(&self, chat_id: &str, content: &str)
        -> Result<MessagePair, PortalError>;
    async fn delete_chat(&self, id: &str) -> Result<(), PortalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    /// Provisional user message appended, remote call in flight.
    Sending,
    /// Last send applied its canonical pair.
    Confirmed,
    /// Failed send being undone by re-fetching the chat.
    RollingBack,
}

#[derive(Default)]
struct SessionState {
    chats: Vec<ChatSummary>,
    active: Option<Chat>,
    send_state: SendState,
}

pub struct ChatSessionManager {
    backend: Arc<dyn ChatBackend>,
    state: RwLock<SessionState>,
}

impl ChatSessionManager {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub async fn chats(&self) -> Vec<ChatSummary> {
        self.state.read().await.chats.clone()
    }

    pub async fn active_chat(&self) -> Option<Chat> {
        self.state.read().await.active.clone()
    }

    pub async fn send_state(&self) -> SendState {
        self.state.read().await.send_state
    }

    /// Create a conversation, prepend it to the list and make it active.
    /// No local-only chat is created on failure.
    pub async fn create_chat(
        &self,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError> {
        if title.trim().is_empty() {
            return Err(PortalError::validation("Please provide a chat title"));
        }
        ensure_not_sending(&*self.state.read().await)?;

        let chat = self.backend.create_chat(title, category, language).await?;
        info!(id = %chat.id, category = category.as_str(), "Chat created");

        let mut state = self.state.write().await;
        state.chats.insert(0, chat.summary());
        state.active = Some(chat.clone());
        state.send_state = SendState::Idle;
        Ok(chat)
    }

    /// Replace the full chat list from the remote.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, PortalError> {
        let chats = self.backend.list_chats().await?;
        let mut state = self.state.write().await;
        state.chats = chats.clone();
        Ok(chats)
    }

    /// Fetch one conversation with its full message history and make it
    /// active. NotFound/Forbidden surface unchanged. Rejected while a send
    /// is in flight, so the reload cannot release the send gate early or
    /// clobber the pending optimistic entry.
    pub async fn open_chat(&self, id: &str) -> Result<Chat, PortalError> {
        let chat = self.backend.get_chat(id).await?;
        let mut state = self.state.write().await;
        ensure_not_sending(&state)?;
        state.active = Some(chat.clone());
        state.send_state = SendState::Idle;
        Ok(chat)
    }

    /// Send a message in the active chat with optimistic local echo.
    pub async fn send_message(&self, content: &str) -> Result<(), PortalError> {
        if content.trim().is_empty() {
            return Err(PortalError::validation("Please provide message content"));
        }

        // Gate + optimistic append under one lock so two sends cannot
        // interleave their provisional entries.
        let chat_id = {
            let mut state = self.state.write().await;
            ensure_not_sending(&state)?;
            let active = state
                .active
                .as_mut()
                .ok_or_else(PortalError::no_active_chat)?;
            active.messages.push(Message::user(content));
            let id = active.id.clone();
            state.send_state = SendState::Sending;
            id
        };

        match self.backend.send_message(&chat_id, content).await {
            Ok(pair) => {
                let mut state = self.state.write().await;
                if let Some(active) = state.active.as_mut().filter(|c| c.id == chat_id) {
                    // Replace the provisional entry with the canonical pair.
                    active.messages.pop();
                    active.messages.push(pair.user_message);
                    active.messages.push(pair.assistant_message);
                    active.updated_at = Utc::now();
                }
                touch_chat(&mut state.chats, &chat_id);
                state.send_state = SendState::Confirmed;
                debug!(chat_id = %chat_id, "Message confirmed");
                Ok(())
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Message send failed, rolling back");
                {
                    let mut state = self.state.write().await;
                    if let Some(active) = state.active.as_mut().filter(|c| c.id == chat_id) {
                        active.messages.pop();
                    }
                    state.send_state = SendState::RollingBack;
                }

                // Rollback-by-reload: the server's last known-good state wins.
                match self.backend.get_chat(&chat_id).await {
                    Ok(chat) => {
                        let mut state = self.state.write().await;
                        if state
                            .active
                            .as_ref()
                            .map(|c| c.id == chat_id)
                            .unwrap_or(false)
                        {
                            state.active = Some(chat);
                        }
                        state.send_state = SendState::Idle;
                    }
                    Err(reload_err) => {
                        // Provisional entry is already gone; surface the
                        // original failure.
                        warn!(chat_id = %chat_id, error = %reload_err, "Rollback reload failed");
                        self.state.write().await.send_state = SendState::Idle;
                    }
                }
                Err(e)
            }
        }
    }

    /// Remove a conversation remotely and locally. Clears the active chat if
    /// it was the deleted one.
    pub async fn delete_chat(&self, id: &str) -> Result<(), PortalError> {
        self.backend.delete_chat(id).await?;
        let mut state = self.state.write().await;
        state.chats.retain(|c| c.id != id);
        if state.active.as_ref().map(|c| c.id == id).unwrap_or(false) {
            state.active = None;
            state.send_state = SendState::Idle;
        }
        info!(id = %id, "Chat deleted");
        Ok(())
    }
}

/// The send gate. While a send is in flight or rolling back, nothing else
/// may start a send, replace the active chat, or reset the state machine.
fn ensure_not_sending(state: &SessionState) -> Result<(), PortalError> {
    if matches!(
        state.send_state,
        SendState::Sending | SendState::RollingBack
    ) {
        return Err(PortalError::new(
            ErrorKind::Busy,
            "A message is already being sent",
        ));
    }
    Ok(())
}

/// Bump a chat to the front of the list with a fresh updated_at, mirroring
/// the server's most-recently-updated-first ordering.
fn touch_chat(chats: &mut Vec<ChatSummary>, id: &str) {
    if let Some(idx) = chats.iter().position(|c| c.id == id) {
        let mut summary = chats.remove(idx);
        summary.updated_at = Utc::now();
        chats.insert(0, summary);
    }
}
