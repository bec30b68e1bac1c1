//! Test infrastructure: mock mirror, mock chat backend, flag connectivity
//! and a canned reply generator, wired the same way production services are.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::assistant::ReplyGenerator;
use crate::chat::ChatBackend;
use crate::error::{ErrorKind, PortalError};
use crate::store::{LocalStore, StoreUsage};
use crate::sync::{Connectivity, RemoteMirror};
use crate::types::{
    Chat, ChatCategory, ChatSummary, Message, MessagePair, Notice, NoticeCategory, NoticePriority,
    VoiceFeedback,
};

pub fn make_notice_at(id: &str, created_at: DateTime<Utc>) -> Notice {
    Notice {
        id: id.to_string(),
        title: format!("Notice {}", id),
        content: "content".to_string(),
        category: NoticeCategory::Public,
        priority: NoticePriority::Low,
        language: "en".to_string(),
        created_at,
        valid_until: None,
        is_emergency: false,
        author: "Admin".to_string(),
        tags: vec![],
        qr_ref: None,
        is_offline_available: true,
    }
}

// ---------------------------------------------------------------------------
// FlagConnectivity
// ---------------------------------------------------------------------------

/// Connectivity probe backed by an atomic flag.
pub struct FlagConnectivity {
    online: std::sync::atomic::AtomicBool,
}

impl FlagConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: std::sync::atomic::AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for FlagConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory `LocalStore` with scriptable save failures. Used where the test
/// drives tokio's paused clock: no database worker thread, so virtual time
/// never races real IO.
#[derive(Default)]
pub struct MemoryStore {
    notices: Mutex<Vec<Notice>>,
    feedback: Mutex<Vec<VoiceFeedback>>,
    audio: Mutex<HashMap<String, String>>,
    next_save_error: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `save_notices` fails with a storage error.
    pub async fn fail_next_save(&self, message: &str) {
        *self.next_save_error.lock().await = Some(message.to_string());
    }

    pub async fn audio_entries(&self) -> usize {
        self.audio.lock().await.len()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn load_notices(&self) -> Result<Vec<Notice>, PortalError> {
        Ok(self.notices.lock().await.clone())
    }

    async fn save_notices(&self, notices: &[Notice]) -> Result<(), PortalError> {
        if let Some(message) = self.next_save_error.lock().await.take() {
            return Err(PortalError::storage(message));
        }
        *self.notices.lock().await = notices.to_vec();
        Ok(())
    }

    async fn load_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError> {
        Ok(self.feedback.lock().await.clone())
    }

    async fn save_feedback(&self, feedback: &[VoiceFeedback]) -> Result<(), PortalError> {
        *self.feedback.lock().await = feedback.to_vec();
        Ok(())
    }

    async fn append_feedback(&self, item: &VoiceFeedback) -> Result<(), PortalError> {
        self.feedback.lock().await.push(item.clone());
        Ok(())
    }

    async fn save_audio(&self, notice_id: &str, data_uri: &str) -> Result<(), PortalError> {
        self.audio
            .lock()
            .await
            .insert(notice_id.to_string(), data_uri.to_string());
        Ok(())
    }

    async fn load_audio(&self, notice_id: &str) -> Result<Option<String>, PortalError> {
        Ok(self.audio.lock().await.get(notice_id).cloned())
    }

    async fn clear(&self) -> Result<(), PortalError> {
        self.notices.lock().await.clear();
        self.feedback.lock().await.clear();
        self.audio.lock().await.clear();
        Ok(())
    }

    async fn usage(&self) -> Result<StoreUsage, PortalError> {
        Ok(StoreUsage {
            used: 0,
            total: usize::MAX,
        })
    }
}

// ---------------------------------------------------------------------------
// MockMirror
// ---------------------------------------------------------------------------

/// In-memory remote mirror with scriptable failures and blocking pushes.
pub struct MockMirror {
    notices: Mutex<Vec<Notice>>,
    feedback: Mutex<Vec<VoiceFeedback>>,
    pushed_notices: Mutex<Vec<Notice>>,
    calls: Mutex<usize>,
    pull_error: Mutex<Option<String>>,
    push_blocked: Mutex<bool>,
    unblock: Notify,
}

impl MockMirror {
    pub fn new() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            feedback: Mutex::new(Vec::new()),
            pushed_notices: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            pull_error: Mutex::new(None),
            push_blocked: Mutex::new(false),
            unblock: Notify::new(),
        }
    }

    pub async fn set_notices(&self, notices: Vec<Notice>) {
        *self.notices.lock().await = notices;
    }

    /// Every pull fails with a network error until cleared.
    pub async fn fail_pulls(&self, message: &str) {
        *self.pull_error.lock().await = Some(message.to_string());
    }

    /// Pushes park until `unblock_pushes`, for overlap tests.
    pub async fn block_pushes(&self) {
        *self.push_blocked.lock().await = true;
    }

    pub async fn unblock_pushes(&self) {
        *self.push_blocked.lock().await = false;
        self.unblock.notify_waiters();
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.lock().await
    }

    /// What the last push delivered.
    pub async fn pushed_notices(&self) -> Vec<Notice> {
        self.pushed_notices.lock().await.clone()
    }

    async fn record_call(&self) {
        *self.calls.lock().await += 1;
    }

    async fn wait_if_blocked(&self) {
        loop {
            let notified = self.unblock.notified();
            if !*self.push_blocked.lock().await {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RemoteMirror for MockMirror {
    async fn push_notices(&self, notices: &[Notice]) -> Result<(), PortalError> {
        self.record_call().await;
        self.wait_if_blocked().await;
        *self.pushed_notices.lock().await = notices.to_vec();
        Ok(())
    }

    async fn push_feedback(&self, _feedback: &[VoiceFeedback]) -> Result<(), PortalError> {
        self.record_call().await;
        self.wait_if_blocked().await;
        Ok(())
    }

    async fn pull_notices(&self) -> Result<Vec<Notice>, PortalError> {
        self.record_call().await;
        if let Some(message) = self.pull_error.lock().await.clone() {
            return Err(PortalError::new(ErrorKind::Network, message));
        }
        Ok(self.notices.lock().await.clone())
    }

    async fn pull_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError> {
        self.record_call().await;
        if let Some(message) = self.pull_error.lock().await.clone() {
            return Err(PortalError::new(ErrorKind::Network, message));
        }
        Ok(self.feedback.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// MockChatBackend
// ---------------------------------------------------------------------------

/// In-memory chat backend mirroring the server's semantics: ordered list,
/// ownership-free single user, canned assistant replies.
pub struct MockChatBackend {
    chats: Mutex<HashMap<String, Chat>>,
    calls: Mutex<usize>,
    next_send_error: Mutex<Option<String>>,
    sends_blocked: Mutex<bool>,
    unblock: Notify,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
            next_send_error: Mutex::new(None),
            sends_blocked: Mutex::new(false),
            unblock: Notify::new(),
        }
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.lock().await
    }

    /// The next send fails with a server error; the failed user message is
    /// not stored, like a request the server rejected wholesale.
    pub async fn fail_next_send(&self, message: &str) {
        *self.next_send_error.lock().await = Some(message.to_string());
    }

    pub async fn block_sends(&self) {
        *self.sends_blocked.lock().await = true;
    }

    pub async fn unblock_sends(&self) {
        *self.sends_blocked.lock().await = false;
        self.unblock.notify_waiters();
    }

    async fn record_call(&self) {
        *self.calls.lock().await += 1;
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn create_chat(
        &self,
        title: &str,
        category: ChatCategory,
        language: &str,
    ) -> Result<Chat, PortalError> {
        self.record_call().await;
        let now = Utc::now();
        let chat = Chat {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "test-user".to_string(),
            title: title.to_string(),
            category,
            language: language.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.chats.lock().await.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, PortalError> {
        self.record_call().await;
        let chats = self.chats.lock().await;
        let mut summaries: Vec<ChatSummary> = chats.values().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn get_chat(&self, id: &str) -> Result<Chat, PortalError> {
        self.record_call().await;
        self.chats
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::not_found("Chat not found"))
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<MessagePair, PortalError> {
        self.record_call().await;

        loop {
            let notified = self.unblock.notified();
            if !*self.sends_blocked.lock().await {
                break;
            }
            notified.await;
        }

        if let Some(message) = self.next_send_error.lock().await.take() {
            return Err(PortalError::new(ErrorKind::ServerError, message));
        }

        let mut chats = self.chats.lock().await;
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| PortalError::not_found("Chat not found"))?;

        let pair = MessagePair {
            user_message: Message::user(content),
            assistant_message: Message::assistant(format!(
                "Here is some guidance about: {}",
                content
            )),
        };
        chat.messages.push(pair.user_message.clone());
        chat.messages.push(pair.assistant_message.clone());
        chat.updated_at = Utc::now();
        Ok(pair)
    }

    async fn delete_chat(&self, id: &str) -> Result<(), PortalError> {
        self.record_call().await;
        self.chats
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PortalError::not_found("Chat not found"))
    }
}

// ---------------------------------------------------------------------------
// CannedGenerator
// ---------------------------------------------------------------------------

/// Reply generator with an optional FIFO script; falls back to a fixed reply
/// when the script runs dry. Never fails, per the generator contract.
#[derive(Default)]
pub struct CannedGenerator {
    script: Mutex<Vec<String>>,
}

impl CannedGenerator {
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            script: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl ReplyGenerator for CannedGenerator {
    async fn reply(&self, _history: &[Message], _category: ChatCategory, _language: &str) -> String {
        let mut script = self.script.lock().await;
        if script.is_empty() {
            "Here is some simple guidance for your question.".to_string()
        } else {
            script.remove(0)
        }
    }
}

