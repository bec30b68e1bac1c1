//! Notice registry: in-memory projection of notices over the local store.
//!
//! Creation produces QR and audio side-artifacts through injected generator
//! services. Artifact rendering internals (QR pixels, audio codecs) live
//! behind the traits; this module only handles opaque reference strings.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::PortalError;
use crate::store::LocalStore;
use crate::types::{Notice, NoticeCategory, NoticePriority};

/// Produces an opaque QR artifact reference for a payload.
#[async_trait]
pub trait QrGenerator: Send + Sync {
    async fn generate(&self, payload: &str) -> Result<String, PortalError>;
}

/// Produces an opaque audio artifact reference (data URI) for a text.
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, PortalError>;
}

/// Deterministic data-URI QR reference. A deployment wanting scannable
/// codes swaps this for a real renderer; the registry only stores the ref.
pub struct DataUriQrGenerator;

#[async_trait]
impl QrGenerator for DataUriQrGenerator {
    async fn generate(&self, payload: &str) -> Result<String, PortalError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        Ok(format!("data:application/x-qr-payload;base64,{}", encoded))
    }
}

/// Deterministic data-URI audio reference carrying the synthesis request
/// (language + text) for a downstream TTS player.
pub struct DataUriSynthesizer;

#[async_trait]
impl AudioSynthesizer for DataUriSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, PortalError> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}|{}", language, text));
        Ok(format!("data:audio/x-tts-request;base64,{}", encoded))
    }
}

/// Parameters for `NoticeRegistry::create`.
#[derive(Debug, Clone)]
pub struct NewNotice {
    pub title: String,
    pub content: String,
    pub category: NoticeCategory,
    pub priority: NoticePriority,
    pub language: String,
    pub is_emergency: bool,
    pub valid_until: Option<DateTime<Utc>>,
    pub author: String,
}

pub struct NoticeRegistry {
    store: Arc<dyn LocalStore>,
    qr: Arc<dyn QrGenerator>,
    tts: Arc<dyn AudioSynthesizer>,
    notices: RwLock<Vec<Notice>>,
}

impl NoticeRegistry {
    pub fn new(
        store: Arc<dyn LocalStore>,
        qr: Arc<dyn QrGenerator>,
        tts: Arc<dyn AudioSynthesizer>,
    ) -> Self {
        Self {
            store,
            qr,
            tts,
            notices: RwLock::new(Vec::new()),
        }
    }

    /// Reload the projection from the store (startup, and after sync
    /// overwrites the notices collection).
    pub async fn refresh(&self) -> Result<(), PortalError> {
        let loaded = self.store.load_notices().await?;
        debug!(count = loaded.len(), "Notice projection refreshed");
        *self.notices.write().await = loaded;
        Ok(())
    }

    /// Create a notice with its QR and audio side-artifacts, prepend it to
    /// the projection and persist the collection.
    pub async fn create(&self, params: NewNotice) -> Result<Notice, PortalError> {
        if params.title.trim().is_empty() {
            return Err(PortalError::validation("Please provide a notice title"));
        }
        if params.content.trim().is_empty() {
            return Err(PortalError::validation("Please provide notice content"));
        }

        let id = format!("notice_{}", uuid::Uuid::new_v4());

        let qr_payload = json!({
            "title": params.title,
            "content": params.content,
            "language": params.language,
        })
        .to_string();
        let qr_ref = self.qr.generate(&qr_payload).await?;

        let audio_ref = self
            .tts
            .synthesize(&params.content, &params.language)
            .await?;

        let notice = Notice {
            id,
            title: params.title,
            content: params.content,
            category: params.category,
            priority: params.priority,
            language: params.language,
            created_at: Utc::now(),
            valid_until: params.valid_until,
            is_emergency: params.is_emergency,
            author: params.author,
            tags: vec![
                params.category.as_str().to_string(),
                params.priority.as_str().to_string(),
            ],
            qr_ref: Some(qr_ref),
            is_offline_available: true,
        };

        // Persist the collection before the audio artifact: a rejected save
        // (capacity) must not leave a stray entry in the audio map.
        let mut notices = self.notices.write().await;
        notices.insert(0, notice.clone());
        if let Err(e) = self.store.save_notices(&notices).await {
            notices.remove(0);
            return Err(e);
        }
        if let Err(e) = self.store.save_audio(&notice.id, &audio_ref).await {
            // The notice itself is durable; playback re-synthesizes.
            warn!(id = %notice.id, error = %e, "Audio artifact not cached");
        }
        info!(id = %notice.id, category = notice.category.as_str(), "Notice created");
        Ok(notice)
    }

    pub async fn delete(&self, id: &str) -> Result<(), PortalError> {
        let mut notices = self.notices.write().await;
        let before = notices.len();
        notices.retain(|n| n.id != id);
        if notices.len() == before {
            return Err(PortalError::not_found(format!("Notice {} not found", id)));
        }
        self.store.save_notices(&notices).await
    }

    pub async fn all(&self) -> Vec<Notice> {
        self.notices.read().await.clone()
    }

    pub async fn by_category(&self, category: NoticeCategory) -> Vec<Notice> {
        self.notices
            .read()
            .await
            .iter()
            .filter(|n| n.category == category)
            .cloned()
            .collect()
    }

    pub async fn emergency(&self) -> Vec<Notice> {
        self.notices
            .read()
            .await
            .iter()
            .filter(|n| n.is_emergency)
            .cloned()
            .collect()
    }

    /// Resolve a notice's playable audio: the stored offline artifact first,
    /// falling back to fresh synthesis.
    pub async fn audio_for(&self, notice: &Notice) -> Result<String, PortalError> {
        if let Some(stored) = self.store.load_audio(&notice.id).await? {
            return Ok(stored);
        }
        self.tts.synthesize(&notice.content, &notice.language).await
    }
}
