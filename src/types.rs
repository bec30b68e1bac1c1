//! Shared domain types: notices, voice feedback, chats, users, sync status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published community announcement with category/priority metadata.
///
/// Immutable once created except via delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: NoticeCategory,
    pub priority: NoticePriority,
    pub language: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    pub is_emergency: bool,
    pub author: String,
    pub tags: Vec<String>,
    /// Opaque reference to the notice's QR artifact (data URI or URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_ref: Option<String>,
    pub is_offline_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeCategory {
    Public,
    Emergency,
    Agriculture,
    Health,
    Education,
    Schemes,
    Weather,
    Employment,
}

impl NoticeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeCategory::Public => "public",
            NoticeCategory::Emergency => "emergency",
            NoticeCategory::Agriculture => "agriculture",
            NoticeCategory::Health => "health",
            NoticeCategory::Education => "education",
            NoticeCategory::Schemes => "schemes",
            NoticeCategory::Weather => "weather",
            NoticeCategory::Employment => "employment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticePriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NoticePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticePriority::Low => "low",
            NoticePriority::Medium => "medium",
            NoticePriority::High => "high",
            NoticePriority::Urgent => "urgent",
        }
    }
}

/// Voice feedback recorded against a notice (or the panchayat in general).
///
/// Status is mutated only by a review workflow elsewhere, never by this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFeedback {
    pub id: String,
    /// `None` means general feedback not tied to a specific notice.
    /// Serialized as the literal "general" for wire compatibility.
    #[serde(
        serialize_with = "serialize_notice_ref",
        deserialize_with = "deserialize_notice_ref"
    )]
    pub notice_id: Option<String>,
    pub audio_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub status: FeedbackStatus,
}

fn serialize_notice_ref<S: serde::Serializer>(
    v: &Option<String>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(v.as_deref().unwrap_or("general"))
}

fn deserialize_notice_ref<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    let raw = String::deserialize(d)?;
    if raw == "general" {
        Ok(None)
    } else {
        Ok(Some(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Reviewed,
    Resolved,
}

/// A conversation thread between a user and the AI assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub category: ChatCategory,
    pub language: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The list-endpoint shape: a chat without its message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub category: ChatCategory,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            category: self.category,
            language: self.language.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatCategory {
    #[default]
    General,
    Agriculture,
    Health,
    Education,
    Schemes,
    Weather,
    Employment,
}

impl ChatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatCategory::General => "general",
            ChatCategory::Agriculture => "agriculture",
            ChatCategory::Health => "health",
            ChatCategory::Education => "education",
            ChatCategory::Schemes => "schemes",
            ChatCategory::Weather => "weather",
            ChatCategory::Employment => "employment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(ChatCategory::General),
            "agriculture" => Some(ChatCategory::Agriculture),
            "health" => Some(ChatCategory::Health),
            "education" => Some(ChatCategory::Education),
            "schemes" => Some(ChatCategory::Schemes),
            "weather" => Some(ChatCategory::Weather),
            "employment" => Some(ChatCategory::Employment),
            _ => None,
        }
    }
}

/// One entry in a chat's message sequence. Append-only; order is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Sync health snapshot. Transient: rebuilt each session, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub pending_changes: usize,
    pub error: Option<String>,
}

/// The two messages a successful message-send returns: the canonical user
/// message as stored server-side plus the generated assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePair {
    pub user_message: Message,
    pub assistant_message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    #[default]
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_category_serde_uses_snake_case() {
        let json = serde_json::to_string(&NoticeCategory::Agriculture).unwrap();
        assert_eq!(json, "\"agriculture\"");
        let back: NoticeCategory = serde_json::from_str("\"schemes\"").unwrap();
        assert_eq!(back, NoticeCategory::Schemes);
    }

    #[test]
    fn general_feedback_round_trips_as_literal() {
        let fb = VoiceFeedback {
            id: "fb1".into(),
            notice_id: None,
            audio_ref: "data:audio/wav;base64,AAAA".into(),
            transcript: None,
            created_at: Utc::now(),
            user_id: "u1".into(),
            status: FeedbackStatus::Pending,
        };
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json["notice_id"], "general");
        let back: VoiceFeedback = serde_json::from_value(json).unwrap();
        assert_eq!(back.notice_id, None);
    }

    #[test]
    fn notice_scoped_feedback_keeps_its_id() {
        let fb = VoiceFeedback {
            id: "fb2".into(),
            notice_id: Some("notice_42".into()),
            audio_ref: "ref".into(),
            transcript: Some("the handpump is broken".into()),
            created_at: Utc::now(),
            user_id: "u1".into(),
            status: FeedbackStatus::Pending,
        };
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json["notice_id"], "notice_42");
        let back: VoiceFeedback = serde_json::from_value(json).unwrap();
        assert_eq!(back.notice_id.as_deref(), Some("notice_42"));
    }
}
