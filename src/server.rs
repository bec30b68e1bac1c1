//! HTTP surface: the portal REST contract over axum.
//!
//! Thin glue — handlers validate the envelope, delegate to the services and
//! translate `PortalError` kinds to status codes. All `/api` routes except
//! register/login require a bearer token; conversation ownership is enforced
//! in the chat service.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::assistant::ChatService;
use crate::auth::AuthService;
use crate::error::{ErrorKind, PortalError};
use crate::notices::{NewNotice, NoticeRegistry};
use crate::store::LocalStore;
use crate::types::{
    ChatCategory, FeedbackStatus, Notice, NoticeCategory, NoticePriority, User, UserRole,
    VoiceFeedback,
};

#[derive(Clone)]
pub struct ServerState {
    pub auth: Arc<AuthService>,
    pub chat: Arc<ChatService>,
    pub store: Arc<dyn LocalStore>,
    pub registry: Arc<NoticeRegistry>,
}

/// `PortalError` as an HTTP response in the portal envelope.
struct ApiError(PortalError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Request-level failures carry the specific domain message
        // ("Invalid credentials", "Chat not found"); server-side failures
        // get the generic summary instead of internals.
        let message = if status.is_server_error() {
            self.0.user_message()
        } else {
            self.0.message.clone()
        };
        let body = Json(json!({
            "success": false,
            "message": message,
        }));
        (status, body).into_response()
    }
}

impl From<PortalError> for ApiError {
    fn from(e: PortalError) -> Self {
        Self(e)
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn ok_json<T: serde::Serialize>(data: &T) -> Result<Json<Value>, ApiError> {
    let value = serde_json::to_value(data)
        .map_err(|e| ApiError(PortalError::new(ErrorKind::Unknown, e.to_string())))?;
    Ok(ok(value))
}

pub fn build_router(state: ServerState) -> Router {
    let authed = Router::new()
        .route("/api/users/me", get(me))
        .route("/api/users/profile", put(update_profile))
        .route("/api/chat", post(create_chat).get(list_chats))
        .route("/api/chat/:id", get(get_chat).delete(delete_chat))
        .route("/api/chat/:id/message", post(send_message))
        .route("/api/notices", get(list_notices).post(create_notice))
        .route("/api/notices/emergency", get(emergency_notices))
        .route("/api/notices/:id", axum::routing::delete(delete_notice))
        .route("/api/notices/:id/audio", get(notice_audio))
        .route("/api/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/sync/notices", get(pull_notices).put(push_notices))
        .route("/api/sync/feedback", get(pull_feedback).put(push_feedback))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login))
        .merge(authed)
        .with_state(state)
}

pub async fn serve(state: ServerState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Portal server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn auth_middleware(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(PortalError::new(ErrorKind::Auth, "Not authorized")))?;

    let user = state.auth.verify_token(token).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterBody {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    language: String,
}

async fn register(
    State(state): State<ServerState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (user, token) = state
        .auth
        .register(&body.name, &body.email, &body.password, &body.language)
        .await?;
    let data = json!({ "user": user, "token": token });
    Ok((StatusCode::CREATED, ok(data)))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<ServerState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    // The stored role is authoritative; a role field in the body is ignored.
    let (user, token) = state.auth.login(&body.email, &body.password).await?;
    Ok(ok(json!({ "user": user, "token": token })))
}

async fn me(Extension(user): Extension<User>) -> Result<Json<Value>, ApiError> {
    ok_json(&user)
}

#[derive(Deserialize)]
struct ProfileBody {
    name: Option<String>,
    language: Option<String>,
}

async fn update_profile(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Json(body): Json<ProfileBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .auth
        .update_profile(&user.id, body.name.as_deref(), body.language.as_deref())
        .await?;
    ok_json(&updated)
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateChatBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: ChatCategory,
    #[serde(default)]
    language: String,
}

async fn create_chat(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateChatBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let language = if body.language.is_empty() {
        user.language.clone()
    } else {
        body.language
    };
    let chat = state
        .chat
        .create_chat(&user.id, &body.title, body.category, &language)
        .await?;
    let value = serde_json::to_value(&chat)
        .map_err(|e| ApiError(PortalError::new(ErrorKind::Unknown, e.to_string())))?;
    Ok((StatusCode::CREATED, ok(value)))
}

async fn list_chats(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    ok_json(&state.chat.list_chats(&user.id).await?)
}

async fn get_chat(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ok_json(&state.chat.get_chat(&user.id, &id).await?)
}

#[derive(Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    content: String,
}

async fn send_message(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<Value>, ApiError> {
    ok_json(&state.chat.send_message(&user.id, &id, &body.content).await?)
}

async fn delete_chat(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.chat.delete_chat(&user.id, &id).await?;
    Ok(ok(json!({})))
}

// ---------------------------------------------------------------------------
// Notices & feedback
// ---------------------------------------------------------------------------

fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.role != UserRole::Admin {
        return Err(ApiError(PortalError::forbidden(
            "Admin access required",
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct NoticeQuery {
    category: Option<NoticeCategory>,
}

async fn list_notices(
    State(state): State<ServerState>,
    Query(query): Query<NoticeQuery>,
) -> Result<Json<Value>, ApiError> {
    let notices = match query.category {
        Some(category) => state.registry.by_category(category).await,
        None => state.registry.all().await,
    };
    ok_json(&notices)
}

async fn emergency_notices(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    ok_json(&state.registry.emergency().await)
}

#[derive(Deserialize)]
struct CreateNoticeBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    category: NoticeCategory,
    priority: NoticePriority,
    #[serde(default)]
    language: String,
    #[serde(default)]
    is_emergency: bool,
    #[serde(default)]
    valid_until: Option<chrono::DateTime<chrono::Utc>>,
}

async fn create_notice(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateNoticeBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_admin(&user)?;
    let notice = state
        .registry
        .create(NewNotice {
            title: body.title,
            content: body.content,
            category: body.category,
            priority: body.priority,
            language: if body.language.is_empty() {
                user.language.clone()
            } else {
                body.language
            },
            is_emergency: body.is_emergency,
            valid_until: body.valid_until,
            author: user.name.clone(),
        })
        .await?;
    let value = serde_json::to_value(&notice)
        .map_err(|e| ApiError(PortalError::new(ErrorKind::Unknown, e.to_string())))?;
    Ok((StatusCode::CREATED, ok(value)))
}

async fn delete_notice(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    state.registry.delete(&id).await?;
    Ok(ok(json!({})))
}

/// Playable audio for a notice: the stored offline artifact, or fresh
/// synthesis when the map has no entry.
async fn notice_audio(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let notice = state
        .registry
        .all()
        .await
        .into_iter()
        .find(|n| n.id == id)
        .ok_or_else(|| ApiError(PortalError::not_found(format!("Notice {} not found", id))))?;
    let audio_ref = state.registry.audio_for(&notice).await?;
    Ok(ok(json!({ "audio_ref": audio_ref })))
}

#[derive(Deserialize)]
struct SubmitFeedbackBody {
    #[serde(default)]
    notice_id: Option<String>,
    audio_ref: String,
    #[serde(default)]
    transcript: Option<String>,
}

async fn submit_feedback(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
    Json(body): Json<SubmitFeedbackBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.audio_ref.trim().is_empty() {
        return Err(ApiError(PortalError::validation(
            "Please provide an audio recording",
        )));
    }
    let item = VoiceFeedback {
        id: uuid::Uuid::new_v4().to_string(),
        notice_id: body.notice_id.filter(|id| id != "general"),
        audio_ref: body.audio_ref,
        transcript: body.transcript,
        created_at: chrono::Utc::now(),
        user_id: user.id.clone(),
        status: FeedbackStatus::Pending,
    };
    state.store.append_feedback(&item).await?;
    let value = serde_json::to_value(&item)
        .map_err(|e| ApiError(PortalError::new(ErrorKind::Unknown, e.to_string())))?;
    Ok((StatusCode::CREATED, ok(value)))
}

async fn list_feedback(
    State(state): State<ServerState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    ok_json(&state.store.load_feedback().await?)
}

// ---------------------------------------------------------------------------
// Sync mirror
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PushNotices {
    items: Vec<Notice>,
}

#[derive(Deserialize)]
struct PushFeedback {
    items: Vec<VoiceFeedback>,
}

async fn pull_notices(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    ok_json(&state.store.load_notices().await?)
}

async fn push_notices(
    State(state): State<ServerState>,
    Json(body): Json<PushNotices>,
) -> Result<Json<Value>, ApiError> {
    state.store.save_notices(&body.items).await?;
    // Keep the projection in step with the overwritten collection.
    state.registry.refresh().await?;
    Ok(ok(json!({ "count": body.items.len() })))
}

async fn pull_feedback(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    ok_json(&state.store.load_feedback().await?)
}

async fn push_feedback(
    State(state): State<ServerState>,
    Json(body): Json<PushFeedback>,
) -> Result<Json<Value>, ApiError> {
    state.store.save_feedback(&body.items).await?;
    Ok(ok(json!({ "count": body.items.len() })))
}
