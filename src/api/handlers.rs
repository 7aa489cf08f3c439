//! REST handlers for contacts, threads and the scheduler.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::contacts::model::{Channel, Contact, ContactPatch, ConversationFlag};
use crate::error::ConversationError;
use crate::scheduler::{ContentItem, ExternalSubscription};
use crate::threads::model::NewMessage;

type ApiResult<T> = Result<T, ApiError>;

fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest("Invalid contact ID".into()))
}

fn parse_channel(channel: &str) -> ApiResult<Channel> {
    channel.parse().map_err(ApiError::BadRequest)
}

async fn load_contact(state: &AppState, id: Uuid) -> ApiResult<Contact> {
    state
        .db
        .get_contact(id)
        .await?
        .ok_or_else(|| ConversationError::ContactNotFound { id }.into())
}

// ── Health ──────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "convo-crm",
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub message: NewMessage,
}

/// POST /api/channels/{channel}/inbound
pub async fn ingest_inbound(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<InboundRequest>,
) -> ApiResult<impl IntoResponse> {
    let channel = parse_channel(&channel)?;
    let ingested = state
        .conversations
        .ingest_inbound(
            channel,
            &body.handle,
            body.display_name.as_deref(),
            body.message,
        )
        .await?;
    let status = if ingested.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ingested)))
}

// ── Contacts ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ContactQuery {
    pub channel: Option<String>,
}

/// GET /api/contacts?channel=
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactQuery>,
) -> ApiResult<impl IntoResponse> {
    let channel = query.channel.as_deref().map(parse_channel).transpose()?;
    let contacts = state.db.list_contacts(channel).await?;
    Ok(Json(contacts))
}

pub async fn get_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    Ok(Json(load_contact(&state, id).await?))
}

pub async fn patch_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ContactPatch>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let contact = state.contacts.apply_patch(id, patch).await?;
    Ok(Json(contact))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: String,
}

/// POST /api/contacts/{id}/status
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    state.contacts.set_status(id, &body.status).await?;
    Ok(Json(load_contact(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub flag: String,
    pub value: bool,
}

/// POST /api/contacts/{id}/flags
pub async fn set_flag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FlagRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let flag: ConversationFlag = body.flag.parse()?;
    state.contacts.set_flag(id, flag, body.value).await?;
    Ok(Json(load_contact(&state, id).await?))
}

/// POST /api/contacts/{id}/counters
pub async fn increment_counter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    state
        .contacts
        .increment_status_counter(id, &body.status)
        .await?;
    Ok(Json(load_contact(&state, id).await?))
}

// ── Threads ─────────────────────────────────────────────────────────

pub async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let messages = state.threads.get_thread(id).await?;
    Ok(Json(json!({ "contactId": id, "messages": messages })))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let removed = state.threads.delete_thread(id).await?;
    Ok(Json(json!({ "contactId": id, "removed": removed })))
}

/// POST /api/contacts/{id}/messages: record a message without sending it.
pub async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<NewMessage>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let appended = state.threads.append_message(id, message).await?;
    Ok((StatusCode::CREATED, Json(appended)))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub text: String,
}

/// POST /api/contacts/{id}/send
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let appended = state.conversations.send_outbound(id, &body.text).await?;
    Ok((StatusCode::CREATED, Json(appended)))
}

/// POST /api/contacts/{id}/ai-response
pub async fn ai_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let appended = state
        .conversations
        .record_ai_response(id, &body.text)
        .await?;
    Ok((StatusCode::CREATED, Json(appended)))
}

// ── Scheduler ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub media_ref: String,
    #[serde(default)]
    pub caption: String,
    pub scheduled_at: DateTime<Utc>,
}

/// POST /api/content
pub async fn schedule_content(
    State(state): State<AppState>,
    Json(body): Json<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.media_ref.trim().is_empty() {
        return Err(ApiError::BadRequest("mediaRef is required".into()));
    }
    let item = ContentItem::new(body.media_ref.trim(), body.caption, body.scheduled_at);
    state.db.insert_content(&item).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub owner_id: String,
    #[serde(default)]
    pub watch_expiration: Option<DateTime<Utc>>,
}

/// POST /api/subscriptions
pub async fn register_subscription(
    State(state): State<AppState>,
    Json(body): Json<SubscriptionRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.owner_id.trim().is_empty() {
        return Err(ApiError::BadRequest("ownerId is required".into()));
    }
    let sub = ExternalSubscription::new(body.owner_id.trim(), body.watch_expiration);
    state.db.insert_subscription(&sub).await?;
    Ok((StatusCode::CREATED, Json(sub)))
}

pub async fn publish_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.scheduler.run_publish_check().await?;
    Ok(Json(report))
}

pub async fn renewal_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.scheduler.run_renewal_check().await?;
    Ok(Json(report))
}
