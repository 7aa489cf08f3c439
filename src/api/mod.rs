//! HTTP surface: REST endpoints plus the live-update event stream.

pub mod events;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::contacts::state_machine::ContactStateMachine;
use crate::conversation::ConversationService;
use crate::error::{ConversationError, DatabaseError};
use crate::events::EventBus;
use crate::scheduler::Scheduler;
use crate::store::traits::Database;
use crate::threads::store::MessageThreadStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub threads: Arc<MessageThreadStore>,
    pub contacts: Arc<ContactStateMachine>,
    pub conversations: Arc<ConversationService>,
    pub scheduler: Arc<Scheduler>,
    pub bus: EventBus,
    /// Cancelled on shutdown; ends open event streams.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with every REST route and the event stream.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/events", get(events::stream_events))
        .route(
            "/api/channels/{channel}/inbound",
            post(handlers::ingest_inbound),
        )
        .route("/api/contacts", get(handlers::list_contacts))
        .route(
            "/api/contacts/{id}",
            get(handlers::get_contact).patch(handlers::patch_contact),
        )
        .route(
            "/api/contacts/{id}/thread",
            get(handlers::get_thread).delete(handlers::delete_thread),
        )
        .route("/api/contacts/{id}/messages", post(handlers::append_message))
        .route("/api/contacts/{id}/send", post(handlers::send_message))
        .route("/api/contacts/{id}/ai-response", post(handlers::ai_response))
        .route("/api/contacts/{id}/status", post(handlers::set_status))
        .route("/api/contacts/{id}/flags", post(handlers::set_flag))
        .route("/api/contacts/{id}/counters", post(handlers::increment_counter))
        .route("/api/content", post(handlers::schedule_content))
        .route("/api/subscriptions", post(handlers::register_subscription))
        .route("/api/scheduler/publish-check", post(handlers::publish_check))
        .route("/api/scheduler/renewal-check", post(handlers::renewal_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conversation(ConversationError),
    Database(DatabaseError),
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        Self::Conversation(e)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

fn database_status(e: &DatabaseError) -> StatusCode {
    match e {
        DatabaseError::NotFound { .. } => StatusCode::NOT_FOUND,
        DatabaseError::Constraint(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conversation(e) => {
                let status = match &e {
                    ConversationError::ContactNotFound { .. } => StatusCode::NOT_FOUND,
                    ConversationError::InvalidStatus { .. }
                    | ConversationError::UnknownFlag { .. }
                    | ConversationError::Validation(_) => StatusCode::BAD_REQUEST,
                    ConversationError::IllegalFlagReset { .. } => StatusCode::CONFLICT,
                    ConversationError::ExternalTransport(_) => StatusCode::BAD_GATEWAY,
                    ConversationError::Database(db) => database_status(db),
                };
                (status, e.to_string())
            }
            Self::Database(e) => (database_status(&e), e.to_string()),
        };

        if status.is_server_error() {
            error!(status = %status, error = %message, "Request failed");
        } else {
            warn!(status = %status, error = %message, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::TransportError;

    fn status_of(e: impl Into<ApiError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn conversation_errors_map_to_statuses() {
        assert_eq!(
            status_of(ConversationError::ContactNotFound { id: Uuid::new_v4() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ConversationError::InvalidStatus { status: "x".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConversationError::IllegalFlagReset { flag: "greeted".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ConversationError::ExternalTransport(TransportError::NotConfigured {
                channel: "instagram".into()
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ConversationError::Database(DatabaseError::Query("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
