//! REST API for the financial advisor
//!
//! Identity arrives in the `x-user-id` header, set by the upstream auth proxy.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::controller::{ChatController, TurnRequest};
use crate::error::AdvisorError;
use crate::models::{Account, AccountWithTransactions, BulkDeleteOutcome, ChatMessage, ChatRole};

pub const IDENTITY_HEADER: &str = "x-user-id";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chat_history: Vec<HistoryEntry>,
    pub session_id: Option<String>,
}

impl From<ChatRequest> for TurnRequest {
    fn from(req: ChatRequest) -> Self {
        TurnRequest {
            message: req.message,
            chat_history: req
                .chat_history
                .into_iter()
                .map(|entry| ChatMessage {
                    role: ChatRole::from_label(&entry.role),
                    content: entry.content,
                })
                .collect(),
            session_id: req.session_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    pub transaction_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// =============================
/// Error Mapping
/// =============================

fn status_for(err: &AdvisorError) -> StatusCode {
    match err {
        AdvisorError::Authentication => StatusCode::UNAUTHORIZED,
        AdvisorError::NotFound(_) | AdvisorError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        AdvisorError::NoData(_) | AdvisorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AdvisorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AdvisorError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.user_message(),
            }),
        )
            .into_response();

        if let AdvisorError::RateLimited { remaining, reset_in_secs } = self {
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
                HeaderValue::from(remaining),
            );
            headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_in_secs));
        }

        response
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<ChatController>,
}

fn identity(headers: &HeaderMap) -> Option<&str> {
    headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok())
}

/// Authentication is checked before the body so a bad body never masks a 401.
fn authenticated_body<T>(
    headers: &HeaderMap,
    payload: std::result::Result<Json<T>, JsonRejection>,
) -> Result<T, AdvisorError> {
    if identity(headers).map_or(true, |id| id.trim().is_empty()) {
        return Err(AdvisorError::Authentication);
    }

    payload.map(|Json(body)| body).map_err(|rejection| {
        debug!(reason = %rejection.body_text(), "Rejected request body");
        AdvisorError::InvalidRequest("Invalid request body".to_string())
    })
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AdvisorError> {
    let req = authenticated_body(&headers, payload)?;
    let reply = state
        .controller
        .handle_turn(identity(&headers), req.into())
        .await?;

    info!(model = %reply.model, session_id = %reply.session_id, "Chat turn answered");
    Ok(Json(ChatResponse {
        response: reply.response,
    }))
}

async fn bulk_delete_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<BulkDeleteRequest>, JsonRejection>,
) -> Result<Json<BulkDeleteOutcome>, AdvisorError> {
    let req = authenticated_body(&headers, payload)?;
    let outcome = state
        .controller
        .bulk_delete(identity(&headers), &req.transaction_ids)
        .await?;
    Ok(Json(outcome))
}

async fn account_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountWithTransactions>, AdvisorError> {
    let account = state
        .controller
        .account(identity(&headers), account_id)
        .await?;
    Ok(Json(account))
}

async fn set_default_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AdvisorError> {
    let account = state
        .controller
        .set_default_account(identity(&headers), account_id)
        .await?;
    Ok(Json(account))
}

/// =============================
/// Router
/// =============================

pub fn create_router(controller: Arc<ChatController>) -> Router {
    let state = ApiState { controller };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/transactions/bulk-delete", post(bulk_delete_handler))
        .route("/api/accounts/:id", get(account_handler))
        .route("/api/accounts/:id/default", post(set_default_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    controller: Arc<ChatController>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
