//! AgriChat HTTP REST API
//!
//! Axum-based JSON surface over the session, storage and supervisor
//! subsystems. Each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, serde_json::Value)`; the inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET    /health                            — db + cache status
//! - GET    /version                           — server version info
//! - POST   /chat/sessions                     — create a session
//! - POST   /chat/sessions/plant-doctor        — specialized plant-doctor session
//! - POST   /chat/sessions/knowledge           — specialized knowledge session
//! - POST   /chat/message                      — full chat interaction
//! - GET    /chat/sessions/{id}/history        — chat history (cache-first)
//! - GET    /chat/sessions/{id}/info           — session metadata
//! - POST   /chat/sessions/{id}/archive        — archive (optional cloud upload)
//! - DELETE /chat/sessions/{id}                — soft/hard delete
//! - GET    /chat/users/{user_id}/sessions     — active + archived sessions
//! - GET    /chat/users/{user_id}/statistics   — per-user statistics
//! - POST   /storage/knowledge, GET /storage/knowledge
//! - POST   /storage/reports,   GET /storage/reports
//! - POST   /analyze                           — supervisor classification

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use agrichat_core::error::AgriChatError;
use agrichat_core::models::{ReportStatus, SessionCategory, SessionStatus};
use agrichat_core::supervisor::{AgentCategory, ChatResponder, SupervisorClient};
use agrichat_core::{AgriChatConfig, CacheClient, FALLBACK_FEEDBACK};

use crate::subsystems::sessions::SessionService;
use crate::subsystems::storage::{NewDiagnosisReport, NewKnowledgeEntry, StorageService};

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub pool: PgPool,
    pub cache: CacheClient,
    pub sessions: SessionService,
    pub storage: StorageService,
    pub responder: Box<dyn ChatResponder>,
    pub supervisor: Option<SupervisorClient>,
}

/// Build the Axum router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat/sessions", post(create_session_handler))
        .route(
            "/chat/sessions/plant-doctor",
            post(create_plant_doctor_session_handler),
        )
        .route(
            "/chat/sessions/knowledge",
            post(create_knowledge_session_handler),
        )
        .route("/chat/message", post(send_message_handler))
        .route("/chat/sessions/:id/history", get(history_handler))
        .route("/chat/sessions/:id/info", get(session_info_handler))
        .route("/chat/sessions/:id/archive", post(archive_handler))
        .route("/chat/sessions/:id", delete(delete_session_handler))
        .route("/chat/users/:user_id/sessions", get(user_sessions_handler))
        .route(
            "/chat/users/:user_id/statistics",
            get(statistics_handler),
        )
        .route(
            "/storage/knowledge",
            post(create_knowledge_handler).get(list_knowledge_handler),
        )
        .route(
            "/storage/reports",
            post(create_report_handler).get(list_reports_handler),
        )
        .route("/analyze", post(analyze_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    config: &AgriChatConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("AgriChat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default = "default_category")]
    pub category: SessionCategory,
    pub metadata: Option<serde_json::Value>,
}

fn default_category() -> SessionCategory {
    SessionCategory::General
}

#[derive(Debug, Deserialize)]
pub struct PlantDoctorSessionRequest {
    pub user_id: String,
    pub plant_type: Option<String>,
    pub symptoms: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeSessionRequest {
    pub user_id: String,
    pub topic: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: Uuid,
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub user_id: String,
    #[serde(default)]
    pub archive_to_cloud: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub user_id: String,
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeListQuery {
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub user_id: Option<String>,
    pub status: Option<ReportStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub query: Option<String>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map a service error onto an HTTP status and JSON body. Validation errors
/// are the caller's fault; everything else is a transport/store failure.
fn error_response(e: AgriChatError) -> (StatusCode, serde_json::Value) {
    let status = match &e {
        AgriChatError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        serde_json::json!({ "error": e.to_string(), "status": "error" }),
    )
}

fn not_found(what: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::NOT_FOUND,
        serde_json::json!({ "error": format!("{} not found", what), "status": "error" }),
    )
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": msg, "status": "error" }),
    )
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — pings the store and the cache.
pub async fn health_inner(pool: &PgPool, cache: &CacheClient) -> (StatusCode, serde_json::Value) {
    let pg_ver = match agrichat_core::db::health_check(pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "status": "unhealthy", "error": e.to_string() }),
            );
        }
    };

    let cache_status = match cache.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("unavailable: {}", e),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": pg_ver,
            "cache": cache_status,
        }),
    )
}

/// Inner version — pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "agrichat",
    })
}

pub async fn create_session_inner(
    state: &AppState,
    req: CreateSessionRequest,
) -> (StatusCode, serde_json::Value) {
    if req.user_id.trim().is_empty() {
        return bad_request("user_id is required");
    }
    match state
        .sessions
        .create_session(&req.user_id, req.category, req.metadata)
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            serde_json::json!({
                "session_id": session.id,
                "category": session.category,
                "status": "created",
            }),
        ),
        Err(e) => error_response(e),
    }
}

/// Specialized plant-doctor session: seeds the metadata with the plant info.
pub async fn create_plant_doctor_session_inner(
    state: &AppState,
    req: PlantDoctorSessionRequest,
) -> (StatusCode, serde_json::Value) {
    if req.user_id.trim().is_empty() {
        return bad_request("user_id is required");
    }
    let metadata = serde_json::json!({
        "plant_type": req.plant_type,
        "symptoms": req.symptoms,
        "images": req.image_urls,
    });
    match state
        .sessions
        .create_session(&req.user_id, SessionCategory::PlantDoctor, Some(metadata))
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            serde_json::json!({
                "session_id": session.id,
                "category": "plant_doctor",
                "status": "created",
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn create_knowledge_session_inner(
    state: &AppState,
    req: KnowledgeSessionRequest,
) -> (StatusCode, serde_json::Value) {
    if req.user_id.trim().is_empty() {
        return bad_request("user_id is required");
    }
    let metadata = serde_json::json!({
        "topic": req.topic,
        "context": { "category": req.category },
    });
    match state
        .sessions
        .create_session(&req.user_id, SessionCategory::Knowledge, Some(metadata))
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            serde_json::json!({
                "session_id": session.id,
                "category": "knowledge",
                "status": "created",
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn send_message_inner(
    state: &AppState,
    req: SendMessageRequest,
) -> (StatusCode, serde_json::Value) {
    if req.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    match state
        .sessions
        .handle_interaction(
            req.session_id,
            &req.user_id,
            &req.message,
            state.responder.as_ref(),
        )
        .await
    {
        Ok(Some(interaction)) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": interaction.session_id,
                "category": interaction.category,
                "user_message": interaction.user_message,
                "bot_response": interaction.bot_response,
            }),
        ),
        Ok(None) => not_found("session"),
        Err(e) => error_response(e),
    }
}

pub async fn history_inner(
    state: &AppState,
    session_id: Uuid,
    limit: Option<i64>,
) -> (StatusCode, serde_json::Value) {
    let session = match state.sessions.get_session(session_id).await {
        Ok(Some(s)) => s,
        Ok(None) => return not_found("session"),
        Err(e) => return error_response(e),
    };
    match state.sessions.get_history(session_id, limit).await {
        Ok(messages) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": session_id,
                "session_info": session,
                "messages": messages,
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn session_info_inner(
    state: &AppState,
    session_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match state.sessions.get_session(session_id).await {
        Ok(Some(session)) => (StatusCode::OK, serde_json::json!(session)),
        Ok(None) => not_found("session"),
        Err(e) => error_response(e),
    }
}

pub async fn archive_inner(
    state: &AppState,
    session_id: Uuid,
    req: ArchiveRequest,
) -> (StatusCode, serde_json::Value) {
    match state
        .sessions
        .archive_session(session_id, &req.user_id, req.archive_to_cloud)
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            serde_json::json!({ "session_id": session_id, "status": "archived" }),
        ),
        Ok(false) => not_found("active session"),
        Err(e) => error_response(e),
    }
}

pub async fn delete_session_inner(
    state: &AppState,
    session_id: Uuid,
    query: DeleteQuery,
) -> (StatusCode, serde_json::Value) {
    match state
        .sessions
        .delete_session(session_id, &query.user_id, query.hard)
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            serde_json::json!({ "session_id": session_id, "status": "deleted", "hard": query.hard }),
        ),
        Ok(false) => not_found("session"),
        Err(e) => error_response(e),
    }
}

/// Active sessions (cache-first) plus archived history from the store.
pub async fn user_sessions_inner(
    state: &AppState,
    user_id: &str,
) -> (StatusCode, serde_json::Value) {
    let active = match state.sessions.get_active_sessions(user_id).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    let archived = match state
        .sessions
        .get_session_archive_list(user_id, None, SessionStatus::Archived, 20)
        .await
    {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    (
        StatusCode::OK,
        serde_json::json!({
            "user_id": user_id,
            "active_sessions": active,
            "archived_sessions": archived,
        }),
    )
}

pub async fn statistics_inner(
    state: &AppState,
    user_id: &str,
) -> (StatusCode, serde_json::Value) {
    match state.sessions.get_statistics(user_id).await {
        Ok(stats) => (StatusCode::OK, serde_json::json!(stats)),
        Err(e) => error_response(e),
    }
}

pub async fn create_knowledge_inner(
    state: &AppState,
    req: NewKnowledgeEntry,
) -> (StatusCode, serde_json::Value) {
    match state.storage.create_knowledge_entry(req).await {
        Ok(entry) => (
            StatusCode::CREATED,
            serde_json::json!({ "entry_id": entry.id, "status": "created" }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn list_knowledge_inner(
    state: &AppState,
    query: KnowledgeListQuery,
) -> (StatusCode, serde_json::Value) {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    match state
        .storage
        .knowledge_entries(query.category.as_deref(), limit, offset)
        .await
    {
        Ok(entries) => (
            StatusCode::OK,
            serde_json::json!({
                "entries": entries,
                "limit": limit,
                "offset": offset,
                "category": query.category,
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn create_report_inner(
    state: &AppState,
    req: NewDiagnosisReport,
) -> (StatusCode, serde_json::Value) {
    match state.storage.create_report(req).await {
        Ok(report) => (
            StatusCode::CREATED,
            serde_json::json!({ "report_id": report.id, "status": "created" }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn list_reports_inner(
    state: &AppState,
    query: ReportListQuery,
) -> (StatusCode, serde_json::Value) {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    match state
        .storage
        .reports(query.user_id.as_deref(), query.status, limit, offset)
        .await
    {
        Ok(reports) => (
            StatusCode::OK,
            serde_json::json!({
                "reports": reports,
                "limit": limit,
                "offset": offset,
            }),
        ),
        Err(e) => error_response(e),
    }
}

/// Inner analyze — one classifier pass. Classification failure (or a missing
/// supervisor) substitutes the general category with the fixed feedback
/// string; only transport/API failures are 5xx.
pub async fn analyze_inner(
    state: &AppState,
    req: AnalyzeRequest,
) -> (StatusCode, serde_json::Value) {
    let query = match req.query {
        Some(q) if !q.trim().is_empty() => q,
        _ => return bad_request("query field is required"),
    };

    let fallback = |query: &str| {
        serde_json::json!({
            "decision": {
                "agent_required": AgentCategory::GeneralQuery,
                "query_for_next_agent": query,
            },
            "message": FALLBACK_FEEDBACK,
            "status": "ok",
        })
    };

    let supervisor = match &state.supervisor {
        Some(s) => s,
        None => return (StatusCode::OK, fallback(&query)),
    };

    match supervisor.classify(&query).await {
        Ok(Some(analysis)) => (
            StatusCode::OK,
            serde_json::json!({ "decision": analysis, "status": "ok" }),
        ),
        Ok(None) => (StatusCode::OK, fallback(&query)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": e.to_string(), "status": "error" }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool, &state.cache).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let (status, body) = create_session_inner(&state, req).await;
    (status, Json(body))
}

pub async fn create_plant_doctor_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlantDoctorSessionRequest>,
) -> impl IntoResponse {
    let (status, body) = create_plant_doctor_session_inner(&state, req).await;
    (status, Json(body))
}

pub async fn create_knowledge_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KnowledgeSessionRequest>,
) -> impl IntoResponse {
    let (status, body) = create_knowledge_session_inner(&state, req).await;
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_message_inner(&state, req).await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state, id, query.limit).await;
    (status, Json(body))
}

pub async fn session_info_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = session_info_inner(&state, id).await;
    (status, Json(body))
}

pub async fn archive_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> impl IntoResponse {
    let (status, body) = archive_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> impl IntoResponse {
    let (status, body) = delete_session_inner(&state, id, query).await;
    (status, Json(body))
}

pub async fn user_sessions_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = user_sessions_inner(&state, &user_id).await;
    (status, Json(body))
}

pub async fn statistics_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = statistics_inner(&state, &user_id).await;
    (status, Json(body))
}

pub async fn create_knowledge_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewKnowledgeEntry>,
) -> impl IntoResponse {
    let (status, body) = create_knowledge_inner(&state, req).await;
    (status, Json(body))
}

pub async fn list_knowledge_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KnowledgeListQuery>,
) -> impl IntoResponse {
    let (status, body) = list_knowledge_inner(&state, query).await;
    (status, Json(body))
}

pub async fn create_report_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewDiagnosisReport>,
) -> impl IntoResponse {
    let (status, body) = create_report_inner(&state, req).await;
    (status, Json(body))
}

pub async fn list_reports_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportListQuery>,
) -> impl IntoResponse {
    let (status, body) = list_reports_inner(&state, query).await;
    (status, Json(body))
}

pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    let (status, body) = analyze_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Unit tests — pure inner functions (no DB required)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_inner_is_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["service"], "agrichat");
    }

    #[test]
    fn error_response_distinguishes_validation() {
        let (status, body) = error_response(AgriChatError::Validation("bad input".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, _) = error_response(AgriChatError::Other("store down".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_shape() {
        let (status, body) = not_found("session");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "session not found");
    }
}
