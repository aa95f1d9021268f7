//! HTTP surface: REST routes, the WebSocket upgrade endpoint, and the
//! middleware stack (CORS, tracing, body limits, per-IP throttling).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use missive_shared::events::{ChatRequestRecord, MessageRecord, Profile};
use missive_shared::types::RequestDecision;
use missive_shared::{RequestId, UserId};
use missive_store::User;

use crate::config::ServerConfig;
use crate::delivery::DeliveryPipeline;
use crate::error::ApiError;
use crate::media_store::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rate_limit::{throttle_middleware, RateLimiter};
use crate::reconcile::Reconciler;
use crate::requests::RequestProtocol;
use crate::wire;
use crate::SharedDb;

#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceRegistry,
    pub requests: Arc<RequestProtocol>,
    pub delivery: Arc<DeliveryPipeline>,
    pub reconcile: Arc<Reconciler>,
    pub db: SharedDb,
    pub media: Arc<MediaStore>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

/// Caller identity for REST routes, read from the `x-user-id` header.
///
/// This is an identification header, not authentication; session tokens are
/// a deployment concern handled by the fronting proxy.
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing x-user-id header".to_string()))?;

        let user_id = UserId::parse(header)
            .map_err(|_| ApiError::Unauthorized("malformed x-user-id header".to_string()))?;
        Ok(AuthUser(user_id))
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_media_size + 64 * 1024;

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/users", post(create_user).get(list_users))
        .route("/users/profile", put(update_profile))
        .route("/requests", post(submit_request))
        .route("/requests/verify", post(verify_requests))
        .route("/requests/pending", get(pending_requests))
        .route("/requests/{id}", put(respond_request))
        .route("/friends", get(list_friends))
        .route(
            "/messages/{peer}",
            post(send_message).get(list_messages).delete(clear_messages),
        )
        .route("/media/{id}", get(get_media))
        .layer(axum::middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            throttle_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "instance": state.config.instance_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserBody {
    display_name: String,
    password_hash: Option<String>,
    avatar_url: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let name = body.display_name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("displayName is required".to_string()));
    }

    let user = User {
        id: UserId::new(),
        display_name: name.to_string(),
        password_hash: body.password_hash.unwrap_or_default(),
        avatar_url: body.avatar_url,
        created_at: Utc::now(),
    };

    {
        let db = state.db.lock().await;
        db.insert_user(&user)?;
    }

    info!(user = %user.id, "Created user");
    Ok((StatusCode::CREATED, Json(wire::profile(&user))))
}

/// Every user except the caller, for the contact picker.
async fn list_users(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let db = state.db.lock().await;
    let users = db.list_users_except(me)?;
    Ok(Json(users.iter().map(wire::profile).collect()))
}

/// Avatar update: multipart with a single `avatar` part carrying the image.
async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Profile>, ApiError> {
    let mut avatar: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("avatar") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("unreadable avatar part: {e}")))?;
            avatar = Some(data.to_vec());
        }
    }

    let Some(data) = avatar else {
        return Err(ApiError::BadRequest("avatar part is required".to_string()));
    };

    let spooled = state.media.spool(&data).await?;
    let uploaded = state.media.upload(&spooled).await;
    if let Err(e) = fs::remove_file(&spooled).await {
        warn!(path = %spooled.display(), error = %e, "failed to remove spooled avatar");
    }
    let url = MediaStore::url_for(uploaded?);

    let updated = {
        let db = state.db.lock().await;
        let changed = db.update_user_avatar(me, &url)?;
        if !changed {
            return Err(ApiError::BadRequest("unknown user".to_string()));
        }
        db.get_user(me)?
    };

    Ok(Json(wire::profile(&updated)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequestBody {
    receiver_id: UserId,
}

async fn submit_request(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(body): Json<SubmitRequestBody>,
) -> Result<(StatusCode, Json<ChatRequestRecord>), ApiError> {
    let record = state.requests.submit(me, body.receiver_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestsBody {
    request_ids: Vec<RequestId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestsResponse {
    valid_request_ids: Vec<RequestId>,
}

async fn verify_requests(
    State(state): State<AppState>,
    AuthUser(_me): AuthUser,
    Json(body): Json<VerifyRequestsBody>,
) -> Result<Json<VerifyRequestsResponse>, ApiError> {
    let valid = state.reconcile.verify_request_ids(&body.request_ids).await?;
    Ok(Json(VerifyRequestsResponse {
        valid_request_ids: valid,
    }))
}

async fn pending_requests(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<ChatRequestRecord>>, ApiError> {
    Ok(Json(state.reconcile.list_pending_requests(me).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondBody {
    decision: RequestDecision,
}

async fn respond_request(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondBody>,
) -> Result<Json<ChatRequestRecord>, ApiError> {
    let record = state.requests.respond(me, id, body.decision).await?;
    Ok(Json(record))
}

async fn list_friends(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<Profile>>, ApiError> {
    Ok(Json(state.reconcile.list_friends(me).await?))
}

/// Message send: multipart with optional `text` and `image` parts. At least
/// one of the two must be present and non-empty.
async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageRecord>), ApiError> {
    let mut text: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("text") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable text part: {e}")))?;
                text = Some(value);
            }
            Some("image") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable image part: {e}")))?;
                if !data.is_empty() {
                    image = Some(data.to_vec());
                }
            }
            _ => {}
        }
    }

    let record = state.delivery.send(me, peer, text, image).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.reconcile.list_conversation(me, peer).await?))
}

async fn clear_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.reconcile.clear_conversation(me, peer).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.media.get(id).await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}
