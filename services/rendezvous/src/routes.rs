//! Rendezvous service routes

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::assertion::DeviceAssertion;
use crate::directory::AccountDirectory;
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{LoginCredentials, NewAccount, SessionId};
use crate::watcher::WatchEvent;

/// Response for a started login
#[derive(Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Public view of a session
#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Request carrying a device decision
#[derive(Deserialize)]
pub struct DecisionRequest {
    pub assertion: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A session awaiting the device's decision
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Request for device enrollment
#[derive(Deserialize)]
pub struct EnrollRequest {
    pub identifier: String,
    pub secret: String,
    pub recovery_code: String,
}

/// Request revoking one of the account's devices
#[derive(Deserialize)]
pub struct RevokeRequest {
    pub identifier: String,
    pub secret: String,
    pub device_id: Uuid,
}

/// Create the router for the rendezvous service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/sessions/:id", get(session_status))
        .route("/auth/sessions/:id/events", get(session_events))
        .route("/auth/sessions/:id/confirm", post(confirm))
        .route("/auth/sessions/:id/deny", post(deny))
        .route("/devices/enroll", post(enroll_device))
        .route("/devices/revoke", post(revoke_device))
        .route("/devices/sessions/pending", get(pending_sessions))
        .with_state(state)
}

fn parse_id(raw: &str) -> RendezvousResult<SessionId> {
    SessionId::parse(raw)
        .ok_or_else(|| RendezvousError::InvalidRequest("malformed session id".to_string()))
}

/// Assertion carried as `Authorization: Bearer <assertion>`
fn bearer_assertion(headers: &HeaderMap) -> RendezvousResult<DeviceAssertion> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| DeviceAssertion::from_token(token.trim().to_string()))
        .ok_or_else(|| RendezvousError::AssertionInvalid("missing bearer assertion".to_string()))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "service": "rendezvous"
            })),
        ),
        Ok(false) | Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "service": "rendezvous"
            })),
        ),
    }
}

/// Account registration endpoint
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewAccount>,
) -> RendezvousResult<impl IntoResponse> {
    info!("Registration request for {}", payload.email);
    let registered = state.accounts.register(&payload).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

/// First factor: resolve the account and open a pending session
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginCredentials>,
) -> RendezvousResult<impl IntoResponse> {
    info!("Login attempt for {}", payload.identifier);

    if !state.rate_limiter.is_allowed(&payload.identifier).await {
        warn!("Login rate limit hit for {}", payload.identifier);
        return Err(RendezvousError::RateLimited);
    }

    let user_id = state
        .accounts
        .resolve_account(&payload.identifier, &payload.secret)
        .await?;
    let session = state.registry.create(user_id).await?;
    state.rate_limiter.reset(&payload.identifier).await;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            session_id: session.id.to_string(),
            expires_at: session.expires_at,
        }),
    ))
}

/// Current status of a session
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RendezvousResult<Json<SessionResponse>> {
    let session = state.registry.get(&parse_id(&id)?).await?;
    Ok(Json(SessionResponse {
        session_id: session.id.to_string(),
        status: session.status.as_str().to_string(),
        message: session.status.label().to_string(),
        expires_at: session.expires_at,
    }))
}

/// Server-sent events for the web client waiting on a session
pub async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RendezvousResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = state.watcher.subscribe(&parse_id(&id)?).await?;

    let events = subscription.map(|item| {
        let event = match item {
            Ok(WatchEvent::Status(status)) => Event::default()
                .event("status")
                .data(status.as_str()),
            Ok(WatchEvent::TimedOut) => Event::default()
                .event("timeout")
                .data(RendezvousError::TimedOut.user_message()),
            Err(e) => {
                error!("Watch stream failed: {}", e);
                Event::default().event("error").data(e.user_message())
            }
        };
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Device confirmation endpoint
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> RendezvousResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let assertion = DeviceAssertion::from_token(payload.assertion);
    state.registry.confirm(&id, &assertion).await?;
    Ok(Json(serde_json::json!({"message": "Login confirmed"})))
}

/// Device denial endpoint
pub async fn deny(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> RendezvousResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let assertion = DeviceAssertion::from_token(payload.assertion);
    state.registry.deny(&id, &assertion, payload.reason).await?;
    Ok(Json(serde_json::json!({"message": "Login denied"})))
}

/// Enroll a device with the account password and one recovery code
pub async fn enroll_device(
    State(state): State<AppState>,
    Json(payload): Json<EnrollRequest>,
) -> RendezvousResult<impl IntoResponse> {
    if !state.rate_limiter.is_allowed(&payload.identifier).await {
        warn!("Enrollment rate limit hit for {}", payload.identifier);
        return Err(RendezvousError::RateLimited);
    }

    let user_id = state
        .accounts
        .resolve_account(&payload.identifier, &payload.secret)
        .await?;
    let credential = state
        .devices
        .enroll(user_id, &payload.recovery_code)
        .await?;
    state.rate_limiter.reset(&payload.identifier).await;

    Ok((StatusCode::CREATED, Json(credential)))
}

/// Revoke a device of the account; later assertions from it are refused
pub async fn revoke_device(
    State(state): State<AppState>,
    Json(payload): Json<RevokeRequest>,
) -> RendezvousResult<impl IntoResponse> {
    if !state.rate_limiter.is_allowed(&payload.identifier).await {
        warn!("Revocation rate limit hit for {}", payload.identifier);
        return Err(RendezvousError::RateLimited);
    }

    let user_id = state
        .accounts
        .resolve_account(&payload.identifier, &payload.secret)
        .await?;
    let revoked = state.devices.revoke(user_id, payload.device_id).await?;
    state.rate_limiter.reset(&payload.identifier).await;

    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

/// Pending sessions of the signing device's account
pub async fn pending_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> RendezvousResult<Json<Vec<PendingSession>>> {
    let assertion = bearer_assertion(&headers)?;
    let sessions = state.registry.pending_for_device(&assertion).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|session| PendingSession {
                session_id: session.id.to_string(),
                created_at: session.created_at,
                expires_at: session.expires_at,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_assertion_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_assertion(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_assertion(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c"));
        assert_eq!(bearer_assertion(&headers).unwrap().as_str(), "a.b.c");
    }
}
