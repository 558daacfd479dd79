//! Error taxonomy of the rendezvous protocol

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::StoreError;
use thiserror::Error;

/// Errors surfaced by the registry, watcher and confirmer
#[derive(Error, Debug)]
pub enum RendezvousError {
    /// The user id does not resolve to an active account
    #[error("account is missing or inactive")]
    InvalidAccount,

    /// Identifier/secret pair was rejected by the account directory
    #[error("account credentials rejected")]
    AuthFailed,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    /// Another transition already decided the session
    #[error("session already reached a terminal state")]
    SessionAlreadyTerminal,

    /// The device assertion is malformed, unsigned by an enrolled device,
    /// or bound to another session, account or action
    #[error("device assertion rejected: {0}")]
    AssertionInvalid(String),

    /// The device-level biometric or PIN check did not succeed
    #[error("local device authentication failed")]
    LocalAuthFailed,

    #[error("timed out waiting for the session")]
    TimedOut,

    #[error("too many attempts")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient: the backing store or a directory could not be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A server-side step failed (signing, hashing, configuration)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RendezvousError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => RendezvousError::StoreUnavailable(err.to_string()),
            StoreError::Corrupt(_) | StoreError::Rejected(_) => {
                RendezvousError::Internal(err.to_string())
            }
        }
    }
}

impl RendezvousError {
    /// Whether a caller may retry the same request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, RendezvousError::StoreUnavailable(_))
    }

    /// Human-readable message shown to end users
    pub fn user_message(&self) -> &'static str {
        match self {
            RendezvousError::InvalidAccount | RendezvousError::AuthFailed => {
                "Login failed. Check your email and password."
            }
            RendezvousError::SessionNotFound => "This login request does not exist.",
            RendezvousError::SessionExpired => "This login request has expired.",
            RendezvousError::SessionAlreadyTerminal => {
                "This login request was already answered."
            }
            RendezvousError::AssertionInvalid(_) => "Authentication failed",
            RendezvousError::LocalAuthFailed => "Authentication failed",
            RendezvousError::TimedOut => "Timed out waiting for your device.",
            RendezvousError::RateLimited => "Too many requests. Try again later.",
            RendezvousError::InvalidRequest(_) => "The request was not valid.",
            RendezvousError::StoreUnavailable(_) => {
                "Login is temporarily unavailable. Please try again later."
            }
            RendezvousError::Internal(_) => "Something went wrong. Please try again later.",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RendezvousError::InvalidAccount | RendezvousError::AuthFailed => {
                StatusCode::UNAUTHORIZED
            }
            RendezvousError::SessionNotFound => StatusCode::NOT_FOUND,
            RendezvousError::SessionExpired => StatusCode::GONE,
            RendezvousError::SessionAlreadyTerminal => StatusCode::CONFLICT,
            RendezvousError::AssertionInvalid(_) | RendezvousError::LocalAuthFailed => {
                StatusCode::FORBIDDEN
            }
            RendezvousError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            RendezvousError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RendezvousError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RendezvousError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RendezvousError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Inverse of the HTTP mapping, used by the device-side HTTP client
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => RendezvousError::AuthFailed,
            StatusCode::NOT_FOUND => RendezvousError::SessionNotFound,
            StatusCode::GONE => RendezvousError::SessionExpired,
            StatusCode::CONFLICT => RendezvousError::SessionAlreadyTerminal,
            StatusCode::FORBIDDEN => {
                RendezvousError::AssertionInvalid("rejected by server".to_string())
            }
            StatusCode::TOO_MANY_REQUESTS => RendezvousError::RateLimited,
            StatusCode::BAD_REQUEST => {
                RendezvousError::InvalidRequest("rejected by server".to_string())
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                RendezvousError::Internal("server error".to_string())
            }
            other => RendezvousError::StoreUnavailable(format!("server responded {}", other)),
        }
    }
}

impl IntoResponse for RendezvousError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.user_message(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for rendezvous results
pub type RendezvousResult<T> = Result<T, RendezvousError>;
