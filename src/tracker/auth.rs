//! Password hashing, session cookies and the session guard.

use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, error};

use super::api::SharedState;
use super::models::SessionUser;
use crate::errors::TrackerError;

/// Cost used for every stored password hash.
pub const BCRYPT_COST: u32 = 10;

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, BCRYPT_COST).context("Failed to hash password")
}

/// Malformed hashes verify as false.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Read the session id from the `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_str = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie_str.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        (name == cookie_name && !value.is_empty()).then(|| value.to_string())
    })
}

/// `Set-Cookie` value for a new session. Without `max_age_secs` the cookie
/// lives until the browser closes.
pub fn session_cookie(
    cookie_name: &str,
    session_id: &str,
    max_age_secs: Option<i64>,
    secure: bool,
) -> String {
    let mut parts = vec![
        format!("{}={}", cookie_name, session_id),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
    ];
    if secure {
        parts.push("Secure".to_string());
    }
    if let Some(max_age) = max_age_secs {
        parts.push(format!("Max-Age={}", max_age));
    }
    parts.join("; ")
}

pub fn clear_cookie(cookie_name: &str, secure: bool) -> String {
    session_cookie(cookie_name, "", Some(0), secure)
}

/// Fail with `Forbidden` unless `user.role` is one of `allowed`.
pub fn require_role(user: &SessionUser, allowed: &[String]) -> Result<(), TrackerError> {
    if allowed.iter().any(|role| *role == user.role) {
        Ok(())
    } else {
        Err(TrackerError::Forbidden)
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": TrackerError::Unauthorized.to_string()})),
    )
        .into_response()
}

/// Resolve the session cookie to a user and stash it as a request extension
/// for handlers to extract via `Extension<SessionUser>`.
pub async fn require_session(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(session_id) = session_id_from_headers(req.headers(), &state.config.auth.cookie_name)
    else {
        return unauthorized();
    };

    let lookup = state
        .db
        .call(move |db| db.session_user(&session_id, Utc::now()))
        .await;
    match lookup {
        Ok(Some(user)) => {
            debug!(user_id = user.id, path = %req.uri().path(), "session accepted");
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            error!("Session lookup failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}
