//! JWT auth for the task API.
//!
//! - Clients register and log in with email/password
//! - Login opens a session and returns a JWT valid for ~30 days carrying
//!   the account uid, email and session id
//! - All task endpoints require `Authorization: Bearer <jwt>` AND an active
//!   session, so logout revokes a token before it expires
//!
//! # Security notes
//! - Passwords are stored as salted pbkdf2 hashes, never in clear.
//! - Unknown email and wrong password are indistinguishable to the caller.
//! - Use a strong `TASKPAD_JWT_SECRET` in production; the generated
//!   ephemeral secret invalidates all tokens on restart.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::routes::AppState;
use super::types::{
    LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse, SuccessResponse,
};
use crate::accounts::{AccountError, Identity};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    /// Subject (account uid)
    sub: String,
    /// Email (for display/auditing)
    #[serde(default)]
    usr: String,
    /// Session id; must still be active server-side
    sid: String,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
}

/// The authenticated caller, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub sid: Uuid,
}

impl AuthUser {
    pub fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: self.email.clone(),
        }
    }
}

fn issue_jwt(
    secret: &str,
    ttl_days: i64,
    identity: &Identity,
    sid: Uuid,
) -> anyhow::Result<(String, DateTime<Utc>)> {
    let now = Utc::now();
    let exp = now + Duration::days(ttl_days.max(1));
    let claims = Claims {
        sub: identity.uid.clone(),
        usr: identity.email.clone(),
        sid: sid.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, exp))
}

fn verify_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(token_data.claims)
}

fn account_error(e: AccountError) -> (StatusCode, String) {
    let status = match e {
        AccountError::EmailTaken => StatusCode::CONFLICT,
        AccountError::InvalidEmail | AccountError::WeakPassword => StatusCode::BAD_REQUEST,
        AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AccountError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, String)> {
    let identity = state
        .accounts
        .register(&req.email, &req.password)
        .await
        .map_err(account_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            uid: identity.uid,
            email: identity.email,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    // A single generic 401 covers unknown email and wrong password alike.
    let identity = state
        .accounts
        .verify(&req.email, &req.password)
        .await
        .map_err(account_error)?;

    let sid = Uuid::new_v4();
    let (token, expires_at) = issue_jwt(
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_ttl_days,
        &identity,
        sid,
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // The session lives at most as long as its token; the reaper collects
    // it if the user never logs out.
    state.sessions.open(sid, Some(expires_at)).await;

    Ok(Json(LoginResponse {
        token,
        exp: expires_at.timestamp(),
        uid: identity.uid,
        email: identity.email,
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<SuccessResponse> {
    state.sessions.close(user.sid).await;
    tracing::info!("Session {} logged out", user.sid);
    Json(SuccessResponse { success: true })
}

pub async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        uid: user.uid,
        email: user.email,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    // Dev mode => fixed identity, no token checks.
    if state.config.dev_mode {
        req.extensions_mut().insert(AuthUser {
            uid: "dev".to_string(),
            email: "dev@localhost".to_string(),
            sid: Uuid::nil(),
        });
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let token = auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .unwrap_or("");

    if token.is_empty() {
        return (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response();
    }

    let claims = match verify_jwt(token, &state.config.auth.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response();
        }
    };

    let sid = match Uuid::parse_str(&claims.sid) {
        Ok(sid) => sid,
        Err(_) => return (StatusCode::UNAUTHORIZED, "Invalid session").into_response(),
    };

    // A valid signature is not enough: the session must still be open.
    if !state.sessions.is_active(sid).await {
        return (StatusCode::UNAUTHORIZED, "Session is no longer active").into_response();
    }

    // Re-validate the account on every call.
    let Some(account) = state.accounts.get(&claims.sub).await else {
        return (StatusCode::UNAUTHORIZED, "Unknown account").into_response();
    };

    req.extensions_mut().insert(AuthUser {
        uid: account.uid,
        email: account.email,
        sid,
    });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip() {
        let identity = Identity {
            uid: "u1".into(),
            email: "a@example.com".into(),
        };
        let sid = Uuid::new_v4();
        let (token, exp) = issue_jwt("secret", 30, &identity, sid).unwrap();
        assert!(exp > Utc::now());

        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.usr, "a@example.com");
        assert_eq!(claims.sid, sid.to_string());
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let identity = Identity {
            uid: "u1".into(),
            email: "a@example.com".into(),
        };
        let (token, _) = issue_jwt("secret", 30, &identity, Uuid::new_v4()).unwrap();
        assert!(verify_jwt(&token, "other-secret").is_err());
    }
}
