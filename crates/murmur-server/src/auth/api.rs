//! Auth HTTP API: register, login (sets the session cookie), logout, me.

use super::accounts::{AccountError, AccountStore};
use super::rate_limit::LoginRateLimiter;
use crate::gatekeeper::Gatekeeper;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shared state for the auth handlers.
#[derive(Clone)]
pub struct AuthApiState {
    pub accounts: Arc<AccountStore>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub login_limiter: Arc<Mutex<LoginRateLimiter>>,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Build the auth router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(state: AuthApiState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
}

async fn register(State(state): State<AuthApiState>, Json(body): Json<Credentials>) -> Response {
    match state.accounts.register(&body.username, &body.password).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => account_error(e),
    }
}

async fn login(
    State(state): State<AuthApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<Credentials>,
) -> Response {
    let allowed = state
        .login_limiter
        .lock()
        .await
        .check_and_record(remote.ip());
    if !allowed {
        warn!(remote = %remote, "login rate limited");
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limited");
    }

    match state.accounts.verify(&body.username, &body.password).await {
        Ok(token) => {
            info!(username = %body.username, remote = %remote, "login");
            let cookie = format!(
                "{}={}; HttpOnly; Path=/; SameSite=Strict; Max-Age={}",
                state.gatekeeper.cookie_name(),
                token.as_str(),
                state.accounts.token_ttl()
            );
            (
                [(header::SET_COOKIE, cookie)],
                Json(json!({ "ok": true, "username": body.username })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(username = %body.username, remote = %remote, "login failed");
            account_error(e)
        }
    }
}

async fn logout(State(state): State<AuthApiState>) -> Response {
    let cookie = format!(
        "{}=; HttpOnly; Path=/; SameSite=Strict; Max-Age=0",
        state.gatekeeper.cookie_name()
    );
    ([(header::SET_COOKIE, cookie)], Json(json!({ "ok": true }))).into_response()
}

async fn me(State(state): State<AuthApiState>, headers: HeaderMap) -> Response {
    match state.gatekeeper.admit(&headers) {
        Ok(identity) => Json(json!({ "username": identity.username })).into_response(),
        Err(_) => error_response(StatusCode::UNAUTHORIZED, "unauth"),
    }
}

fn account_error(e: AccountError) -> Response {
    let status = match e {
        AccountError::MissingFields => StatusCode::BAD_REQUEST,
        AccountError::Exists => StatusCode::CONFLICT,
        AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
    };
    error_response(status, &e.to_string())
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}
