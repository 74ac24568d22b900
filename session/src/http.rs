//! JSON-over-HTTP implementation of [`AuthGateway`].
//!
//! Thin reqwest wrapper around the `/auth/*` endpoints. Status and body
//! interpretation lives in pure functions so it can be tested without a
//! server.
//!
//! ERROR HANDLING
//! ==============
//! A 401 on a token-bearing call means the server has dropped the session:
//! the token is cleared and `SessionInvalidated` is published so every
//! holder tears down its local state. Transport errors and 5xx responses map
//! to `Network`; other 4xx responses carry the server's message as `Auth`.

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::gateway::AuthGateway;
use crate::storage::CredentialCache;
use crate::types::{AuthResponse, Credentials, RegisterRequest, User};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const ME_PATH: &str = "/auth/me";
const LOGOUT_PATH: &str = "/auth/logout";
const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    cache: CredentialCache,
    bus: EventBus,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Returns [`SessionError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig, cache: CredentialCache, bus: EventBus) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(|e| SessionError::Network(e.to_string()))?;
        Ok(Self { http, base_url: config.api_base_url.clone(), cache, bus })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(u16, String), SessionError> {
        let request = self.http.post(endpoint_url(&self.base_url, path)).json(body);
        send(request).await
    }

    /// Clear the rejected token and tell every subscriber the session is gone.
    /// A no-op when a newer token replaced `rejected` while the call was out.
    fn invalidate(&self, rejected: &str, reason: &str) {
        if self.cache.token().as_deref() != Some(rejected) {
            info!(reason, "ignoring rejection of a superseded token");
            return;
        }
        if let Err(e) = self.cache.clear_token() {
            warn!(error = %e, "failed to clear rejected token");
        }
        self.bus
            .publish(SessionEvent::SessionInvalidated { reason: reason.to_owned() });
    }

    /// Persist the token from a login/register response.
    fn accept_auth(&self, status: u16, body: &str, fallback: &str) -> Result<AuthResponse, SessionError> {
        if !is_success(status) {
            return Err(classify_failure(status, body, false));
        }
        let response = parse_auth_response(body, fallback)?;
        match response.token.as_deref() {
            Some(token) if !token.is_empty() => self.cache.set_token(token)?,
            _ => warn!("auth response carried no token; relying on server cookies"),
        }
        Ok(response)
    }

    async fn expect_ok(&self, path: &str, body: &Value) -> Result<(), SessionError> {
        let (status, text) = self.post_json(path, body).await?;
        if is_success(status) {
            Ok(())
        } else {
            Err(classify_failure(status, &text, false))
        }
    }
}

#[async_trait::async_trait]
impl AuthGateway for HttpGateway {
    fn is_authenticated(&self) -> bool {
        self.cache.has_token()
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, SessionError> {
        let body = serde_json::to_value(credentials).map_err(|e| SessionError::Validation(e.to_string()))?;
        let (status, text) = self.post_json(LOGIN_PATH, &body).await?;
        let response = self.accept_auth(status, &text, "Login failed")?;
        info!(user_id = %response.user.id, "login accepted");
        Ok(response)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, SessionError> {
        let body = serde_json::to_value(request).map_err(|e| SessionError::Validation(e.to_string()))?;
        let (status, text) = self.post_json(REGISTER_PATH, &body).await?;
        let response = self.accept_auth(status, &text, "Registration failed")?;
        info!(user_id = %response.user.id, "registration accepted");
        Ok(response)
    }

    async fn current_user(&self) -> Result<Option<User>, SessionError> {
        let Some(token) = self.cache.token() else {
            return Ok(None);
        };
        let request = self
            .http
            .get(endpoint_url(&self.base_url, ME_PATH))
            .bearer_auth(&token);
        let (status, text) = send(request).await?;

        if status == 401 {
            self.invalidate(&token, "token rejected by /auth/me");
            return Err(SessionError::SessionExpired);
        }
        if !is_success(status) {
            return Err(classify_failure(status, &text, true));
        }
        parse_current_user(&text)
    }

    fn stored_user(&self) -> Option<User> {
        self.cache.stored_user()
    }

    async fn logout(&self) -> Result<(), SessionError> {
        let Some(token) = self.cache.token() else {
            return Ok(());
        };
        let request = self.http.post(endpoint_url(&self.base_url, LOGOUT_PATH));
        let result = send(request.bearer_auth(&token)).await;
        // A login that raced ahead may already have stored a newer token.
        if self.cache.token().as_deref() == Some(token.as_str()) {
            if let Err(e) = self.cache.clear_token() {
                warn!(error = %e, "failed to clear token on logout");
            }
        }

        let (status, text) = result?;
        // 401 means the server already forgot the session.
        if is_success(status) || status == 401 {
            Ok(())
        } else {
            Err(classify_failure(status, &text, true))
        }
    }

    async fn forgot_password(&self, email: &str) -> Result<(), SessionError> {
        self.expect_ok(FORGOT_PASSWORD_PATH, &json!({ "email": email }))
            .await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), SessionError> {
        self.expect_ok(VERIFY_OTP_PATH, &json!({ "email": email, "otp": code }))
            .await
    }

    async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> Result<(), SessionError> {
        self.expect_ok(
            RESET_PASSWORD_PATH,
            &json!({ "email": email, "otp": code, "new_password": new_password }),
        )
        .await
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<(u16, String), SessionError> {
    let response = request
        .send()
        .await
        .map_err(|e| SessionError::Network(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| SessionError::Network(e.to_string()))?;
    Ok((status, text))
}

// =============================================================================
// RESPONSE INTERPRETATION
// =============================================================================

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Pull a human-readable message out of an error body, if there is one.
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .message
        .or(parsed.error)
        .map(|m| m.trim().to_owned())
        .filter(|m| !m.is_empty())
}

fn default_failure_message(status: u16) -> String {
    match status {
        400 | 422 => "Invalid request".to_owned(),
        401 => "Invalid credentials".to_owned(),
        403 => "Access denied".to_owned(),
        404 => "Account not found".to_owned(),
        409 => "Account already exists".to_owned(),
        429 => "Too many attempts, try again later".to_owned(),
        other => format!("request failed: {other}"),
    }
}

/// Map a non-2xx response to the error taxonomy.
fn classify_failure(status: u16, body: &str, token_call: bool) -> SessionError {
    if token_call && status == 401 {
        return SessionError::SessionExpired;
    }
    if status >= 500 {
        return SessionError::Network(format!("server error: {status}"));
    }
    SessionError::Auth(error_message(body).unwrap_or_else(|| default_failure_message(status)))
}

fn parse_auth_response(body: &str, fallback: &str) -> Result<AuthResponse, SessionError> {
    let response: AuthResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::Network(format!("malformed auth response: {e}")))?;
    if !response.success {
        return Err(SessionError::Auth(error_message(body).unwrap_or_else(|| fallback.to_owned())));
    }
    Ok(response)
}

/// Accept either a bare user object or `{ "user": ... }`; null or an empty
/// body means the server reports no identity.
fn parse_current_user(body: &str) -> Result<Option<User>, SessionError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| SessionError::Network(format!("malformed user response: {e}")))?;
    let user = match value {
        Value::Null => return Ok(None),
        Value::Object(mut map) if map.contains_key("user") => map.remove("user").unwrap_or(Value::Null),
        other => other,
    };
    if user.is_null() {
        return Ok(None);
    }
    serde_json::from_value(user)
        .map(Some)
        .map_err(|e| SessionError::Network(format!("malformed user response: {e}")))
}
