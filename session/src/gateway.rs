//! Boundary to the remote authentication API.
//!
//! The session manager only talks to the API through [`AuthGateway`], so
//! tests swap in a scripted gateway and front-ends can swap transports.

use crate::error::SessionError;
use crate::types::{AuthResponse, Credentials, RegisterRequest, User};

/// Remote authentication operations consumed by the session manager.
///
/// Implementations own the token half of durable storage: a successful
/// login/register stores the token, and a token rejection clears it and
/// publishes `SessionInvalidated`.
#[async_trait::async_trait]
pub trait AuthGateway: Send + Sync {
    /// Whether a token is present locally. Makes no network call.
    fn is_authenticated(&self) -> bool;

    /// # Errors
    ///
    /// [`SessionError::Auth`] when credentials are rejected,
    /// [`SessionError::Network`] on transport failure.
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, SessionError>;

    /// # Errors
    ///
    /// [`SessionError::Auth`] when the server refuses the account,
    /// [`SessionError::Network`] on transport failure.
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, SessionError>;

    /// Fetch the identity behind the stored token. `Ok(None)` means the
    /// server answered and reported no identity.
    ///
    /// # Errors
    ///
    /// [`SessionError::Network`] on transport failure,
    /// [`SessionError::SessionExpired`] when the token is rejected.
    async fn current_user(&self) -> Result<Option<User>, SessionError>;

    /// Last cached identity, read locally.
    fn stored_user(&self) -> Option<User>;

    /// Revoke the session remotely. Callers treat failures as best-effort.
    ///
    /// # Errors
    ///
    /// Any failure from the remote call.
    async fn logout(&self) -> Result<(), SessionError>;

    /// Ask the server to email a one-time reset code.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] or [`SessionError::Network`].
    async fn forgot_password(&self, email: &str) -> Result<(), SessionError>;

    /// # Errors
    ///
    /// [`SessionError::Auth`] when the code is wrong or expired.
    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), SessionError>;

    /// # Errors
    ///
    /// [`SessionError::Auth`] when the code is wrong or expired.
    async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> Result<(), SessionError>;
}
