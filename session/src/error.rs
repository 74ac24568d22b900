//! Error taxonomy for the session lifecycle.
//!
//! ERROR HANDLING
//! ==============
//! Validation and auth failures surface to the caller that initiated the
//! action. Network failures are transient: restore falls back to the cached
//! user, background refresh logs and moves on. `SessionExpired` always ends
//! in a silent local logout.

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Failure raised by any session, gateway, or storage operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Malformed input, rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// The remote API rejected the request (bad credentials, taken username).
    #[error("{0}")]
    Auth(String),

    /// Transport failure or server-side error; the request may succeed later.
    #[error("network failure: {0}")]
    Network(String),

    /// The remote API no longer accepts the stored token.
    #[error("session expired")]
    SessionExpired,

    /// The operation needs an authenticated session and there is none.
    #[error("not signed in")]
    NoSession,

    /// A later-initiated session change settled first; this result was dropped.
    #[error("superseded by a later session change")]
    Superseded,

    /// Durable storage could not be read or written.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl SessionError {
    /// Grepable machine-readable code for logs and CLI output.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Auth(_) => "E_AUTH",
            Self::Network(_) => "E_NETWORK",
            Self::SessionExpired => "E_SESSION_EXPIRED",
            Self::NoSession => "E_NO_SESSION",
            Self::Superseded => "E_SUPERSEDED",
            Self::Storage(_) => "E_STORAGE",
        }
    }

    /// Whether retrying the same call could succeed without user action.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<crate::storage::StorageError> for SessionError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
