//! Identity, credential, and session data shared by the store and gateway.
//!
//! DESIGN
//! ======
//! `User` is treated as an opaque record: the fields the client reads are
//! typed, everything else the server sends rides along in `extra` so cached
//! snapshots and profile merges never drop data.

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionError;

/// Authenticated user identity as returned by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier assigned by the server.
    pub id: String,
    /// Login handle.
    pub username: String,
    /// Account email, when the server exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name shown in the sidebar and profile views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Free-form profile bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Server fields the client does not model (follower counts, settings, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Minimal identity with only the required fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            display_name: None,
            avatar_url: None,
            bio: None,
            extra: Map::new(),
        }
    }

    /// Return a copy with `patch` merged over this identity.
    ///
    /// Keys absent from `patch` keep their current value. A `null` value
    /// clears an optional field. The identifier cannot be changed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] if the patch tries to change `id`
    /// or produces a record that no longer parses as a `User`.
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<Self, SessionError> {
        if let Some(id) = patch.get("id") {
            if id.as_str() != Some(self.id.as_str()) {
                return Err(SessionError::Validation("User id cannot be changed".to_owned()));
            }
        }

        let mut record = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(SessionError::Validation("user record is not an object".to_owned())),
            Err(e) => return Err(SessionError::Validation(e.to_string())),
        };
        for (key, value) in patch {
            record.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(record)).map_err(|e| SessionError::Validation(e.to_string()))
    }

    /// Name to show in UI surfaces: display name when set, else the handle.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Login input. Never persisted; the secret is redacted from debug output.
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// Username or email.
    pub identifier: String,
    /// Plain-text password, sent once over TLS.
    #[serde(rename = "password")]
    pub secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), secret: secret.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Account creation input.
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Body returned by the login and register endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    pub user: User,
    /// Bearer token for subsequent calls. Absent when the server uses cookies.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Successful result of `login` / `register`.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthOutcome {
    pub user: User,
}

/// Authenticated-identity state held by the running application.
///
/// `is_authenticated` is true exactly when `user` is present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl Session {
    /// State at application boot, before the restore check has settled.
    #[must_use]
    pub fn initializing() -> Self {
        Self { is_loading: true, ..Self::default() }
    }

    /// Lifecycle phase derived from the flags.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated {
            SessionPhase::Authenticated
        } else if self.is_loading {
            SessionPhase::Initializing
        } else {
            SessionPhase::Unauthenticated
        }
    }

    pub(crate) fn sign_in(&mut self, user: User) {
        self.user = Some(user);
        self.is_authenticated = true;
        self.last_error = None;
    }

    pub(crate) fn sign_out(&mut self) {
        self.user = None;
        self.is_authenticated = false;
        self.last_error = None;
    }
}

/// Coarse lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Authenticated,
    Unauthenticated,
}
