//! Local input validation, applied before any gateway call.

#[cfg(test)]
#[path = "validate_test.rs"]
mod tests;

use crate::error::SessionError;
use crate::types::{Credentials, RegisterRequest};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;
pub const OTP_LEN: usize = 6;

fn invalid(message: &str) -> SessionError {
    SessionError::Validation(message.to_owned())
}

/// Lowercase and trim an email, rejecting anything without exactly one `@`
/// separating two non-empty parts.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

/// Trim a one-time code and require exactly six ASCII digits.
#[must_use]
pub fn normalize_otp(code: &str) -> Option<String> {
    let normalized = code.trim();
    if normalized.len() != OTP_LEN || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(normalized.to_owned())
}

/// # Errors
///
/// Returns [`SessionError::Validation`] when the password is empty or shorter
/// than [`MIN_PASSWORD_LEN`] characters.
pub fn validate_password(password: &str) -> Result<(), SessionError> {
    if password.is_empty() {
        return Err(invalid("Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid("Password must be at least 6 characters"));
    }
    Ok(())
}

/// Check login input and return it with the identifier trimmed.
///
/// # Errors
///
/// Returns [`SessionError::Validation`] with a user-facing message.
pub fn validate_credentials(credentials: &Credentials) -> Result<Credentials, SessionError> {
    let identifier = credentials.identifier.trim();
    if identifier.is_empty() {
        return Err(invalid("Username or email is required"));
    }
    validate_password(&credentials.secret)?;
    Ok(Credentials::new(identifier, credentials.secret.clone()))
}

/// Check account-creation input and return it normalized.
///
/// # Errors
///
/// Returns [`SessionError::Validation`] with a user-facing message.
pub fn validate_registration(request: &RegisterRequest) -> Result<RegisterRequest, SessionError> {
    let username = request.username.trim();
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(invalid("Username must be 3-30 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(invalid("Username may only contain letters, numbers, dots and underscores"));
    }
    let email = normalize_email(&request.email).ok_or_else(|| invalid("Enter a valid email address"))?;
    validate_password(&request.password)?;
    let display_name = request
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned);

    Ok(RegisterRequest { username: username.to_owned(), email, password: request.password.clone(), display_name })
}
