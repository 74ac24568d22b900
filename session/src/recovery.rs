//! Password recovery flow: request an emailed code, verify it, set a new
//! password.
//!
//! Each step validates its input locally before touching the gateway, and a
//! step only advances the stage when the server accepts it. A failed step can
//! be retried in place.

#[cfg(test)]
#[path = "recovery_test.rs"]
mod tests;

use std::sync::Arc;

use tracing::info;

use crate::error::SessionError;
use crate::gateway::AuthGateway;
use crate::validate::{normalize_email, normalize_otp, validate_password};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStage {
    RequestCode,
    VerifyCode,
    Reset,
    Done,
}

pub struct PasswordRecovery {
    gateway: Arc<dyn AuthGateway>,
    stage: RecoveryStage,
    email: Option<String>,
    code: Option<String>,
}

fn invalid(message: &str) -> SessionError {
    SessionError::Validation(message.to_owned())
}

impl PasswordRecovery {
    #[must_use]
    pub fn new(gateway: Arc<dyn AuthGateway>) -> Self {
        Self { gateway, stage: RecoveryStage::RequestCode, email: None, code: None }
    }

    /// Resume at code verification for an email whose code was already sent.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] when the email is malformed.
    pub fn for_email(gateway: Arc<dyn AuthGateway>, email: &str) -> Result<Self, SessionError> {
        let email = normalize_email(email).ok_or_else(|| invalid("Enter a valid email address"))?;
        Ok(Self { gateway, stage: RecoveryStage::VerifyCode, email: Some(email), code: None })
    }

    #[must_use]
    pub fn stage(&self) -> RecoveryStage {
        self.stage
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Send a reset code to `email`. Allowed from any stage before `Done`;
    /// calling it again resends and forgets any verified code.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed email or a finished flow, otherwise
    /// whatever the gateway reports.
    pub async fn request_code(&mut self, email: &str) -> Result<(), SessionError> {
        if self.stage == RecoveryStage::Done {
            return Err(invalid("Password has already been reset"));
        }
        let email = normalize_email(email).ok_or_else(|| invalid("Enter a valid email address"))?;
        self.gateway.forgot_password(&email).await?;
        info!(%email, "recovery: code requested");
        self.email = Some(email);
        self.code = None;
        self.stage = RecoveryStage::VerifyCode;
        Ok(())
    }

    /// # Errors
    ///
    /// Validation errors when no code was requested or the code is not six
    /// digits, otherwise whatever the gateway reports.
    pub async fn verify_code(&mut self, code: &str) -> Result<(), SessionError> {
        let email = match (self.stage, self.email.as_deref()) {
            (RecoveryStage::VerifyCode, Some(email)) => email,
            _ => return Err(invalid("Request a reset code first")),
        };
        let code = normalize_otp(code).ok_or_else(|| invalid("Enter the 6-digit code from your email"))?;
        self.gateway.verify_otp(email, &code).await?;
        info!(%email, "recovery: code verified");
        self.code = Some(code);
        self.stage = RecoveryStage::Reset;
        Ok(())
    }

    /// # Errors
    ///
    /// Validation errors when the code has not been verified or the new
    /// password is too weak, otherwise whatever the gateway reports.
    pub async fn reset(&mut self, new_password: &str) -> Result<(), SessionError> {
        let (email, code) = match (self.stage, self.email.as_deref(), self.code.as_deref()) {
            (RecoveryStage::Reset, Some(email), Some(code)) => (email, code),
            _ => return Err(invalid("Verify your reset code first")),
        };
        validate_password(new_password)?;
        self.gateway.reset_password(email, code, new_password).await?;
        info!(%email, "recovery: password reset");
        self.code = None;
        self.stage = RecoveryStage::Done;
        Ok(())
    }
}

impl std::fmt::Debug for PasswordRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRecovery")
            .field("stage", &self.stage)
            .field("email", &self.email)
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
