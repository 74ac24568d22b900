use super::*;
use crate::gateway::test_helpers::MockGateway;
use crate::storage::CredentialCache;

fn setup() -> (Arc<MockGateway>, PasswordRecovery) {
    let gateway = Arc::new(MockGateway::new(CredentialCache::in_memory()));
    let recovery = PasswordRecovery::new(gateway.clone());
    (gateway, recovery)
}

fn validation_message(err: SessionError) -> String {
    match err {
        SessionError::Validation(message) => message,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn full_flow_advances_through_every_stage() {
    let (gateway, mut recovery) = setup();
    assert_eq!(recovery.stage(), RecoveryStage::RequestCode);

    recovery.request_code("  Alice@Example.COM ").await.unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::VerifyCode);
    assert_eq!(recovery.email(), Some("alice@example.com"));

    recovery.verify_code(" 123456 ").await.unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::Reset);

    recovery.reset("new-secret").await.unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::Done);

    assert_eq!(
        gateway.calls(),
        vec![
            "forgot_password:alice@example.com",
            "verify_otp:alice@example.com:123456",
            "reset_password:alice@example.com:123456",
        ]
    );
}

#[tokio::test]
async fn malformed_email_never_reaches_gateway() {
    let (gateway, mut recovery) = setup();
    let err = recovery.request_code("not-an-email").await.unwrap_err();
    assert_eq!(validation_message(err), "Enter a valid email address");
    assert!(gateway.calls().is_empty());
    assert_eq!(recovery.stage(), RecoveryStage::RequestCode);
}

#[tokio::test]
async fn verify_before_request_is_rejected() {
    let (gateway, mut recovery) = setup();
    let err = recovery.verify_code("123456").await.unwrap_err();
    assert_eq!(validation_message(err), "Request a reset code first");
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn reset_before_verify_is_rejected() {
    let (gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    let err = recovery.reset("new-secret").await.unwrap_err();
    assert_eq!(validation_message(err), "Verify your reset code first");
    assert_eq!(gateway.calls().len(), 1);
}

#[tokio::test]
async fn short_code_is_rejected_locally() {
    let (gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    let err = recovery.verify_code("12ab").await.unwrap_err();
    assert_eq!(validation_message(err), "Enter the 6-digit code from your email");
    assert_eq!(gateway.calls().len(), 1);
    assert_eq!(recovery.stage(), RecoveryStage::VerifyCode);
}

#[tokio::test]
async fn rejected_code_can_be_retried() {
    let (gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    gateway.push_recovery(Err(SessionError::Auth("Invalid or expired code".into())));

    let err = recovery.verify_code("222222").await.unwrap_err();
    assert!(matches!(err, SessionError::Auth(ref m) if m == "Invalid or expired code"));
    assert_eq!(recovery.stage(), RecoveryStage::VerifyCode);

    recovery.verify_code("333333").await.unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::Reset);
    assert_eq!(gateway.calls().last().unwrap(), "verify_otp:alice@example.com:333333");
}

#[tokio::test]
async fn weak_new_password_is_rejected_locally() {
    let (gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    recovery.verify_code("123456").await.unwrap();
    let err = recovery.reset("abc").await.unwrap_err();
    assert_eq!(validation_message(err), "Password must be at least 6 characters");
    assert_eq!(gateway.calls().len(), 2);
    assert_eq!(recovery.stage(), RecoveryStage::Reset);
}

#[tokio::test]
async fn requesting_again_resets_verified_code() {
    let (_gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    recovery.verify_code("123456").await.unwrap();
    recovery.request_code("alice@example.com").await.unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::VerifyCode);
    assert!(recovery.reset("new-secret").await.is_err());
}

#[tokio::test]
async fn finished_flow_refuses_further_requests() {
    let (_gateway, mut recovery) = setup();
    recovery.request_code("alice@example.com").await.unwrap();
    recovery.verify_code("123456").await.unwrap();
    recovery.reset("new-secret").await.unwrap();
    let err = recovery.request_code("alice@example.com").await.unwrap_err();
    assert_eq!(validation_message(err), "Password has already been reset");
}

#[test]
fn for_email_validates_and_starts_at_verification() {
    let gateway = Arc::new(MockGateway::new(CredentialCache::in_memory()));
    assert!(PasswordRecovery::for_email(gateway.clone(), "bad").is_err());
    let recovery = PasswordRecovery::for_email(gateway, "Bob@Example.com").unwrap();
    assert_eq!(recovery.stage(), RecoveryStage::VerifyCode);
    assert_eq!(recovery.email(), Some("bob@example.com"));
}

#[test]
fn debug_redacts_code() {
    let gateway = Arc::new(MockGateway::new(CredentialCache::in_memory()));
    let mut recovery = PasswordRecovery::for_email(gateway, "bob@example.com").unwrap();
    recovery.code = Some("987654".into());
    let rendered = format!("{recovery:?}");
    assert!(!rendered.contains("987654"));
    assert!(rendered.contains("<redacted>"));
}
