use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use super::*;
use crate::storage::MemoryStore;

// =============================================================
// Stub server
// =============================================================

/// Serves one canned response per connection and records request heads.
async fn stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut stream).await;
            log.lock().await.push(request);
            let reply = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{addr}/api"), seen)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn gateway(base_url: &str) -> (HttpGateway, CredentialCache, EventBus) {
    let cache = CredentialCache::new(Arc::new(MemoryStore::new()));
    let bus = EventBus::new();
    let config = SessionConfig { api_base_url: base_url.to_owned(), ..SessionConfig::default() };
    let gw = HttpGateway::new(&config, cache.clone(), bus.clone()).unwrap();
    (gw, cache, bus)
}

const ALICE_AUTH: &str = r#"{"success":true,"user":{"id":"u1","username":"alice"},"token":"tok-1"}"#;

// =============================================================
// Pure helpers
// =============================================================

#[test]
fn endpoint_url_joins_without_double_slash() {
    assert_eq!(endpoint_url("http://x/api/", LOGIN_PATH), "http://x/api/auth/login");
    assert_eq!(endpoint_url("http://x/api", ME_PATH), "http://x/api/auth/me");
}

#[test]
fn error_message_prefers_message_then_error() {
    assert_eq!(error_message(r#"{"message":"Bad password"}"#).as_deref(), Some("Bad password"));
    assert_eq!(error_message(r#"{"error":"Nope"}"#).as_deref(), Some("Nope"));
    assert_eq!(error_message(r#"{"message":"  "}"#), None);
    assert_eq!(error_message("<html>"), None);
}

#[test]
fn classify_failure_maps_status_families() {
    assert_eq!(classify_failure(401, "", true), SessionError::SessionExpired);
    assert_eq!(classify_failure(401, "", false), SessionError::Auth("Invalid credentials".into()));
    assert_eq!(
        classify_failure(409, r#"{"message":"Username taken"}"#, false),
        SessionError::Auth("Username taken".into())
    );
    assert!(matches!(classify_failure(503, "", false), SessionError::Network(_)));
    assert!(classify_failure(500, "", true).retryable());
}

#[test]
fn parse_auth_response_rejects_unsuccessful_body() {
    let err = parse_auth_response(
        r#"{"success":false,"user":{"id":"u1","username":"a"},"message":"Locked"}"#,
        "Login failed",
    )
    .unwrap_err();
    assert_eq!(err, SessionError::Auth("Locked".into()));
}

#[test]
fn parse_current_user_accepts_bare_and_wrapped() {
    let bare = parse_current_user(r#"{"id":"u1","username":"alice"}"#).unwrap().unwrap();
    let wrapped = parse_current_user(r#"{"user":{"id":"u1","username":"alice"}}"#).unwrap().unwrap();
    assert_eq!(bare, wrapped);
}

#[test]
fn parse_current_user_empty_means_no_identity() {
    assert_eq!(parse_current_user("").unwrap(), None);
    assert_eq!(parse_current_user("null").unwrap(), None);
    assert_eq!(parse_current_user(r#"{"user":null}"#).unwrap(), None);
}

#[test]
fn parse_current_user_garbage_is_network_failure() {
    assert!(matches!(parse_current_user("{oops"), Err(SessionError::Network(_))));
}

// =============================================================
// Against a stub server
// =============================================================

#[tokio::test]
async fn login_stores_token_and_posts_credentials() {
    let (base, seen) = stub_server(vec![(200, ALICE_AUTH)]).await;
    let (gw, cache, _bus) = gateway(&base);

    let resp = gw.login(&Credentials::new("alice", "validpass123")).await.unwrap();
    assert_eq!(resp.user.username, "alice");
    assert_eq!(cache.token().as_deref(), Some("tok-1"));
    assert!(gw.is_authenticated());

    let request = seen.lock().await[0].clone();
    assert!(request.starts_with("POST /api/auth/login"));
    assert!(request.contains(r#""password":"validpass123""#));
}

#[tokio::test]
async fn login_rejection_surfaces_server_message() {
    let (base, _) = stub_server(vec![(401, r#"{"message":"Invalid username or password"}"#)]).await;
    let (gw, cache, _bus) = gateway(&base);

    let err = gw.login(&Credentials::new("alice", "wrongpass")).await.unwrap_err();
    assert_eq!(err, SessionError::Auth("Invalid username or password".into()));
    assert!(!cache.has_token());
}

#[tokio::test]
async fn current_user_sends_bearer_token() {
    let (base, seen) = stub_server(vec![(200, r#"{"id":"u1","username":"alice"}"#)]).await;
    let (gw, cache, _bus) = gateway(&base);
    cache.set_token("tok-1").unwrap();

    let user = gw.current_user().await.unwrap().unwrap();
    assert_eq!(user.id, "u1");
    let request = seen.lock().await[0].to_ascii_lowercase();
    assert!(request.starts_with("get /api/auth/me"));
    assert!(request.contains("authorization: bearer tok-1"));
}

#[tokio::test]
async fn current_user_401_clears_token_and_broadcasts() {
    let (base, _) = stub_server(vec![(401, "")]).await;
    let (gw, cache, bus) = gateway(&base);
    cache.set_token("stale").unwrap();
    let mut rx = bus.subscribe();

    let err = gw.current_user().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert!(!cache.has_token());
    assert_eq!(rx.recv().await.unwrap().kind(), "session_invalidated");
}

#[tokio::test]
async fn current_user_401_for_replaced_token_keeps_newer_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (gw, cache, bus) = gateway(&format!("http://{addr}/api"));
    cache.set_token("tok-old").unwrap();
    let mut rx = bus.subscribe();

    let racing_login = cache.clone();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        racing_login.set_token("tok-new").unwrap();
        let reply = "HTTP/1.1 401 X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
        let _ = stream.write_all(reply.as_bytes()).await;
        let _ = stream.shutdown().await;
    });

    let err = gw.current_user().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert_eq!(cache.token().as_deref(), Some("tok-new"));
    assert!(matches!(rx.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));
}

#[tokio::test]
async fn current_user_without_token_skips_network() {
    let (gw, _cache, _bus) = gateway("http://127.0.0.1:9/api");
    assert_eq!(gw.current_user().await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_server_is_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (gw, cache, _bus) = gateway(&format!("http://{addr}/api"));
    cache.set_token("tok").unwrap();

    let err = gw.current_user().await.unwrap_err();
    assert!(matches!(err, SessionError::Network(_)));
    assert!(cache.has_token());
}

#[tokio::test]
async fn logout_clears_token_even_when_server_errors() {
    let (base, _) = stub_server(vec![(500, "")]).await;
    let (gw, cache, _bus) = gateway(&base);
    cache.set_token("tok").unwrap();

    assert!(matches!(gw.logout().await, Err(SessionError::Network(_))));
    assert!(!cache.has_token());
}

#[tokio::test]
async fn reset_flow_posts_expected_bodies() {
    let (base, seen) = stub_server(vec![(200, "{}"), (200, "{}"), (200, "{}")]).await;
    let (gw, _cache, _bus) = gateway(&base);

    gw.forgot_password("alice@example.com").await.unwrap();
    gw.verify_otp("alice@example.com", "123456").await.unwrap();
    gw.reset_password("alice@example.com", "123456", "newpass123").await.unwrap();

    let seen = seen.lock().await;
    assert!(seen[0].starts_with("POST /api/auth/forgot-password"));
    assert!(seen[1].contains(r#""otp":"123456""#));
    assert!(seen[2].contains(r#""new_password":"newpass123""#));
}

#[tokio::test]
async fn verify_otp_rejection_is_auth_failure() {
    let (base, _) = stub_server(vec![(400, r#"{"error":"Invalid or expired code"}"#)]).await;
    let (gw, _cache, _bus) = gateway(&base);
    let err = gw.verify_otp("alice@example.com", "000000").await.unwrap_err();
    assert_eq!(err, SessionError::Auth("Invalid or expired code".into()));
}
