use super::*;

fn pairs(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn set_pairs_keep_json_types() {
    let patch = parse_set_pairs(&pairs(&["bio=hello there", "followers=42", "avatar_url=null", "verified=true"]))
        .unwrap();
    assert_eq!(patch["bio"], json!("hello there"));
    assert_eq!(patch["followers"], json!(42));
    assert_eq!(patch["avatar_url"], Value::Null);
    assert_eq!(patch["verified"], json!(true));
}

#[test]
fn set_pairs_split_on_first_equals() {
    let patch = parse_set_pairs(&pairs(&["bio=a=b"])).unwrap();
    assert_eq!(patch["bio"], json!("a=b"));
}

#[test]
fn set_pairs_reject_missing_separator_or_key() {
    assert!(matches!(parse_set_pairs(&pairs(&["bio"])), Err(CliError::InvalidPair(p)) if p == "bio"));
    assert!(matches!(parse_set_pairs(&pairs(&["=x"])), Err(CliError::InvalidPair(_))));
    assert!(matches!(parse_set_pairs(&[]), Err(CliError::EmptyPatch)));
}

#[test]
fn flags_override_env_config() {
    let base = SessionConfig::default();
    let config = resolve_config(base.clone(), Some("https://social.example/api/"), Some(PathBuf::from("/tmp/s.json")))
        .unwrap();
    assert_eq!(config.api_base_url, "https://social.example/api");
    assert_eq!(config.store_path, PathBuf::from("/tmp/s.json"));
    assert_eq!(config.timeouts, base.timeouts);

    let untouched = resolve_config(base.clone(), None, None).unwrap();
    assert_eq!(untouched, base);
}

#[test]
fn bad_base_url_flag_is_a_config_error() {
    let err = resolve_config(SessionConfig::default(), Some("ftp://x"), None).unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
}

#[test]
fn decisions_render_as_single_words() {
    assert_eq!(render_decision(&GuardDecision::Wait), "wait");
    assert_eq!(render_decision(&GuardDecision::Allow), "allow");
    assert_eq!(render_decision(&GuardDecision::Redirect("/login".into())), "redirect /login");
}

#[test]
fn session_json_reports_phase() {
    let rendered = session_json(&Session::default());
    assert_eq!(rendered["phase"], json!("unauthenticated"));
    assert_eq!(rendered["user"], Value::Null);
    assert_eq!(rendered["label"], Value::Null);

    let rendered = session_json(&Session::initializing());
    assert_eq!(rendered["phase"], json!("initializing"));
    assert_eq!(rendered["is_loading"], json!(true));
}

#[test]
fn session_errors_render_with_code() {
    let err = CliError::from(SessionError::NoSession);
    assert_eq!(err.to_string(), "E_NO_SESSION: not signed in");
}

#[test]
fn cli_parses_repeated_set_flags() {
    let cli = Cli::try_parse_from(["session-cli", "update-profile", "--set", "bio=x", "--set", "display_name=Al"]).unwrap();
    match cli.command {
        Command::UpdateProfile { set } => assert_eq!(set, vec!["bio=x", "display_name=Al"]),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn session_json_labels_signed_in_user() {
    let mut user = User::new("u1", "alice");
    user.display_name = Some("Alice".into());
    let session = Session { user: Some(user), is_authenticated: true, ..Session::default() };
    let rendered = session_json(&session);
    assert_eq!(rendered["phase"], json!("authenticated"));
    assert_eq!(rendered["label"], json!("Alice"));
}

#[test]
fn cli_parses_follow_and_unfollow() {
    let cli = Cli::try_parse_from(["session-cli", "follow", "u2", "--unfollow"]).unwrap();
    match cli.command {
        Command::Follow { user_id, unfollow } => {
            assert_eq!(user_id, "u2");
            assert!(unfollow);
        }
        other => panic!("unexpected command {other:?}"),
    }
}
