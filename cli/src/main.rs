use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use session::config::{ConfigError, parse_base_url};
use session::guard::{self, GuardDecision};
use session::{
    CredentialCache, Credentials, EventBus, FileStore, HttpGateway, PasswordRecovery, RegisterRequest, Session,
    SessionConfig, SessionError, SessionManager, User,
};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("{code}: {0}", code = .0.error_code())]
    Session(#[from] SessionError),
    #[error("invalid --set pair `{0}`; expected key=value")]
    InvalidPair(String),
    #[error("nothing to update; pass at least one --set key=value")]
    EmptyPatch,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "session-cli", about = "Sign in and manage the local auth session")]
struct Cli {
    #[arg(long, env = "SESSION_API_BASE_URL")]
    api_base_url: Option<String>,

    #[arg(long, env = "SESSION_STORE_PATH")]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a username or email.
    Login {
        identifier: String,
        #[arg(long, env = "SESSION_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        username: String,
        email: String,
        #[arg(long, env = "SESSION_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    Logout,
    /// Restore the stored session and print the signed-in user.
    Whoami,
    /// Re-fetch the signed-in user from the server.
    Refresh,
    /// Merge fields into the cached profile, e.g. `--set bio="hi" --set avatar_url=null`.
    UpdateProfile {
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,
    },
    ForgotPassword {
        email: String,
    },
    VerifyOtp {
        email: String,
        code: String,
    },
    /// Verify the emailed code and set a new password.
    ResetPassword {
        email: String,
        code: String,
        #[arg(long, env = "SESSION_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Tell in-process statistics views about a follow or unfollow.
    Follow {
        user_id: String,
        #[arg(long)]
        unfollow: bool,
    },
    /// Print the route-guard decision for an app location.
    Guard {
        location: String,
    },
    /// Keep the session alive and print every state change until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(SessionConfig::from_env()?, cli.api_base_url.as_deref(), cli.store_path)?;
    let manager = build_manager(&config)?;
    let _listener = manager.spawn_invalidation_listener();
    tracing::debug!(listeners = manager.bus().subscriber_count(), "session events wired");

    match cli.command {
        Command::Login { identifier, password } => {
            let outcome = manager.login(&Credentials::new(identifier, password)).await?;
            print_user(&outcome.user)
        }
        Command::Register { username, email, password, display_name } => {
            let request = RegisterRequest { username, email, password, display_name };
            let outcome = manager.register(&request).await?;
            print_user(&outcome.user)
        }
        Command::Logout => {
            manager.logout().await;
            eprintln!("signed out");
            Ok(())
        }
        Command::Whoami => {
            let session = manager.restore_session().await;
            print_json(&session_json(&session))
        }
        Command::Refresh => {
            manager.restore_session().await;
            let user = manager.refresh_identity().await?;
            print_user(&user)
        }
        Command::UpdateProfile { set } => {
            let patch = parse_set_pairs(&set)?;
            manager.restore_session().await;
            let user = manager.update_identity(&patch)?;
            print_user(&user)
        }
        Command::ForgotPassword { email } => {
            let mut recovery = PasswordRecovery::new(manager.gateway().clone());
            recovery.request_code(&email).await?;
            eprintln!("reset code sent to {}", recovery.email().unwrap_or(&email));
            Ok(())
        }
        Command::VerifyOtp { email, code } => {
            let mut recovery = PasswordRecovery::for_email(manager.gateway().clone(), &email)?;
            recovery.verify_code(&code).await?;
            eprintln!("code accepted");
            Ok(())
        }
        Command::ResetPassword { email, code, password } => {
            let mut recovery = PasswordRecovery::for_email(manager.gateway().clone(), &email)?;
            recovery.verify_code(&code).await?;
            recovery.reset(&password).await?;
            eprintln!("password updated; sign in with the new password");
            Ok(())
        }
        Command::Follow { user_id, unfollow } => {
            let session = manager.restore_session().await;
            manager.record_follow(&user_id, !unfollow)?;
            let label = session.user.as_ref().map_or("", User::label);
            eprintln!("{label} {} {user_id}", if unfollow { "unfollowed" } else { "followed" });
            Ok(())
        }
        Command::Guard { location } => {
            let session = manager.restore_session().await;
            println!("{}", render_decision(&guard::guard(&session, &location)));
            Ok(())
        }
        Command::Watch => run_watch(&manager, &config).await,
    }
}

fn resolve_config(
    mut config: SessionConfig,
    api_base_url: Option<&str>,
    store_path: Option<PathBuf>,
) -> Result<SessionConfig, CliError> {
    if api_base_url.is_some() {
        config.api_base_url = parse_base_url(api_base_url)?;
    }
    if let Some(path) = store_path {
        config.store_path = path;
    }
    Ok(config)
}

fn build_manager(config: &SessionConfig) -> Result<Arc<SessionManager>, CliError> {
    let cache = CredentialCache::new(Arc::new(FileStore::new(&config.store_path)));
    let bus = EventBus::new();
    let gateway = HttpGateway::new(config, cache.clone(), bus.clone())?;
    tracing::debug!(base_url = gateway.base_url(), store = %config.store_path.display(), "session client ready");
    Ok(Arc::new(SessionManager::new(Arc::new(gateway), cache, bus)))
}

async fn run_watch(manager: &Arc<SessionManager>, config: &SessionConfig) -> Result<(), CliError> {
    let mut changes = manager.subscribe();
    let _refresh = config.refresh_interval.map(|period| manager.spawn_refresh_task(period));
    manager.restore_session().await;
    print_json(&session_json(&manager.snapshot()))?;

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let session = changes.borrow_and_update().clone();
                print_json(&session_json(&session))?;
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Parse repeated `key=value` flags into a profile patch. Values that parse
/// as JSON keep their type (`null` clears a field), anything else is a string.
fn parse_set_pairs(pairs: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut patch = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(CliError::InvalidPair(pair.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidPair(pair.clone()));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        patch.insert(key.to_owned(), value);
    }
    if patch.is_empty() {
        return Err(CliError::EmptyPatch);
    }
    Ok(patch)
}

fn session_json(session: &Session) -> Value {
    json!({
        "phase": format!("{:?}", session.phase()).to_lowercase(),
        "label": session.user.as_ref().map(User::label),
        "user": session.user,
        "is_loading": session.is_loading,
        "last_error": session.last_error,
    })
}

fn render_decision(decision: &GuardDecision) -> String {
    match decision {
        GuardDecision::Wait => "wait".to_owned(),
        GuardDecision::Allow => "allow".to_owned(),
        GuardDecision::Redirect(to) => format!("redirect {to}"),
    }
}

fn print_user(user: &User) -> Result<(), CliError> {
    print_json(&serde_json::to_value(user)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
