//! # session
//!
//! Client-side authentication session for the social app.
//!
//! [`SessionManager`] owns the observable [`Session`] (current user, loading
//! flag, last error) and coordinates it with durable credential storage, the
//! remote [`AuthGateway`], and the process-wide [`EventBus`]. Route guards and
//! the password-recovery flow are pure consumers of the same types, so any
//! front-end (the bundled CLI, a TUI, a web shell) can drive them.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod guard;
pub mod http;
pub mod manager;
pub mod recovery;
pub mod storage;
pub mod types;
pub mod validate;

pub use config::SessionConfig;
pub use error::SessionError;
pub use events::{EventBus, SessionEvent};
pub use gateway::AuthGateway;
pub use guard::{GuardDecision, RouteAccess};
pub use http::HttpGateway;
pub use manager::SessionManager;
pub use recovery::{PasswordRecovery, RecoveryStage};
pub use storage::{CredentialCache, FileStore, KeyValueStore, MemoryStore};
pub use types::{AuthOutcome, Credentials, RegisterRequest, Session, SessionPhase, User};
