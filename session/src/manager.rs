//! Session store: the authentication lifecycle state machine.
//!
//! ARCHITECTURE
//! ============
//! One `SessionManager` is built at startup and shared by `Arc`. Its state is
//! published through a `watch` channel so route guards and views re-render
//! on every transition. The gateway owns the token; the manager owns the
//! cached user snapshot and writes it after every transition.
//!
//! ORDERING
//! ========
//! Identity transitions (restore, login, register, logout, invalidate) take
//! a ticket when they start. A finished transition is applied only if no
//! later-started transition has been applied already, so after concurrent
//! login/logout calls settle the state reflects the later-started one.
//! Profile merges and refreshes modify the current identity in place and
//! never resurrect a signed-out session. A refresh is also dropped when any
//! identity transition was applied while its fetch was out.
//!
//! `is_loading` is an in-flight counter released by a drop guard, so it
//! returns to false on every exit path, including cancellation.

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::gateway::AuthGateway;
use crate::storage::CredentialCache;
use crate::types::{AuthOutcome, AuthResponse, Credentials, RegisterRequest, Session, User};
use crate::validate::{validate_credentials, validate_registration};

pub struct SessionManager {
    gateway: Arc<dyn AuthGateway>,
    cache: CredentialCache,
    bus: EventBus,
    state: watch::Sender<Session>,
    next_ticket: AtomicU64,
    /// Highest ticket whose transition has been applied. Only touched inside
    /// `watch` modify closures, which run under the channel lock.
    applied: AtomicU64,
    in_flight: AtomicUsize,
}

/// Keeps `is_loading` raised while alive.
struct LoadingGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let in_flight = &self.manager.in_flight;
        self.manager.state.send_modify(|s| {
            let before = in_flight.fetch_sub(1, Ordering::SeqCst);
            s.is_loading = before > 1;
        });
    }
}

impl SessionManager {
    /// Build the manager in the `Initializing` state (`is_loading = true`).
    #[must_use]
    pub fn new(gateway: Arc<dyn AuthGateway>, cache: CredentialCache, bus: EventBus) -> Self {
        let (state, _) = watch::channel(Session::initializing());
        Self {
            gateway,
            cache,
            bus,
            state,
            next_ticket: AtomicU64::new(1),
            applied: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn AuthGateway> {
        &self.gateway
    }

    // =========================================================================
    // LIFECYCLE OPERATIONS
    // =========================================================================

    /// Boot-time check: token → remote identity → cached fallback.
    ///
    /// Transport failures fall back to the cached user when one exists. An
    /// answer from the server that there is no identity, or a rejected token,
    /// signs out and clears the cache.
    pub async fn restore_session(&self) -> Session {
        self.restore_inner().await;
        self.snapshot()
    }

    async fn restore_inner(&self) {
        let ticket = self.take_ticket();
        let _loading = self.begin_loading();

        if !self.gateway.is_authenticated() {
            debug!("no stored token; starting signed out");
            self.settle_signed_out(ticket);
            return;
        }

        match self.gateway.current_user().await {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "session restored");
                self.settle_signed_in(ticket, user);
            }
            Ok(None) => {
                info!("server reports no identity for stored token; signing out");
                self.settle_signed_out(ticket);
            }
            Err(SessionError::Network(e)) => match self.gateway.stored_user() {
                Some(user) => {
                    warn!(error = %e, user_id = %user.id, "identity check failed; using cached user");
                    self.apply(ticket, |s| s.sign_in(user));
                }
                None => {
                    warn!(error = %e, "identity check failed and no cached user; clearing stale token");
                    self.settle_signed_out(ticket);
                }
            },
            Err(e) => {
                info!(error = %e, "stored token rejected; signing out");
                self.settle_signed_out(ticket);
            }
        }
    }

    /// Validate, authenticate, and sign in.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] before any network call,
    /// [`SessionError::Auth`] / [`SessionError::Network`] from the gateway,
    /// [`SessionError::Superseded`] if a later-started transition won.
    /// The message is also stored in `last_error`.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome, SessionError> {
        let ticket = self.take_ticket();
        let credentials = validate_credentials(credentials).inspect_err(|e| self.record_error(ticket, e))?;

        let _loading = self.begin_loading();
        let response = self
            .gateway
            .login(&credentials)
            .await
            .inspect_err(|e| self.record_error(ticket, e))?;
        self.accept(ticket, response)
    }

    /// Same contract as [`SessionManager::login`] for account creation.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::login`].
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthOutcome, SessionError> {
        let ticket = self.take_ticket();
        let request = validate_registration(request).inspect_err(|e| self.record_error(ticket, e))?;

        let _loading = self.begin_loading();
        let response = self
            .gateway
            .register(&request)
            .await
            .inspect_err(|e| self.record_error(ticket, e))?;
        self.accept(ticket, response)
    }

    /// Best-effort remote logout followed by an unconditional local clear.
    pub async fn logout(&self) {
        let ticket = self.take_ticket();
        let _loading = self.begin_loading();

        if let Err(e) = self.gateway.logout().await {
            warn!(error = %e, "remote logout failed; clearing local session anyway");
        }
        if self.settle_signed_out(ticket) {
            info!("signed out");
        }
    }

    /// Local sign-out without a gateway call. Used for `SessionInvalidated`.
    pub fn invalidate(&self, reason: &str) {
        let ticket = self.take_ticket();
        if self.settle_signed_out(ticket) {
            info!(reason, "session invalidated");
        }
    }

    /// Merge `patch` into the current identity and persist the result.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoSession`] when signed out, [`SessionError::Validation`]
    /// when the patch is rejected by [`User::merged`].
    pub fn update_identity(&self, patch: &Map<String, Value>) -> Result<User, SessionError> {
        let mut outcome = Err(SessionError::NoSession);
        self.state.send_if_modified(|s| {
            let Some(current) = s.user.as_ref() else {
                return false;
            };
            match current.merged(patch) {
                Ok(merged) => {
                    s.user = Some(merged.clone());
                    outcome = Ok(merged);
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        let user = outcome?;
        self.persist_user(&user);
        self.bus
            .publish(SessionEvent::ProfileUpdated { user: user.clone() });
        Ok(user)
    }

    /// Re-fetch the identity and replace it wholesale.
    ///
    /// # Errors
    ///
    /// Any gateway failure, [`SessionError::SessionExpired`] when the server
    /// reports no identity, [`SessionError::NoSession`] when signed out,
    /// [`SessionError::Superseded`] when an identity transition was applied
    /// while the fetch was out. State is left untouched on every error.
    pub async fn refresh_identity(&self) -> Result<User, SessionError> {
        let generation = {
            let session = self.state.borrow();
            if !session.is_authenticated {
                return Err(SessionError::NoSession);
            }
            self.applied.load(Ordering::SeqCst)
        };
        let user = self
            .gateway
            .current_user()
            .await?
            .ok_or(SessionError::SessionExpired)?;

        let mut outcome = Err(SessionError::Superseded);
        self.state.send_if_modified(|s| {
            if self.applied.load(Ordering::SeqCst) != generation {
                return false;
            }
            if !s.is_authenticated {
                outcome = Err(SessionError::NoSession);
                return false;
            }
            s.user = Some(user.clone());
            outcome = Ok(());
            true
        });
        outcome?;
        self.persist_user(&user);
        Ok(user)
    }

    /// [`SessionManager::refresh_identity`] for background callers: failures
    /// are logged and the current identity is kept.
    pub async fn refresh_in_background(&self) {
        match self.refresh_identity().await {
            Ok(user) => debug!(user_id = %user.id, "identity refreshed"),
            Err(SessionError::NoSession) => {}
            Err(SessionError::Superseded) => debug!("background refresh superseded by a session change"),
            Err(e @ SessionError::Network(_)) => warn!(error = %e, "background refresh failed; keeping current identity"),
            Err(e) => warn!(error = %e, code = e.error_code(), "background refresh rejected"),
        }
    }

    /// Tell statistics views that the signed-in user followed or unfollowed
    /// `user_id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoSession`] when signed out.
    pub fn record_follow(&self, user_id: &str, following: bool) -> Result<(), SessionError> {
        if !self.state.borrow().is_authenticated {
            return Err(SessionError::NoSession);
        }
        self.bus.publish(SessionEvent::FollowUpdated { user_id: user_id.to_owned(), following });
        Ok(())
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================

    /// Sign out locally whenever `SessionInvalidated` is published. The task
    /// ends when the manager is dropped or the bus closes.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::SessionInvalidated { reason }) => {
                        let Some(manager) = manager.upgrade() else {
                            return;
                        };
                        manager.invalidate(&reason);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Periodically refresh the identity while signed in.
    pub fn spawn_refresh_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        info!(period_secs = period.as_secs(), "identity refresh configured");
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if manager.snapshot().is_authenticated {
                    manager.refresh_in_background().await;
                }
            }
        })
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        self.state.send_modify(|s| {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            s.is_loading = true;
        });
        LoadingGuard { manager: self }
    }

    /// Apply an identity transition unless a later-started one already won.
    fn apply(&self, ticket: u64, change: impl FnOnce(&mut Session)) -> bool {
        self.state.send_if_modified(|s| {
            if ticket < self.applied.load(Ordering::SeqCst) {
                return false;
            }
            self.applied.store(ticket, Ordering::SeqCst);
            change(s);
            true
        })
    }

    fn settle_signed_in(&self, ticket: u64, user: User) -> bool {
        let snapshot = user.clone();
        let applied = self.apply(ticket, |s| s.sign_in(user));
        if applied {
            self.persist_user(&snapshot);
        }
        applied
    }

    fn settle_signed_out(&self, ticket: u64) -> bool {
        let applied = self.apply(ticket, Session::sign_out);
        if applied {
            if let Err(e) = self.cache.clear() {
                warn!(error = %e, "failed to clear durable session data");
            }
        } else {
            debug!(ticket, "sign-out superseded by a later session change");
        }
        applied
    }

    fn accept(&self, ticket: u64, response: AuthResponse) -> Result<AuthOutcome, SessionError> {
        let user = response.user;
        if self.settle_signed_in(ticket, user.clone()) {
            info!(user_id = %user.id, "signed in");
            return Ok(AuthOutcome { user });
        }

        debug!(ticket, "sign-in superseded by a later session change");
        if let Some(token) = response.token {
            if self.cache.token().as_deref() == Some(token.as_str()) {
                if let Err(e) = self.cache.clear_token() {
                    warn!(error = %e, "failed to discard superseded token");
                }
            }
        }
        Err(SessionError::Superseded)
    }

    /// Surface a failure message without counting as a transition.
    fn record_error(&self, ticket: u64, err: &SessionError) {
        let message = err.to_string();
        self.state.send_if_modified(|s| {
            if ticket < self.applied.load(Ordering::SeqCst) {
                return false;
            }
            s.last_error = Some(message);
            true
        });
    }

    fn persist_user(&self, user: &User) {
        if let Err(e) = self.cache.persist_user(user) {
            warn!(error = %e, user_id = %user.id, "failed to persist user snapshot");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
