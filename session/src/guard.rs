//! Route guard decisions over a session snapshot.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI layers call these on every session change and apply the result. While
//! any session transition is in flight no navigation decision is made, so a
//! restored session never flashes the login screen.

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

use reqwest::Url;

use crate::types::Session;

pub const LOGIN_PATH: &str = "/login";
pub const DEFAULT_LANDING: &str = "/";
pub const REDIRECT_PARAM: &str = "redirect";

/// Screens only meaningful to signed-out visitors.
const PUBLIC_ONLY_PATHS: &[&str] = &["/login", "/register", "/forgot-password", "/reset-password"];

/// Base used to parse app-relative paths; never leaves the process.
const PARSE_BASE: &str = "http://app.invalid";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still settling: render a neutral waiting state.
    Wait,
    Allow,
    /// Navigate to this app-relative location instead.
    Redirect(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAccess {
    /// Requires a signed-in user.
    Private,
    /// Only for signed-out visitors (login, register, password reset).
    PublicOnly,
}

/// Access class for an app path (query and fragment ignored).
#[must_use]
pub fn route_access(path: &str) -> RouteAccess {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };
    if PUBLIC_ONLY_PATHS.contains(&path) {
        RouteAccess::PublicOnly
    } else {
        RouteAccess::Private
    }
}

/// Decide navigation for `location` (path plus optional query).
#[must_use]
pub fn guard(session: &Session, location: &str) -> GuardDecision {
    match route_access(location) {
        RouteAccess::Private => private_route(session, location),
        RouteAccess::PublicOnly => {
            let query = location.split_once('?').map(|(_, q)| q);
            public_only_route(session, query)
        }
    }
}

/// Guard for signed-in content. Unauthenticated visitors go to the login
/// screen with `requested` preserved for the post-login redirect.
#[must_use]
pub fn private_route(session: &Session, requested: &str) -> GuardDecision {
    if session.is_loading {
        return GuardDecision::Wait;
    }
    if session.is_authenticated {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(login_redirect(requested))
    }
}

/// Guard for login/register screens. Signed-in users are sent to the
/// preserved location from `query`, or to the default landing page.
#[must_use]
pub fn public_only_route(session: &Session, query: Option<&str>) -> GuardDecision {
    if session.is_loading {
        return GuardDecision::Wait;
    }
    if session.is_authenticated {
        GuardDecision::Redirect(post_login_target(query.unwrap_or_default()))
    } else {
        GuardDecision::Allow
    }
}

/// `/login?redirect=<requested>`, falling back to the bare login path when
/// `requested` is not a safe in-app location.
#[must_use]
pub fn login_redirect(requested: &str) -> String {
    if !is_safe_target(requested) || requested == DEFAULT_LANDING {
        return LOGIN_PATH.to_owned();
    }
    let Ok(url) = Url::parse_with_params(&format!("{PARSE_BASE}{LOGIN_PATH}"), &[(REDIRECT_PARAM, requested)]) else {
        return LOGIN_PATH.to_owned();
    };
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}

/// Where to go after signing in, read from a login-page query string.
/// Anything that is not a safe in-app path resolves to the landing page.
#[must_use]
pub fn post_login_target(query: &str) -> String {
    let query = query.trim_start_matches('?');
    let Ok(url) = Url::parse(&format!("{PARSE_BASE}/?{query}")) else {
        return DEFAULT_LANDING.to_owned();
    };
    url.query_pairs()
        .find(|(key, _)| key == REDIRECT_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|target| is_safe_target(target) && route_access(target) == RouteAccess::Private)
        .unwrap_or_else(|| DEFAULT_LANDING.to_owned())
}

/// App-relative path only: one leading slash, no scheme-relative `//`, no
/// backslashes that browsers normalize into `//`.
fn is_safe_target(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}
