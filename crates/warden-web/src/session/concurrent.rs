//! Concurrent session control
//!
//! Admission runs inside the login flow
//! ([`ConcurrentSessionControlStrategy`]); it never invalidates anything
//! itself. Evicted sessions are only *marked* expired in the registry and are
//! reaped by [`ConcurrentSessionFilter`] the next time they are used.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, info};
use warden_core::{
    Authentication, AuthenticationEvent, AuthenticationEventPublisher, ConfigurationError,
    NoopEventPublisher, SessionAuthenticationError,
};

use crate::error::WebError;
use crate::exchange::{Exchange, HttpRequest, HttpResponse};
use crate::filter::{Filter, Next};
use crate::session::strategy::SessionAuthenticationStrategy;
use crate::session::{SessionInformation, SessionRegistry};

/// `maximum_sessions` value meaning "no limit"
pub const UNLIMITED_SESSIONS: i32 = -1;

type SessionLimit = dyn Fn(&Authentication) -> i32 + Send + Sync;

/// Admits or evicts sessions when a principal logs in
///
/// With the limit reached, a login from a session the principal already
/// holds is always admitted. Otherwise the strict policy refuses the login,
/// and the default policy marks the least-recently-used sessions expired
/// until the new one fits.
pub struct ConcurrentSessionControlStrategy {
    registry: Arc<dyn SessionRegistry>,
    maximum_sessions: i32,
    exception_if_maximum_exceeded: bool,
    session_limit: Option<Arc<SessionLimit>>,
}

impl fmt::Debug for ConcurrentSessionControlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentSessionControlStrategy")
            .field("maximum_sessions", &self.maximum_sessions)
            .field("exception_if_maximum_exceeded", &self.exception_if_maximum_exceeded)
            .field("per_principal_limit", &self.session_limit.is_some())
            .finish_non_exhaustive()
    }
}

impl ConcurrentSessionControlStrategy {
    /// Limit each principal to `maximum_sessions` ([`UNLIMITED_SESSIONS`] for no limit)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for `0` or any value
    /// below `-1`.
    pub fn new(registry: Arc<dyn SessionRegistry>, maximum_sessions: i32) -> Result<Self, ConfigurationError> {
        Self::validate(maximum_sessions)?;
        Ok(Self {
            registry,
            maximum_sessions,
            exception_if_maximum_exceeded: false,
            session_limit: None,
        })
    }

    fn validate(maximum_sessions: i32) -> Result<(), ConfigurationError> {
        if maximum_sessions == 0 || maximum_sessions < UNLIMITED_SESSIONS {
            return Err(ConfigurationError::InvalidSetting(format!(
                "maximum_sessions must be positive or -1 (unlimited), got {maximum_sessions}"
            )));
        }
        Ok(())
    }

    /// Refuse new logins over the limit instead of evicting old sessions
    pub fn with_exception_if_maximum_exceeded(mut self, strict: bool) -> Self {
        self.exception_if_maximum_exceeded = strict;
        self
    }

    /// Compute the limit per principal instead of using the fixed maximum
    pub fn with_session_limit<F>(mut self, limit: F) -> Self
    where
        F: Fn(&Authentication) -> i32 + Send + Sync + 'static,
    {
        self.session_limit = Some(Arc::new(limit));
        self
    }

    /// Configured fixed maximum
    pub fn maximum_sessions(&self) -> i32 {
        self.maximum_sessions
    }

    fn maximum_sessions_for(&self, authentication: &Authentication) -> i32 {
        match &self.session_limit {
            Some(limit) => limit(authentication),
            None => self.maximum_sessions,
        }
    }

    fn allowable_sessions_exceeded(
        &self,
        mut sessions: Vec<Arc<SessionInformation>>,
        allowed: i32,
    ) -> Result<(), SessionAuthenticationError> {
        if self.exception_if_maximum_exceeded {
            return Err(SessionAuthenticationError::MaximumSessionsExceeded { allowed });
        }
        // Stable: ties keep the registry's listing order
        sessions.sort_by_key(|info| info.last_request());
        let exceeded_by = sessions.len() - allowed.max(0) as usize + 1;
        for info in sessions.iter().take(exceeded_by) {
            info!(
                principal = info.principal(),
                session_id = info.session_id(),
                "Expiring least recently used session"
            );
            info.expire_now();
        }
        Ok(())
    }
}

impl SessionAuthenticationStrategy for ConcurrentSessionControlStrategy {
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &mut HttpRequest,
        _response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError> {
        let allowed = self.maximum_sessions_for(authentication);
        if allowed == UNLIMITED_SESSIONS {
            return Ok(());
        }

        let sessions = self.registry.all_sessions(authentication.name(), false);
        let count = sessions.len() as i32;
        debug!(principal = authentication.name(), count, allowed, "Checking concurrent sessions");
        if count < allowed {
            return Ok(());
        }
        if count == allowed
            && let Some(current) = request.session_id()
            && sessions.iter().any(|info| info.session_id() == current)
        {
            return Ok(());
        }
        self.allowable_sessions_exceeded(sessions, allowed)
    }
}

/// Responds to a request made with a session that concurrency control expired
pub trait ExpiredSessionStrategy: Send + Sync + fmt::Debug {
    /// Write the response
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn on_expired_session(&self, exchange: &mut Exchange, info: &SessionInformation) -> Result<(), WebError>;
}

/// `401 Unauthorized` with an explanatory body
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusExpiredSessionStrategy;

impl ExpiredSessionStrategy for StatusExpiredSessionStrategy {
    fn on_expired_session(&self, exchange: &mut Exchange, _info: &SessionInformation) -> Result<(), WebError> {
        exchange.response.send_text(
            StatusCode::UNAUTHORIZED,
            "This session has been expired (possibly due to multiple concurrent logins being attempted as the same user).",
        );
        Ok(())
    }
}

/// Redirects to a fixed URL
#[derive(Debug, Clone)]
pub struct RedirectExpiredSessionStrategy {
    target_url: String,
}

impl RedirectExpiredSessionStrategy {
    /// Redirect to `target_url` (relative to the context path)
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }
}

impl ExpiredSessionStrategy for RedirectExpiredSessionStrategy {
    fn on_expired_session(&self, exchange: &mut Exchange, _info: &SessionInformation) -> Result<(), WebError> {
        let location = format!("{}{}", exchange.request.context_path(), self.target_url);
        exchange.response.send_redirect(&location);
        Ok(())
    }
}

/// Reaps sessions marked expired and refreshes live ones
pub struct ConcurrentSessionFilter {
    registry: Arc<dyn SessionRegistry>,
    expired: Arc<dyn ExpiredSessionStrategy>,
    publisher: Arc<dyn AuthenticationEventPublisher>,
}

impl fmt::Debug for ConcurrentSessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentSessionFilter")
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl ConcurrentSessionFilter {
    /// Reap sessions tracked in `registry`
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self {
            registry,
            expired: Arc::new(StatusExpiredSessionStrategy),
            publisher: Arc::new(NoopEventPublisher),
        }
    }

    /// Response strategy for expired sessions
    pub fn with_expired_session_strategy(mut self, strategy: Arc<dyn ExpiredSessionStrategy>) -> Self {
        self.expired = strategy;
        self
    }

    /// Publisher for session-expired events
    pub fn with_event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }
}

impl Filter for ConcurrentSessionFilter {
    fn name(&self) -> &'static str {
        "ConcurrentSessionFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        let Some(session_id) = exchange.request.session_id() else {
            return next.run(exchange);
        };
        let Some(info) = self.registry.session_information(&session_id) else {
            return next.run(exchange);
        };

        if !info.is_expired() {
            info.refresh_last_request();
            return next.run(exchange);
        }

        info!(principal = info.principal(), session_id = %session_id, "Reaping expired session");
        self.registry.remove_session_information(&session_id);
        exchange.request.invalidate_session();
        exchange.security.clear();
        self.publisher.publish(&AuthenticationEvent::SessionExpired {
            principal: info.principal().to_string(),
            session_id,
        });
        self.expired.on_expired_session(exchange, &info)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use warden_core::AuthenticationKind;

    use super::*;
    use crate::session::{HttpSession, InMemorySessionRegistry};

    fn alice() -> Authentication {
        Authentication::builder(AuthenticationKind::UsernamePassword)
            .principal("alice")
            .authenticated(true)
            .build()
            .unwrap()
    }

    fn registry_with(sessions: &[(&str, u64)]) -> Arc<InMemorySessionRegistry> {
        let registry = Arc::new(InMemorySessionRegistry::new());
        for (id, secs) in sessions {
            registry.register(SessionInformation::new(
                "alice",
                *id,
                UNIX_EPOCH + Duration::from_secs(*secs),
            ));
        }
        registry
    }

    fn login(strategy: &ConcurrentSessionControlStrategy, request: &mut HttpRequest) -> Result<(), SessionAuthenticationError> {
        strategy.on_authentication(&alice(), request, &mut HttpResponse::new())
    }

    #[test]
    fn test_invalid_maximum_rejected() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        assert!(ConcurrentSessionControlStrategy::new(registry.clone(), 0).is_err());
        assert!(ConcurrentSessionControlStrategy::new(registry.clone(), -2).is_err());
        assert!(ConcurrentSessionControlStrategy::new(registry, UNLIMITED_SESSIONS).is_ok());
    }

    #[test]
    fn test_under_limit_admitted() {
        let registry = registry_with(&[("s1", 1)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 2).unwrap();
        login(&strategy, &mut HttpRequest::post("/login")).unwrap();
        assert!(!registry.session_information("s1").unwrap().is_expired());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let registry = registry_with(&[("s2", 20), ("s1", 10)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 2).unwrap();
        login(&strategy, &mut HttpRequest::post("/login")).unwrap();

        assert!(registry.session_information("s1").unwrap().is_expired());
        assert!(!registry.session_information("s2").unwrap().is_expired());
    }

    #[test]
    fn test_existing_session_admitted_at_limit() {
        let registry = registry_with(&[("s1", 10), ("s2", 20)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 2)
            .unwrap()
            .with_exception_if_maximum_exceeded(true);
        let mut request = HttpRequest::post("/login").with_session(Arc::new(HttpSession::with_id("s2")));
        login(&strategy, &mut request).unwrap();
        assert!(registry.all_sessions("alice", false).len() == 2);
    }

    #[test]
    fn test_strict_mode_refuses() {
        let registry = registry_with(&[("s1", 10)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 1)
            .unwrap()
            .with_exception_if_maximum_exceeded(true);
        let err = login(&strategy, &mut HttpRequest::post("/login")).unwrap_err();
        assert_eq!(err, SessionAuthenticationError::MaximumSessionsExceeded { allowed: 1 });
        assert!(!registry.session_information("s1").unwrap().is_expired());
    }

    #[test]
    fn test_per_principal_limit() {
        let registry = registry_with(&[("s1", 10), ("s2", 20), ("s3", 30)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 1)
            .unwrap()
            .with_session_limit(|auth| if auth.name() == "alice" { 3 } else { 1 });
        login(&strategy, &mut HttpRequest::post("/login")).unwrap();

        let expired: Vec<_> = registry
            .all_sessions("alice", true)
            .into_iter()
            .filter(|s| s.is_expired())
            .map(|s| s.session_id().to_string())
            .collect();
        assert_eq!(expired, vec!["s1".to_string()]);
    }

    #[test]
    fn test_over_limit_evicts_enough() {
        let registry = registry_with(&[("s1", 10), ("s2", 20), ("s3", 30)]);
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 1).unwrap();
        login(&strategy, &mut HttpRequest::post("/login")).unwrap();
        assert_eq!(registry.all_sessions("alice", false).len(), 0);
    }

    #[test]
    fn test_reap_expired_session() {
        let registry = registry_with(&[("s1", 10)]);
        registry.session_information("s1").unwrap().expire_now();
        let filter = ConcurrentSessionFilter::new(registry.clone());

        let session = Arc::new(HttpSession::with_id("s1"));
        let mut exchange = Exchange::new(HttpRequest::get("/").with_session(session.clone()));
        exchange.security.set_authentication(alice());
        let mut reached = false;
        filter
            .do_filter(
                &mut exchange,
                Next::terminal(&mut |_: &mut Exchange| {
                    reached = true;
                    Ok(())
                }),
            )
            .unwrap();

        assert!(!reached);
        assert!(!session.is_valid());
        assert!(registry.session_information("s1").is_none());
        assert!(exchange.security.authentication.is_none());
        assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_live_session_refreshed() {
        let registry = registry_with(&[("s1", 10)]);
        let filter = ConcurrentSessionFilter::new(registry.clone());
        let mut exchange =
            Exchange::new(HttpRequest::get("/").with_session(Arc::new(HttpSession::with_id("s1"))));
        filter
            .do_filter(&mut exchange, Next::terminal(&mut |_: &mut Exchange| Ok(())))
            .unwrap();
        let info = registry.session_information("s1").unwrap();
        assert!(info.last_request() > UNIX_EPOCH + Duration::from_secs(10));
    }
}
