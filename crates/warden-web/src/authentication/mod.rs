//! Authentication processing
//!
//! [`AuthenticationProcessingFilter`] is the one state machine behind every
//! credential-carrying flow (form login, HTTP Basic, bearer tokens). What
//! varies between flows is only the trigger matcher, the
//! [`AuthenticationAttempt`] that turns a request into an authentication, and
//! the handlers.
//!
//! ```text
//! trigger? ──no──► next stage                         (NotApplicable)
//!    │yes
//!    ▼
//! attempt ──Ok(None)──► stop, nothing committed        (Incomplete)
//!    │ Ok(auth)                 │ Err(e)
//!    ▼                          ▼
//! session strategy ──veto──► clear context, remember-me fail,
//!    │                        failure handler          (Failure)
//!    ▼
//! [next stage if continue-before-success]
//! set context → save context → remember-me success →
//! publish → success handler [→ next stage]             (Success)
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};
use warden_core::{
    Authentication, AuthenticationError, AuthenticationEvent, AuthenticationEventPublisher,
    AuthenticationManager, NoopEventPublisher,
};

use crate::context::{NullSecurityContextRepository, SecurityContextRepository};
use crate::error::WebError;
use crate::exchange::Exchange;
use crate::filter::{Filter, Next};
use crate::matcher::RequestMatcher;
use crate::session::{NullSessionStrategy, SessionAuthenticationStrategy};

mod basic;
mod bearer;
mod form;
mod handler;
mod remember_me;

pub use basic::{BasicAuthenticationMatcher, HttpBasicAttempt};
pub use bearer::{
    BearerTokenAttempt, BearerTokenFailureHandler, BearerTokenPresentMatcher, BearerTokenResolver,
};
pub use form::{DEFAULT_PASSWORD_PARAMETER, DEFAULT_USERNAME_PARAMETER, UsernamePasswordAttempt};
pub use handler::{
    AUTHENTICATION_ERROR_ATTRIBUTE, AuthenticationFailureHandler, AuthenticationSuccessHandler,
    NoopSuccessHandler, RedirectFailureHandler, RedirectSuccessHandler, StatusFailureHandler,
};
pub use remember_me::{NullRememberMeServices, RememberMeServices};

/// Turns a triggering request into an authentication
pub trait AuthenticationAttempt: Send + Sync + fmt::Debug {
    /// Attempt authentication
    ///
    /// `Ok(None)` means the flow is not finished (e.g. a multi-step login);
    /// nothing is committed and the chain stops.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthenticationError`] that rejected the request.
    fn attempt(
        &self,
        exchange: &mut Exchange,
        manager: &dyn AuthenticationManager,
    ) -> Result<Option<Authentication>, AuthenticationError>;
}

/// How one pass through the processing stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The trigger did not match; the request moved on untouched
    NotApplicable,
    /// The attempt needs more steps; nothing was committed
    Incomplete,
    /// The authentication was committed
    Success,
    /// The request was rejected and the failure handler ran
    Failure,
}

/// Generic authentication processing stage
pub struct AuthenticationProcessingFilter {
    name: &'static str,
    trigger: Arc<dyn RequestMatcher>,
    attempt: Arc<dyn AuthenticationAttempt>,
    manager: Arc<dyn AuthenticationManager>,
    session_strategy: Arc<dyn SessionAuthenticationStrategy>,
    context_repository: Arc<dyn SecurityContextRepository>,
    remember_me: Arc<dyn RememberMeServices>,
    publisher: Arc<dyn AuthenticationEventPublisher>,
    success_handler: Arc<dyn AuthenticationSuccessHandler>,
    failure_handler: Arc<dyn AuthenticationFailureHandler>,
    continue_chain_before_success: bool,
    proceed_after_success: bool,
}

impl fmt::Debug for AuthenticationProcessingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationProcessingFilter")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("attempt", &self.attempt)
            .field("session_strategy", &self.session_strategy)
            .field("context_repository", &self.context_repository)
            .field("continue_chain_before_success", &self.continue_chain_before_success)
            .field("proceed_after_success", &self.proceed_after_success)
            .finish_non_exhaustive()
    }
}

impl AuthenticationProcessingFilter {
    /// Stage named `name` running `attempt` on requests accepted by `trigger`
    ///
    /// Defaults: no session work, no context persistence, no remember-me, no
    /// events, no-op success handler, `401` failure handler.
    pub fn new(
        name: &'static str,
        trigger: Arc<dyn RequestMatcher>,
        attempt: Arc<dyn AuthenticationAttempt>,
        manager: Arc<dyn AuthenticationManager>,
    ) -> Self {
        Self {
            name,
            trigger,
            attempt,
            manager,
            session_strategy: Arc::new(NullSessionStrategy),
            context_repository: Arc::new(NullSecurityContextRepository),
            remember_me: Arc::new(NullRememberMeServices),
            publisher: Arc::new(NoopEventPublisher),
            success_handler: Arc::new(NoopSuccessHandler),
            failure_handler: Arc::new(StatusFailureHandler::unauthorized()),
            continue_chain_before_success: false,
            proceed_after_success: false,
        }
    }

    /// Session work run before the context is committed
    pub fn with_session_strategy(mut self, strategy: Arc<dyn SessionAuthenticationStrategy>) -> Self {
        self.session_strategy = strategy;
        self
    }

    /// Where the committed context is persisted
    pub fn with_context_repository(mut self, repository: Arc<dyn SecurityContextRepository>) -> Self {
        self.context_repository = repository;
        self
    }

    /// Remember-me hooks
    pub fn with_remember_me(mut self, services: Arc<dyn RememberMeServices>) -> Self {
        self.remember_me = services;
        self
    }

    /// Publisher for interactive-success events
    pub fn with_event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Handler run after a committed authentication
    pub fn with_success_handler(mut self, handler: Arc<dyn AuthenticationSuccessHandler>) -> Self {
        self.success_handler = handler;
        self
    }

    /// Handler run after a rejected authentication
    pub fn with_failure_handler(mut self, handler: Arc<dyn AuthenticationFailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    /// Run the rest of the chain before committing the authentication
    pub fn with_continue_chain_before_success(mut self, continue_chain: bool) -> Self {
        self.continue_chain_before_success = continue_chain;
        self
    }

    /// Run the rest of the chain after the success handler
    ///
    /// Used by flows that authenticate on every request (Basic, bearer).
    /// Ignored when the chain already ran before success.
    pub fn with_proceed_after_success(mut self, proceed: bool) -> Self {
        self.proceed_after_success = proceed;
        self
    }

    /// The trigger matcher
    pub fn trigger(&self) -> &Arc<dyn RequestMatcher> {
        &self.trigger
    }

    /// Drive the state machine for one request
    ///
    /// # Errors
    ///
    /// Propagates [`WebError`]s from handlers and downstream stages.
    pub fn process(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<ProcessingOutcome, WebError> {
        if !self.trigger.matches(&exchange.request) {
            next.run(exchange)?;
            return Ok(ProcessingOutcome::NotApplicable);
        }

        let authentication = match self.attempt.attempt(exchange, self.manager.as_ref()) {
            Ok(Some(authentication)) => authentication,
            Ok(None) => {
                debug!(filter = self.name, "Authentication attempt incomplete");
                return Ok(ProcessingOutcome::Incomplete);
            }
            Err(e) => {
                self.unsuccessful_authentication(exchange, &e)?;
                return Ok(ProcessingOutcome::Failure);
            }
        };

        if let Err(e) = self.session_strategy.on_authentication(
            &authentication,
            &mut exchange.request,
            &mut exchange.response,
        ) {
            self.unsuccessful_authentication(exchange, &AuthenticationError::Session(e))?;
            return Ok(ProcessingOutcome::Failure);
        }

        if self.continue_chain_before_success {
            next.run(exchange)?;
            self.successful_authentication(exchange, authentication)?;
        } else {
            self.successful_authentication(exchange, authentication)?;
            if self.proceed_after_success && !exchange.response.is_committed() {
                next.run(exchange)?;
            }
        }
        Ok(ProcessingOutcome::Success)
    }

    fn successful_authentication(
        &self,
        exchange: &mut Exchange,
        authentication: Authentication,
    ) -> Result<(), WebError> {
        exchange.security.set_authentication(authentication.clone());
        self.context_repository
            .save(&exchange.security, &mut exchange.request, &mut exchange.response);
        self.remember_me.login_success(exchange, &authentication);
        self.publisher
            .publish(&AuthenticationEvent::interactive_success(&authentication));
        info!(
            filter = self.name,
            principal = authentication.name(),
            kind = ?authentication.kind,
            "Authentication succeeded"
        );
        self.success_handler
            .on_authentication_success(exchange, &authentication)
    }

    fn unsuccessful_authentication(
        &self,
        exchange: &mut Exchange,
        failure: &AuthenticationError,
    ) -> Result<(), WebError> {
        exchange.security.clear();
        if failure.is_internal() {
            error!(filter = self.name, error = %failure, "Authentication service failed");
        } else {
            debug!(filter = self.name, code = failure.code(), error = %failure, "Authentication failed");
        }
        self.remember_me.login_fail(exchange);
        self.failure_handler.on_authentication_failure(exchange, failure)
    }
}

impl Filter for AuthenticationProcessingFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        let outcome = self.process(exchange, next)?;
        debug!(filter = self.name, ?outcome, "Authentication processing finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use parking_lot::Mutex;
    use warden_core::{
        AuthenticationKind, ConfigurationError, InMemoryUserDetailsService, ProviderManager,
        SessionAuthenticationError, UserDetails,
    };

    use super::*;
    use crate::context::HttpSessionSecurityContextRepository;
    use crate::exchange::{HttpRequest, HttpResponse};
    use crate::matcher::PathPatternRequestMatcher;
    use crate::session::{
        ConcurrentSessionControlStrategy, HttpSession, InMemorySessionRegistry, SessionRegistry,
    };

    fn manager() -> Arc<dyn AuthenticationManager> {
        let users = InMemoryUserDetailsService::new();
        users.create_user(
            UserDetails::with_username("alice")
                .password("{noop}secret")
                .roles(&["USER"])
                .build(),
        );
        let dao: Arc<dyn warden_core::AuthenticationProvider> =
            Arc::new(warden_core::DaoAuthenticationProvider::new(Arc::new(users)));
        Arc::new(ProviderManager::new(vec![dao]))
    }

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<AuthenticationEvent>>,
    }

    impl AuthenticationEventPublisher for RecordingPublisher {
        fn publish(&self, event: &AuthenticationEvent) {
            self.events.lock().push(event.clone());
        }
    }

    /// Always reports an unfinished multi-step login
    #[derive(Debug)]
    struct PendingAttempt;

    impl AuthenticationAttempt for PendingAttempt {
        fn attempt(
            &self,
            _exchange: &mut Exchange,
            _manager: &dyn AuthenticationManager,
        ) -> Result<Option<Authentication>, AuthenticationError> {
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct Veto;

    impl SessionAuthenticationStrategy for Veto {
        fn on_authentication(
            &self,
            _authentication: &Authentication,
            _request: &mut HttpRequest,
            _response: &mut HttpResponse,
        ) -> Result<(), SessionAuthenticationError> {
            Err(SessionAuthenticationError::MaximumSessionsExceeded { allowed: 1 })
        }
    }

    fn form_filter() -> AuthenticationProcessingFilter {
        AuthenticationProcessingFilter::new(
            "UsernamePasswordAuthenticationFilter",
            Arc::new(PathPatternRequestMatcher::with_method(http::Method::POST, "/login")),
            Arc::new(UsernamePasswordAttempt::default()),
            manager(),
        )
        .with_context_repository(Arc::new(HttpSessionSecurityContextRepository::new()))
        .with_success_handler(Arc::new(RedirectSuccessHandler::new("/home")))
        .with_failure_handler(Arc::new(RedirectFailureHandler::new("/login?error")))
    }

    fn login(username: &str, password: &str) -> HttpRequest {
        HttpRequest::post("/login")
            .with_parameter("username", username)
            .with_parameter("password", password)
    }

    fn process(
        filter: &AuthenticationProcessingFilter,
        exchange: &mut Exchange,
    ) -> (ProcessingOutcome, bool) {
        let mut reached = false;
        let outcome = filter
            .process(
                exchange,
                Next::terminal(&mut |_: &mut Exchange| {
                    reached = true;
                    Ok(())
                }),
            )
            .unwrap();
        (outcome, reached)
    }

    #[test]
    fn test_not_applicable_passes_through() {
        let mut exchange = Exchange::new(HttpRequest::get("/home"));
        let (outcome, reached) = process(&form_filter(), &mut exchange);
        assert_eq!(outcome, ProcessingOutcome::NotApplicable);
        assert!(reached);
    }

    #[test]
    fn test_success_commits_context_and_redirects() {
        let publisher = Arc::new(RecordingPublisher::default());
        let filter = form_filter().with_event_publisher(publisher.clone());
        let mut exchange = Exchange::new(login("alice", "secret"));
        let (outcome, reached) = process(&filter, &mut exchange);

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert!(!reached);
        assert_eq!(exchange.security.principal(), Some("alice"));
        assert!(exchange.request.session().is_some());
        assert_eq!(exchange.response.status, StatusCode::FOUND);
        assert_eq!(
            *publisher.events.lock(),
            vec![AuthenticationEvent::InteractiveAuthenticationSuccess {
                principal: "alice".into(),
                kind: AuthenticationKind::UsernamePassword,
            }]
        );
    }

    #[test]
    fn test_failure_clears_context_and_redirects() {
        let mut exchange = Exchange::new(login("alice", "wrong"));
        exchange.security.set_authentication(Authentication::anonymous());
        let (outcome, reached) = process(&form_filter(), &mut exchange);

        assert_eq!(outcome, ProcessingOutcome::Failure);
        assert!(!reached);
        assert!(exchange.security.authentication.is_none());
        assert_eq!(
            exchange.response.headers.get(http::header::LOCATION).unwrap(),
            "/login?error"
        );
    }

    #[test]
    fn test_incomplete_commits_nothing() {
        let filter = AuthenticationProcessingFilter::new(
            "PendingFilter",
            Arc::new(PathPatternRequestMatcher::new("/mfa")),
            Arc::new(PendingAttempt),
            manager(),
        )
        .with_context_repository(Arc::new(HttpSessionSecurityContextRepository::new()));

        for _ in 0..2 {
            let mut exchange = Exchange::new(HttpRequest::post("/mfa"));
            let (outcome, reached) = process(&filter, &mut exchange);
            assert_eq!(outcome, ProcessingOutcome::Incomplete);
            assert!(!reached);
            assert!(exchange.security.authentication.is_none());
            assert!(exchange.request.session().is_none());
            assert!(!exchange.response.is_committed());
        }
    }

    #[test]
    fn test_session_veto_becomes_failure() {
        let filter = form_filter()
            .with_session_strategy(Arc::new(Veto))
            .with_failure_handler(Arc::new(StatusFailureHandler::unauthorized()));
        let mut exchange = Exchange::new(login("alice", "secret"));
        let (outcome, _) = process(&filter, &mut exchange);

        assert_eq!(outcome, ProcessingOutcome::Failure);
        assert!(exchange.security.authentication.is_none());
        assert!(exchange.request.session().is_none());
        assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_continue_chain_before_success() {
        let filter = form_filter().with_continue_chain_before_success(true);
        let mut exchange = Exchange::new(login("alice", "secret"));
        let mut principal_downstream = Some(String::new());
        let outcome = filter
            .process(
                &mut exchange,
                Next::terminal(&mut |ex: &mut Exchange| {
                    principal_downstream = ex.security.principal().map(String::from);
                    Ok(())
                }),
            )
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert_eq!(principal_downstream, None);
        assert_eq!(exchange.security.principal(), Some("alice"));
    }

    #[test]
    fn test_strict_concurrency_rejects_second_login() -> Result<(), ConfigurationError> {
        let registry: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionRegistry::new());
        registry.register_new_session("existing", "alice");
        let strategy = ConcurrentSessionControlStrategy::new(registry.clone(), 1)?
            .with_exception_if_maximum_exceeded(true);
        let filter = form_filter()
            .with_session_strategy(Arc::new(strategy))
            .with_failure_handler(Arc::new(StatusFailureHandler::unauthorized()));

        let request = login("alice", "secret").with_session(Arc::new(HttpSession::with_id("other")));
        let mut exchange = Exchange::new(request);
        let (outcome, _) = process(&filter, &mut exchange);

        assert_eq!(outcome, ProcessingOutcome::Failure);
        assert_eq!(registry.all_sessions("alice", false).len(), 1);
        Ok(())
    }
}
