use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::debug;
use warden_core::{Authentication, constant_time_eq};

use crate::authorization::{AccessDeniedHandler, StatusAccessDeniedHandler};
use crate::csrf::{CsrfTokenRepository, DeferredCsrfToken};
use crate::error::WebError;
use crate::exchange::Exchange;
use crate::filter::{Filter, Next};
use crate::logout::LogoutHandler;
use crate::matcher::{MethodRequestMatcher, NegatedRequestMatcher, OrRequestMatcher, RequestMatcher};

/// Matcher for requests that need CSRF protection: everything except GET,
/// HEAD, TRACE and OPTIONS
pub fn default_requires_protection() -> Arc<dyn RequestMatcher> {
    let safe: Vec<Arc<dyn RequestMatcher>> = [Method::GET, Method::HEAD, Method::TRACE, Method::OPTIONS]
        .into_iter()
        .map(|m| Arc::new(MethodRequestMatcher::new(m)) as Arc<dyn RequestMatcher>)
        .collect();
    Arc::new(NegatedRequestMatcher::new(Arc::new(OrRequestMatcher::new(safe))))
}

/// Exposes the deferred token and verifies it on state-changing requests
pub struct CsrfFilter {
    repository: Arc<dyn CsrfTokenRepository>,
    requires_protection: Arc<dyn RequestMatcher>,
    access_denied: Arc<dyn AccessDeniedHandler>,
}

impl fmt::Debug for CsrfFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfFilter")
            .field("repository", &self.repository)
            .field("requires_protection", &self.requires_protection)
            .finish_non_exhaustive()
    }
}

impl CsrfFilter {
    /// Protect requests using tokens from `repository`
    pub fn new(repository: Arc<dyn CsrfTokenRepository>) -> Self {
        Self {
            repository,
            requires_protection: default_requires_protection(),
            access_denied: Arc::new(StatusAccessDeniedHandler),
        }
    }

    /// Which requests must present a token
    pub fn with_requires_protection(mut self, matcher: Arc<dyn RequestMatcher>) -> Self {
        self.requires_protection = matcher;
        self
    }

    /// Handler for missing or mismatched tokens
    pub fn with_access_denied_handler(mut self, handler: Arc<dyn AccessDeniedHandler>) -> Self {
        self.access_denied = handler;
        self
    }
}

impl Filter for CsrfFilter {
    fn name(&self) -> &'static str {
        "CsrfFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        exchange.set_deferred_csrf_token(DeferredCsrfToken::new(Arc::clone(&self.repository)));
        if !self.requires_protection.matches(&exchange.request) {
            return next.run(exchange);
        }

        let Some(expected) = exchange.csrf_token() else {
            return Err(WebError::internal("CSRF token was not registered on the exchange"));
        };
        let generated = exchange
            .deferred_csrf_token()
            .is_some_and(DeferredCsrfToken::is_generated);
        let actual = exchange
            .request
            .header(expected.header_name.as_str())
            .or_else(|| exchange.request.parameter(&expected.parameter_name));

        match actual {
            Some(actual) if constant_time_eq(actual, &expected.token) => next.run(exchange),
            _ => {
                let reason = if generated {
                    "Could not verify the provided CSRF token because no token was found to compare."
                } else {
                    "Invalid CSRF token found"
                };
                debug!(path = exchange.request.path(), reason, "CSRF check failed");
                self.access_denied.handle(exchange, reason)
            }
        }
    }
}

/// Removes the stored token on logout
#[derive(Debug, Clone)]
pub struct CsrfLogoutHandler {
    repository: Arc<dyn CsrfTokenRepository>,
}

impl CsrfLogoutHandler {
    /// Clear tokens stored in `repository`
    pub fn new(repository: Arc<dyn CsrfTokenRepository>) -> Self {
        Self { repository }
    }
}

impl LogoutHandler for CsrfLogoutHandler {
    fn logout(&self, exchange: &mut Exchange, _authentication: Option<&Authentication>) {
        self.repository
            .save_token(None, &mut exchange.request, &mut exchange.response);
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::csrf::{CsrfToken, SessionCsrfTokenRepository};
    use crate::exchange::{HttpRequest, HttpResponse};

    fn run(filter: &CsrfFilter, exchange: &mut Exchange) -> bool {
        let mut reached = false;
        filter
            .do_filter(
                exchange,
                Next::terminal(&mut |_: &mut Exchange| {
                    reached = true;
                    Ok(())
                }),
            )
            .unwrap();
        reached
    }

    fn with_stored_token(mut request: HttpRequest, repo: &SessionCsrfTokenRepository) -> HttpRequest {
        repo.save_token(Some(&CsrfToken::new("tok")), &mut request, &mut HttpResponse::new());
        request
    }

    #[test]
    fn test_safe_method_not_checked_and_token_not_materialized() {
        let repo = Arc::new(SessionCsrfTokenRepository::new());
        let filter = CsrfFilter::new(repo);
        let mut exchange = Exchange::new(HttpRequest::get("/form"));

        assert!(run(&filter, &mut exchange));
        assert!(exchange.request.session().is_none());
        let deferred = exchange.deferred_csrf_token().unwrap();
        assert!(!deferred.is_resolved());
    }

    #[test]
    fn test_matching_header_passes() {
        let repo = SessionCsrfTokenRepository::new();
        let request = with_stored_token(HttpRequest::post("/transfer"), &repo)
            .with_header(http::header::HeaderName::from_static("x-csrf-token"), "tok");
        let mut exchange = Exchange::new(request);
        assert!(run(&CsrfFilter::new(Arc::new(repo)), &mut exchange));
    }

    #[test]
    fn test_matching_parameter_passes() {
        let repo = SessionCsrfTokenRepository::new();
        let request = with_stored_token(HttpRequest::post("/transfer"), &repo).with_parameter("_csrf", "tok");
        let mut exchange = Exchange::new(request);
        assert!(run(&CsrfFilter::new(Arc::new(repo)), &mut exchange));
    }

    #[test]
    fn test_mismatch_denied() {
        let repo = SessionCsrfTokenRepository::new();
        let request = with_stored_token(HttpRequest::post("/transfer"), &repo).with_parameter("_csrf", "nope");
        let mut exchange = Exchange::new(request);
        assert!(!run(&CsrfFilter::new(Arc::new(repo)), &mut exchange));
        assert_eq!(exchange.response.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_missing_token_denied_and_generated() {
        let repo = Arc::new(SessionCsrfTokenRepository::new());
        let mut exchange = Exchange::new(HttpRequest::post("/transfer"));
        assert!(!run(&CsrfFilter::new(repo.clone()), &mut exchange));
        assert_eq!(exchange.response.status, StatusCode::FORBIDDEN);
        assert!(exchange.deferred_csrf_token().unwrap().is_generated());
        assert!(repo.load_token(&exchange.request).is_some());
    }

    #[test]
    fn test_logout_handler_removes_token() {
        let repo = SessionCsrfTokenRepository::new();
        let request = with_stored_token(HttpRequest::post("/logout"), &repo);
        let repo = Arc::new(repo);
        let mut exchange = Exchange::new(request);
        CsrfLogoutHandler::new(repo.clone()).logout(&mut exchange, None);
        assert!(repo.load_token(&exchange.request).is_none());
    }
}
