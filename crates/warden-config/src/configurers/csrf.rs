use std::sync::Arc;

use warden_core::ConfigurationError;
use warden_web::authorization::AccessDeniedHandler;
use warden_web::csrf::{CsrfFilter, CsrfTokenRepository, SessionCsrfTokenRepository, default_requires_protection};
use warden_web::matcher::{AndRequestMatcher, NegatedRequestMatcher, OrRequestMatcher, RequestMatcher};

use crate::configurer::Configurer;
use crate::http::HttpSecurity;
use crate::lifecycle::SecurityBuilder;

/// Synchronizer-token CSRF protection
///
/// State-changing requests must echo the token stored for the session.
/// Requests accepted by an ignoring matcher are exempt; the bearer token
/// configurer registers one for token-carrying requests.
#[derive(Debug)]
pub struct CsrfConfigurer {
    repository: Arc<dyn CsrfTokenRepository>,
    requires_protection: Arc<dyn RequestMatcher>,
    ignoring: Vec<Arc<dyn RequestMatcher>>,
    access_denied: Option<Arc<dyn AccessDeniedHandler>>,
}

impl Default for CsrfConfigurer {
    fn default() -> Self {
        Self {
            repository: Arc::new(SessionCsrfTokenRepository::new()),
            requires_protection: default_requires_protection(),
            ignoring: Vec::new(),
            access_denied: None,
        }
    }
}

impl CsrfConfigurer {
    /// Where tokens are stored
    pub fn token_repository(&mut self, repository: Arc<dyn CsrfTokenRepository>) -> &mut Self {
        self.repository = repository;
        self
    }

    /// Which requests need a token (default: every method but GET, HEAD, TRACE, OPTIONS)
    pub fn require_protection_matcher(&mut self, matcher: Arc<dyn RequestMatcher>) -> &mut Self {
        self.requires_protection = matcher;
        self
    }

    /// Exempt requests accepted by `matcher`
    pub fn ignoring_request_matcher(&mut self, matcher: Arc<dyn RequestMatcher>) -> &mut Self {
        self.ignoring.push(matcher);
        self
    }

    /// Handler for missing or mismatched tokens; the chain's handler otherwise
    pub fn access_denied_handler(&mut self, handler: Arc<dyn AccessDeniedHandler>) -> &mut Self {
        self.access_denied = Some(handler);
        self
    }

    fn protection_matcher(&self) -> Arc<dyn RequestMatcher> {
        if self.ignoring.is_empty() {
            return Arc::clone(&self.requires_protection);
        }
        let ignored: Arc<dyn RequestMatcher> = Arc::new(OrRequestMatcher::new(self.ignoring.clone()));
        Arc::new(AndRequestMatcher::new(vec![
            Arc::clone(&self.requires_protection),
            Arc::new(NegatedRequestMatcher::new(ignored)),
        ]))
    }
}

impl Configurer<HttpSecurity> for CsrfConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        http.set_shared_object(Arc::clone(&self.repository));
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let mut filter = CsrfFilter::new(Arc::clone(&self.repository)).with_requires_protection(self.protection_matcher());
        let denied = self
            .access_denied
            .clone()
            .or_else(|| http.shared::<Arc<dyn AccessDeniedHandler>>());
        if let Some(handler) = denied {
            filter = filter.with_access_denied_handler(handler);
        }
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
