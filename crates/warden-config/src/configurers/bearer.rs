use std::sync::Arc;

use warden_core::{AuthenticationManager, ConfigurationError};
use warden_web::authentication::{
    AuthenticationProcessingFilter, BearerTokenAttempt, BearerTokenFailureHandler, BearerTokenPresentMatcher,
    BearerTokenResolver,
};
use warden_web::authorization::{AuthenticationEntryPoint, Http401EntryPoint};
use warden_web::context::RequestAttributeSecurityContextRepository;

use crate::configurer::Configurer;
use crate::configurers::{CsrfConfigurer, event_publisher};
use crate::http::{BEARER_TOKEN_FILTER, HttpSecurity};
use crate::lifecycle::SecurityBuilder;

/// RFC 6750 bearer token authentication
///
/// Only requests presenting a token are processed. Those requests are exempt
/// from CSRF checks, and the resulting context lives on the request only.
#[derive(Debug, Clone, Default)]
pub struct BearerTokenConfigurer {
    resolver: BearerTokenResolver,
    realm: Option<String>,
}

impl BearerTokenConfigurer {
    /// How tokens are located in requests
    pub fn resolver(&mut self, resolver: BearerTokenResolver) -> &mut Self {
        self.resolver = resolver;
        self
    }

    /// Realm named in challenges
    pub fn realm(&mut self, realm: impl Into<String>) -> &mut Self {
        self.realm = Some(realm.into());
        self
    }

    fn failure_handler(&self) -> BearerTokenFailureHandler {
        self.realm
            .as_ref()
            .map(BearerTokenFailureHandler::with_realm)
            .unwrap_or_default()
    }
}

impl Configurer<HttpSecurity> for BearerTokenConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if http.shared_object::<Arc<dyn AuthenticationEntryPoint>>().is_none() {
            let challenge = match &self.realm {
                Some(realm) => format!("Bearer realm=\"{realm}\""),
                None => "Bearer".to_string(),
            };
            let entry_point: Arc<dyn AuthenticationEntryPoint> = Arc::new(Http401EntryPoint::with_challenge(challenge));
            http.set_shared_object(entry_point);
        }
        if let Some(csrf) = http.lifecycle_mut().configurer_mut::<CsrfConfigurer>()? {
            csrf.ignoring_request_matcher(Arc::new(BearerTokenPresentMatcher::new(self.resolver.clone())));
        }
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let manager = http.require_shared::<Arc<dyn AuthenticationManager>>()?;
        let filter = AuthenticationProcessingFilter::new(
            BEARER_TOKEN_FILTER,
            Arc::new(BearerTokenPresentMatcher::new(self.resolver.clone())),
            Arc::new(BearerTokenAttempt::new(self.resolver.clone())),
            manager,
        )
        .with_context_repository(Arc::new(RequestAttributeSecurityContextRepository))
        .with_event_publisher(event_publisher(http))
        .with_failure_handler(Arc::new(self.failure_handler()))
        .with_proceed_after_success(true);
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
