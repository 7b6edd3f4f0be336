use std::sync::Arc;

use warden_core::{AuthenticationManager, ConfigurationError};
use warden_web::authentication::{
    AuthenticationProcessingFilter, BasicAuthenticationMatcher, HttpBasicAttempt, StatusFailureHandler,
};
use warden_web::authorization::{AuthenticationEntryPoint, Http401EntryPoint};
use warden_web::context::{RequestAttributeSecurityContextRepository, SecurityContextRepository};

use crate::configurer::Configurer;
use crate::configurers::event_publisher;
use crate::http::{BASIC_FILTER, HttpSecurity};
use crate::lifecycle::SecurityBuilder;

/// `Authorization: Basic` authentication
///
/// Successful requests continue down the chain. The context is kept on the
/// request unless the chain persists contexts elsewhere.
#[derive(Debug, Clone)]
pub struct HttpBasicConfigurer {
    realm: String,
}

impl Default for HttpBasicConfigurer {
    fn default() -> Self {
        Self {
            realm: "Realm".to_string(),
        }
    }
}

impl HttpBasicConfigurer {
    /// Realm named in the challenge
    pub fn realm(&mut self, realm: impl Into<String>) -> &mut Self {
        self.realm = realm.into();
        self
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}

impl Configurer<HttpSecurity> for HttpBasicConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if http.shared_object::<Arc<dyn AuthenticationEntryPoint>>().is_none() {
            let entry_point: Arc<dyn AuthenticationEntryPoint> = Arc::new(Http401EntryPoint::with_challenge(self.challenge()));
            http.set_shared_object(entry_point);
        }
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let manager = http.require_shared::<Arc<dyn AuthenticationManager>>()?;
        let repository = http
            .shared::<Arc<dyn SecurityContextRepository>>()
            .unwrap_or_else(|| Arc::new(RequestAttributeSecurityContextRepository));
        let filter = AuthenticationProcessingFilter::new(
            BASIC_FILTER,
            Arc::new(BasicAuthenticationMatcher),
            Arc::new(HttpBasicAttempt),
            manager,
        )
        .with_context_repository(repository)
        .with_event_publisher(event_publisher(http))
        .with_failure_handler(Arc::new(StatusFailureHandler::unauthorized().with_challenge(self.challenge())))
        .with_proceed_after_success(true);
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
