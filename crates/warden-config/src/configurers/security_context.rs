use std::sync::Arc;

use warden_core::ConfigurationError;
use warden_web::context::{SecurityContextHolderFilter, SecurityContextRepository};

use crate::configurer::Configurer;
use crate::configurers::context_repository;
use crate::http::HttpSecurity;
use crate::lifecycle::SecurityBuilder;

/// Loads the context at the start of the chain
///
/// Publishes the repository (session-backed unless one is set) so the
/// authentication and logout stages persist to the same place.
#[derive(Debug, Default)]
pub struct SecurityContextConfigurer {
    repository: Option<Arc<dyn SecurityContextRepository>>,
}

impl SecurityContextConfigurer {
    /// Store contexts in `repository`
    pub fn repository(&mut self, repository: Arc<dyn SecurityContextRepository>) -> &mut Self {
        self.repository = Some(repository);
        self
    }
}

impl Configurer<HttpSecurity> for SecurityContextConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let repository = match &self.repository {
            Some(repository) => Arc::clone(repository),
            None => context_repository(http),
        };
        http.set_shared_object(repository);
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let repository = http.require_shared::<Arc<dyn SecurityContextRepository>>()?;
        http.add_filter(Arc::new(SecurityContextHolderFilter::new(repository)))?;
        Ok(())
    }
}
