use std::sync::Arc;

use warden_core::{ANONYMOUS_AUTHORITY, ANONYMOUS_PRINCIPAL, ConfigurationError, GrantedAuthority, authority_list};
use warden_web::anonymous::AnonymousAuthenticationFilter;

use crate::configurer::Configurer;
use crate::http::HttpSecurity;

/// Installs an anonymous authentication for requests nobody logged in to
#[derive(Debug, Clone)]
pub struct AnonymousConfigurer {
    principal: String,
    authorities: Vec<GrantedAuthority>,
}

impl Default for AnonymousConfigurer {
    fn default() -> Self {
        Self {
            principal: ANONYMOUS_PRINCIPAL.to_string(),
            authorities: authority_list(&[ANONYMOUS_AUTHORITY]),
        }
    }
}

impl AnonymousConfigurer {
    /// Principal name of the anonymous authentication
    pub fn principal(&mut self, principal: impl Into<String>) -> &mut Self {
        self.principal = principal.into();
        self
    }

    /// Authorities of the anonymous authentication
    pub fn authorities(&mut self, authorities: &[&str]) -> &mut Self {
        self.authorities = authority_list(authorities);
        self
    }
}

impl Configurer<HttpSecurity> for AnonymousConfigurer {
    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let filter = AnonymousAuthenticationFilter::new(self.principal.clone(), self.authorities.clone());
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
