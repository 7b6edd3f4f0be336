//! Configurers for [`HttpSecurity`]
//!
//! Each configurer owns one concern. During `init` it publishes shared
//! objects and pulls in the configurers it depends on; during `configure` it
//! reads what the others published and contributes its filter.
//!
//! | Configurer | Publishes | Contributes |
//! |---|---|---|
//! | [`SecurityContextConfigurer`] | context repository | `SecurityContextHolderFilter` |
//! | [`CsrfConfigurer`] | CSRF token repository | `CsrfFilter` |
//! | [`LogoutConfigurer`] | | `LogoutFilter` |
//! | [`FormLoginConfigurer`] | login entry point | `UsernamePasswordAuthenticationFilter` |
//! | [`SessionManagementConfigurer`] | session strategy, registry | `ConcurrentSessionFilter` |
//! | [`BearerTokenConfigurer`] | `401 Bearer` entry point | `BearerTokenAuthenticationFilter` |
//! | [`HttpBasicConfigurer`] | `401 Basic` entry point | `BasicAuthenticationFilter` |
//! | [`AnonymousConfigurer`] | | `AnonymousAuthenticationFilter` |
//! | [`AuthorizeRequestsConfigurer`] | | `AuthorizationFilter` |

use std::sync::Arc;

use warden_core::{AuthenticationEventPublisher, ConfigurationError, NoopEventPublisher};
use warden_web::context::{HttpSessionSecurityContextRepository, SecurityContextRepository};
use warden_web::matcher::{ExactUrlRequestMatcher, RequestMatcher};

use crate::http::HttpSecurity;
use crate::lifecycle::SecurityBuilder;

mod anonymous;
mod authorize;
mod bearer;
mod csrf;
mod form_login;
mod http_basic;
mod logout;
mod security_context;
mod session;

pub use anonymous::AnonymousConfigurer;
pub use authorize::AuthorizeRequestsConfigurer;
pub use bearer::BearerTokenConfigurer;
pub use csrf::CsrfConfigurer;
pub use form_login::FormLoginConfigurer;
pub use http_basic::HttpBasicConfigurer;
pub use logout::LogoutConfigurer;
pub use security_context::SecurityContextConfigurer;
pub use session::{SessionFixation, SessionManagementConfigurer};

fn event_publisher(http: &HttpSecurity) -> Arc<dyn AuthenticationEventPublisher> {
    http.shared::<Arc<dyn AuthenticationEventPublisher>>()
        .unwrap_or_else(|| Arc::new(NoopEventPublisher))
}

fn context_repository(http: &HttpSecurity) -> Arc<dyn SecurityContextRepository> {
    http.shared::<Arc<dyn SecurityContextRepository>>()
        .unwrap_or_else(|| Arc::new(HttpSessionSecurityContextRepository::new()))
}

/// Grant everyone access to `urls`, which must be matched exactly
fn permit_all<'a>(
    http: &mut HttpSecurity,
    owner: &str,
    urls: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigurationError> {
    let Some(authorize) = http.lifecycle_mut().configurer_mut::<AuthorizeRequestsConfigurer>()? else {
        return Err(ConfigurationError::InvalidSetting(format!(
            "{owner} permit_all only works together with authorize_requests"
        )));
    };
    for url in urls {
        // Query strings are part of the match for failure and logout targets
        let matcher: Arc<dyn RequestMatcher> = Arc::new(ExactUrlRequestMatcher::new(url));
        authorize.permit(matcher);
    }
    Ok(())
}
