use std::sync::Arc;

use http::Method;
use warden_core::ConfigurationError;
use warden_web::csrf::{CsrfLogoutHandler, CsrfTokenRepository};
use warden_web::logout::{
    CookieClearingLogoutHandler, LogoutFilter, LogoutHandler, LogoutSuccessHandler, RedirectLogoutSuccessHandler,
    SecurityContextLogoutHandler, SessionRegistryLogoutHandler,
};
use warden_web::matcher::{PathPatternRequestMatcher, RequestMatcher};
use warden_web::session::SessionRegistry;

use crate::configurer::Configurer;
use crate::configurers::{CsrfConfigurer, context_repository, event_publisher, permit_all};
use crate::http::HttpSecurity;

/// Logout on a dedicated URL
///
/// Handlers run registry bookkeeping first, then token and cookie cleanup,
/// and clear the context (invalidating the session) last. With CSRF
/// protection active only POST requests log out.
#[derive(Debug)]
pub struct LogoutConfigurer {
    logout_url: String,
    success_url: String,
    success_handler: Option<Arc<dyn LogoutSuccessHandler>>,
    cookies_to_clear: Vec<String>,
    invalidate_session: bool,
    handlers: Vec<Arc<dyn LogoutHandler>>,
    permit_all: bool,
}

impl Default for LogoutConfigurer {
    fn default() -> Self {
        Self {
            logout_url: "/logout".to_string(),
            success_url: "/login?logout".to_string(),
            success_handler: None,
            cookies_to_clear: Vec::new(),
            invalidate_session: true,
            handlers: Vec::new(),
            permit_all: false,
        }
    }
}

impl LogoutConfigurer {
    /// URL that triggers logout
    pub fn logout_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.logout_url = url.into();
        self
    }

    /// Redirect target after logout
    pub fn logout_success_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.success_url = url.into();
        self
    }

    /// Custom success handler; overrides the success URL
    pub fn logout_success_handler(&mut self, handler: Arc<dyn LogoutSuccessHandler>) -> &mut Self {
        self.success_handler = Some(handler);
        self
    }

    /// Cookies expired on logout
    pub fn delete_cookies<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cookies_to_clear.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether the transport session is invalidated (default `true`)
    pub fn invalidate_http_session(&mut self, invalidate: bool) -> &mut Self {
        self.invalidate_session = invalidate;
        self
    }

    /// Extra handler, run before the context is cleared
    pub fn add_logout_handler(&mut self, handler: Arc<dyn LogoutHandler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    /// Let everyone reach the logout and success URLs
    pub fn permit_all(&mut self, permit_all: bool) -> &mut Self {
        self.permit_all = permit_all;
        self
    }
}

impl Configurer<HttpSecurity> for LogoutConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if self.permit_all {
            let mut urls = vec![self.logout_url.as_str()];
            if self.success_handler.is_none() {
                urls.push(self.success_url.as_str());
            }
            permit_all(http, "logout", urls)?;
        }
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let matcher: Arc<dyn RequestMatcher> = if http.has_configurer::<CsrfConfigurer>() {
            Arc::new(PathPatternRequestMatcher::with_method(Method::POST, self.logout_url.clone()))
        } else {
            Arc::new(PathPatternRequestMatcher::new(self.logout_url.clone()))
        };

        let mut handlers: Vec<Arc<dyn LogoutHandler>> = Vec::new();
        if let Some(registry) = http.shared::<Arc<dyn SessionRegistry>>() {
            handlers.push(Arc::new(SessionRegistryLogoutHandler::new(registry)));
        }
        if let Some(repository) = http.shared::<Arc<dyn CsrfTokenRepository>>() {
            handlers.push(Arc::new(CsrfLogoutHandler::new(repository)));
        }
        if !self.cookies_to_clear.is_empty() {
            handlers.push(Arc::new(CookieClearingLogoutHandler::new(self.cookies_to_clear.clone())));
        }
        handlers.extend(self.handlers.iter().cloned());
        handlers.push(Arc::new(
            SecurityContextLogoutHandler::new(context_repository(http)).with_invalidate_session(self.invalidate_session),
        ));

        let success = self
            .success_handler
            .clone()
            .unwrap_or_else(|| Arc::new(RedirectLogoutSuccessHandler::new(self.success_url.clone())));
        let filter = LogoutFilter::new(matcher, handlers, success).with_event_publisher(event_publisher(http));
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
