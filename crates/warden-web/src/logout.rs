//! Logout processing

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, info};
use warden_core::{Authentication, AuthenticationEvent, AuthenticationEventPublisher, NoopEventPublisher};

use crate::context::{SecurityContext, SecurityContextRepository};
use crate::error::WebError;
use crate::exchange::{Exchange, ResponseCookie};
use crate::filter::{Filter, Next};
use crate::matcher::RequestMatcher;
use crate::session::SessionRegistry;

/// One step of logging a principal out
pub trait LogoutHandler: Send + Sync + fmt::Debug {
    /// Undo whatever state this handler owns
    fn logout(&self, exchange: &mut Exchange, authentication: Option<&Authentication>);
}

/// Clears the context and, optionally, invalidates the transport session
#[derive(Debug, Clone)]
pub struct SecurityContextLogoutHandler {
    repository: Arc<dyn SecurityContextRepository>,
    invalidate_session: bool,
}

impl SecurityContextLogoutHandler {
    /// Clear contexts persisted in `repository`
    pub fn new(repository: Arc<dyn SecurityContextRepository>) -> Self {
        Self {
            repository,
            invalidate_session: true,
        }
    }

    /// Whether to invalidate the transport session (default `true`)
    pub fn with_invalidate_session(mut self, invalidate: bool) -> Self {
        self.invalidate_session = invalidate;
        self
    }
}

impl LogoutHandler for SecurityContextLogoutHandler {
    fn logout(&self, exchange: &mut Exchange, _authentication: Option<&Authentication>) {
        if self.invalidate_session {
            exchange.request.invalidate_session();
        }
        exchange.security.clear();
        self.repository.save(
            &SecurityContext::default(),
            &mut exchange.request,
            &mut exchange.response,
        );
    }
}

/// Expires cookies on the client
#[derive(Debug, Clone)]
pub struct CookieClearingLogoutHandler {
    cookies: Vec<String>,
}

impl CookieClearingLogoutHandler {
    /// Clear the named cookies
    pub fn new<I, S>(cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cookies: cookies.into_iter().map(Into::into).collect(),
        }
    }
}

impl LogoutHandler for CookieClearingLogoutHandler {
    fn logout(&self, exchange: &mut Exchange, _authentication: Option<&Authentication>) {
        let path = match exchange.request.context_path() {
            "" => "/".to_string(),
            context_path => context_path.to_string(),
        };
        for name in &self.cookies {
            exchange
                .response
                .add_cookie(&ResponseCookie::expired(name.clone(), path.clone()));
        }
    }
}

/// Removes the logged-out session from the concurrency registry
#[derive(Clone)]
pub struct SessionRegistryLogoutHandler {
    registry: Arc<dyn SessionRegistry>,
}

impl fmt::Debug for SessionRegistryLogoutHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistryLogoutHandler").finish_non_exhaustive()
    }
}

impl SessionRegistryLogoutHandler {
    /// Remove sessions from `registry`
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl LogoutHandler for SessionRegistryLogoutHandler {
    fn logout(&self, exchange: &mut Exchange, _authentication: Option<&Authentication>) {
        if let Some(session_id) = exchange.request.session_id() {
            self.registry.remove_session_information(&session_id);
        }
    }
}

/// Writes the response after a logout
pub trait LogoutSuccessHandler: Send + Sync + fmt::Debug {
    /// Complete the logout response
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn on_logout_success(
        &self,
        exchange: &mut Exchange,
        authentication: Option<&Authentication>,
    ) -> Result<(), WebError>;
}

/// Redirects to a fixed URL (default `/login?logout`)
#[derive(Debug, Clone)]
pub struct RedirectLogoutSuccessHandler {
    target_url: String,
}

impl Default for RedirectLogoutSuccessHandler {
    fn default() -> Self {
        Self::new("/login?logout")
    }
}

impl RedirectLogoutSuccessHandler {
    /// Redirect to `target_url` (relative to the context path)
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }
}

impl LogoutSuccessHandler for RedirectLogoutSuccessHandler {
    fn on_logout_success(
        &self,
        exchange: &mut Exchange,
        _authentication: Option<&Authentication>,
    ) -> Result<(), WebError> {
        let location = format!("{}{}", exchange.request.context_path(), self.target_url);
        exchange.response.send_redirect(&location);
        Ok(())
    }
}

/// Responds with a bare status (default `204 No Content`)
#[derive(Debug, Clone)]
pub struct StatusLogoutSuccessHandler {
    status: StatusCode,
}

impl Default for StatusLogoutSuccessHandler {
    fn default() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }
}

impl StatusLogoutSuccessHandler {
    /// Respond with `status`
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl LogoutSuccessHandler for StatusLogoutSuccessHandler {
    fn on_logout_success(
        &self,
        exchange: &mut Exchange,
        _authentication: Option<&Authentication>,
    ) -> Result<(), WebError> {
        exchange.response.send_error(self.status);
        Ok(())
    }
}

/// Runs the logout handlers when the logout URL is requested
pub struct LogoutFilter {
    matcher: Arc<dyn RequestMatcher>,
    handlers: Vec<Arc<dyn LogoutHandler>>,
    success_handler: Arc<dyn LogoutSuccessHandler>,
    publisher: Arc<dyn AuthenticationEventPublisher>,
}

impl fmt::Debug for LogoutFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutFilter")
            .field("matcher", &self.matcher)
            .field("handlers", &self.handlers)
            .field("success_handler", &self.success_handler)
            .finish_non_exhaustive()
    }
}

impl LogoutFilter {
    /// Logout on requests accepted by `matcher`
    pub fn new(
        matcher: Arc<dyn RequestMatcher>,
        handlers: Vec<Arc<dyn LogoutHandler>>,
        success_handler: Arc<dyn LogoutSuccessHandler>,
    ) -> Self {
        Self {
            matcher,
            handlers,
            success_handler,
            publisher: Arc::new(NoopEventPublisher),
        }
    }

    /// Publisher for logout events
    pub fn with_event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }
}

impl Filter for LogoutFilter {
    fn name(&self) -> &'static str {
        "LogoutFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        if !self.matcher.matches(&exchange.request) {
            return next.run(exchange);
        }

        let authentication = exchange.security.authentication.clone();
        debug!(
            principal = ?authentication.as_ref().map(Authentication::name),
            handlers = self.handlers.len(),
            "Logging out"
        );
        for handler in &self.handlers {
            handler.logout(exchange, authentication.as_ref());
        }
        if let Some(auth) = authentication.as_ref().filter(|a| !a.is_anonymous()) {
            info!(principal = auth.name(), "Logout succeeded");
            self.publisher.publish(&AuthenticationEvent::LogoutSuccess {
                principal: auth.name().to_string(),
            });
        }
        self.success_handler
            .on_logout_success(exchange, authentication.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use http::header;
    use warden_core::AuthenticationKind;

    use super::*;
    use crate::context::HttpSessionSecurityContextRepository;
    use crate::exchange::{HttpRequest, HttpResponse};
    use crate::matcher::ExactUrlRequestMatcher;
    use crate::session::InMemorySessionRegistry;

    fn alice() -> Authentication {
        Authentication::builder(AuthenticationKind::UsernamePassword)
            .principal("alice")
            .authenticated(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_logout_clears_everything() {
        let repo = Arc::new(HttpSessionSecurityContextRepository::new());
        let registry = Arc::new(InMemorySessionRegistry::new());

        let mut request = HttpRequest::post("/logout");
        repo.save(&SecurityContext::new(alice()), &mut request, &mut HttpResponse::new());
        let session = request.session().unwrap();
        registry.register_new_session(&session.id(), "alice");

        let filter = LogoutFilter::new(
            Arc::new(ExactUrlRequestMatcher::new("/logout")),
            vec![
                Arc::new(SessionRegistryLogoutHandler::new(registry.clone())),
                Arc::new(SecurityContextLogoutHandler::new(repo)),
                Arc::new(CookieClearingLogoutHandler::new(["WARDEN_SESSION"])),
            ],
            Arc::new(RedirectLogoutSuccessHandler::default()),
        );

        let mut exchange = Exchange::new(request);
        exchange.security = SecurityContext::new(alice());
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
        assert!(exchange.security.authentication.is_none());
        assert!(!session.is_valid());
        assert!(registry.session_information(&session.id()).is_none());
        assert_eq!(exchange.response.status, StatusCode::FOUND);
        assert_eq!(exchange.response.headers.get(header::LOCATION).unwrap(), "/login?logout");
        let cookie = exchange.response.headers.get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().starts_with("WARDEN_SESSION=; Path=/; Max-Age=0"));
    }

    #[test]
    fn test_non_logout_request_passes_through() {
        let filter = LogoutFilter::new(
            Arc::new(ExactUrlRequestMatcher::new("/logout")),
            vec![],
            Arc::new(StatusLogoutSuccessHandler::default()),
        );
        let mut exchange = Exchange::new(HttpRequest::get("/logout?x=1"));
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
        assert!(reached);
    }
}
