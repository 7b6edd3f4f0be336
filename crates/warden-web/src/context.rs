//! Request-scoped security context and its persistence between requests

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use warden_core::Authentication;

use crate::error::WebError;
use crate::exchange::{Exchange, HttpRequest, HttpResponse};
use crate::filter::{Filter, Next};

/// Session attribute holding the persisted context
pub const SECURITY_CONTEXT_ATTRIBUTE: &str = "WARDEN_SECURITY_CONTEXT";

/// Authentication state for one request
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    /// Current authentication, if any
    pub authentication: Option<Authentication>,
}

impl SecurityContext {
    /// Context holding `authentication`
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication: Some(authentication),
        }
    }

    /// Replace the authentication
    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = Some(authentication);
    }

    /// Drop the authentication
    pub fn clear(&mut self) {
        self.authentication = None;
    }

    /// Whether a non-anonymous principal is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.authentication
            .as_ref()
            .is_some_and(|a| a.authenticated && !a.is_anonymous())
    }

    /// Current principal name
    pub fn principal(&self) -> Option<&str> {
        self.authentication.as_ref().map(Authentication::name)
    }
}

/// Persists the security context between requests
pub trait SecurityContextRepository: Send + Sync + fmt::Debug {
    /// Load the context for a request; an empty context when none is stored
    fn load(&self, request: &HttpRequest) -> SecurityContext;

    /// Persist the context
    fn save(&self, context: &SecurityContext, request: &mut HttpRequest, response: &mut HttpResponse);

    /// Whether a context is stored for the request
    fn contains_context(&self, request: &HttpRequest) -> bool;
}

/// Stores the context in the transport session
///
/// An empty or anonymous context never creates a session; saving one removes
/// any previously stored context.
#[derive(Debug, Clone)]
pub struct HttpSessionSecurityContextRepository {
    attribute: String,
}

impl Default for HttpSessionSecurityContextRepository {
    fn default() -> Self {
        Self {
            attribute: SECURITY_CONTEXT_ATTRIBUTE.to_string(),
        }
    }
}

impl HttpSessionSecurityContextRepository {
    /// Repository using the default attribute name
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom session attribute
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }
}

impl SecurityContextRepository for HttpSessionSecurityContextRepository {
    fn load(&self, request: &HttpRequest) -> SecurityContext {
        request
            .session()
            .and_then(|session| session.attribute::<SecurityContext>(&self.attribute))
            .unwrap_or_default()
    }

    fn save(&self, context: &SecurityContext, request: &mut HttpRequest, _response: &mut HttpResponse) {
        let storable = context
            .authentication
            .as_ref()
            .is_some_and(|a| !a.is_anonymous());
        if !storable {
            if let Some(session) = request.session()
                && session.remove_attribute(&self.attribute)
            {
                trace!(session_id = %session.id(), "Removed empty security context from session");
            }
            return;
        }
        let session = request.get_or_create_session();
        session.set_attribute(self.attribute.clone(), context.clone());
        trace!(session_id = %session.id(), principal = ?context.principal(), "Stored security context in session");
    }

    fn contains_context(&self, request: &HttpRequest) -> bool {
        request
            .session()
            .is_some_and(|session| session.has_attribute(&self.attribute))
    }
}

/// Keeps the context in request extensions only (stateless chains)
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestAttributeSecurityContextRepository;

impl SecurityContextRepository for RequestAttributeSecurityContextRepository {
    fn load(&self, request: &HttpRequest) -> SecurityContext {
        request
            .extensions
            .get::<SecurityContext>()
            .cloned()
            .unwrap_or_default()
    }

    fn save(&self, context: &SecurityContext, request: &mut HttpRequest, _response: &mut HttpResponse) {
        request.extensions.insert(context.clone());
    }

    fn contains_context(&self, request: &HttpRequest) -> bool {
        request.extensions.get::<SecurityContext>().is_some()
    }
}

/// Persists nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSecurityContextRepository;

impl SecurityContextRepository for NullSecurityContextRepository {
    fn load(&self, _request: &HttpRequest) -> SecurityContext {
        SecurityContext::default()
    }

    fn save(&self, _context: &SecurityContext, _request: &mut HttpRequest, _response: &mut HttpResponse) {}

    fn contains_context(&self, _request: &HttpRequest) -> bool {
        false
    }
}

/// Loads the persisted context into the exchange at the start of a chain
#[derive(Debug, Clone)]
pub struct SecurityContextHolderFilter {
    repository: Arc<dyn SecurityContextRepository>,
}

impl SecurityContextHolderFilter {
    /// Load contexts from `repository`
    pub fn new(repository: Arc<dyn SecurityContextRepository>) -> Self {
        Self { repository }
    }
}

impl Filter for SecurityContextHolderFilter {
    fn name(&self) -> &'static str {
        "SecurityContextHolderFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        exchange.security = self.repository.load(&exchange.request);
        debug!(principal = ?exchange.security.principal(), "Loaded security context");
        next.run(exchange)
    }
}
