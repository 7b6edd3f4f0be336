//! Session work performed when an authentication succeeds

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use warden_core::{Authentication, SessionAuthenticationError};

use crate::exchange::{HttpRequest, HttpResponse};
use crate::session::SessionRegistry;

/// Runs on successful authentication, before the context is committed
pub trait SessionAuthenticationStrategy: Send + Sync + fmt::Debug {
    /// Apply session policy for `authentication`
    ///
    /// # Errors
    ///
    /// Returns a [`SessionAuthenticationError`] to veto the login.
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError>;
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionStrategy;

impl SessionAuthenticationStrategy for NullSessionStrategy {
    fn on_authentication(
        &self,
        _authentication: &Authentication,
        _request: &mut HttpRequest,
        _response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError> {
        Ok(())
    }
}

/// Runs delegates in order, stopping at the first veto
#[derive(Debug, Clone, Default)]
pub struct CompositeSessionStrategy {
    delegates: Vec<Arc<dyn SessionAuthenticationStrategy>>,
}

impl CompositeSessionStrategy {
    /// Compose `delegates`
    pub fn new(delegates: Vec<Arc<dyn SessionAuthenticationStrategy>>) -> Self {
        Self { delegates }
    }

    /// Delegates in run order
    pub fn delegates(&self) -> &[Arc<dyn SessionAuthenticationStrategy>] {
        &self.delegates
    }
}

impl SessionAuthenticationStrategy for CompositeSessionStrategy {
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError> {
        for delegate in &self.delegates {
            delegate.on_authentication(authentication, request, response)?;
        }
        Ok(())
    }
}

/// Rotates the transport session id on login (session fixation protection)
///
/// With a registry attached, the concurrency record of the old id follows
/// the session to its new id.
#[derive(Clone, Default)]
pub struct ChangeSessionIdStrategy {
    registry: Option<Arc<dyn SessionRegistry>>,
}

impl fmt::Debug for ChangeSessionIdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSessionIdStrategy")
            .field("tracks_registry", &self.registry.is_some())
            .finish()
    }
}

impl ChangeSessionIdStrategy {
    /// Rotate ids without touching a registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate ids and re-key their records in `registry`
    pub fn with_registry(registry: Arc<dyn SessionRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }
}

impl SessionAuthenticationStrategy for ChangeSessionIdStrategy {
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &mut HttpRequest,
        _response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError> {
        let Some(old_id) = request.session_id() else {
            return Ok(());
        };
        if let Some(new_id) = request.change_session_id() {
            debug!(principal = authentication.name(), session_id = %new_id, "Rotated session id on login");
            if let Some(registry) = &self.registry {
                registry.session_id_changed(&old_id, &new_id);
            }
        }
        Ok(())
    }
}

/// Registers the (possibly new) session for the principal
#[derive(Clone)]
pub struct RegisterSessionStrategy {
    registry: Arc<dyn SessionRegistry>,
}

impl fmt::Debug for RegisterSessionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterSessionStrategy").finish_non_exhaustive()
    }
}

impl RegisterSessionStrategy {
    /// Register into `registry`
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl SessionAuthenticationStrategy for RegisterSessionStrategy {
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &mut HttpRequest,
        _response: &mut HttpResponse,
    ) -> Result<(), SessionAuthenticationError> {
        let session_id = request.get_or_create_session().id();
        self.registry
            .register_new_session(&session_id, authentication.name());
        Ok(())
    }
}
