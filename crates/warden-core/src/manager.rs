//! Authentication Manager
//!
//! Coordinates multiple authentication providers.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::authentication::Authentication;
use crate::error::AuthenticationError;
use crate::event::{AuthenticationEvent, AuthenticationEventPublisher, NoopEventPublisher};
use crate::providers::AuthenticationProvider;

/// Verifies an authentication request
///
/// Implementations must check account status (locked, disabled, expired)
/// before validating credentials.
pub trait AuthenticationManager: Send + Sync {
    /// Authenticate the request, returning the verified principal
    ///
    /// # Errors
    ///
    /// Returns an [`AuthenticationError`] describing why the request was
    /// rejected.
    fn authenticate(&self, request: Authentication) -> Result<Authentication, AuthenticationError>;
}

impl<M: AuthenticationManager + ?Sized> AuthenticationManager for Arc<M> {
    fn authenticate(&self, request: Authentication) -> Result<Authentication, AuthenticationError> {
        (**self).authenticate(request)
    }
}

/// Iterates providers until one accepts the request
///
/// - Providers that do not support the request kind are skipped.
/// - The first provider to return a result wins.
/// - Account-status and internal-service errors stop iteration immediately;
///   other errors are remembered and the next provider is tried.
/// - When no provider decides, the optional parent manager is consulted.
pub struct ProviderManager {
    providers: Vec<Arc<dyn AuthenticationProvider>>,
    parent: Option<Arc<dyn AuthenticationManager>>,
    publisher: Arc<dyn AuthenticationEventPublisher>,
    erase_credentials_after_authentication: bool,
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("has_parent", &self.parent.is_some())
            .field(
                "erase_credentials_after_authentication",
                &self.erase_credentials_after_authentication,
            )
            .finish()
    }
}

impl ProviderManager {
    /// Create a manager over the given providers
    pub fn new(providers: Vec<Arc<dyn AuthenticationProvider>>) -> Self {
        Self {
            providers,
            parent: None,
            publisher: Arc::new(NoopEventPublisher),
            erase_credentials_after_authentication: true,
        }
    }

    /// Consult `parent` when no local provider decides
    pub fn with_parent(mut self, parent: Arc<dyn AuthenticationManager>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Publish success/failure events
    pub fn with_event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Keep raw credentials on the returned authentication
    pub fn with_erase_credentials(mut self, erase: bool) -> Self {
        self.erase_credentials_after_authentication = erase;
        self
    }

    /// Registered providers
    pub fn providers(&self) -> &[Arc<dyn AuthenticationProvider>] {
        &self.providers
    }

    fn stops_iteration(error: &AuthenticationError) -> bool {
        matches!(
            error,
            AuthenticationError::Locked(_)
                | AuthenticationError::Disabled(_)
                | AuthenticationError::AccountExpired(_)
                | AuthenticationError::CredentialsExpired(_)
                | AuthenticationError::InternalService(_)
        )
    }

    fn fail(&self, request: &Authentication, error: AuthenticationError) -> AuthenticationError {
        self.publisher
            .publish(&AuthenticationEvent::failure(Some(request.name()), &error));
        error
    }
}

impl AuthenticationManager for ProviderManager {
    fn authenticate(&self, request: Authentication) -> Result<Authentication, AuthenticationError> {
        let kind = request.kind;
        let mut last_error = None;
        let mut result = None;

        for provider in &self.providers {
            if !provider.supports(kind) {
                continue;
            }
            trace!(provider = provider.name(), ?kind, "Trying authentication provider");

            match provider.authenticate(&request) {
                Ok(Some(authenticated)) => {
                    result = Some(authenticated);
                    break;
                }
                Ok(None) => {}
                Err(e) if Self::stops_iteration(&e) => return Err(self.fail(&request, e)),
                Err(e) => {
                    debug!(provider = provider.name(), error = %e, "Provider rejected authentication");
                    last_error = Some(e);
                }
            }
        }

        if result.is_none()
            && let Some(parent) = &self.parent
        {
            match parent.authenticate(request.clone()) {
                Ok(authenticated) => result = Some(authenticated),
                Err(AuthenticationError::ProviderNotFound(_)) => {}
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(mut authenticated) = result {
            if self.erase_credentials_after_authentication {
                authenticated.erase_credentials();
            }
            self.publisher
                .publish(&AuthenticationEvent::success(&authenticated));
            return Ok(authenticated);
        }

        let error = last_error.unwrap_or(AuthenticationError::ProviderNotFound(kind));
        Err(self.fail(&request, error))
    }
}
