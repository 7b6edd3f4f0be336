//! Authentication Providers
//!
//! Each provider verifies one kind of credential.

pub mod dao;
pub mod token;

pub use dao::DaoAuthenticationProvider;
pub use token::{InMemoryTokenIntrospector, TokenAuthenticationProvider, TokenIntrospector};

use crate::authentication::{Authentication, AuthenticationKind};
use crate::error::AuthenticationError;

/// Verifies one kind of authentication request
pub trait AuthenticationProvider: Send + Sync {
    /// Provider name, used in logs
    fn name(&self) -> &str;

    /// Whether this provider can verify requests of `kind`
    fn supports(&self, kind: AuthenticationKind) -> bool;

    /// Verify the request
    ///
    /// `Ok(None)` means the provider cannot decide and the next one should be
    /// tried.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthenticationError`] when the credentials are rejected.
    fn authenticate(
        &self,
        request: &Authentication,
    ) -> Result<Option<Authentication>, AuthenticationError>;
}
