//! Opaque bearer-token provider
//!
//! Tokens are never parsed here. A [`TokenIntrospector`] maps the raw token
//! to a principal; plug in a remote introspection client or a JWT verifier
//! behind it.

use parking_lot::RwLock;
use tracing::debug;

use super::AuthenticationProvider;
use crate::authentication::{Authentication, AuthenticationKind};
use crate::error::AuthenticationError;
use crate::password::constant_time_eq;
use crate::user::UserDetails;

/// Resolves an opaque token to a principal
pub trait TokenIntrospector: Send + Sync {
    /// Look up the token
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError::InvalidToken`] for unknown or revoked
    /// tokens, or [`AuthenticationError::InternalService`] when the
    /// introspection backend fails.
    fn introspect(&self, token: &str) -> Result<UserDetails, AuthenticationError>;
}

impl<F> TokenIntrospector for F
where
    F: Fn(&str) -> Result<UserDetails, AuthenticationError> + Send + Sync,
{
    fn introspect(&self, token: &str) -> Result<UserDetails, AuthenticationError> {
        self(token)
    }
}

/// Fixed token table, compared in constant time
#[derive(Default)]
pub struct InMemoryTokenIntrospector {
    tokens: RwLock<Vec<(String, UserDetails)>>,
}

impl std::fmt::Debug for InMemoryTokenIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTokenIntrospector")
            .field("tokens", &self.tokens.read().len())
            .finish()
    }
}

impl InMemoryTokenIntrospector {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user
    pub fn insert(&self, token: impl Into<String>, user: UserDetails) {
        self.tokens.write().push((token.into(), user));
    }

    /// Revoke a token
    pub fn revoke(&self, token: &str) -> bool {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|(t, _)| !constant_time_eq(t, token));
        tokens.len() != before
    }
}

impl TokenIntrospector for InMemoryTokenIntrospector {
    fn introspect(&self, token: &str) -> Result<UserDetails, AuthenticationError> {
        // Scan every entry so lookup time does not depend on table position
        let mut found = None;
        for (candidate, user) in self.tokens.read().iter() {
            if constant_time_eq(candidate, token) && found.is_none() {
                found = Some(user.clone());
            }
        }
        found.ok_or_else(|| AuthenticationError::InvalidToken("unknown token".to_string()))
    }
}

/// Verifies bearer tokens through a [`TokenIntrospector`]
pub struct TokenAuthenticationProvider {
    introspector: Box<dyn TokenIntrospector>,
}

impl TokenAuthenticationProvider {
    /// Create a provider delegating to `introspector`
    pub fn new(introspector: impl TokenIntrospector + 'static) -> Self {
        Self {
            introspector: Box::new(introspector),
        }
    }
}

impl AuthenticationProvider for TokenAuthenticationProvider {
    fn name(&self) -> &str {
        "token"
    }

    fn supports(&self, kind: AuthenticationKind) -> bool {
        kind == AuthenticationKind::BearerToken
    }

    fn authenticate(
        &self,
        request: &Authentication,
    ) -> Result<Option<Authentication>, AuthenticationError> {
        let token = request
            .credentials()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthenticationError::InvalidToken("token is empty".to_string()))?;

        let user = self.introspector.introspect(token)?;
        if !user.enabled {
            return Err(AuthenticationError::Disabled(user.username));
        }
        if !user.account_non_locked {
            return Err(AuthenticationError::Locked(user.username));
        }

        debug!(principal = %user.username, "Bearer token accepted");
        let mut result = Authentication::for_user(user, AuthenticationKind::BearerToken);
        result.details = request.details.clone();
        Ok(Some(result))
    }
}
