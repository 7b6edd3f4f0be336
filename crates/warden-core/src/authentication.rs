//! The authentication token
//!
//! [`Authentication`] is both the credential request handed to an
//! [`AuthenticationManager`](crate::AuthenticationManager) and the principal it
//! returns. Request tokens carry `authenticated: false` and raw credentials;
//! result tokens carry `authenticated: true`, the loaded [`UserDetails`] and
//! the granted authorities.
//!
//! # Example
//!
//! ```rust
//! use warden_core::{Authentication, AuthenticationKind, GrantedAuthority};
//!
//! let auth = Authentication::builder(AuthenticationKind::UsernamePassword)
//!     .principal("alice")
//!     .authority(GrantedAuthority::role("ADMIN"))
//!     .authenticated(true)
//!     .build()
//!     .unwrap();
//!
//! assert!(auth.has_role("ADMIN"));
//! assert!(auth.is_fully_authenticated());
//! ```

use std::collections::HashMap;
use std::time::SystemTime;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authority::{GrantedAuthority, authority_list};
use crate::error::AuthenticationError;
use crate::user::UserDetails;

/// Principal name used for anonymous authentications
pub const ANONYMOUS_PRINCIPAL: &str = "anonymousUser";

/// Authority granted to anonymous authentications
pub const ANONYMOUS_AUTHORITY: &str = "ROLE_ANONYMOUS";

/// How the credentials were presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationKind {
    /// Username and password (form login, basic)
    UsernamePassword,
    /// Opaque bearer token
    BearerToken,
    /// Anonymous placeholder installed when nobody logged in
    Anonymous,
    /// Restored from a remember-me cookie
    RememberMe,
}

/// Authentication request or authenticated principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authentication {
    /// Principal name (username, token subject, `anonymousUser`)
    pub principal: String,

    /// Loaded user record, present after a DAO-backed authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDetails>,

    /// Raw credentials; erased once authentication succeeds
    #[serde(skip)]
    pub credentials: Option<SecretString>,

    /// Granted authorities
    #[serde(default)]
    pub authorities: Vec<GrantedAuthority>,

    /// Whether this token represents a verified principal
    pub authenticated: bool,

    /// How the credentials were presented
    pub kind: AuthenticationKind,

    /// When authentication succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<SystemTime>,

    /// Request details (remote address, session id, custom claims)
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl Authentication {
    /// Create builder for constructing an authentication
    pub fn builder(kind: AuthenticationKind) -> AuthenticationBuilder {
        AuthenticationBuilder::new(kind)
    }

    /// Unauthenticated username/password request
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: username.into(),
            user: None,
            credentials: Some(SecretString::new(password.into())),
            authorities: Vec::new(),
            authenticated: false,
            kind: AuthenticationKind::UsernamePassword,
            authenticated_at: None,
            details: HashMap::new(),
        }
    }

    /// Unauthenticated bearer-token request
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            principal: String::new(),
            user: None,
            credentials: Some(SecretString::new(token.into())),
            authorities: Vec::new(),
            authenticated: false,
            kind: AuthenticationKind::BearerToken,
            authenticated_at: None,
            details: HashMap::new(),
        }
    }

    /// Anonymous authentication with the default principal and authority
    pub fn anonymous() -> Self {
        Self::anonymous_with(ANONYMOUS_PRINCIPAL, authority_list(&[ANONYMOUS_AUTHORITY]))
    }

    /// Anonymous authentication with a custom principal and authorities
    pub fn anonymous_with(principal: impl Into<String>, authorities: Vec<GrantedAuthority>) -> Self {
        Self {
            principal: principal.into(),
            user: None,
            credentials: None,
            authorities,
            authenticated: true,
            kind: AuthenticationKind::Anonymous,
            authenticated_at: Some(SystemTime::now()),
            details: HashMap::new(),
        }
    }

    /// Authenticated result for a loaded user
    pub fn for_user(user: UserDetails, kind: AuthenticationKind) -> Self {
        Self {
            principal: user.username.clone(),
            authorities: user.authorities.clone(),
            user: Some(user),
            credentials: None,
            authenticated: true,
            kind,
            authenticated_at: Some(SystemTime::now()),
            details: HashMap::new(),
        }
    }

    /// Principal name
    pub fn name(&self) -> &str {
        &self.principal
    }

    /// Raw credentials, if still present
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.expose_secret().as_str())
    }

    /// Drop raw credentials (called by the manager after success)
    pub fn erase_credentials(&mut self) {
        self.credentials = None;
    }

    /// Whether this is the anonymous placeholder
    pub fn is_anonymous(&self) -> bool {
        self.kind == AuthenticationKind::Anonymous
    }

    /// Whether this is a remember-me authentication
    pub fn is_remember_me(&self) -> bool {
        self.kind == AuthenticationKind::RememberMe
    }

    /// Authenticated and neither anonymous nor remember-me
    pub fn is_fully_authenticated(&self) -> bool {
        self.authenticated && !self.is_anonymous() && !self.is_remember_me()
    }

    /// Check if principal holds the exact authority
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a.as_str() == authority)
    }

    /// Check if principal holds the role (`ROLE_` prefix optional)
    pub fn has_role(&self, role: &str) -> bool {
        let role = GrantedAuthority::role(role);
        self.authorities.contains(&role)
    }

    /// Check if principal holds any of the roles
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    /// Check if principal holds any of the authorities
    pub fn has_any_authority(&self, authorities: &[&str]) -> bool {
        authorities.iter().any(|a| self.has_authority(a))
    }

    /// Get a request detail deserialized into `T`
    pub fn detail<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.details
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Builder for [`Authentication`]
#[derive(Debug)]
pub struct AuthenticationBuilder {
    kind: AuthenticationKind,
    principal: Option<String>,
    user: Option<UserDetails>,
    credentials: Option<SecretString>,
    authorities: Vec<GrantedAuthority>,
    authenticated: bool,
    details: HashMap<String, Value>,
}

impl AuthenticationBuilder {
    fn new(kind: AuthenticationKind) -> Self {
        Self {
            kind,
            principal: None,
            user: None,
            credentials: None,
            authorities: Vec::new(),
            authenticated: false,
            details: HashMap::new(),
        }
    }

    /// Set principal name
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Attach a loaded user; also supplies principal and authorities when unset
    pub fn user(mut self, user: UserDetails) -> Self {
        self.user = Some(user);
        self
    }

    /// Set raw credentials
    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(SecretString::new(credentials.into()));
        self
    }

    /// Add one authority
    pub fn authority(mut self, authority: GrantedAuthority) -> Self {
        self.authorities.push(authority);
        self
    }

    /// Replace the authority list
    pub fn authorities(mut self, authorities: Vec<GrantedAuthority>) -> Self {
        self.authorities = authorities;
        self
    }

    /// Mark as authenticated
    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    /// Add a request detail
    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Build the authentication
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError::InvalidRequest`] if neither a principal
    /// nor a user was supplied.
    pub fn build(self) -> Result<Authentication, AuthenticationError> {
        let principal = match (self.principal, &self.user) {
            (Some(p), _) => p,
            (None, Some(user)) => user.username.clone(),
            (None, None) => {
                return Err(AuthenticationError::InvalidRequest(
                    "authentication requires a principal".to_string(),
                ));
            }
        };

        let authorities = match (&self.user, self.authorities.is_empty()) {
            (Some(user), true) => user.authorities.clone(),
            _ => self.authorities,
        };

        Ok(Authentication {
            principal,
            user: self.user,
            credentials: self.credentials,
            authorities,
            authenticated: self.authenticated,
            kind: self.kind,
            authenticated_at: self.authenticated.then(SystemTime::now),
            details: self.details,
        })
    }
}
