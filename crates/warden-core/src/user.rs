//! User records and lookup

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::authority::GrantedAuthority;
use crate::error::AuthenticationError;

/// Core user information loaded by a [`UserDetailsService`]
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDetails {
    /// Unique username
    pub username: String,

    /// Encoded password (`{id}hash` when used with the delegating encoder)
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Granted authorities
    #[serde(default)]
    pub authorities: Vec<GrantedAuthority>,

    /// Account enabled
    pub enabled: bool,

    /// Account not locked
    pub account_non_locked: bool,

    /// Account not expired
    pub account_non_expired: bool,

    /// Credentials not expired
    pub credentials_non_expired: bool,
}

impl std::fmt::Debug for UserDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDetails")
            .field("username", &self.username)
            .field("password", &"[PROTECTED]")
            .field("authorities", &self.authorities)
            .field("enabled", &self.enabled)
            .field("account_non_locked", &self.account_non_locked)
            .field("account_non_expired", &self.account_non_expired)
            .field("credentials_non_expired", &self.credentials_non_expired)
            .finish()
    }
}

impl UserDetails {
    /// Start building a user with the given name
    pub fn with_username(username: impl Into<String>) -> UserDetailsBuilder {
        UserDetailsBuilder {
            user: UserDetails {
                username: username.into(),
                password: String::new(),
                authorities: Vec::new(),
                enabled: true,
                account_non_locked: true,
                account_non_expired: true,
                credentials_non_expired: true,
            },
        }
    }
}

/// Fluent builder for [`UserDetails`]; all account flags default to healthy
#[derive(Debug, Clone)]
pub struct UserDetailsBuilder {
    user: UserDetails,
}

impl UserDetailsBuilder {
    /// Set encoded password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.user.password = password.into();
        self
    }

    /// Add roles (`ROLE_` prefix added when missing)
    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.user
            .authorities
            .extend(roles.iter().map(GrantedAuthority::role));
        self
    }

    /// Add literal authorities
    pub fn authorities(mut self, authorities: &[&str]) -> Self {
        self.user
            .authorities
            .extend(authorities.iter().map(|a| GrantedAuthority::new(*a)));
        self
    }

    /// Disable the account
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.user.enabled = !disabled;
        self
    }

    /// Lock the account
    pub fn account_locked(mut self, locked: bool) -> Self {
        self.user.account_non_locked = !locked;
        self
    }

    /// Expire the account
    pub fn account_expired(mut self, expired: bool) -> Self {
        self.user.account_non_expired = !expired;
        self
    }

    /// Expire the credentials
    pub fn credentials_expired(mut self, expired: bool) -> Self {
        self.user.credentials_non_expired = !expired;
        self
    }

    /// Finish
    pub fn build(self) -> UserDetails {
        self.user
    }
}

/// Loads user records by name
pub trait UserDetailsService: Send + Sync {
    /// Locate the user
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError::UsernameNotFound`] when no such user
    /// exists, or [`AuthenticationError::InternalService`] when the backing
    /// store fails.
    fn load_user_by_username(&self, username: &str) -> Result<UserDetails, AuthenticationError>;
}

/// Thread-safe in-memory user store
#[derive(Debug, Default)]
pub struct InMemoryUserDetailsService {
    users: RwLock<HashMap<String, UserDetails>>,
}

impl InMemoryUserDetailsService {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with users
    pub fn with_users(users: impl IntoIterator<Item = UserDetails>) -> Self {
        let store = Self::new();
        for user in users {
            store.create_user(user);
        }
        store
    }

    /// Insert or replace a user
    pub fn create_user(&self, user: UserDetails) {
        debug!(username = %user.username, "Registering in-memory user");
        self.users
            .write()
            .insert(user.username.to_lowercase(), user);
    }

    /// Remove a user
    pub fn delete_user(&self, username: &str) -> bool {
        self.users.write().remove(&username.to_lowercase()).is_some()
    }

    /// Whether a user exists (case-insensitive)
    pub fn user_exists(&self, username: &str) -> bool {
        self.users.read().contains_key(&username.to_lowercase())
    }

    /// Replace a user's encoded password
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError::UsernameNotFound`] if the user is unknown.
    pub fn change_password(
        &self,
        username: &str,
        encoded_password: impl Into<String>,
    ) -> Result<(), AuthenticationError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(&username.to_lowercase())
            .ok_or_else(|| AuthenticationError::UsernameNotFound(username.to_string()))?;
        user.password = encoded_password.into();
        Ok(())
    }
}

impl UserDetailsService for InMemoryUserDetailsService {
    fn load_user_by_username(&self, username: &str) -> Result<UserDetails, AuthenticationError> {
        self.users
            .read()
            .get(&username.to_lowercase())
            .cloned()
            .ok_or_else(|| AuthenticationError::UsernameNotFound(username.to_string()))
    }
}
