//! Username/password provider backed by a [`UserDetailsService`]

use std::sync::Arc;

use tracing::debug;

use super::AuthenticationProvider;
use crate::authentication::{Authentication, AuthenticationKind};
use crate::error::AuthenticationError;
use crate::password::{DelegatingPasswordEncoder, PasswordEncoder};
use crate::user::{UserDetails, UserDetailsService};

/// Verifies username/password requests against stored user records
///
/// Checks run in a fixed order: locked, disabled, account expired, then the
/// password, then credentials expired. Unknown users are reported as
/// [`AuthenticationError::BadCredentials`] unless `hide_user_not_found` is
/// turned off.
pub struct DaoAuthenticationProvider {
    users: Arc<dyn UserDetailsService>,
    encoder: Arc<dyn PasswordEncoder>,
    hide_user_not_found: bool,
}

impl DaoAuthenticationProvider {
    /// Create a provider using the delegating password encoder
    pub fn new(users: Arc<dyn UserDetailsService>) -> Self {
        Self {
            users,
            encoder: Arc::new(DelegatingPasswordEncoder::default()),
            hide_user_not_found: true,
        }
    }

    /// Use a different password encoder
    pub fn with_password_encoder(mut self, encoder: Arc<dyn PasswordEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Report unknown users as `UsernameNotFound` instead of `BadCredentials`
    pub fn with_hide_user_not_found(mut self, hide: bool) -> Self {
        self.hide_user_not_found = hide;
        self
    }

    fn pre_authentication_checks(user: &UserDetails) -> Result<(), AuthenticationError> {
        if !user.account_non_locked {
            debug!(username = %user.username, "User account is locked");
            return Err(AuthenticationError::Locked(user.username.clone()));
        }
        if !user.enabled {
            debug!(username = %user.username, "User account is disabled");
            return Err(AuthenticationError::Disabled(user.username.clone()));
        }
        if !user.account_non_expired {
            debug!(username = %user.username, "User account has expired");
            return Err(AuthenticationError::AccountExpired(user.username.clone()));
        }
        Ok(())
    }

    fn post_authentication_checks(user: &UserDetails) -> Result<(), AuthenticationError> {
        if !user.credentials_non_expired {
            debug!(username = %user.username, "User credentials have expired");
            return Err(AuthenticationError::CredentialsExpired(
                user.username.clone(),
            ));
        }
        Ok(())
    }
}

impl AuthenticationProvider for DaoAuthenticationProvider {
    fn name(&self) -> &str {
        "dao"
    }

    fn supports(&self, kind: AuthenticationKind) -> bool {
        kind == AuthenticationKind::UsernamePassword
    }

    fn authenticate(
        &self,
        request: &Authentication,
    ) -> Result<Option<Authentication>, AuthenticationError> {
        let username = request.name();

        let user = match self.users.load_user_by_username(username) {
            Ok(user) => user,
            Err(AuthenticationError::UsernameNotFound(name)) => {
                debug!(username = %name, "Failed to find user");
                return Err(if self.hide_user_not_found {
                    AuthenticationError::BadCredentials
                } else {
                    AuthenticationError::UsernameNotFound(name)
                });
            }
            Err(e) => return Err(e),
        };

        Self::pre_authentication_checks(&user)?;

        let Some(presented) = request.credentials() else {
            debug!(username, "No credentials provided");
            return Err(AuthenticationError::BadCredentials);
        };
        if !self.encoder.matches(presented, &user.password) {
            debug!(username, "Password does not match stored value");
            return Err(AuthenticationError::BadCredentials);
        }

        Self::post_authentication_checks(&user)?;

        if self.encoder.upgrade_encoding(&user.password) {
            debug!(username, "Stored password encoding should be upgraded");
        }

        let mut result = Authentication::for_user(user, AuthenticationKind::UsernamePassword);
        result.details = request.details.clone();
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::NoopPasswordEncoder;
    use crate::user::InMemoryUserDetailsService;

    fn provider_with(user: UserDetails) -> DaoAuthenticationProvider {
        DaoAuthenticationProvider::new(Arc::new(InMemoryUserDetailsService::with_users([user])))
    }

    fn login(provider: &DaoAuthenticationProvider, password: &str) -> Result<Option<Authentication>, AuthenticationError> {
        provider.authenticate(&Authentication::username_password("alice", password))
    }

    #[test]
    fn test_successful_authentication() {
        let provider = provider_with(
            UserDetails::with_username("alice")
                .password("{noop}pw")
                .roles(&["USER"])
                .build(),
        );
        let result = login(&provider, "pw").unwrap().unwrap();
        assert!(result.authenticated);
        assert!(result.has_role("USER"));
        assert_eq!(result.user.as_ref().map(|u| u.username.as_str()), Some("alice"));
    }

    #[test]
    fn test_wrong_password() {
        let provider = provider_with(UserDetails::with_username("alice").password("{noop}pw").build());
        assert!(matches!(login(&provider, "nope"), Err(AuthenticationError::BadCredentials)));
    }

    #[test]
    fn test_locked_checked_before_disabled_and_password() {
        let provider = provider_with(
            UserDetails::with_username("alice")
                .password("{noop}pw")
                .account_locked(true)
                .disabled(true)
                .build(),
        );
        assert!(matches!(login(&provider, "wrong"), Err(AuthenticationError::Locked(_))));
    }

    #[test]
    fn test_disabled_checked_before_expired_and_password() {
        let provider = provider_with(
            UserDetails::with_username("alice")
                .password("{noop}pw")
                .disabled(true)
                .account_expired(true)
                .build(),
        );
        assert!(matches!(login(&provider, "wrong"), Err(AuthenticationError::Disabled(_))));
    }

    #[test]
    fn test_account_expired_checked_before_password() {
        let provider = provider_with(
            UserDetails::with_username("alice")
                .password("{noop}pw")
                .account_expired(true)
                .build(),
        );
        assert!(matches!(login(&provider, "wrong"), Err(AuthenticationError::AccountExpired(_))));
    }

    #[test]
    fn test_credentials_expired_checked_after_password() {
        let provider = provider_with(
            UserDetails::with_username("alice")
                .password("{noop}pw")
                .credentials_expired(true)
                .build(),
        );
        assert!(matches!(login(&provider, "wrong"), Err(AuthenticationError::BadCredentials)));
        assert!(matches!(login(&provider, "pw"), Err(AuthenticationError::CredentialsExpired(_))));
    }

    #[test]
    fn test_unknown_user_hidden() {
        let provider = DaoAuthenticationProvider::new(Arc::new(InMemoryUserDetailsService::new()));
        assert!(matches!(login(&provider, "pw"), Err(AuthenticationError::BadCredentials)));

        let revealing = DaoAuthenticationProvider::new(Arc::new(InMemoryUserDetailsService::new()))
            .with_hide_user_not_found(false);
        assert!(matches!(login(&revealing, "pw"), Err(AuthenticationError::UsernameNotFound(_))));
    }

    #[test]
    fn test_custom_encoder() {
        let provider = provider_with(UserDetails::with_username("alice").password("raw").build())
            .with_password_encoder(Arc::new(NoopPasswordEncoder));
        assert!(login(&provider, "raw").unwrap().is_some());
    }

    #[test]
    fn test_missing_credentials() {
        let provider = provider_with(UserDetails::with_username("alice").password("{noop}pw").build());
        let mut request = Authentication::username_password("alice", "pw");
        request.erase_credentials();
        assert!(matches!(provider.authenticate(&request), Err(AuthenticationError::BadCredentials)));
    }

    #[test]
    fn test_supports_only_username_password() {
        let provider = DaoAuthenticationProvider::new(Arc::new(InMemoryUserDetailsService::new()));
        assert!(provider.supports(AuthenticationKind::UsernamePassword));
        assert!(!provider.supports(AuthenticationKind::BearerToken));
    }
}
