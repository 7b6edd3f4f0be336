//! Error taxonomy
//!
//! Three families with different recovery rules:
//!
//! - [`ConfigurationError`] - wiring mistakes detected while assembling the
//!   pipeline. Always fatal; surfaced at startup.
//! - [`AuthenticationError`] - request-time credential failures. Recovered by
//!   the processing stage and turned into a failure response.
//! - [`SessionAuthenticationError`] - raised by session strategies when a new
//!   authentication cannot be admitted. Treated like any other authentication
//!   failure by the enclosing stage.

use crate::authentication::AuthenticationKind;

/// Wiring-time errors raised while building pipelines
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// A configurer was applied after the builder left the init phase
    #[error("Cannot apply {configurer} to a builder that is already {state}")]
    IllegalState {
        /// Type name of the offending configurer
        configurer: String,
        /// Builder state at the time of the call
        state: String,
    },

    /// `build()` was invoked more than once
    #[error("This object has already been built")]
    AlreadyBuilt,

    /// The built object was requested before `build()` completed
    #[error("This object has not been built")]
    NotBuilt,

    /// A single configurer was requested but several are registered
    #[error("Only one configurer expected for type {type_name}, but got {count}")]
    AmbiguousConfigurer {
        /// Requested configurer type
        type_name: &'static str,
        /// Number of registered instances
        count: usize,
    },

    /// A second configurer of the same type was rejected by policy
    #[error("A configurer of type {type_name} is already registered")]
    DuplicateConfigurer {
        /// Rejected configurer type
        type_name: &'static str,
    },

    /// Two ordered configurers share an order key
    #[error(
        "Order on configurers must be unique. Order of {order} was already used on {existing}, so it cannot be used on {conflicting} too"
    )]
    DuplicateOrder {
        /// The shared order key
        order: i32,
        /// Configurer registered first
        existing: String,
        /// Configurer registered second
        conflicting: String,
    },

    /// Two filter chains share a dispatch priority
    #[error("Filter chain priority {priority} is used by both {existing} and {conflicting}")]
    ConflictingChainPriority {
        /// The shared priority
        priority: i32,
        /// Chain registered first
        existing: String,
        /// Chain registered second
        conflicting: String,
    },

    /// A configurer needed a shared object that nobody provided
    #[error("Required shared object {0} is not available")]
    MissingSharedObject(&'static str),

    /// A configuration value was out of range or inconsistent
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Request-time authentication failures
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    /// Credentials did not match (also used for unknown users)
    #[error("Bad credentials")]
    BadCredentials,

    /// No user with the given name exists
    #[error("User not found: {0}")]
    UsernameNotFound(String),

    /// The account is disabled
    #[error("User account is disabled: {0}")]
    Disabled(String),

    /// The account is locked
    #[error("User account is locked: {0}")]
    Locked(String),

    /// The account has expired
    #[error("User account has expired: {0}")]
    AccountExpired(String),

    /// The account credentials have expired
    #[error("User credentials have expired: {0}")]
    CredentialsExpired(String),

    /// The credential service itself failed (store unavailable, encoder error)
    #[error("Internal authentication service error: {0}")]
    InternalService(String),

    /// No provider accepts this kind of authentication
    #[error("No authentication provider found for {0:?}")]
    ProviderNotFound(AuthenticationKind),

    /// The request shape is not accepted by the attempt strategy
    #[error("Authentication method not supported: {0}")]
    MethodNotSupported(String),

    /// A presented token was malformed or rejected
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The request carried ambiguous or contradictory credentials
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The current authentication is not sufficient for the resource
    #[error("Insufficient authentication: {0}")]
    InsufficientAuthentication(String),

    /// A session strategy refused the authentication
    #[error(transparent)]
    Session(#[from] SessionAuthenticationError),
}

impl AuthenticationError {
    /// Whether this error originates from the credential service rather than
    /// from the presented credentials
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InternalService(_))
    }

    /// Short machine-readable code, safe to expose in responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadCredentials | Self::UsernameNotFound(_) => "bad_credentials",
            Self::Disabled(_) => "account_disabled",
            Self::Locked(_) => "account_locked",
            Self::AccountExpired(_) => "account_expired",
            Self::CredentialsExpired(_) => "credentials_expired",
            Self::InternalService(_) => "internal_error",
            Self::ProviderNotFound(_) => "provider_not_found",
            Self::MethodNotSupported(_) => "method_not_supported",
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InsufficientAuthentication(_) => "insufficient_authentication",
            Self::Session(_) => "session_limit_exceeded",
        }
    }
}

/// Session admission failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionAuthenticationError {
    /// The principal already holds the maximum number of sessions and the
    /// strict policy refuses new logins
    #[error("Maximum sessions of {allowed} for this principal exceeded")]
    MaximumSessionsExceeded {
        /// Configured maximum
        allowed: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_converts_into_authentication_error() {
        let err: AuthenticationError =
            SessionAuthenticationError::MaximumSessionsExceeded { allowed: 2 }.into();
        assert!(matches!(err, AuthenticationError::Session(_)));
        assert_eq!(err.code(), "session_limit_exceeded");
        assert!(err.to_string().contains("Maximum sessions of 2"));
    }

    #[test]
    fn test_internal_classification() {
        assert!(AuthenticationError::InternalService("db down".into()).is_internal());
        assert!(!AuthenticationError::BadCredentials.is_internal());
        assert!(!AuthenticationError::Locked("bob".into()).is_internal());
    }

    #[test]
    fn test_unknown_user_shares_code_with_bad_credentials() {
        assert_eq!(
            AuthenticationError::UsernameNotFound("ghost".into()).code(),
            AuthenticationError::BadCredentials.code()
        );
    }

    #[test]
    fn test_duplicate_order_message_names_both_sides() {
        let err = ConfigurationError::DuplicateOrder {
            order: 5,
            existing: "AdminChain".into(),
            conflicting: "ApiChain".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("AdminChain"));
        assert!(msg.contains("ApiChain"));
        assert!(msg.contains('5'));
    }
}
