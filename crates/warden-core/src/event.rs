//! Authentication events
//!
//! The processing stage, the provider manager and the logout stage publish
//! [`AuthenticationEvent`]s through an [`AuthenticationEventPublisher`].
//! [`TracingEventPublisher`] writes them as structured `tracing` records under
//! the `audit::auth` target so they can be routed separately from
//! application logs:
//!
//! ```text
//! RUST_LOG=warn,audit::auth=info
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::authentication::{Authentication, AuthenticationKind};
use crate::error::AuthenticationError;

/// Something that happened to a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticationEvent {
    /// A provider accepted credentials
    AuthenticationSuccess {
        /// Principal name
        principal: String,
        /// Credential kind
        kind: AuthenticationKind,
    },

    /// The processing stage committed a successful login
    InteractiveAuthenticationSuccess {
        /// Principal name
        principal: String,
        /// Credential kind
        kind: AuthenticationKind,
    },

    /// Credentials were rejected
    AuthenticationFailure {
        /// Attempted principal, if known
        principal: Option<String>,
        /// Machine-readable failure code
        code: String,
        /// Human-readable reason
        reason: String,
    },

    /// A session was expired by concurrency control and reaped
    SessionExpired {
        /// Principal name
        principal: String,
        /// Reaped session id
        session_id: String,
    },

    /// A principal logged out
    LogoutSuccess {
        /// Principal name
        principal: String,
    },

    /// The authorization stage refused a request
    AccessDenied {
        /// Principal name (`anonymousUser` when nobody logged in)
        principal: String,
        /// Request path
        path: String,
    },
}

impl AuthenticationEvent {
    /// Success event for a provider result
    pub fn success(auth: &Authentication) -> Self {
        Self::AuthenticationSuccess {
            principal: auth.principal.clone(),
            kind: auth.kind,
        }
    }

    /// Interactive success event for a committed login
    pub fn interactive_success(auth: &Authentication) -> Self {
        Self::InteractiveAuthenticationSuccess {
            principal: auth.principal.clone(),
            kind: auth.kind,
        }
    }

    /// Failure event
    pub fn failure(principal: Option<&str>, error: &AuthenticationError) -> Self {
        Self::AuthenticationFailure {
            principal: principal.filter(|p| !p.is_empty()).map(String::from),
            code: error.code().to_string(),
            reason: error.to_string(),
        }
    }

    /// Stable event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess { .. } => "authentication_success",
            Self::InteractiveAuthenticationSuccess { .. } => "interactive_authentication_success",
            Self::AuthenticationFailure { .. } => "authentication_failure",
            Self::SessionExpired { .. } => "session_expired",
            Self::LogoutSuccess { .. } => "logout_success",
            Self::AccessDenied { .. } => "access_denied",
        }
    }
}

/// Sink for authentication events
pub trait AuthenticationEventPublisher: Send + Sync {
    /// Publish one event
    fn publish(&self, event: &AuthenticationEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl AuthenticationEventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &AuthenticationEvent) {}
}

/// Writes events as structured `tracing` records
#[derive(Debug, Clone)]
pub struct TracingEventPublisher {
    service_name: String,
    hash_identifiers: bool,
}

impl TracingEventPublisher {
    /// Create a publisher attributing events to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            hash_identifiers: false,
        }
    }

    /// Hash principal names before logging
    pub fn with_identifier_hashing(mut self, hash: bool) -> Self {
        self.hash_identifiers = hash;
        self
    }

    fn maybe_hash(&self, value: &str) -> String {
        if self.hash_identifiers {
            let hash = blake3::hash(value.as_bytes());
            format!("b3:{}", &hash.to_hex()[..16])
        } else {
            value.to_string()
        }
    }
}

impl Default for TracingEventPublisher {
    fn default() -> Self {
        Self::new("warden")
    }
}

impl AuthenticationEventPublisher for TracingEventPublisher {
    fn publish(&self, event: &AuthenticationEvent) {
        let audit_id = Uuid::new_v4();
        let event_type = event.event_type();
        match event {
            AuthenticationEvent::AuthenticationSuccess { principal, kind }
            | AuthenticationEvent::InteractiveAuthenticationSuccess { principal, kind } => {
                info!(
                    target: "audit::auth",
                    audit_id = %audit_id,
                    event_type,
                    principal = %self.maybe_hash(principal),
                    kind = ?kind,
                    service = %self.service_name,
                    "Authentication successful"
                );
            }
            AuthenticationEvent::AuthenticationFailure {
                principal,
                code,
                reason,
            } => {
                warn!(
                    target: "audit::auth",
                    audit_id = %audit_id,
                    event_type,
                    principal = ?principal.as_deref().map(|p| self.maybe_hash(p)),
                    code = %code,
                    reason = %reason,
                    service = %self.service_name,
                    "Authentication failed"
                );
            }
            AuthenticationEvent::SessionExpired {
                principal,
                session_id,
            } => {
                info!(
                    target: "audit::auth",
                    audit_id = %audit_id,
                    event_type,
                    principal = %self.maybe_hash(principal),
                    session_id = %session_id,
                    service = %self.service_name,
                    "Session expired"
                );
            }
            AuthenticationEvent::LogoutSuccess { principal } => {
                info!(
                    target: "audit::auth",
                    audit_id = %audit_id,
                    event_type,
                    principal = %self.maybe_hash(principal),
                    service = %self.service_name,
                    "Logout"
                );
            }
            AuthenticationEvent::AccessDenied { principal, path } => {
                warn!(
                    target: "audit::auth",
                    audit_id = %audit_id,
                    event_type,
                    principal = %self.maybe_hash(principal),
                    path = %path,
                    service = %self.service_name,
                    "Access denied"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_hashing() {
        let publisher = TracingEventPublisher::new("test").with_identifier_hashing(true);
        let hashed = publisher.maybe_hash("alice");
        assert!(hashed.starts_with("b3:"));
        assert_eq!(hashed.len(), 19);
        assert_eq!(publisher.maybe_hash("alice"), hashed);
    }

    #[test]
    fn test_event_serialization() {
        let event = AuthenticationEvent::success(&Authentication::anonymous());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"authentication_success\""));
        assert!(json.contains("\"kind\":\"anonymous\""));
    }

    #[test]
    fn test_failure_drops_empty_principal() {
        let event = AuthenticationEvent::failure(Some(""), &AuthenticationError::BadCredentials);
        assert_eq!(
            event,
            AuthenticationEvent::AuthenticationFailure {
                principal: None,
                code: "bad_credentials".into(),
                reason: "Bad credentials".into(),
            }
        );
    }

    #[test]
    fn test_publish_does_not_panic_without_subscriber() {
        let publisher = TracingEventPublisher::default();
        publisher.publish(&AuthenticationEvent::LogoutSuccess {
            principal: "bob".into(),
        });
        publisher.publish(&AuthenticationEvent::AccessDenied {
            principal: "bob".into(),
            path: "/admin".into(),
        });
    }
}
