//! Success and failure handlers for the processing stage

use std::fmt;

use http::StatusCode;
use http::header::WWW_AUTHENTICATE;
use tracing::trace;
use warden_core::{Authentication, AuthenticationError};

use crate::error::WebError;
use crate::exchange::Exchange;

/// Session attribute holding the code of the last failed login
pub const AUTHENTICATION_ERROR_ATTRIBUTE: &str = "WARDEN_LAST_AUTHENTICATION_ERROR";

/// Completes the response after a committed authentication
pub trait AuthenticationSuccessHandler: Send + Sync + fmt::Debug {
    /// Handle the success
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn on_authentication_success(
        &self,
        exchange: &mut Exchange,
        authentication: &Authentication,
    ) -> Result<(), WebError>;
}

/// Completes the response after a rejected authentication
pub trait AuthenticationFailureHandler: Send + Sync + fmt::Debug {
    /// Handle the failure
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn on_authentication_failure(
        &self,
        exchange: &mut Exchange,
        failure: &AuthenticationError,
    ) -> Result<(), WebError>;
}

/// Leaves the response alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSuccessHandler;

impl AuthenticationSuccessHandler for NoopSuccessHandler {
    fn on_authentication_success(
        &self,
        _exchange: &mut Exchange,
        _authentication: &Authentication,
    ) -> Result<(), WebError> {
        Ok(())
    }
}

/// Redirects to a target URL after login
///
/// A `target` request parameter overrides the default target when enabled;
/// only relative paths are honoured.
#[derive(Debug, Clone)]
pub struct RedirectSuccessHandler {
    default_target: String,
    target_parameter: Option<String>,
}

impl Default for RedirectSuccessHandler {
    fn default() -> Self {
        Self::new("/")
    }
}

impl RedirectSuccessHandler {
    /// Redirect to `default_target` (relative to the context path)
    pub fn new(default_target: impl Into<String>) -> Self {
        Self {
            default_target: default_target.into(),
            target_parameter: None,
        }
    }

    /// Honour a request parameter naming the target
    pub fn with_target_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.target_parameter = Some(parameter.into());
        self
    }

    fn target(&self, exchange: &Exchange) -> String {
        let requested = self
            .target_parameter
            .as_deref()
            .and_then(|p| exchange.request.parameter(p))
            .filter(|t| t.starts_with('/') && !t.starts_with("//"));
        let target = requested.unwrap_or(self.default_target.as_str());
        format!("{}{}", exchange.request.context_path(), target)
    }
}

impl AuthenticationSuccessHandler for RedirectSuccessHandler {
    fn on_authentication_success(
        &self,
        exchange: &mut Exchange,
        authentication: &Authentication,
    ) -> Result<(), WebError> {
        let target = self.target(exchange);
        trace!(principal = authentication.name(), target = %target, "Redirecting after login");
        exchange.response.send_redirect(&target);
        Ok(())
    }
}

/// Redirects to a failure URL, remembering the failure code in the session
#[derive(Debug, Clone)]
pub struct RedirectFailureHandler {
    failure_url: String,
}

impl Default for RedirectFailureHandler {
    fn default() -> Self {
        Self::new("/login?error")
    }
}

impl RedirectFailureHandler {
    /// Redirect to `failure_url` (relative to the context path)
    pub fn new(failure_url: impl Into<String>) -> Self {
        Self {
            failure_url: failure_url.into(),
        }
    }
}

impl AuthenticationFailureHandler for RedirectFailureHandler {
    fn on_authentication_failure(
        &self,
        exchange: &mut Exchange,
        failure: &AuthenticationError,
    ) -> Result<(), WebError> {
        if let Some(session) = exchange.request.session() {
            session.set_attribute(AUTHENTICATION_ERROR_ATTRIBUTE, failure.code().to_string());
        }
        let location = format!("{}{}", exchange.request.context_path(), self.failure_url);
        exchange.response.send_redirect(&location);
        Ok(())
    }
}

/// Responds with a status and an optional `WWW-Authenticate` challenge
#[derive(Debug, Clone)]
pub struct StatusFailureHandler {
    status: StatusCode,
    challenge: Option<String>,
}

impl StatusFailureHandler {
    /// Respond with `status`
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            challenge: None,
        }
    }

    /// `401 Unauthorized` without a challenge
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED)
    }

    /// Add a `WWW-Authenticate` challenge
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }
}

impl AuthenticationFailureHandler for StatusFailureHandler {
    fn on_authentication_failure(
        &self,
        exchange: &mut Exchange,
        _failure: &AuthenticationError,
    ) -> Result<(), WebError> {
        if let Some(challenge) = &self.challenge {
            exchange.response.set_header(WWW_AUTHENTICATE, challenge);
        }
        exchange.response.send_error(self.status);
        Ok(())
    }
}
