//! Username/password form login

use http::Method;
use serde_json::Value;
use warden_core::{Authentication, AuthenticationError, AuthenticationManager};

use crate::authentication::AuthenticationAttempt;
use crate::exchange::Exchange;

/// Default form field for the username
pub const DEFAULT_USERNAME_PARAMETER: &str = "username";

/// Default form field for the password
pub const DEFAULT_PASSWORD_PARAMETER: &str = "password";

/// Reads credentials from form parameters
#[derive(Debug, Clone)]
pub struct UsernamePasswordAttempt {
    username_parameter: String,
    password_parameter: String,
    post_only: bool,
}

impl Default for UsernamePasswordAttempt {
    fn default() -> Self {
        Self {
            username_parameter: DEFAULT_USERNAME_PARAMETER.to_string(),
            password_parameter: DEFAULT_PASSWORD_PARAMETER.to_string(),
            post_only: true,
        }
    }
}

impl UsernamePasswordAttempt {
    /// Attempt with the default parameter names, POST only
    pub fn new() -> Self {
        Self::default()
    }

    /// Form field carrying the username
    pub fn with_username_parameter(mut self, name: impl Into<String>) -> Self {
        self.username_parameter = name.into();
        self
    }

    /// Form field carrying the password
    pub fn with_password_parameter(mut self, name: impl Into<String>) -> Self {
        self.password_parameter = name.into();
        self
    }

    /// Whether methods other than POST are refused (default `true`)
    pub fn with_post_only(mut self, post_only: bool) -> Self {
        self.post_only = post_only;
        self
    }
}

impl AuthenticationAttempt for UsernamePasswordAttempt {
    fn attempt(
        &self,
        exchange: &mut Exchange,
        manager: &dyn AuthenticationManager,
    ) -> Result<Option<Authentication>, AuthenticationError> {
        let request = &exchange.request;
        if self.post_only && request.method != Method::POST {
            return Err(AuthenticationError::MethodNotSupported(request.method.to_string()));
        }

        let username = request.parameter(&self.username_parameter).unwrap_or("").trim();
        let password = request.parameter(&self.password_parameter).unwrap_or("");
        let mut authentication = Authentication::username_password(username, password);
        if let Some(addr) = request.remote_addr() {
            authentication
                .details
                .insert("remote_address".into(), Value::String(addr.ip().to_string()));
        }
        if let Some(session_id) = request.session_id() {
            authentication
                .details
                .insert("session_id".into(), Value::String(session_id));
        }

        manager.authenticate(authentication).map(Some)
    }
}
