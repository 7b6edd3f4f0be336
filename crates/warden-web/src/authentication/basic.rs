//! HTTP Basic authentication

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use warden_core::{Authentication, AuthenticationError, AuthenticationManager};

use crate::authentication::AuthenticationAttempt;
use crate::exchange::{Exchange, HttpRequest};
use crate::matcher::RequestMatcher;

fn basic_credentials(request: &HttpRequest) -> Option<&str> {
    let header = request.header(AUTHORIZATION)?.trim();
    let (scheme, credentials) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("basic").then(|| credentials.trim())
}

/// Matches requests carrying `Authorization: Basic`
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAuthenticationMatcher;

impl RequestMatcher for BasicAuthenticationMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        basic_credentials(request).is_some()
    }
}

/// Decodes `Authorization: Basic` credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBasicAttempt;

impl HttpBasicAttempt {
    fn decode(encoded: &str) -> Result<(String, String), AuthenticationError> {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| AuthenticationError::InvalidRequest("Failed to decode basic authentication token".into()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| AuthenticationError::InvalidRequest("Basic authentication token is not UTF-8".into()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| AuthenticationError::InvalidRequest("Invalid basic authentication token".into()))?;
        Ok((username.to_string(), password.to_string()))
    }
}

impl AuthenticationAttempt for HttpBasicAttempt {
    fn attempt(
        &self,
        exchange: &mut Exchange,
        manager: &dyn AuthenticationManager,
    ) -> Result<Option<Authentication>, AuthenticationError> {
        let encoded = basic_credentials(&exchange.request).ok_or_else(|| {
            AuthenticationError::InvalidRequest("Missing basic authentication header".into())
        })?;
        let (username, password) = Self::decode(encoded)?;
        manager
            .authenticate(Authentication::username_password(username, password))
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_core::{
        AuthenticationProvider, DaoAuthenticationProvider, InMemoryUserDetailsService, ProviderManager,
        UserDetails,
    };

    use super::*;

    fn manager() -> ProviderManager {
        let users = InMemoryUserDetailsService::new();
        users.create_user(UserDetails::with_username("alice").password("{noop}pa:ss").build());
        let dao: Arc<dyn AuthenticationProvider> = Arc::new(DaoAuthenticationProvider::new(Arc::new(users)));
        ProviderManager::new(vec![dao])
    }

    fn basic(user_pass: &str) -> Exchange {
        let value = format!("Basic {}", STANDARD.encode(user_pass));
        Exchange::new(HttpRequest::get("/api").with_header(AUTHORIZATION, &value))
    }

    #[test]
    fn test_password_may_contain_colon() {
        let auth = HttpBasicAttempt.attempt(&mut basic("alice:pa:ss"), &manager()).unwrap().unwrap();
        assert_eq!(auth.name(), "alice");
    }

    #[test]
    fn test_wrong_password() {
        let err = HttpBasicAttempt.attempt(&mut basic("alice:nope"), &manager()).unwrap_err();
        assert!(matches!(err, AuthenticationError::BadCredentials));
    }

    #[test]
    fn test_undecodable_token() {
        let mut exchange = Exchange::new(HttpRequest::get("/api").with_header(AUTHORIZATION, "Basic !!!"));
        let err = HttpBasicAttempt.attempt(&mut exchange, &manager()).unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidRequest(_)));
    }

    #[test]
    fn test_matcher() {
        assert!(BasicAuthenticationMatcher.matches(&HttpRequest::get("/").with_header(AUTHORIZATION, "basic abc")));
        assert!(!BasicAuthenticationMatcher.matches(&HttpRequest::get("/").with_header(AUTHORIZATION, "Bearer abc")));
        assert!(!BasicAuthenticationMatcher.matches(&HttpRequest::get("/")));
    }
}
