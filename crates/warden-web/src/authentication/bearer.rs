//! RFC 6750 bearer tokens
//!
//! Tokens are opaque here: resolution only locates the token in the request
//! and checks its character set. Validation is the manager's job.

use std::sync::OnceLock;

use http::header::{AUTHORIZATION, HeaderName, WWW_AUTHENTICATE};
use http::{Method, StatusCode};
use regex::Regex;
use warden_core::{Authentication, AuthenticationError, AuthenticationManager};

use crate::authentication::{AuthenticationAttempt, AuthenticationFailureHandler};
use crate::error::WebError;
use crate::exchange::{Exchange, HttpRequest};
use crate::matcher::RequestMatcher;

const ACCESS_TOKEN_PARAMETER: &str = "access_token";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn authorization_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^Bearer (?P<token>[a-z0-9\-._~+/]+=*)$").expect("bearer token pattern is valid")
    })
}

fn multiple_tokens() -> AuthenticationError {
    AuthenticationError::InvalidRequest("Found multiple bearer tokens in the request".into())
}

/// Locates the bearer token in a request
///
/// The `Authorization` header is always consulted. The `access_token`
/// parameter is only honoured for GET requests (URI query) or form-encoded
/// POST requests (body) when the matching option is enabled. Presenting more
/// than one token is an error.
#[derive(Debug, Clone)]
pub struct BearerTokenResolver {
    header_name: HeaderName,
    allow_uri_query_parameter: bool,
    allow_form_encoded_body_parameter: bool,
}

impl Default for BearerTokenResolver {
    fn default() -> Self {
        Self {
            header_name: AUTHORIZATION,
            allow_uri_query_parameter: false,
            allow_form_encoded_body_parameter: false,
        }
    }
}

impl BearerTokenResolver {
    /// Resolver reading only the `Authorization` header
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the token from a different header
    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }

    /// Accept `?access_token=` on GET requests
    pub fn allow_uri_query_parameter(mut self, allow: bool) -> Self {
        self.allow_uri_query_parameter = allow;
        self
    }

    /// Accept `access_token` in form-encoded POST bodies
    pub fn allow_form_encoded_body_parameter(mut self, allow: bool) -> Self {
        self.allow_form_encoded_body_parameter = allow;
        self
    }

    /// Resolve the token, `None` when the request carries none
    ///
    /// # Errors
    ///
    /// - [`AuthenticationError::InvalidToken`] for a malformed bearer header
    /// - [`AuthenticationError::InvalidRequest`] when several tokens are present
    pub fn resolve(&self, request: &HttpRequest) -> Result<Option<String>, AuthenticationError> {
        let header_token = self.resolve_from_header(request)?;
        let parameter_token = if Self::is_parameter_supported(request) {
            Self::resolve_from_parameters(request)?
        } else {
            None
        };

        match (header_token, parameter_token) {
            (Some(_), Some(_)) => Err(multiple_tokens()),
            (Some(token), None) => Ok(Some(token)),
            (None, Some(token)) if self.is_parameter_enabled(request) => Ok(Some(token)),
            _ => Ok(None),
        }
    }

    fn resolve_from_header(&self, request: &HttpRequest) -> Result<Option<String>, AuthenticationError> {
        let Some(authorization) = request.header(&self.header_name) else {
            return Ok(None);
        };
        let starts_with_bearer = authorization
            .get(..6)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer"));
        if !starts_with_bearer {
            return Ok(None);
        }
        authorization_pattern()
            .captures(authorization)
            .and_then(|captures| captures.name("token"))
            .map(|token| Some(token.as_str().to_string()))
            .ok_or_else(|| AuthenticationError::InvalidToken("Bearer token is malformed".into()))
    }

    fn resolve_from_parameters(request: &HttpRequest) -> Result<Option<String>, AuthenticationError> {
        match request.parameter_values(ACCESS_TOKEN_PARAMETER) {
            [] => Ok(None),
            [token] => Ok(Some(token.clone())),
            _ => Err(multiple_tokens()),
        }
    }

    fn is_form_post(request: &HttpRequest) -> bool {
        request.method == Method::POST && request.content_type() == Some(FORM_CONTENT_TYPE)
    }

    fn is_parameter_supported(request: &HttpRequest) -> bool {
        request.method == Method::GET || Self::is_form_post(request)
    }

    fn is_parameter_enabled(&self, request: &HttpRequest) -> bool {
        (self.allow_form_encoded_body_parameter && Self::is_form_post(request))
            || (self.allow_uri_query_parameter && request.method == Method::GET)
    }
}

/// Triggers bearer processing only for requests that present a token
///
/// Requests with a malformed or ambiguous token also match, so that the
/// processing stage reports the error.
#[derive(Debug, Clone, Default)]
pub struct BearerTokenPresentMatcher {
    resolver: BearerTokenResolver,
}

impl BearerTokenPresentMatcher {
    /// Match requests from which `resolver` would produce a token or an error
    pub fn new(resolver: BearerTokenResolver) -> Self {
        Self { resolver }
    }
}

impl RequestMatcher for BearerTokenPresentMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        !matches!(self.resolver.resolve(request), Ok(None))
    }
}

/// Authenticates the resolved bearer token through the manager
#[derive(Debug, Clone, Default)]
pub struct BearerTokenAttempt {
    resolver: BearerTokenResolver,
}

impl BearerTokenAttempt {
    /// Attempt using `resolver`
    pub fn new(resolver: BearerTokenResolver) -> Self {
        Self { resolver }
    }
}

impl AuthenticationAttempt for BearerTokenAttempt {
    fn attempt(
        &self,
        exchange: &mut Exchange,
        manager: &dyn AuthenticationManager,
    ) -> Result<Option<Authentication>, AuthenticationError> {
        match self.resolver.resolve(&exchange.request)? {
            Some(token) => manager.authenticate(Authentication::bearer(token)).map(Some),
            None => Err(AuthenticationError::InvalidToken("Bearer token is missing".into())),
        }
    }
}

/// `401` with an RFC 6750 `WWW-Authenticate: Bearer` challenge
#[derive(Debug, Clone, Default)]
pub struct BearerTokenFailureHandler {
    realm: Option<String>,
}

impl BearerTokenFailureHandler {
    /// Handler with a realm in the challenge
    pub fn with_realm(realm: impl Into<String>) -> Self {
        Self {
            realm: Some(realm.into()),
        }
    }

    fn challenge(&self, failure: &AuthenticationError) -> (StatusCode, String) {
        let (status, code) = match failure {
            AuthenticationError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AuthenticationError::InsufficientAuthentication(_) => {
                (StatusCode::FORBIDDEN, "insufficient_scope")
            }
            _ => (StatusCode::UNAUTHORIZED, "invalid_token"),
        };
        let mut parts = Vec::new();
        if let Some(realm) = &self.realm {
            parts.push(format!("realm=\"{realm}\""));
        }
        parts.push(format!("error=\"{code}\""));
        let description = match failure {
            AuthenticationError::InvalidToken(reason) | AuthenticationError::InvalidRequest(reason) => {
                reason.clone()
            }
            // Provider detail stays in the logs
            _ => "Invalid token".to_string(),
        };
        parts.push(format!("error_description=\"{}\"", description.replace('"', "'")));
        (status, format!("Bearer {}", parts.join(", ")))
    }
}

impl AuthenticationFailureHandler for BearerTokenFailureHandler {
    fn on_authentication_failure(
        &self,
        exchange: &mut Exchange,
        failure: &AuthenticationError,
    ) -> Result<(), WebError> {
        let (status, challenge) = self.challenge(failure);
        exchange.response.set_header(WWW_AUTHENTICATE, &challenge);
        exchange.response.send_error(status);
        Ok(())
    }
}
