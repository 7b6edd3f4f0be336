//! URL authorization
//!
//! [`AuthorizationFilter`] walks an ordered list of `(matcher, rule)` pairs;
//! the first pair whose matcher accepts the request decides. A request that
//! no rule covers is denied.
//!
//! Denials split two ways: a request without a full (non-anonymous)
//! authentication goes to the [`AuthenticationEntryPoint`] to start a login,
//! everybody else gets the [`AccessDeniedHandler`].

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use http::header::WWW_AUTHENTICATE;
use tracing::debug;
use warden_core::{
    ANONYMOUS_PRINCIPAL, Authentication, AuthenticationEvent, AuthenticationEventPublisher,
    GrantedAuthority, NoopEventPublisher,
};

use crate::error::WebError;
use crate::exchange::Exchange;
use crate::filter::{Filter, Next};
use crate::matcher::RequestMatcher;

/// Starts an authentication flow for a request that needs one
pub trait AuthenticationEntryPoint: Send + Sync + fmt::Debug {
    /// Write the challenge or redirect
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn commence(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError>;
}

/// `401 Unauthorized`, with an optional `WWW-Authenticate` challenge
#[derive(Debug, Clone, Default)]
pub struct Http401EntryPoint {
    challenge: Option<String>,
}

impl Http401EntryPoint {
    /// Bare 401
    pub fn new() -> Self {
        Self::default()
    }

    /// 401 with a `WWW-Authenticate` value
    pub fn with_challenge(challenge: impl Into<String>) -> Self {
        Self {
            challenge: Some(challenge.into()),
        }
    }
}

impl AuthenticationEntryPoint for Http401EntryPoint {
    fn commence(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError> {
        debug!(path = exchange.request.path(), reason, "Authentication required");
        if let Some(challenge) = &self.challenge {
            exchange.response.set_header(WWW_AUTHENTICATE, challenge);
        }
        exchange.response.send_error(StatusCode::UNAUTHORIZED);
        Ok(())
    }
}

/// Redirects to a login page
#[derive(Debug, Clone)]
pub struct LoginUrlEntryPoint {
    login_url: String,
}

impl LoginUrlEntryPoint {
    /// Redirect to `login_url` (relative to the context path)
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
        }
    }
}

impl AuthenticationEntryPoint for LoginUrlEntryPoint {
    fn commence(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError> {
        let location = format!("{}{}", exchange.request.context_path(), self.login_url);
        debug!(path = exchange.request.path(), location = %location, reason, "Redirecting to login page");
        exchange.response.send_redirect(&location);
        Ok(())
    }
}

/// Handles a request refused to an authenticated principal
pub trait AccessDeniedHandler: Send + Sync + fmt::Debug {
    /// Write the refusal
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] if the response cannot be produced.
    fn handle(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError>;
}

/// `403 Forbidden`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusAccessDeniedHandler;

impl AccessDeniedHandler for StatusAccessDeniedHandler {
    fn handle(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError> {
        debug!(path = exchange.request.path(), reason, "Access denied");
        exchange.response.send_error(StatusCode::FORBIDDEN);
        Ok(())
    }
}

/// Redirects to an error page
#[derive(Debug, Clone)]
pub struct RedirectAccessDeniedHandler {
    error_page: String,
}

impl RedirectAccessDeniedHandler {
    /// Redirect to `error_page`
    pub fn new(error_page: impl Into<String>) -> Self {
        Self {
            error_page: error_page.into(),
        }
    }
}

impl AccessDeniedHandler for RedirectAccessDeniedHandler {
    fn handle(&self, exchange: &mut Exchange, reason: &str) -> Result<(), WebError> {
        debug!(path = exchange.request.path(), reason, "Access denied, redirecting");
        let location = format!("{}{}", exchange.request.context_path(), self.error_page);
        exchange.response.send_redirect(&location);
        Ok(())
    }
}

/// Access decision for a matched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    /// Anyone
    PermitAll,
    /// No one
    DenyAll,
    /// Any non-anonymous authentication
    Authenticated,
    /// Only the anonymous authentication
    Anonymous,
    /// Holds `ROLE_<role>`
    HasRole(String),
    /// Holds one of `ROLE_<role>`
    HasAnyRole(Vec<String>),
    /// Holds an exact authority
    HasAuthority(String),
}

impl AccessRule {
    /// Role rule; a `ROLE_` prefix is added when missing
    pub fn has_role(role: &str) -> Self {
        Self::HasRole(GrantedAuthority::role(role).as_str().to_string())
    }

    /// Any-role rule; `ROLE_` prefixes are added when missing
    pub fn has_any_role(roles: &[&str]) -> Self {
        Self::HasAnyRole(
            roles
                .iter()
                .map(|r| GrantedAuthority::role(*r).as_str().to_string())
                .collect(),
        )
    }

    /// Authority rule
    pub fn has_authority(authority: impl Into<String>) -> Self {
        Self::HasAuthority(authority.into())
    }

    /// Evaluate the rule against the current authentication
    pub fn is_granted(&self, authentication: Option<&Authentication>) -> bool {
        let full = authentication.filter(|a| a.authenticated && !a.is_anonymous());
        match self {
            Self::PermitAll => true,
            Self::DenyAll => false,
            Self::Authenticated => full.is_some(),
            Self::Anonymous => authentication.is_none_or(Authentication::is_anonymous),
            Self::HasRole(role) => full.is_some_and(|a| a.has_authority(role)),
            Self::HasAnyRole(roles) => full.is_some_and(|a| roles.iter().any(|r| a.has_authority(r))),
            Self::HasAuthority(authority) => full.is_some_and(|a| a.has_authority(authority)),
        }
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermitAll => f.write_str("permitAll"),
            Self::DenyAll => f.write_str("denyAll"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Anonymous => f.write_str("anonymous"),
            Self::HasRole(role) => write!(f, "hasRole({role})"),
            Self::HasAnyRole(roles) => write!(f, "hasAnyRole({})", roles.join(",")),
            Self::HasAuthority(authority) => write!(f, "hasAuthority({authority})"),
        }
    }
}

/// Enforces URL access rules
pub struct AuthorizationFilter {
    rules: Vec<(Arc<dyn RequestMatcher>, AccessRule)>,
    entry_point: Arc<dyn AuthenticationEntryPoint>,
    access_denied: Arc<dyn AccessDeniedHandler>,
    publisher: Arc<dyn AuthenticationEventPublisher>,
}

impl fmt::Debug for AuthorizationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationFilter")
            .field("rules", &self.rules)
            .field("entry_point", &self.entry_point)
            .field("access_denied", &self.access_denied)
            .finish_non_exhaustive()
    }
}

impl AuthorizationFilter {
    /// Filter over `rules`, evaluated in order
    pub fn new(rules: Vec<(Arc<dyn RequestMatcher>, AccessRule)>) -> Self {
        Self {
            rules,
            entry_point: Arc::new(Http401EntryPoint::new()),
            access_denied: Arc::new(StatusAccessDeniedHandler),
            publisher: Arc::new(NoopEventPublisher),
        }
    }

    /// Entry point for unauthenticated denials
    pub fn with_entry_point(mut self, entry_point: Arc<dyn AuthenticationEntryPoint>) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Handler for authenticated denials
    pub fn with_access_denied_handler(mut self, handler: Arc<dyn AccessDeniedHandler>) -> Self {
        self.access_denied = handler;
        self
    }

    /// Publisher for access-denied events
    pub fn with_event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// The configured rules, in evaluation order
    pub fn rules(&self) -> &[(Arc<dyn RequestMatcher>, AccessRule)] {
        &self.rules
    }

    fn decide(&self, exchange: &Exchange) -> Option<&AccessRule> {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(&exchange.request))
            .map(|(_, rule)| rule)
    }
}

impl Filter for AuthorizationFilter {
    fn name(&self) -> &'static str {
        "AuthorizationFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        let rule = self.decide(exchange);
        let granted = rule.is_some_and(|rule| rule.is_granted(exchange.security.authentication.as_ref()));
        if granted {
            return next.run(exchange);
        }

        let reason = match rule {
            Some(rule) => format!("access rule {rule} not satisfied"),
            None => "no access rule matched the request".to_string(),
        };
        if exchange.security.is_authenticated() {
            self.publisher.publish(&AuthenticationEvent::AccessDenied {
                principal: exchange
                    .security
                    .principal()
                    .unwrap_or(ANONYMOUS_PRINCIPAL)
                    .to_string(),
                path: exchange.request.path().to_string(),
            });
            self.access_denied.handle(exchange, &reason)
        } else {
            self.entry_point.commence(exchange, &reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_core::{AuthenticationKind, UserDetails};

    use super::*;
    use crate::context::SecurityContext;
    use crate::exchange::HttpRequest;
    use crate::matcher::{AnyRequestMatcher, PathPatternRequestMatcher};

    fn user(roles: &[&str]) -> Authentication {
        let user = UserDetails::with_username("alice").password("x").roles(roles).build();
        Authentication::for_user(user, AuthenticationKind::UsernamePassword)
    }

    fn filter() -> AuthorizationFilter {
        AuthorizationFilter::new(vec![
            (Arc::new(PathPatternRequestMatcher::new("/public/**")), AccessRule::PermitAll),
            (Arc::new(PathPatternRequestMatcher::new("/admin/**")), AccessRule::has_role("ADMIN")),
            (Arc::new(PathPatternRequestMatcher::new("/api/**")), AccessRule::Authenticated),
        ])
    }

    fn run(filter: &AuthorizationFilter, path: &str, auth: Option<Authentication>) -> (bool, StatusCode) {
        let mut exchange = Exchange::new(HttpRequest::get(path));
        exchange.security = SecurityContext {
            authentication: auth,
        };
        let mut reached = false;
        filter
            .do_filter(
                &mut exchange,
                Next::terminal(&mut |_: &mut Exchange| {
                    reached = true;
                    Ok(())
                }),
            )
            .unwrap();
        (reached, exchange.response.status)
    }

    #[test]
    fn test_permit_all() {
        assert_eq!(run(&filter(), "/public/a", None), (true, StatusCode::OK));
    }

    #[test]
    fn test_unauthenticated_gets_401() {
        assert_eq!(run(&filter(), "/api/orders", None), (false, StatusCode::UNAUTHORIZED));
        assert_eq!(
            run(&filter(), "/api/orders", Some(Authentication::anonymous())),
            (false, StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_authenticated_without_role_gets_403() {
        assert_eq!(run(&filter(), "/admin/users", Some(user(&["USER"]))), (false, StatusCode::FORBIDDEN));
        assert_eq!(run(&filter(), "/admin/users", Some(user(&["ADMIN"]))), (true, StatusCode::OK));
    }

    #[test]
    fn test_unmatched_request_denied() {
        assert_eq!(run(&filter(), "/other", Some(user(&["USER"]))), (false, StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let filter = AuthorizationFilter::new(vec![
            (Arc::new(PathPatternRequestMatcher::new("/a/**")), AccessRule::DenyAll),
            (Arc::new(AnyRequestMatcher), AccessRule::PermitAll),
        ]);
        assert_eq!(run(&filter, "/a/b", Some(user(&["USER"]))), (false, StatusCode::FORBIDDEN));
        assert_eq!(run(&filter, "/b", None), (true, StatusCode::OK));
    }

    #[test]
    fn test_rule_evaluation() {
        let admin = user(&["ADMIN"]);
        let anon = Authentication::anonymous();
        assert!(AccessRule::has_any_role(&["USER", "ADMIN"]).is_granted(Some(&admin)));
        assert!(!AccessRule::has_role("ADMIN").is_granted(Some(&anon)));
        assert!(AccessRule::Anonymous.is_granted(Some(&anon)));
        assert!(AccessRule::Anonymous.is_granted(None));
        assert!(!AccessRule::Anonymous.is_granted(Some(&admin)));
        assert!(AccessRule::has_authority("ROLE_ADMIN").is_granted(Some(&admin)));
    }

    #[test]
    fn test_login_url_entry_point_redirects() {
        let filter = filter().with_entry_point(Arc::new(LoginUrlEntryPoint::new("/login")));
        let mut exchange = Exchange::new(HttpRequest::get("/app/api/x").with_context_path("/app"));
        filter
            .do_filter(&mut exchange, Next::terminal(&mut |_: &mut Exchange| Ok(())))
            .unwrap();
        assert_eq!(exchange.response.status, StatusCode::FOUND);
        assert_eq!(exchange.response.headers.get(http::header::LOCATION).unwrap(), "/app/login");
    }
}
