//! Anonymous authentication

use tracing::trace;
use warden_core::{ANONYMOUS_AUTHORITY, ANONYMOUS_PRINCIPAL, Authentication, GrantedAuthority, authority_list};

use crate::error::WebError;
use crate::exchange::Exchange;
use crate::filter::{Filter, Next};

/// Installs an anonymous authentication when nobody is logged in
///
/// Downstream stages can then treat "no login" as an ordinary principal
/// (`anonymousUser` with `ROLE_ANONYMOUS` by default).
#[derive(Debug, Clone)]
pub struct AnonymousAuthenticationFilter {
    principal: String,
    authorities: Vec<GrantedAuthority>,
}

impl Default for AnonymousAuthenticationFilter {
    fn default() -> Self {
        Self {
            principal: ANONYMOUS_PRINCIPAL.to_string(),
            authorities: authority_list(&[ANONYMOUS_AUTHORITY]),
        }
    }
}

impl AnonymousAuthenticationFilter {
    /// Filter with a custom principal and authorities
    pub fn new(principal: impl Into<String>, authorities: Vec<GrantedAuthority>) -> Self {
        Self {
            principal: principal.into(),
            authorities,
        }
    }
}

impl Filter for AnonymousAuthenticationFilter {
    fn name(&self) -> &'static str {
        "AnonymousAuthenticationFilter"
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        if exchange.security.authentication.is_none() {
            trace!(path = exchange.request.path(), "Installing anonymous authentication");
            exchange.security.set_authentication(Authentication::anonymous_with(
                self.principal.clone(),
                self.authorities.clone(),
            ));
        }
        next.run(exchange)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::AuthenticationKind;

    use super::*;
    use crate::exchange::HttpRequest;

    fn run(filter: &AnonymousAuthenticationFilter, exchange: &mut Exchange) -> Option<String> {
        let mut seen = None;
        filter
            .do_filter(
                exchange,
                Next::terminal(&mut |ex: &mut Exchange| {
                    seen = ex.security.principal().map(String::from);
                    Ok(())
                }),
            )
            .unwrap();
        seen
    }

    #[test]
    fn test_installs_anonymous() {
        let mut exchange = Exchange::new(HttpRequest::get("/"));
        assert_eq!(run(&AnonymousAuthenticationFilter::default(), &mut exchange).as_deref(), Some("anonymousUser"));
        let auth = exchange.security.authentication.unwrap();
        assert!(auth.is_anonymous());
        assert!(auth.has_authority("ROLE_ANONYMOUS"));
    }

    #[test]
    fn test_keeps_existing_authentication() {
        let mut exchange = Exchange::new(HttpRequest::get("/"));
        exchange.security.set_authentication(
            Authentication::builder(AuthenticationKind::UsernamePassword)
                .principal("alice")
                .authenticated(true)
                .build()
                .unwrap(),
        );
        assert_eq!(run(&AnonymousAuthenticationFilter::default(), &mut exchange).as_deref(), Some("alice"));
    }

    #[test]
    fn test_custom_principal() {
        let filter = AnonymousAuthenticationFilter::new("guest", authority_list(&["ROLE_GUEST"]));
        let mut exchange = Exchange::new(HttpRequest::get("/"));
        assert_eq!(run(&filter, &mut exchange).as_deref(), Some("guest"));
    }
}
