use std::sync::Arc;

use http::Method;
use warden_core::ConfigurationError;
use warden_web::authorization::{
    AccessDeniedHandler, AccessRule, AuthenticationEntryPoint, AuthorizationFilter, Http401EntryPoint,
};
use warden_web::matcher::{AnyRequestMatcher, PathPatternRequestMatcher, RequestMatcher};

use crate::configurer::Configurer;
use crate::configurers::event_publisher;
use crate::http::HttpSecurity;

/// URL access rules, evaluated first match wins
///
/// Locations other configurers open up (login page, logout URL) come before
/// every rule added here.
#[derive(Debug, Default)]
pub struct AuthorizeRequestsConfigurer {
    permitted: Vec<Arc<dyn RequestMatcher>>,
    rules: Vec<(Arc<dyn RequestMatcher>, AccessRule)>,
}

impl AuthorizeRequestsConfigurer {
    /// Apply `rule` to requests accepted by `matcher`
    pub fn request_matcher(&mut self, matcher: Arc<dyn RequestMatcher>, rule: AccessRule) -> &mut Self {
        self.rules.push((matcher, rule));
        self
    }

    /// Apply `rule` to paths matching an Ant-style `pattern`
    pub fn path(&mut self, pattern: &str, rule: AccessRule) -> &mut Self {
        self.request_matcher(Arc::new(PathPatternRequestMatcher::new(pattern)), rule)
    }

    /// Apply `rule` to `method` requests on paths matching `pattern`
    pub fn method_path(&mut self, method: Method, pattern: &str, rule: AccessRule) -> &mut Self {
        self.request_matcher(Arc::new(PathPatternRequestMatcher::with_method(method, pattern)), rule)
    }

    /// Apply `rule` to everything not matched so far
    pub fn any_request(&mut self, rule: AccessRule) -> &mut Self {
        self.request_matcher(Arc::new(AnyRequestMatcher), rule)
    }

    /// Grant access to `matcher` ahead of every rule
    pub fn permit(&mut self, matcher: Arc<dyn RequestMatcher>) -> &mut Self {
        self.permitted.push(matcher);
        self
    }

    /// Number of mappings, permitted locations included
    pub fn len(&self) -> usize {
        self.permitted.len() + self.rules.len()
    }

    /// Whether no mapping is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Configurer<HttpSecurity> for AuthorizeRequestsConfigurer {
    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if self.rules.is_empty() {
            return Err(ConfigurationError::InvalidSetting(
                "At least one mapping is required (for example any_request(AccessRule::Authenticated))".into(),
            ));
        }
        let rules = self
            .permitted
            .iter()
            .map(|matcher| (Arc::clone(matcher), AccessRule::PermitAll))
            .chain(self.rules.iter().cloned())
            .collect();
        let entry_point = http
            .shared::<Arc<dyn AuthenticationEntryPoint>>()
            .unwrap_or_else(|| Arc::new(Http401EntryPoint::new()));
        let mut filter = AuthorizationFilter::new(rules)
            .with_entry_point(entry_point)
            .with_event_publisher(event_publisher(http));
        if let Some(handler) = http.shared::<Arc<dyn AccessDeniedHandler>>() {
            filter = filter.with_access_denied_handler(handler);
        }
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
