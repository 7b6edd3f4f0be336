//! Request firewall
//!
//! Runs before chain selection so that matchers only ever see normalized
//! paths. A rejected request never reaches a chain.

use std::collections::HashSet;
use std::fmt;

use http::Method;

use crate::error::RequestRejected;
use crate::exchange::HttpRequest;

/// Validates a request before any chain sees it
pub trait HttpFirewall: Send + Sync + fmt::Debug {
    /// Accept or reject the request
    ///
    /// # Errors
    ///
    /// Returns [`RequestRejected`] describing the offending part of the request.
    fn check(&self, request: &HttpRequest) -> Result<(), RequestRejected>;
}

/// Rejects non-normalized and ambiguous-encoded URLs
#[derive(Debug, Clone)]
pub struct StrictHttpFirewall {
    allowed_methods: Option<HashSet<Method>>,
    allow_semicolon: bool,
    allow_url_encoded_slash: bool,
    allow_url_encoded_percent: bool,
    allow_url_encoded_period: bool,
    allow_backslash: bool,
}

impl Default for StrictHttpFirewall {
    fn default() -> Self {
        let allowed_methods = [
            Method::DELETE,
            Method::GET,
            Method::HEAD,
            Method::OPTIONS,
            Method::PATCH,
            Method::POST,
            Method::PUT,
        ]
        .into_iter()
        .collect();
        Self {
            allowed_methods: Some(allowed_methods),
            allow_semicolon: false,
            allow_url_encoded_slash: false,
            allow_url_encoded_percent: false,
            allow_url_encoded_period: false,
            allow_backslash: false,
        }
    }
}

impl StrictHttpFirewall {
    /// Firewall with the strict defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any HTTP method
    pub fn allow_any_method(mut self) -> Self {
        self.allowed_methods = None;
        self
    }

    /// Replace the accepted methods
    pub fn with_allowed_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods = Some(methods.into_iter().collect());
        self
    }

    /// Accept `;` in the path
    pub fn allow_semicolon(mut self, allow: bool) -> Self {
        self.allow_semicolon = allow;
        self
    }

    /// Accept `%2F` in the path
    pub fn allow_url_encoded_slash(mut self, allow: bool) -> Self {
        self.allow_url_encoded_slash = allow;
        self
    }

    /// Accept `%25` in the path
    pub fn allow_url_encoded_percent(mut self, allow: bool) -> Self {
        self.allow_url_encoded_percent = allow;
        self
    }

    /// Accept `%2E` in the path
    pub fn allow_url_encoded_period(mut self, allow: bool) -> Self {
        self.allow_url_encoded_period = allow;
        self
    }

    /// Accept `\` and `%5C` in the path
    pub fn allow_backslash(mut self, allow: bool) -> Self {
        self.allow_backslash = allow;
        self
    }

    fn is_normalized(path: &str) -> bool {
        if path.contains("//") {
            return false;
        }
        !path
            .split('/')
            .skip(1)
            .any(|segment| segment == "." || segment == "..")
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

impl HttpFirewall for StrictHttpFirewall {
    fn check(&self, request: &HttpRequest) -> Result<(), RequestRejected> {
        if let Some(allowed) = &self.allowed_methods
            && !allowed.contains(&request.method)
        {
            return Err(RequestRejected::new(format!(
                "the HTTP method \"{}\" was not included within the allowed methods",
                request.method
            )));
        }

        let path = request.path();
        if !self.allow_semicolon && path.contains(';') {
            return Err(RequestRejected::new("the URL contained a semicolon"));
        }
        if !self.allow_url_encoded_slash && contains_ignore_case(path, "%2f") {
            return Err(RequestRejected::new("the URL contained an encoded slash"));
        }
        if !self.allow_url_encoded_percent && path.contains("%25") {
            return Err(RequestRejected::new("the URL contained an encoded percent"));
        }
        if !self.allow_url_encoded_period && contains_ignore_case(path, "%2e") {
            return Err(RequestRejected::new("the URL contained an encoded period"));
        }
        if !self.allow_backslash && (path.contains('\\') || contains_ignore_case(path, "%5c")) {
            return Err(RequestRejected::new("the URL contained a backslash"));
        }
        if !Self::is_normalized(path) {
            return Err(RequestRejected::new("the URL was not normalized"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(path: &str) -> Result<(), RequestRejected> {
        StrictHttpFirewall::default().check(&HttpRequest::get(path))
    }

    #[test]
    fn test_accepts_normal_paths() {
        assert!(check("/").is_ok());
        assert!(check("/api/orders/42").is_ok());
        assert!(check("/files/a.b.c").is_ok());
        assert!(check("/search?q=../x").is_ok());
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(check("/static/../admin").is_err());
        assert!(check("/static/./admin").is_err());
        assert!(check("/static/..").is_err());
        assert!(check("/static/.").is_err());
        assert!(check("/a//b").is_err());
    }

    #[test]
    fn test_rejects_encoded_characters() {
        assert!(check("/a%2Fb").is_err());
        assert!(check("/a%2fb").is_err());
        assert!(check("/a%252Fb").is_err());
        assert!(check("/%2E%2E/admin").is_err());
        assert!(check("/a%5Cb").is_err());
        assert!(check("/a;jsessionid=1").is_err());
    }

    #[test]
    fn test_rejection_reason() {
        let err = check("/a;b").unwrap_err();
        assert_eq!(err.reason, "the URL contained a semicolon");
    }

    #[test]
    fn test_method_allow_list() {
        let firewall = StrictHttpFirewall::default();
        let trace = HttpRequest::new(Method::TRACE, "/".parse().unwrap());
        assert!(firewall.check(&trace).is_err());
        assert!(firewall.clone().allow_any_method().check(&trace).is_ok());
    }

    #[test]
    fn test_relaxed_semicolon() {
        let firewall = StrictHttpFirewall::default().allow_semicolon(true);
        assert!(firewall.check(&HttpRequest::get("/a;b")).is_ok());
    }
}
