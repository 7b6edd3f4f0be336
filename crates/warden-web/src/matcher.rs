//! Request matchers
//!
//! Predicates over [`HttpRequest`] used to select chains, trigger processing
//! stages and key authorization rules.

use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::Regex;
use tracing::warn;

use crate::exchange::HttpRequest;

/// Predicate over a request
pub trait RequestMatcher: Send + Sync + fmt::Debug {
    /// Whether the request matches
    fn matches(&self, request: &HttpRequest) -> bool;
}

impl<M: RequestMatcher + ?Sized> RequestMatcher for Arc<M> {
    fn matches(&self, request: &HttpRequest) -> bool {
        (**self).matches(request)
    }
}

/// Matches every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyRequestMatcher;

impl RequestMatcher for AnyRequestMatcher {
    fn matches(&self, _request: &HttpRequest) -> bool {
        true
    }
}

/// Matches by HTTP method only
#[derive(Debug, Clone)]
pub struct MethodRequestMatcher {
    method: Method,
}

impl MethodRequestMatcher {
    /// Match `method`
    pub fn new(method: Method) -> Self {
        Self { method }
    }
}

impl RequestMatcher for MethodRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        request.method == self.method
    }
}

/// Ant-style path pattern, optionally restricted to one method
///
/// - `?` matches one character other than `/`
/// - `*` matches zero or more characters within a segment
/// - `**` matches zero or more whole segments
///
/// Patterns are matched against the path within the application (context
/// path removed).
#[derive(Clone)]
pub struct PathPatternRequestMatcher {
    pattern: String,
    method: Option<Method>,
    compiled: Compiled,
}

#[derive(Clone)]
enum Compiled {
    Any,
    Regex(Regex),
    Nothing,
}

impl fmt::Debug for PathPatternRequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "PathPattern[{method} {}]", self.pattern),
            None => write!(f, "PathPattern[{}]", self.pattern),
        }
    }
}

impl PathPatternRequestMatcher {
    /// Match `pattern` for any method
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let compiled = if pattern == "/**" || pattern == "**" {
            Compiled::Any
        } else {
            match Regex::new(&Self::to_regex(&pattern)) {
                Ok(regex) => Compiled::Regex(regex),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid path pattern; it will match nothing");
                    Compiled::Nothing
                }
            }
        };
        Self {
            pattern,
            method: None,
            compiled,
        }
    }

    /// Match `pattern` for `method` only
    pub fn with_method(method: Method, pattern: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            ..Self::new(pattern)
        }
    }

    /// The source pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn to_regex(pattern: &str) -> String {
        let mut out = String::from("^");
        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' if chars.get(i + 1) == Some(&'*') => {
                    let at_segment_start = i == 0 || chars[i - 1] == '/';
                    let at_segment_end = chars.get(i + 2).is_none_or(|c| *c == '/');
                    if at_segment_start && at_segment_end {
                        if i > 0 {
                            // "/**" also matches the bare prefix
                            out.pop();
                            out.push_str("(?:/.*)?");
                        } else {
                            out.push_str(".*");
                        }
                        i += 2;
                        if chars.get(i) == Some(&'/') && i > 2 {
                            out.push_str("(?:/|$)");
                            i += 1;
                        }
                        continue;
                    }
                    out.push_str("[^/]*");
                    i += 2;
                    continue;
                }
                '*' => out.push_str("[^/]*"),
                '?' => out.push_str("[^/]"),
                c => out.push_str(&regex::escape(&c.to_string())),
            }
            i += 1;
        }
        out.push('$');
        out
    }
}

impl RequestMatcher for PathPatternRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        if let Some(method) = &self.method
            && request.method != *method
        {
            return false;
        }
        match &self.compiled {
            Compiled::Any => true,
            Compiled::Regex(regex) => regex.is_match(request.path_within_application()),
            Compiled::Nothing => false,
        }
    }
}

/// Literal URL match, including the query string
///
/// `/logout` matches only `/logout`, never `/logout/` nor `/logout?x=1`. A
/// URL with a query matches only when the request query is identical. The
/// context path, when set, is prefixed before comparing.
#[derive(Debug, Clone)]
pub struct ExactUrlRequestMatcher {
    url: String,
}

impl ExactUrlRequestMatcher {
    /// Match `url` (path plus optional `?query`) exactly
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The literal URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RequestMatcher for ExactUrlRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        let request_uri = match request.query() {
            Some(query) => format!("{}?{}", request.path(), query),
            None => request.path().to_string(),
        };
        let expected = if request.context_path().is_empty() {
            self.url.clone()
        } else {
            format!("{}{}", request.context_path(), self.url)
        };
        request_uri == expected
    }
}

/// Matches when any delegate matches
#[derive(Debug, Clone)]
pub struct OrRequestMatcher {
    matchers: Vec<Arc<dyn RequestMatcher>>,
}

impl OrRequestMatcher {
    /// Combine delegates
    pub fn new(matchers: Vec<Arc<dyn RequestMatcher>>) -> Self {
        Self { matchers }
    }
}

impl RequestMatcher for OrRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.matchers.iter().any(|m| m.matches(request))
    }
}

/// Matches when every delegate matches
#[derive(Debug, Clone)]
pub struct AndRequestMatcher {
    matchers: Vec<Arc<dyn RequestMatcher>>,
}

impl AndRequestMatcher {
    /// Combine delegates
    pub fn new(matchers: Vec<Arc<dyn RequestMatcher>>) -> Self {
        Self { matchers }
    }
}

impl RequestMatcher for AndRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }
}

/// Inverts a delegate
#[derive(Debug, Clone)]
pub struct NegatedRequestMatcher {
    matcher: Arc<dyn RequestMatcher>,
}

impl NegatedRequestMatcher {
    /// Invert `matcher`
    pub fn new(matcher: Arc<dyn RequestMatcher>) -> Self {
        Self { matcher }
    }
}

impl RequestMatcher for NegatedRequestMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        !self.matcher.matches(request)
    }
}
