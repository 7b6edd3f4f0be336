//! Request-scoped values threaded through every stage
//!
//! An [`Exchange`] owns the request, the response being assembled and the
//! request's [`SecurityContext`]. Stages receive `&mut Exchange`; nothing is
//! stored in thread-locals.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::context::SecurityContext;
use crate::csrf::{CsrfToken, DeferredCsrfToken};
use crate::session::store::{HttpSession, SessionStore};

/// Form parameters decoded from a request body by an upstream layer
///
/// Pipeline stages only see the request head. Layers that buffer
/// `application/x-www-form-urlencoded` bodies insert this extension so form
/// login can read credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParameters(pub Vec<(String, String)>);

impl FormParameters {
    /// Decode an urlencoded body
    pub fn parse(body: &[u8]) -> Self {
        Self(parse_urlencoded(&String::from_utf8_lossy(body)))
    }
}

/// Decode `a=1&b=2` pairs, treating `+` as a space
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Inbound request as seen by the pipeline
#[derive(Debug)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
    /// Typed request attributes
    pub extensions: Extensions,
    context_path: String,
    parameters: HashMap<String, Vec<String>>,
    remote_addr: Option<SocketAddr>,
    session: Option<Arc<HttpSession>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl HttpRequest {
    /// Create a request
    pub fn new(method: Method, uri: Uri) -> Self {
        let mut request = Self {
            method,
            uri,
            headers: HeaderMap::new(),
            extensions: Extensions::new(),
            context_path: String::new(),
            parameters: HashMap::new(),
            remote_addr: None,
            session: None,
            session_store: None,
        };
        request.parse_query();
        request
    }

    /// `GET` request for a literal path (may include a query string)
    pub fn get(path_and_query: &str) -> Self {
        Self::new(Method::GET, Self::parse_uri(path_and_query))
    }

    /// `POST` request for a literal path (may include a query string)
    pub fn post(path_and_query: &str) -> Self {
        Self::new(Method::POST, Self::parse_uri(path_and_query))
    }

    fn parse_uri(path_and_query: &str) -> Uri {
        path_and_query.parse().unwrap_or_else(|e| {
            warn!(uri = path_and_query, error = %e, "Unparseable request URI, using /");
            Uri::from_static("/")
        })
    }

    /// Build from the head of an `http::Request`
    pub fn from_parts(parts: http::request::Parts) -> Self {
        let mut request = Self::new(parts.method, parts.uri);
        request.headers = parts.headers;
        request.extensions = parts.extensions;
        if let Some(form) = request.extensions.get::<FormParameters>().cloned() {
            for (name, value) in form.0 {
                request.parameters.entry(name).or_default().push(value);
            }
        }
        request
    }

    fn parse_query(&mut self) {
        if let Some(query) = self.uri.query() {
            for (name, value) in parse_urlencoded(query) {
                self.parameters.entry(name).or_default().push(value);
            }
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.append(name, value);
            }
            Err(e) => warn!(header = %name, error = %e, "Dropping invalid header value"),
        }
        self
    }

    /// Add a request parameter (as if decoded from the body)
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Set the application context path (e.g. `/app`)
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// Set the peer address
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Attach an existing transport session
    pub fn with_session(mut self, session: Arc<HttpSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Use `store` to create and look up transport sessions
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Full request path including the context path
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Context path prefix (empty when deployed at the root)
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Path relative to the context path
    pub fn path_within_application(&self) -> &str {
        let path = self.path();
        if self.context_path.is_empty() {
            return path;
        }
        match path.strip_prefix(self.context_path.as_str()) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// Peer address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// First value of a parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a parameter
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters.get(name).map_or(&[], Vec::as_slice)
    }

    /// Header value as UTF-8
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type from `Content-Type`, without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }

    /// Cookie value by name
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.to_string())
    }

    /// Current transport session, if one exists and is still valid
    pub fn session(&self) -> Option<Arc<HttpSession>> {
        self.session.as_ref().filter(|s| s.is_valid()).cloned()
    }

    /// Current transport session id
    pub fn session_id(&self) -> Option<String> {
        self.session().map(|s| s.id())
    }

    /// Current transport session, creating one if needed
    pub fn get_or_create_session(&mut self) -> Arc<HttpSession> {
        if let Some(session) = self.session() {
            return session;
        }
        let session = match &self.session_store {
            Some(store) => store.create(),
            None => Arc::new(HttpSession::new()),
        };
        debug!(session_id = %session.id(), "Created transport session");
        self.session = Some(Arc::clone(&session));
        session
    }

    /// Rotate the transport session id, keeping its attributes
    ///
    /// Returns the new id, or `None` when there is no session.
    pub fn change_session_id(&mut self) -> Option<String> {
        let session = self.session()?;
        let old_id = session.id();
        let new_id = match &self.session_store {
            Some(store) => store.change_id(&session),
            None => session.rotate_id(),
        };
        debug!(old_session_id = %old_id, new_session_id = %new_id, "Changed session id");
        Some(new_id)
    }

    /// Invalidate the transport session, if any
    pub fn invalidate_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.invalidate();
            if let Some(store) = &self.session_store {
                store.remove(&session.id());
            }
            debug!(session_id = %session.id(), "Invalidated transport session");
        }
    }
}

/// `Set-Cookie` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Path attribute
    pub path: String,
    /// `Max-Age`; `Some(0)` deletes the cookie
    pub max_age: Option<i64>,
    /// `HttpOnly`
    pub http_only: bool,
    /// `Secure`
    pub secure: bool,
}

impl ResponseCookie {
    /// Session-scoped, HTTP-only cookie at `/`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: None,
            http_only: true,
            secure: false,
        }
    }

    /// Cookie that deletes `name` on the client
    pub fn expired(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_age: Some(0),
            ..Self::new(name, "")
        }
    }

    fn header_value(&self) -> String {
        let mut value = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(max_age) = self.max_age {
            value.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            value.push_str("; HttpOnly");
        }
        if self.secure {
            value.push_str("; Secure");
        }
        value
    }
}

/// Response being assembled by the pipeline
#[derive(Debug, Default)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
    committed: bool,
}

impl HttpResponse {
    /// Empty `200 OK` response
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stage already produced the final response
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Send a redirect (`302 Found`)
    pub fn send_redirect(&mut self, location: &str) {
        self.status = StatusCode::FOUND;
        match HeaderValue::from_str(location) {
            Ok(value) => {
                self.headers.insert(header::LOCATION, value);
            }
            Err(e) => warn!(location, error = %e, "Invalid redirect location"),
        }
        self.committed = true;
    }

    /// Send an error status with an empty body
    pub fn send_error(&mut self, status: StatusCode) {
        self.status = status;
        self.body = Bytes::new();
        self.committed = true;
    }

    /// Send a status with a plain-text body
    pub fn send_text(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.status = status;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = body.into();
        self.committed = true;
    }

    /// Set a header, replacing any existing value
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(e) => warn!(header = %name, error = %e, "Dropping invalid header value"),
        }
    }

    /// Append a `Set-Cookie` header
    pub fn add_cookie(&mut self, cookie: &ResponseCookie) {
        match HeaderValue::from_str(&cookie.header_value()) {
            Ok(value) => {
                self.headers.append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = %cookie.name, error = %e, "Dropping invalid cookie"),
        }
    }

    /// Convert into an `http::Response` with the given body
    pub fn into_http<B>(self, body: impl FnOnce(Bytes) -> B) -> http::Response<B> {
        let mut response = http::Response::new(body(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// One request's journey through the pipeline
#[derive(Debug)]
pub struct Exchange {
    /// The request
    pub request: HttpRequest,
    /// The response under construction
    pub response: HttpResponse,
    /// Request-scoped security context
    pub security: SecurityContext,
    csrf: Option<DeferredCsrfToken>,
}

impl Exchange {
    /// Start an exchange for `request`
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: HttpResponse::new(),
            security: SecurityContext::default(),
            csrf: None,
        }
    }

    /// Expose a deferred CSRF token to downstream stages
    pub fn set_deferred_csrf_token(&mut self, token: DeferredCsrfToken) {
        self.csrf = Some(token);
    }

    /// The deferred CSRF token, without materializing it
    pub fn deferred_csrf_token(&self) -> Option<&DeferredCsrfToken> {
        self.csrf.as_ref()
    }

    /// Materialize the CSRF token (loads or generates at most once)
    pub fn csrf_token(&mut self) -> Option<CsrfToken> {
        let deferred = self.csrf.as_ref()?;
        Some(deferred.get(&mut self.request, &mut self.response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parameters_decoded() {
        let req = HttpRequest::get("/search?q=a+b%21&q=second&empty=");
        assert_eq!(req.parameter("q"), Some("a b!"));
        assert_eq!(req.parameter_values("q").len(), 2);
        assert_eq!(req.parameter("empty"), Some(""));
        assert_eq!(req.parameter("missing"), None);
    }

    #[test]
    fn test_context_path_stripped() {
        let req = HttpRequest::get("/app/login").with_context_path("/app");
        assert_eq!(req.path(), "/app/login");
        assert_eq!(req.path_within_application(), "/login");

        let root = HttpRequest::get("/app").with_context_path("/app");
        assert_eq!(root.path_within_application(), "/");

        let other = HttpRequest::get("/application").with_context_path("/app");
        assert_eq!(other.path_within_application(), "/application");
    }

    #[test]
    fn test_cookie_lookup() {
        let req = HttpRequest::get("/")
            .with_header(header::COOKIE, "a=1; WARDEN_SESSION=abc; b=2");
        assert_eq!(req.cookie("WARDEN_SESSION").as_deref(), Some("abc"));
        assert_eq!(req.cookie("zzz"), None);
    }

    #[test]
    fn test_content_type_without_parameters() {
        let req = HttpRequest::post("/login")
            .with_header(header::CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8");
        assert_eq!(req.content_type(), Some("application/x-www-form-urlencoded"));
    }

    #[test]
    fn test_form_parameters_extension_merged() {
        let mut parts = http::Request::post("/login").body(()).unwrap().into_parts().0;
        parts
            .extensions
            .insert(FormParameters::parse(b"username=alice&password=p%40ss"));
        let req = HttpRequest::from_parts(parts);
        assert_eq!(req.parameter("username"), Some("alice"));
        assert_eq!(req.parameter("password"), Some("p@ss"));
    }

    #[test]
    fn test_session_lifecycle_without_store() {
        let mut req = HttpRequest::get("/");
        assert!(req.session().is_none());
        let session = req.get_or_create_session();
        let id = session.id();
        assert_eq!(req.session_id(), Some(id.clone()));

        let new_id = req.change_session_id().unwrap();
        assert_ne!(new_id, id);
        assert_eq!(session.id(), new_id);

        req.invalidate_session();
        assert!(req.session().is_none());
        assert!(!session.is_valid());
    }

    #[test]
    fn test_redirect_commits_response() {
        let mut res = HttpResponse::new();
        assert!(!res.is_committed());
        res.send_redirect("/login?error");
        assert!(res.is_committed());
        assert_eq!(res.status, StatusCode::FOUND);
        assert_eq!(res.headers.get(header::LOCATION).unwrap(), "/login?error");
    }

    #[test]
    fn test_cookie_header_format() {
        let mut res = HttpResponse::new();
        res.add_cookie(&ResponseCookie::expired("remember-me", "/"));
        let value = res.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert_eq!(value, "remember-me=; Path=/; Max-Age=0; HttpOnly");
    }
}
