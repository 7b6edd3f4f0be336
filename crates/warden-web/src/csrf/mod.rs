//! CSRF tokens
//!
//! The token for a request is materialized lazily through
//! [`DeferredCsrfToken`]: most requests never need it, and loading or
//! generating it touches the session.

use std::fmt;
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use tracing::trace;
use uuid::Uuid;

use crate::exchange::{HttpRequest, HttpResponse};

mod filter;

pub use filter::{CsrfFilter, CsrfLogoutHandler, default_requires_protection};

/// Default header carrying the token
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-TOKEN";

/// Default form parameter carrying the token
pub const DEFAULT_CSRF_PARAMETER: &str = "_csrf";

/// Session attribute holding the token
pub const CSRF_TOKEN_ATTRIBUTE: &str = "WARDEN_CSRF_TOKEN";

/// A CSRF token and where clients send it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    /// Header clients echo the token in
    pub header_name: String,
    /// Form parameter clients echo the token in
    pub parameter_name: String,
    /// Token value
    pub token: String,
}

impl CsrfToken {
    /// Token with the default header and parameter names
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            header_name: DEFAULT_CSRF_HEADER.to_string(),
            parameter_name: DEFAULT_CSRF_PARAMETER.to_string(),
            token: token.into(),
        }
    }
}

/// Generates, stores and loads CSRF tokens
pub trait CsrfTokenRepository: Send + Sync + fmt::Debug {
    /// Create a fresh token (not yet stored)
    fn generate_token(&self, request: &HttpRequest) -> CsrfToken;

    /// Store a token; `None` removes the stored one
    fn save_token(&self, token: Option<&CsrfToken>, request: &mut HttpRequest, response: &mut HttpResponse);

    /// Stored token, if any
    fn load_token(&self, request: &HttpRequest) -> Option<CsrfToken>;
}

/// Keeps the token in the transport session
#[derive(Debug, Clone)]
pub struct SessionCsrfTokenRepository {
    header_name: String,
    parameter_name: String,
    attribute: String,
}

impl Default for SessionCsrfTokenRepository {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_CSRF_HEADER.to_string(),
            parameter_name: DEFAULT_CSRF_PARAMETER.to_string(),
            attribute: CSRF_TOKEN_ATTRIBUTE.to_string(),
        }
    }
}

impl SessionCsrfTokenRepository {
    /// Repository with default names
    pub fn new() -> Self {
        Self::default()
    }

    /// Header clients echo the token in
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Form parameter clients echo the token in
    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }
}

impl CsrfTokenRepository for SessionCsrfTokenRepository {
    fn generate_token(&self, _request: &HttpRequest) -> CsrfToken {
        CsrfToken {
            header_name: self.header_name.clone(),
            parameter_name: self.parameter_name.clone(),
            token: Uuid::new_v4().to_string(),
        }
    }

    fn save_token(&self, token: Option<&CsrfToken>, request: &mut HttpRequest, _response: &mut HttpResponse) {
        match token {
            Some(token) => {
                request
                    .get_or_create_session()
                    .set_attribute(self.attribute.clone(), token.clone());
            }
            None => {
                if let Some(session) = request.session() {
                    session.remove_attribute(&self.attribute);
                }
            }
        }
    }

    fn load_token(&self, request: &HttpRequest) -> Option<CsrfToken> {
        request
            .session()
            .and_then(|session| session.attribute::<CsrfToken>(&self.attribute))
    }
}

/// Per-request lazy handle on the CSRF token
///
/// The first [`get`](Self::get) loads the stored token or generates and saves
/// a new one; later calls return the same token without touching the
/// repository. The handle is not shared across requests.
#[derive(Debug)]
pub struct DeferredCsrfToken {
    repository: Arc<dyn CsrfTokenRepository>,
    cell: OnceCell<(CsrfToken, bool)>,
}

impl DeferredCsrfToken {
    /// Defer token resolution to `repository`
    pub fn new(repository: Arc<dyn CsrfTokenRepository>) -> Self {
        Self {
            repository,
            cell: OnceCell::new(),
        }
    }

    /// Materialize the token
    pub fn get(&self, request: &mut HttpRequest, response: &mut HttpResponse) -> CsrfToken {
        let (token, _) = self.cell.get_or_init(|| match self.repository.load_token(request) {
            Some(token) => {
                trace!("Loaded stored CSRF token");
                (token, false)
            }
            None => {
                let token = self.repository.generate_token(request);
                self.repository.save_token(Some(&token), request, response);
                trace!("Generated and saved new CSRF token");
                (token, true)
            }
        });
        token.clone()
    }

    /// Whether the materialized token was freshly generated
    ///
    /// Does not materialize the token; `false` before the first `get`.
    pub fn is_generated(&self) -> bool {
        self.cell.get().is_some_and(|(_, generated)| *generated)
    }

    /// Whether `get` has run
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}
