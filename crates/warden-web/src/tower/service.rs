//! Tower Service running the security pipeline
//!
//! The pipeline is synchronous and runs inside [`Service::call`]. Only the
//! inner service is awaited, so the returned future never holds the
//! [`Exchange`].

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::SET_COOKIE;
use http::{HeaderMap, StatusCode};
use tower_service::Service;
use tracing::{debug, error};

use crate::context::SecurityContext;
use crate::exchange::{Exchange, HttpRequest, HttpResponse, ResponseCookie};
use crate::filter::{Dispatch, FilterChainProxy};
use crate::session::SessionStore;

use super::{SESSION_COOKIE, UnmatchedPolicy};

/// Future type for [`SecurityService`] responses
pub type SecurityServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Tower Service that secures requests before forwarding them
///
/// Requests that reach the end of their chain are forwarded with the
/// [`SecurityContext`] in their extensions. Anything a stage answered itself
/// (redirects, challenges, rejections) is returned without calling the
/// inner service.
#[derive(Clone)]
pub struct SecurityService<S> {
    inner: S,
    proxy: Arc<FilterChainProxy>,
    sessions: Option<Arc<dyn SessionStore>>,
    unmatched: UnmatchedPolicy,
}

impl<S: fmt::Debug> fmt::Debug for SecurityService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityService")
            .field("inner", &self.inner)
            .field("proxy", &self.proxy)
            .field("unmatched", &self.unmatched)
            .finish_non_exhaustive()
    }
}

impl<S> SecurityService<S> {
    /// Create a new security service
    pub fn new(
        inner: S,
        proxy: Arc<FilterChainProxy>,
        sessions: Option<Arc<dyn SessionStore>>,
        unmatched: UnmatchedPolicy,
    ) -> Self {
        Self {
            inner,
            proxy,
            sessions,
            unmatched,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn prepare(&self, parts: http::request::Parts) -> HttpRequest {
        let mut request = HttpRequest::from_parts(parts);
        if let Some(store) = &self.sessions {
            if let Some(session) = request.cookie(SESSION_COOKIE).and_then(|id| store.find(&id)) {
                request = request.with_session(session);
            }
            request = request.with_session_store(Arc::clone(store));
        }
        request
    }
}

/// Outcome of running the pipeline for one request
enum Verdict {
    Forward {
        context: SecurityContext,
        headers: HeaderMap,
    },
    Respond(HttpResponse),
}

fn session_cookie(before: Option<&str>, exchange: &Exchange) -> Option<ResponseCookie> {
    let after = exchange.request.session_id();
    match (before, after) {
        (before, Some(after)) if before != Some(after.as_str()) => {
            Some(ResponseCookie::new(SESSION_COOKIE, after))
        }
        (Some(_), None) => Some(ResponseCookie::expired(SESSION_COOKIE, "/")),
        _ => None,
    }
}

impl<S, B, ResBody> Service<http::Request<B>> for SecurityService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<Bytes> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = SecurityServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let (mut parts, body) = req.into_parts();
        let mut exchange = Exchange::new(self.prepare(parts.clone()));
        let session_before = exchange.request.session_id();

        let verdict = match self.proxy.dispatch(&mut exchange, &mut |_: &mut Exchange| Ok(())) {
            Ok(Dispatch::Handled {
                terminal_reached: true,
                ..
            }) => Verdict::Forward {
                context: exchange.security.clone(),
                headers: std::mem::take(&mut exchange.response.headers),
            },
            Ok(Dispatch::Unmatched) if self.unmatched == UnmatchedPolicy::PassThrough => {
                Verdict::Forward {
                    context: SecurityContext::default(),
                    headers: HeaderMap::new(),
                }
            }
            Ok(Dispatch::Unmatched) => {
                let mut response = HttpResponse::new();
                response.send_error(StatusCode::NOT_FOUND);
                Verdict::Respond(response)
            }
            Ok(Dispatch::Handled { chain, .. }) => {
                debug!(chain = %chain, status = %exchange.response.status, "Pipeline answered request");
                Verdict::Respond(std::mem::take(&mut exchange.response))
            }
            Ok(Dispatch::Rejected(_)) => Verdict::Respond(std::mem::take(&mut exchange.response)),
            Err(e) => {
                error!(error = %e, path = exchange.request.path(), "Security pipeline failed");
                let mut response = HttpResponse::new();
                response.send_error(StatusCode::INTERNAL_SERVER_ERROR);
                Verdict::Respond(response)
            }
        };

        let cookie = session_cookie(session_before.as_deref(), &exchange);

        match verdict {
            Verdict::Respond(mut response) => {
                if let Some(cookie) = &cookie {
                    response.add_cookie(cookie);
                }
                Box::pin(async move { Ok::<_, S::Error>(response.into_http(ResBody::from)) })
            }
            Verdict::Forward { context, headers } => {
                parts.extensions = std::mem::take(&mut exchange.request.extensions);
                parts.extensions.insert(context);
                let req = http::Request::from_parts(parts, body);

                let inner = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, inner);
                Box::pin(async move {
                    let mut response = inner.call(req).await?;
                    let target = response.headers_mut();
                    for (name, value) in &headers {
                        target.append(name, value.clone());
                    }
                    if let Some(cookie) = &cookie {
                        let mut staged = HttpResponse::new();
                        staged.add_cookie(cookie);
                        if let Some(value) = staged.headers.get(SET_COOKIE) {
                            target.append(SET_COOKIE, value.clone());
                        }
                    }
                    Ok::<_, S::Error>(response)
                })
            }
        }
    }
}
