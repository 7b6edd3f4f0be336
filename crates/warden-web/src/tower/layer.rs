//! Tower Layer wrapping services with the security pipeline

use std::fmt;
use std::sync::Arc;

use tower::Layer;

use crate::filter::FilterChainProxy;
use crate::session::SessionStore;

use super::UnmatchedPolicy;
use super::service::SecurityService;

/// Tower Layer that runs a [`FilterChainProxy`] before the inner service
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use warden_web::tower::SecurityLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(SecurityLayer::new(Arc::new(proxy)))
///     .service(my_inner_service);
/// ```
#[derive(Clone)]
pub struct SecurityLayer {
    proxy: Arc<FilterChainProxy>,
    sessions: Option<Arc<dyn SessionStore>>,
    unmatched: UnmatchedPolicy,
}

impl fmt::Debug for SecurityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityLayer")
            .field("proxy", &self.proxy)
            .field("sessions", &self.sessions)
            .field("unmatched", &self.unmatched)
            .finish()
    }
}

impl SecurityLayer {
    /// Layer over `proxy`, without transport sessions
    pub fn new(proxy: Arc<FilterChainProxy>) -> Self {
        Self {
            proxy,
            sessions: None,
            unmatched: UnmatchedPolicy::default(),
        }
    }

    /// Resolve and create sessions through `store`
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Choose what happens to requests no chain matches
    #[must_use]
    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched = policy;
        self
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService::new(
            inner,
            Arc::clone(&self.proxy),
            self.sessions.clone(),
            self.unmatched,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    fn proxy() -> Arc<FilterChainProxy> {
        Arc::new(FilterChainProxy::new(Vec::new()).unwrap())
    }

    #[test]
    fn test_layer_creation() {
        let layer = SecurityLayer::new(proxy());
        assert!(layer.sessions.is_none());
        assert_eq!(layer.unmatched, UnmatchedPolicy::PassThrough);
    }

    #[test]
    fn test_layer_builder_pattern() {
        let layer = SecurityLayer::new(proxy())
            .with_session_store(Arc::new(InMemorySessionStore::new()))
            .with_unmatched_policy(UnmatchedPolicy::NotFound);
        assert!(layer.sessions.is_some());
        assert_eq!(layer.unmatched, UnmatchedPolicy::NotFound);
    }
}
