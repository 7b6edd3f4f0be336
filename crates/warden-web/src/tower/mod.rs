//! # Tower Middleware Integration
//!
//! Runs a [`FilterChainProxy`](crate::FilterChainProxy) in front of any Tower
//! service that handles `http::Request`s.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//! use warden_web::session::InMemorySessionStore;
//! use warden_web::tower::SecurityLayer;
//!
//! let layer = SecurityLayer::new(Arc::new(proxy))
//!     .with_session_store(Arc::new(InMemorySessionStore::new()));
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(my_inner_service);
//! ```
//!
//! ## Request Extensions
//!
//! Requests that pass every stage reach the inner service with the final
//! [`SecurityContext`](crate::SecurityContext) in their extensions:
//!
//! ```rust,ignore
//! if let Some(context) = req.extensions().get::<SecurityContext>() {
//!     println!("principal: {:?}", context.principal());
//! }
//! ```
//!
//! Form bodies are not read by the layer. Insert
//! [`FormParameters`](crate::FormParameters) upstream when form login is
//! in use.

mod layer;
mod service;

pub use layer::SecurityLayer;
pub use service::{SecurityService, SecurityServiceFuture};

/// Cookie carrying the transport session id
pub const SESSION_COOKIE: &str = "WARDEN_SESSION";

/// What happens to requests no chain matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    /// Forward to the inner service unsecured
    #[default]
    PassThrough,
    /// Answer `404 Not Found`
    NotFound,
}
