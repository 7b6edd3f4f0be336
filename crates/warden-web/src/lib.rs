//! # Warden Web
//!
//! The request pipeline: ordered filter chains, authentication processing,
//! session concurrency control, CSRF tokens and access rules.
//!
//! ## Architecture
//!
//! - [`exchange`] - [`HttpRequest`], [`HttpResponse`] and the per-request [`Exchange`]
//! - [`filter`] - The [`Filter`] trait, [`DefaultSecurityFilterChain`] and [`FilterChainProxy`]
//! - [`matcher`] - [`RequestMatcher`]s (path patterns, exact URLs, methods, combinators)
//! - [`firewall`] - [`StrictHttpFirewall`], run before any chain is selected
//! - [`context`] - [`SecurityContext`] and its repositories
//! - [`authentication`] - [`AuthenticationProcessingFilter`] and the form, Basic and bearer flows
//! - [`session`] - Transport sessions, the session registry and concurrent session control
//! - [`csrf`] - Deferred CSRF tokens and [`CsrfFilter`]
//! - [`logout`] - [`LogoutFilter`] and its handlers
//! - [`anonymous`] - [`AnonymousAuthenticationFilter`]
//! - [`authorization`] - [`AuthorizationFilter`], entry points and access-denied handlers
//! - `tower` - A Tower layer around [`FilterChainProxy`] (feature `tower`)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_web::{
//!     AccessRule, AnyRequestMatcher, AuthorizationFilter, DefaultSecurityFilterChain, Dispatch,
//!     Exchange, Filter, FilterChainProxy, HttpRequest, PathPatternRequestMatcher, RequestMatcher,
//! };
//!
//! let rules: Vec<(Arc<dyn RequestMatcher>, AccessRule)> = vec![
//!     (Arc::new(PathPatternRequestMatcher::new("/public/**")), AccessRule::PermitAll),
//!     (Arc::new(AnyRequestMatcher), AccessRule::Authenticated),
//! ];
//! let filters: Vec<Arc<dyn Filter>> = vec![Arc::new(AuthorizationFilter::new(rules))];
//! let chain = DefaultSecurityFilterChain::new("default", Arc::new(AnyRequestMatcher), filters);
//! let proxy = FilterChainProxy::new(vec![(0, chain)]).unwrap();
//!
//! let mut exchange = Exchange::new(HttpRequest::get("/public/index.html"));
//! let outcome = proxy.dispatch(&mut exchange, &mut |_: &mut Exchange| Ok(())).unwrap();
//! assert!(matches!(outcome, Dispatch::Handled { terminal_reached: true, .. }));
//! ```
//!
//! ## Concurrency
//!
//! Stages are synchronous and `Send + Sync`; one request runs on one thread.
//! Shared state (session registry, session store) lives behind concurrent
//! maps so many requests can be in flight at once.

pub mod anonymous;
pub mod authentication;
pub mod authorization;
pub mod context;
pub mod csrf;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod firewall;
pub mod logout;
pub mod matcher;
pub mod session;

#[cfg(feature = "tower")]
pub mod tower;

#[doc(inline)]
pub use anonymous::AnonymousAuthenticationFilter;
#[doc(inline)]
pub use authentication::{
    AuthenticationAttempt, AuthenticationFailureHandler, AuthenticationProcessingFilter,
    AuthenticationSuccessHandler, ProcessingOutcome,
};
#[doc(inline)]
pub use authorization::{
    AccessDeniedHandler, AccessRule, AuthenticationEntryPoint, AuthorizationFilter,
    Http401EntryPoint, LoginUrlEntryPoint,
};
#[doc(inline)]
pub use context::{
    HttpSessionSecurityContextRepository, SecurityContext, SecurityContextHolderFilter,
    SecurityContextRepository,
};
#[doc(inline)]
pub use csrf::{CsrfFilter, CsrfToken, CsrfTokenRepository, DeferredCsrfToken};
#[doc(inline)]
pub use error::{RequestRejected, WebError};
#[doc(inline)]
pub use exchange::{Exchange, FormParameters, HttpRequest, HttpResponse, ResponseCookie};
#[doc(inline)]
pub use filter::{DefaultSecurityFilterChain, Dispatch, Filter, FilterChainProxy, Next};
#[doc(inline)]
pub use firewall::{HttpFirewall, StrictHttpFirewall};
#[doc(inline)]
pub use logout::{LogoutFilter, LogoutHandler, LogoutSuccessHandler};
#[doc(inline)]
pub use matcher::{
    AnyRequestMatcher, ExactUrlRequestMatcher, PathPatternRequestMatcher, RequestMatcher,
};
#[doc(inline)]
pub use session::{
    ConcurrentSessionControlStrategy, ConcurrentSessionFilter, SessionAuthenticationStrategy,
    SessionRegistry, SessionStore,
};
