//! # Warden Config
//!
//! Assembles Warden pipelines from configurers.
//!
//! ## Architecture
//!
//! - [`lifecycle`] - The [`SecurityBuilder`] state machine (init, configure, build) and its [`Lifecycle`] arena
//! - [`configurer`] - The [`Configurer`] contract
//! - [`shared`] - [`SharedObjects`], the type-keyed registry configurers publish to
//! - [`http`] - [`HttpSecurity`], one filter chain, placed by the [`FilterOrder`] table
//! - [`configurers`] - Form login, HTTP Basic, bearer tokens, sessions, logout, CSRF, anonymous and access rules
//! - [`web`] - [`WebSecurity`], all chains plus ignored paths, built into a `FilterChainProxy`
//! - [`configuration`] - [`SecurityConfiguration`], ordered application-level assembly
//! - [`settings`] - [`SecuritySettings`] loaded from TOML/YAML/JSON and the environment
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_config::SecurityConfiguration;
//! use warden_core::{InMemoryUserDetailsService, UserDetails, UserDetailsService};
//! use warden_web::authorization::AccessRule;
//! use warden_web::exchange::{Exchange, HttpRequest};
//! use warden_web::filter::Dispatch;
//!
//! let users = InMemoryUserDetailsService::new();
//! users.create_user(UserDetails::with_username("alice").password("{noop}secret").build());
//! let users: Arc<dyn UserDetailsService> = Arc::new(users);
//!
//! let proxy = SecurityConfiguration::new()
//!     .shared_object(users)
//!     .filter_chain("web", 0, |http| {
//!         http.authorize_requests(|rules| {
//!             rules.any_request(AccessRule::Authenticated);
//!         })?
//!         .form_login(|form| {
//!             form.permit_all(true);
//!         })?;
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut exchange = Exchange::new(HttpRequest::get("/account"));
//! let outcome = proxy.dispatch(&mut exchange, &mut |_: &mut Exchange| Ok(())).unwrap();
//! assert!(matches!(outcome, Dispatch::Handled { terminal_reached: false, .. }));
//! assert_eq!(exchange.response.headers["location"], "/login");
//! ```

pub mod configuration;
pub mod configurer;
pub mod configurers;
pub mod http;
pub mod lifecycle;
pub mod settings;
pub mod shared;
pub mod web;

#[doc(inline)]
pub use configuration::SecurityConfiguration;
#[doc(inline)]
pub use configurer::Configurer;
#[doc(inline)]
pub use http::{FilterOrder, HttpSecurity};
#[doc(inline)]
pub use lifecycle::{BuildState, DuplicatePolicy, Lifecycle, SecurityBuilder};
#[doc(inline)]
pub use settings::{SecuritySettings, SettingsError};
#[doc(inline)]
pub use shared::SharedObjects;
#[doc(inline)]
pub use web::{SecurityFilterChainConfigurer, WebSecurity};
