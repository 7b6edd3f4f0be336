//! # Warden Core
//!
//! Identity and credential primitives shared by every Warden crate.
//!
//! ## Architecture
//!
//! - [`authentication`] - The [`Authentication`] token that flows through the pipeline
//! - [`authority`] - [`GrantedAuthority`] and role helpers
//! - [`user`] - [`UserDetails`] and the [`UserDetailsService`] lookup contract
//! - [`password`] - [`PasswordEncoder`] implementations (Argon2, delegating, no-op)
//! - [`providers`] - Credential-specific [`AuthenticationProvider`]s
//! - [`manager`] - [`ProviderManager`], the default [`AuthenticationManager`]
//! - [`event`] - Authentication events and publishers
//! - [`error`] - The error taxonomy (configuration, authentication, session)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_core::{
//!     Authentication, AuthenticationManager, AuthenticationProvider, DaoAuthenticationProvider,
//!     InMemoryUserDetailsService, ProviderManager, UserDetails,
//! };
//!
//! let users = InMemoryUserDetailsService::new();
//! users.create_user(UserDetails::with_username("alice").password("{noop}s3cret").roles(&["USER"]).build());
//!
//! let dao: Arc<dyn AuthenticationProvider> = Arc::new(DaoAuthenticationProvider::new(Arc::new(users)));
//! let manager = ProviderManager::new(vec![dao]);
//! let result = manager.authenticate(Authentication::username_password("alice", "s3cret")).unwrap();
//!
//! assert!(result.authenticated);
//! assert!(result.has_role("USER"));
//! ```

pub mod authentication;
pub mod authority;
pub mod error;
pub mod event;
pub mod manager;
pub mod password;
pub mod providers;
pub mod user;

#[doc(inline)]
pub use authentication::{
    ANONYMOUS_AUTHORITY, ANONYMOUS_PRINCIPAL, Authentication, AuthenticationBuilder,
    AuthenticationKind,
};
#[doc(inline)]
pub use authority::{GrantedAuthority, ROLE_PREFIX, authority_list};
#[doc(inline)]
pub use error::{AuthenticationError, ConfigurationError, SessionAuthenticationError};
#[doc(inline)]
pub use event::{
    AuthenticationEvent, AuthenticationEventPublisher, NoopEventPublisher, TracingEventPublisher,
};
#[doc(inline)]
pub use manager::{AuthenticationManager, ProviderManager};
#[doc(inline)]
pub use password::{
    Argon2PasswordEncoder, DelegatingPasswordEncoder, NoopPasswordEncoder, PasswordEncoder,
    constant_time_eq,
};
#[doc(inline)]
pub use providers::{
    AuthenticationProvider, DaoAuthenticationProvider, InMemoryTokenIntrospector,
    TokenAuthenticationProvider, TokenIntrospector,
};
#[doc(inline)]
pub use user::{InMemoryUserDetailsService, UserDetails, UserDetailsBuilder, UserDetailsService};
