//! Sessions and session concurrency control
//!
//! - [`store`]: transport sessions (the state behind the session cookie)
//! - [`registry`]: per-principal bookkeeping used for concurrency control
//! - [`strategy`]: what happens to sessions when a login succeeds
//! - [`concurrent`]: admission/eviction and the stage that reaps evicted sessions

pub mod concurrent;
pub mod registry;
pub mod store;
pub mod strategy;

pub use concurrent::{
    ConcurrentSessionControlStrategy, ConcurrentSessionFilter, ExpiredSessionStrategy,
    RedirectExpiredSessionStrategy, StatusExpiredSessionStrategy, UNLIMITED_SESSIONS,
};
pub use registry::{InMemorySessionRegistry, SessionInformation, SessionRegistry};
pub use store::{HttpSession, InMemorySessionStore, SessionStore};
pub use strategy::{
    ChangeSessionIdStrategy, CompositeSessionStrategy, NullSessionStrategy, RegisterSessionStrategy,
    SessionAuthenticationStrategy,
};
