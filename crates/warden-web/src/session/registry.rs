//! Per-principal session registry
//!
//! The registry is the only structure mutated concurrently by many request
//! threads. Listings are copies; callers never iterate under a lock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Concurrency-control record for one session
///
/// Shared between the registry and its callers; marking a handle expired is
/// visible to every holder.
pub struct SessionInformation {
    principal: String,
    session_id: String,
    last_request: Mutex<SystemTime>,
    expired: AtomicBool,
}

impl fmt::Debug for SessionInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInformation")
            .field("principal", &self.principal)
            .field("session_id", &self.session_id)
            .field("last_request", &self.last_request())
            .field("expired", &self.is_expired())
            .finish()
    }
}

impl SessionInformation {
    /// Create a record last used at `last_request`
    pub fn new(
        principal: impl Into<String>,
        session_id: impl Into<String>,
        last_request: SystemTime,
    ) -> Self {
        Self {
            principal: principal.into(),
            session_id: session_id.into(),
            last_request: Mutex::new(last_request),
            expired: AtomicBool::new(false),
        }
    }

    /// Principal name
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Transport session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last time the session was used
    pub fn last_request(&self) -> SystemTime {
        *self.last_request.lock()
    }

    /// Record a use at the current time
    pub fn refresh_last_request(&self) {
        *self.last_request.lock() = SystemTime::now();
    }

    /// Record a use at an explicit time
    pub fn set_last_request(&self, at: SystemTime) {
        *self.last_request.lock() = at;
    }

    /// Mark for reaping on next use
    pub fn expire_now(&self) {
        self.expired.store(true, Ordering::Release);
    }

    /// Whether the record has been marked expired
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

/// Tracks active sessions per principal
pub trait SessionRegistry: Send + Sync {
    /// Register a session for a principal, replacing any record with the same id
    fn register_new_session(&self, session_id: &str, principal: &str);

    /// Sessions held by `principal`, optionally including expired ones
    fn all_sessions(&self, principal: &str, include_expired: bool) -> Vec<Arc<SessionInformation>>;

    /// Record for one session
    fn session_information(&self, session_id: &str) -> Option<Arc<SessionInformation>>;

    /// Update the last-request time of a session
    fn refresh_last_request(&self, session_id: &str) {
        if let Some(info) = self.session_information(session_id) {
            info.refresh_last_request();
        }
    }

    /// Forget a session
    fn remove_session_information(&self, session_id: &str);

    /// Move the record of `old_id` to `new_id` after the transport session id rotated
    ///
    /// The default re-registers the principal under the new id, which resets
    /// the last-request time.
    fn session_id_changed(&self, old_id: &str, new_id: &str) {
        if let Some(info) = self.session_information(old_id) {
            self.remove_session_information(old_id);
            self.register_new_session(new_id, info.principal());
        }
    }

    /// Principals with at least one registered session
    fn all_principals(&self) -> Vec<String>;
}

/// Process-local registry backed by concurrent maps
///
/// Each principal's sessions are listed in registration order, so sessions
/// with equal last-request times are always evicted in the same order.
#[derive(Default)]
pub struct InMemorySessionRegistry {
    sessions: DashMap<String, Arc<SessionInformation>>,
    principals: DashMap<String, Vec<String>>,
}

impl fmt::Debug for InMemorySessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("principals", &self.principals.len())
            .finish()
    }
}

impl InMemorySessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully-formed record (tests and imports)
    ///
    /// A record already registered under the same id is replaced while its
    /// map entry stays locked, so the id is never indexed under two principals.
    pub fn register(&self, info: SessionInformation) -> Arc<SessionInformation> {
        let info = Arc::new(info);
        let session_id = info.session_id().to_string();
        trace!(session_id = %session_id, principal = info.principal(), "Registering session");
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(Arc::clone(&info));
                self.unindex(previous.principal(), &session_id);
                self.index(info.principal(), session_id);
            }
            Entry::Vacant(slot) => {
                let _entry = slot.insert(Arc::clone(&info));
                self.index(info.principal(), session_id);
            }
        }
        info
    }

    fn index(&self, principal: &str, session_id: String) {
        self.principals.entry(principal.to_string()).or_default().push(session_id);
    }

    fn unindex(&self, principal: &str, session_id: &str) {
        let now_empty = match self.principals.get_mut(principal) {
            Some(mut ids) => {
                ids.retain(|id| id != session_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.principals.remove_if(principal, |_, ids| ids.is_empty());
        }
    }
}

impl SessionRegistry for InMemorySessionRegistry {
    fn register_new_session(&self, session_id: &str, principal: &str) {
        self.register(SessionInformation::new(principal, session_id, SystemTime::now()));
    }

    fn all_sessions(&self, principal: &str, include_expired: bool) -> Vec<Arc<SessionInformation>> {
        let ids: Vec<String> = match self.principals.get(principal) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.sessions.get(id).map(|e| Arc::clone(e.value())))
            .filter(|info| include_expired || !info.is_expired())
            .collect()
    }

    fn session_information(&self, session_id: &str) -> Option<Arc<SessionInformation>> {
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    fn remove_session_information(&self, session_id: &str) {
        let Some((_, info)) = self.sessions.remove(session_id) else {
            return;
        };
        debug!(session_id, principal = info.principal(), "Removing session information");
        self.unindex(info.principal(), session_id);
    }

    fn session_id_changed(&self, old_id: &str, new_id: &str) {
        let Some((_, info)) = self.sessions.remove(old_id) else {
            return;
        };
        debug!(old_session_id = old_id, new_session_id = new_id, principal = info.principal(), "Moving session information");
        let moved = Arc::new(SessionInformation::new(info.principal(), new_id, info.last_request()));
        if info.is_expired() {
            moved.expire_now();
        }
        // Keep the registration position so tie-breaking does not change
        if let Some(mut ids) = self.principals.get_mut(info.principal())
            && let Some(id) = ids.iter_mut().find(|id| id.as_str() == old_id)
        {
            *id = new_id.to_string();
        }
        self.sessions.insert(new_id.to_string(), moved);
    }

    fn all_principals(&self) -> Vec<String> {
        self.principals.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn test_register_and_list() {
        let registry = InMemorySessionRegistry::new();
        registry.register_new_session("s1", "alice");
        registry.register_new_session("s2", "alice");
        registry.register_new_session("s3", "bob");

        assert_eq!(registry.all_sessions("alice", false).len(), 2);
        assert_eq!(registry.all_sessions("bob", false).len(), 1);
        assert!(registry.all_sessions("carol", true).is_empty());

        let mut principals = registry.all_principals();
        principals.sort();
        assert_eq!(principals, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_expired_sessions_filtered() {
        let registry = InMemorySessionRegistry::new();
        registry.register_new_session("s1", "alice");
        registry.session_information("s1").unwrap().expire_now();

        assert!(registry.all_sessions("alice", false).is_empty());
        assert_eq!(registry.all_sessions("alice", true).len(), 1);
    }

    #[test]
    fn test_listing_is_a_copy_but_handles_are_shared() {
        let registry = InMemorySessionRegistry::new();
        registry.register_new_session("s1", "alice");
        let listing = registry.all_sessions("alice", false);
        registry.register_new_session("s2", "alice");

        assert_eq!(listing.len(), 1);
        listing[0].expire_now();
        assert!(registry.session_information("s1").unwrap().is_expired());
    }

    #[test]
    fn test_remove_cleans_principal_index() {
        let registry = InMemorySessionRegistry::new();
        registry.register_new_session("s1", "alice");
        registry.remove_session_information("s1");
        registry.remove_session_information("s1");

        assert!(registry.session_information("s1").is_none());
        assert!(registry.all_principals().is_empty());
    }

    #[test]
    fn test_reregistering_same_id_moves_principal() {
        let registry = InMemorySessionRegistry::new();
        registry.register_new_session("s1", "alice");
        registry.register_new_session("s1", "bob");
        assert!(registry.all_sessions("alice", true).is_empty());
        assert_eq!(registry.all_sessions("bob", true).len(), 1);
    }

    #[test]
    fn test_sessions_listed_in_registration_order() {
        let registry = InMemorySessionRegistry::new();
        for id in ["d", "a", "c", "b"] {
            registry.register(SessionInformation::new("alice", id, UNIX_EPOCH));
        }
        let ids: Vec<String> = registry
            .all_sessions("alice", true)
            .iter()
            .map(|info| info.session_id().to_string())
            .collect();
        assert_eq!(ids, vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_session_id_changed_keeps_record_and_position() {
        let registry = InMemorySessionRegistry::new();
        registry.register(SessionInformation::new("alice", "s1", UNIX_EPOCH + Duration::from_secs(7)));
        registry.register(SessionInformation::new("alice", "s2", UNIX_EPOCH));
        registry.session_id_changed("s1", "s1-rotated");

        assert!(registry.session_information("s1").is_none());
        let moved = registry.session_information("s1-rotated").unwrap();
        assert_eq!(moved.principal(), "alice");
        assert_eq!(moved.last_request(), UNIX_EPOCH + Duration::from_secs(7));
        let ids: Vec<String> = registry
            .all_sessions("alice", true)
            .iter()
            .map(|info| info.session_id().to_string())
            .collect();
        assert_eq!(ids, vec!["s1-rotated", "s2"]);

        registry.session_id_changed("unknown", "other");
        assert!(registry.session_information("other").is_none());
    }

    #[test]
    fn test_concurrent_reregistration_indexes_id_once() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let handles: Vec<_> = ["alice", "bob", "carol", "dave"]
            .into_iter()
            .map(|principal| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        registry.register_new_session("shared", principal);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let owner = registry.session_information("shared").unwrap().principal().to_string();
        assert_eq!(registry.all_principals(), vec![owner.clone()]);
        assert_eq!(registry.all_sessions(&owner, true).len(), 1);
    }

    #[test]
    fn test_refresh_last_request() {
        let registry = InMemorySessionRegistry::new();
        let info = registry.register(SessionInformation::new("alice", "s1", UNIX_EPOCH));
        registry.refresh_last_request("s1");
        assert!(info.last_request() > UNIX_EPOCH + Duration::from_secs(1));
    }
}
