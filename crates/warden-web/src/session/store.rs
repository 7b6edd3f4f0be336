//! Transport-level sessions
//!
//! [`HttpSession`] is the server-side state behind a session cookie. It is
//! distinct from [`SessionInformation`](super::SessionInformation), which is
//! the concurrency-control record kept per principal.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

type Attribute = Arc<dyn Any + Send + Sync>;

/// Server-side session state
pub struct HttpSession {
    id: RwLock<String>,
    attributes: RwLock<HashMap<String, Attribute>>,
    created_at: SystemTime,
    last_accessed: Mutex<SystemTime>,
    invalidated: AtomicBool,
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.attributes.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("HttpSession")
            .field("id", &*self.id.read())
            .field("attributes", &names)
            .field("created_at", &self.created_at)
            .field("invalidated", &self.invalidated.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSession {
    /// New session with a random id
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// New session with the given id
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id: RwLock::new(id.into()),
            attributes: RwLock::new(HashMap::new()),
            created_at: now,
            last_accessed: Mutex::new(now),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Current id
    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    /// Replace the id with a fresh random one, returning it
    pub fn rotate_id(&self) -> String {
        let new_id = Uuid::new_v4().to_string();
        *self.id.write() = new_id.clone();
        new_id
    }

    /// Creation time
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Last time the session was used
    pub fn last_accessed(&self) -> SystemTime {
        *self.last_accessed.lock()
    }

    /// Record an access
    pub fn touch(&self) {
        *self.last_accessed.lock() = SystemTime::now();
    }

    /// Typed attribute lookup
    pub fn attribute<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        self.attributes
            .read()
            .get(name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Store an attribute
    pub fn set_attribute<T: Send + Sync + 'static>(&self, name: impl Into<String>, value: T) {
        self.attributes.write().insert(name.into(), Arc::new(value));
    }

    /// Remove an attribute, returning whether it existed
    pub fn remove_attribute(&self, name: &str) -> bool {
        self.attributes.write().remove(name).is_some()
    }

    /// Whether an attribute is present
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.read().contains_key(name)
    }

    /// Drop all state and mark the session unusable
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
        self.attributes.write().clear();
    }

    /// Whether the session can still be used
    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }
}

/// Creates and finds transport sessions
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Create and register a new session
    fn create(&self) -> Arc<HttpSession>;

    /// Find a valid session by id
    fn find(&self, id: &str) -> Option<Arc<HttpSession>>;

    /// Rotate a session's id, returning the new id
    fn change_id(&self, session: &HttpSession) -> String;

    /// Forget a session
    fn remove(&self, id: &str);
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<HttpSession>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self) -> Arc<HttpSession> {
        let session = Arc::new(HttpSession::new());
        self.sessions.insert(session.id(), Arc::clone(&session));
        session
    }

    fn find(&self, id: &str) -> Option<Arc<HttpSession>> {
        let session = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        if session.is_valid() {
            session.touch();
            Some(session)
        } else {
            self.sessions.remove(id);
            None
        }
    }

    fn change_id(&self, session: &HttpSession) -> String {
        let old_id = session.id();
        let new_id = session.rotate_id();
        if let Some((_, stored)) = self.sessions.remove(&old_id) {
            self.sessions.insert(new_id.clone(), stored);
        }
        new_id
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}
