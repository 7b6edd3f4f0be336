//! Type-keyed registry of objects shared between configurers

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use warden_core::ConfigurationError;

/// Objects configurers publish for each other, one per type
///
/// Values are usually `Arc<dyn Trait>` handles such as
/// `Arc<dyn AuthenticationManager>`. Cloning the registry shares the values.
#[derive(Clone, Default)]
pub struct SharedObjects {
    objects: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl fmt::Debug for SharedObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.objects.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("SharedObjects").field("types", &names).finish()
    }
}

impl SharedObjects {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any object of the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.objects
            .insert(TypeId::of::<T>(), (type_name::<T>(), Arc::new(value)));
    }

    /// Store `value` unless an object of the same type exists
    ///
    /// Returns whether the value was stored.
    pub fn insert_if_absent<T: Any + Send + Sync>(&mut self, value: T) -> bool {
        if self.contains::<T>() {
            return false;
        }
        self.insert(value);
        true
    }

    /// Object of type `T`
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.objects
            .get(&TypeId::of::<T>())
            .and_then(|(_, value)| value.downcast_ref::<T>())
    }

    /// Object of type `T`, or an error naming the type
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingSharedObject`] when absent.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<&T, ConfigurationError> {
        self.get::<T>()
            .ok_or(ConfigurationError::MissingSharedObject(type_name::<T>()))
    }

    /// Whether an object of type `T` is stored
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.objects.contains_key(&TypeId::of::<T>())
    }

    /// Drop the object of type `T`; returns whether one existed
    pub fn remove<T: Any + Send + Sync>(&mut self) -> bool {
        self.objects.remove(&TypeId::of::<T>()).is_some()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_core::{AuthenticationManager, ProviderManager};

    use super::*;

    #[test]
    fn test_typed_round_trip() {
        let mut shared = SharedObjects::new();
        shared.insert(42u32);
        shared.insert(String::from("realm"));

        assert_eq!(shared.get::<u32>(), Some(&42));
        assert_eq!(shared.get::<String>().map(String::as_str), Some("realm"));
        assert!(shared.get::<u64>().is_none());
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_trait_object_handles() {
        let mut shared = SharedObjects::new();
        let manager: Arc<dyn AuthenticationManager> = Arc::new(ProviderManager::new(Vec::new()));
        shared.insert(manager);
        assert!(shared.contains::<Arc<dyn AuthenticationManager>>());
        assert!(!shared.contains::<Arc<ProviderManager>>());
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let mut shared = SharedObjects::new();
        assert!(shared.insert_if_absent(1u8));
        assert!(!shared.insert_if_absent(2u8));
        assert_eq!(shared.get::<u8>(), Some(&1));
    }

    #[test]
    fn test_require_names_missing_type() {
        let shared = SharedObjects::new();
        let err = shared.require::<u16>().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingSharedObject("u16")));
    }

    #[test]
    fn test_clone_shares_values() {
        let mut shared = SharedObjects::new();
        shared.insert(7i64);
        let copy = shared.clone();
        shared.remove::<i64>();
        assert_eq!(copy.get::<i64>(), Some(&7));
        assert!(shared.is_empty());
    }
}
