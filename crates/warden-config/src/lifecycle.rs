//! Builder lifecycle state machine
//!
//! ```text
//! Unbuilt ─build()─► Initializing ─► Configuring ─► Building ─► Built
//! ```
//!
//! Every concrete builder embeds a [`Lifecycle`] and implements
//! [`SecurityBuilder`]; the trait's provided methods drive the phases:
//!
//! 1. **Initializing** - `init` on each configurer in insertion order.
//!    Configurers applied during this pass are remembered and get exactly one
//!    more `init` pass afterwards; configurers applied during that extra pass
//!    are registered but not initialized.
//! 2. **Configuring** - `configure` on every configurer, late ones included.
//! 3. **Building** - the builder's own [`perform_build`](SecurityBuilder::perform_build).
//!
//! The first `build()` call claims an atomic guard; every later call fails
//! with [`ConfigurationError::AlreadyBuilt`], even when the first one failed.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};
use warden_core::ConfigurationError;

use crate::configurer::{Configurer, downcast_box, downcast_mut, downcast_ref};
use crate::shared::SharedObjects;

/// Where a builder is in its lifecycle; ordered by progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BuildState {
    /// Nothing has happened yet
    #[default]
    Unbuilt,
    /// Running `init` on configurers
    Initializing,
    /// Running `configure` on configurers
    Configuring,
    /// Running `perform_build`
    Building,
    /// The object is available
    Built,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbuilt => "unbuilt",
            Self::Initializing => "initializing",
            Self::Configuring => "configuring",
            Self::Building => "building",
            Self::Built => "built",
        })
    }
}

/// What happens when a configurer of an already-registered type is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep every instance, in insertion order
    Accumulate,
    /// The new instance takes the place of the existing ones
    #[default]
    Replace,
    /// Fail with [`ConfigurationError::DuplicateConfigurer`]
    Reject,
}

struct Slot<B: 'static> {
    id: u64,
    type_id: TypeId,
    name: &'static str,
    // `None` while the configurer's own hook is running
    configurer: Option<Box<dyn Configurer<B>>>,
}

/// Configurer arena and build state embedded in every builder
pub struct Lifecycle<B: SecurityBuilder> {
    slots: Vec<Slot<B>>,
    late: Vec<u64>,
    next_id: u64,
    policy: DuplicatePolicy,
    shared: SharedObjects,
    state: BuildState,
    build_claimed: AtomicBool,
    object: Option<Arc<B::Output>>,
}

impl<B: SecurityBuilder> fmt::Debug for Lifecycle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.slots.iter().map(|slot| slot.name).collect();
        f.debug_struct("Lifecycle")
            .field("configurers", &names)
            .field("policy", &self.policy)
            .field("shared", &self.shared)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<B: SecurityBuilder> Lifecycle<B> {
    /// Empty lifecycle with the given duplicate policy
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self::with_shared_objects(policy, SharedObjects::new())
    }

    /// Lifecycle starting from an existing set of shared objects
    pub fn with_shared_objects(policy: DuplicatePolicy, shared: SharedObjects) -> Self {
        Self {
            slots: Vec::new(),
            late: Vec::new(),
            next_id: 0,
            policy,
            shared,
            state: BuildState::Unbuilt,
            build_claimed: AtomicBool::new(false),
            object: None,
        }
    }

    /// Current state
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Duplicate-type policy
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Shared objects
    pub fn shared_objects(&self) -> &SharedObjects {
        &self.shared
    }

    /// Shared objects, mutably
    pub fn shared_objects_mut(&mut self) -> &mut SharedObjects {
        &mut self.shared
    }

    /// Register a configurer
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::IllegalState`] once configuring has started
    /// - [`ConfigurationError::DuplicateConfigurer`] under [`DuplicatePolicy::Reject`]
    pub fn add(&mut self, configurer: Box<dyn Configurer<B>>) -> Result<(), ConfigurationError> {
        let name = configurer.name();
        if self.state >= BuildState::Configuring {
            return Err(ConfigurationError::IllegalState {
                configurer: name.to_string(),
                state: self.state.to_string(),
            });
        }

        let type_id = (&*configurer as &dyn Any).type_id();
        let existing: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.type_id == type_id)
            .map(|(index, _)| index)
            .collect();

        let id = self.next_id;
        self.next_id += 1;
        let slot = Slot {
            id,
            type_id,
            name,
            configurer: Some(configurer),
        };

        match (self.policy, existing.split_first()) {
            (DuplicatePolicy::Reject, Some(_)) => {
                return Err(ConfigurationError::DuplicateConfigurer { type_name: name });
            }
            (DuplicatePolicy::Replace, Some((&first, rest))) => {
                trace!(configurer = name, replaced = existing.len(), "Replacing configurer");
                let replaced = std::mem::replace(&mut self.slots[first], slot);
                let mut dropped = vec![replaced.id];
                for &index in rest.iter().rev() {
                    dropped.push(self.slots.remove(index).id);
                }
                self.late.retain(|late| !dropped.contains(late));
            }
            _ => {
                trace!(configurer = name, "Adding configurer");
                self.slots.push(slot);
            }
        }

        if self.state == BuildState::Initializing {
            self.late.push(id);
        }
        Ok(())
    }

    /// The single registered configurer of type `C`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::AmbiguousConfigurer`] when more than one
    /// instance is registered.
    pub fn configurer<C: Configurer<B>>(&self) -> Result<Option<&C>, ConfigurationError> {
        let mut found = self.configurers::<C>();
        match found.len() {
            0 | 1 => Ok(found.pop()),
            count => Err(ConfigurationError::AmbiguousConfigurer {
                type_name: type_name::<C>(),
                count,
            }),
        }
    }

    /// The single registered configurer of type `C`, mutably
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::AmbiguousConfigurer`] when more than one
    /// instance is registered.
    pub fn configurer_mut<C: Configurer<B>>(&mut self) -> Result<Option<&mut C>, ConfigurationError> {
        let count = self.count_of::<C>();
        if count > 1 {
            return Err(ConfigurationError::AmbiguousConfigurer {
                type_name: type_name::<C>(),
                count,
            });
        }
        Ok(self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.configurer.as_deref_mut())
            .find_map(|configurer| downcast_mut::<B, C>(configurer)))
    }

    /// Every registered configurer of type `C`, in insertion order
    pub fn configurers<C: Configurer<B>>(&self) -> Vec<&C> {
        self.slots
            .iter()
            .filter_map(|slot| slot.configurer.as_deref())
            .filter_map(|configurer| downcast_ref::<B, C>(configurer))
            .collect()
    }

    fn count_of<C: Configurer<B>>(&self) -> usize {
        let type_id = TypeId::of::<C>();
        self.slots
            .iter()
            .filter(|slot| slot.type_id == type_id && slot.configurer.is_some())
            .count()
    }

    /// Remove and return the single configurer of type `C`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::AmbiguousConfigurer`] when more than one
    /// instance is registered; nothing is removed in that case.
    pub fn remove_configurer<C: Configurer<B>>(&mut self) -> Result<Option<Box<C>>, ConfigurationError> {
        let count = self.count_of::<C>();
        if count > 1 {
            return Err(ConfigurationError::AmbiguousConfigurer {
                type_name: type_name::<C>(),
                count,
            });
        }
        Ok(self.remove_configurers::<C>().pop())
    }

    /// Remove and return every configurer of type `C`
    pub fn remove_configurers<C: Configurer<B>>(&mut self) -> Vec<Box<C>> {
        let type_id = TypeId::of::<C>();
        let mut removed = Vec::new();
        let mut removed_ids = Vec::new();
        self.slots.retain_mut(|slot| {
            if slot.type_id != type_id {
                return true;
            }
            removed_ids.push(slot.id);
            if let Some(configurer) = slot.configurer.take().and_then(downcast_box::<B, C>) {
                removed.push(configurer);
            }
            false
        });
        self.late.retain(|id| !removed_ids.contains(id));
        if !removed_ids.is_empty() {
            debug!(configurer = type_name::<C>(), count = removed_ids.len(), "Removed configurers");
        }
        removed
    }

    /// Number of registered configurers
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no configurer is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn ids(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.id).collect()
    }

    fn take_late(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.late)
    }

    fn detach(&mut self, id: u64) -> Option<(&'static str, Box<dyn Configurer<B>>)> {
        let slot = self.slots.iter_mut().find(|slot| slot.id == id)?;
        slot.configurer.take().map(|configurer| (slot.name, configurer))
    }

    fn reattach(&mut self, id: u64, configurer: Box<dyn Configurer<B>>) {
        // A configurer removed while detached is dropped here
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.configurer = Some(configurer);
        }
    }

    fn claim_build(&self) -> bool {
        self.build_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Init,
    Configure,
}

fn run_phase<B: SecurityBuilder>(builder: &mut B, ids: Vec<u64>, phase: Phase) -> Result<(), ConfigurationError> {
    for id in ids {
        let Some((name, mut configurer)) = builder.lifecycle_mut().detach(id) else {
            continue;
        };
        trace!(configurer = name, ?phase, "Running configurer");
        let result = match phase {
            Phase::Init => configurer.init(builder),
            Phase::Configure => configurer.configure(builder),
        };
        builder.lifecycle_mut().reattach(id, configurer);
        result?;
    }
    Ok(())
}

/// A builder driven through the [`BuildState`] lifecycle
///
/// Implementors provide access to their [`Lifecycle`] and the final
/// [`perform_build`](Self::perform_build) step; everything else is provided.
pub trait SecurityBuilder: Sized + 'static {
    /// What the builder produces
    type Output: Send + Sync + 'static;

    /// The embedded lifecycle
    fn lifecycle(&self) -> &Lifecycle<Self>;

    /// The embedded lifecycle, mutably
    fn lifecycle_mut(&mut self) -> &mut Lifecycle<Self>;

    /// Produce the object once every configurer has run
    ///
    /// # Errors
    ///
    /// Builder-specific; returned from [`build`](Self::build) unchanged.
    fn perform_build(&mut self) -> Result<Self::Output, ConfigurationError>;

    /// Hook before the init pass
    ///
    /// # Errors
    ///
    /// Any error aborts the build.
    fn before_init(&mut self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Hook before the configure pass
    ///
    /// # Errors
    ///
    /// Any error aborts the build.
    fn before_configure(&mut self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Register a configurer
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    fn apply<C: Configurer<Self>>(&mut self, configurer: C) -> Result<&mut Self, ConfigurationError> {
        self.apply_boxed(Box::new(configurer))
    }

    /// Register an already boxed configurer
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    fn apply_boxed(&mut self, configurer: Box<dyn Configurer<Self>>) -> Result<&mut Self, ConfigurationError> {
        self.lifecycle_mut().add(configurer)?;
        Ok(self)
    }

    /// Current lifecycle state
    fn state(&self) -> BuildState {
        self.lifecycle().state
    }

    /// Shared object of type `T`
    fn shared_object<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.lifecycle().shared.get::<T>()
    }

    /// Publish a shared object, replacing any of the same type
    fn set_shared_object<T: Any + Send + Sync>(&mut self, value: T) {
        self.lifecycle_mut().shared.insert(value);
    }

    /// Run the lifecycle and produce the object
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::AlreadyBuilt`] on any call after the first
    /// - any error raised by a hook, a configurer or `perform_build`, unchanged
    fn build(&mut self) -> Result<Arc<Self::Output>, ConfigurationError> {
        if !self.lifecycle().claim_build() {
            return Err(ConfigurationError::AlreadyBuilt);
        }
        let builder = type_name::<Self>();
        debug!(builder, configurers = self.lifecycle().len(), "Building");

        self.lifecycle_mut().state = BuildState::Initializing;
        self.before_init()?;
        let ids = self.lifecycle().ids();
        run_phase(self, ids, Phase::Init)?;
        let late = self.lifecycle_mut().take_late();
        if !late.is_empty() {
            trace!(builder, count = late.len(), "Initializing configurers added during init");
        }
        run_phase(self, late, Phase::Init)?;

        self.lifecycle_mut().state = BuildState::Configuring;
        self.before_configure()?;
        let ids = self.lifecycle().ids();
        run_phase(self, ids, Phase::Configure)?;

        self.lifecycle_mut().state = BuildState::Building;
        let object = Arc::new(self.perform_build()?);
        let lifecycle = self.lifecycle_mut();
        lifecycle.object = Some(Arc::clone(&object));
        lifecycle.state = BuildState::Built;
        debug!(builder, "Build complete");
        Ok(object)
    }

    /// The built object, building first if nothing was attempted yet
    ///
    /// Failures are logged at debug level and reported as `None`.
    fn get_or_build(&mut self) -> Option<Arc<Self::Output>> {
        if let Ok(object) = self.object() {
            return Some(object);
        }
        match self.build() {
            Ok(object) => Some(object),
            Err(e) => {
                debug!(builder = type_name::<Self>(), error = %e, "Failed to perform build, returning None");
                None
            }
        }
    }

    /// The built object
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotBuilt`] until a build has completed.
    fn object(&self) -> Result<Arc<Self::Output>, ConfigurationError> {
        self.lifecycle()
            .object
            .as_ref()
            .map(Arc::clone)
            .ok_or(ConfigurationError::NotBuilt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    /// Records lifecycle events into a log
    #[derive(Debug)]
    struct Journal {
        log: Vec<String>,
        lifecycle: Lifecycle<Journal>,
    }

    impl Journal {
        fn new(policy: DuplicatePolicy) -> Self {
            Self {
                log: Vec::new(),
                lifecycle: Lifecycle::new(policy),
            }
        }
    }

    impl SecurityBuilder for Journal {
        type Output = Vec<String>;

        fn lifecycle(&self) -> &Lifecycle<Self> {
            &self.lifecycle
        }

        fn lifecycle_mut(&mut self) -> &mut Lifecycle<Self> {
            &mut self.lifecycle
        }

        fn perform_build(&mut self) -> Result<Self::Output, ConfigurationError> {
            self.log.push("build".into());
            Ok(self.log.clone())
        }
    }

    struct Step(&'static str);

    impl Configurer<Journal> for Step {
        fn init(&mut self, builder: &mut Journal) -> Result<(), ConfigurationError> {
            builder.log.push(format!("init {}", self.0));
            Ok(())
        }

        fn configure(&mut self, builder: &mut Journal) -> Result<(), ConfigurationError> {
            builder.log.push(format!("configure {}", self.0));
            Ok(())
        }
    }

    struct Other;
    impl Configurer<Journal> for Other {}

    #[test]
    fn test_phases_run_in_insertion_order() {
        let mut journal = Journal::new(DuplicatePolicy::Accumulate);
        journal.apply(Step("a")).unwrap();
        journal.apply(Step("b")).unwrap();
        let log = journal.build().unwrap();
        assert_eq!(
            *log,
            vec!["init a", "init b", "configure a", "configure b", "build"]
        );
        assert_eq!(journal.state(), BuildState::Built);
    }

    #[test]
    fn test_second_build_fails() {
        let mut journal = Journal::new(DuplicatePolicy::Replace);
        journal.build().unwrap();
        assert!(matches!(journal.build(), Err(ConfigurationError::AlreadyBuilt)));
        assert!(journal.get_or_build().is_some());
    }

    #[test]
    fn test_object_before_build() {
        let journal = Journal::new(DuplicatePolicy::Replace);
        assert!(matches!(journal.object(), Err(ConfigurationError::NotBuilt)));
    }

    #[test]
    fn test_policies() {
        let mut replace = Journal::new(DuplicatePolicy::Replace);
        replace.apply(Step("a")).unwrap().apply(Other).unwrap().apply(Step("b")).unwrap();
        assert_eq!(replace.lifecycle().len(), 2);
        assert_eq!(replace.lifecycle().configurer::<Step>().unwrap().unwrap().0, "b");

        let mut reject = Journal::new(DuplicatePolicy::Reject);
        reject.apply(Step("a")).unwrap();
        assert!(matches!(
            reject.apply(Step("b")),
            Err(ConfigurationError::DuplicateConfigurer { .. })
        ));

        let mut accumulate = Journal::new(DuplicatePolicy::Accumulate);
        accumulate.apply(Step("a")).unwrap().apply(Step("b")).unwrap();
        assert_eq!(accumulate.lifecycle().configurers::<Step>().len(), 2);
        assert!(matches!(
            accumulate.lifecycle().configurer::<Step>(),
            Err(ConfigurationError::AmbiguousConfigurer { count: 2, .. })
        ));
    }

    #[test]
    fn test_replace_keeps_original_position() {
        let mut journal = Journal::new(DuplicatePolicy::Replace);
        journal.apply(Step("a")).unwrap();
        journal.apply(Other).unwrap();
        journal.apply(Step("b")).unwrap();
        let log = journal.build().unwrap();
        assert_eq!(log[0], "init b");
    }

    /// Applies `Step("late")` during init and records the call
    struct Spawner {
        calls: Arc<AtomicU32>,
    }

    impl Configurer<Journal> for Spawner {
        fn init(&mut self, builder: &mut Journal) -> Result<(), ConfigurationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            builder.apply(Step("late"))?;
            Ok(())
        }
    }

    #[test]
    fn test_configurer_added_during_init_is_initialized_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut journal = Journal::new(DuplicatePolicy::Accumulate);
        journal.apply(Spawner { calls: calls.clone() }).unwrap();
        let log = journal.build().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*log, vec!["init late", "configure late", "build"]);
    }

    /// Tries to apply another configurer during configure
    struct LateApplier;

    impl Configurer<Journal> for LateApplier {
        fn configure(&mut self, builder: &mut Journal) -> Result<(), ConfigurationError> {
            builder.apply(Other)?;
            Ok(())
        }
    }

    #[test]
    fn test_apply_while_configuring_is_illegal() {
        let mut journal = Journal::new(DuplicatePolicy::Accumulate);
        journal.apply(LateApplier).unwrap();
        let err = journal.build().unwrap_err();
        match err {
            ConfigurationError::IllegalState { configurer, state } => {
                assert!(configurer.ends_with("Other"));
                assert_eq!(state, "configuring");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(journal.state(), BuildState::Configuring);
        assert!(matches!(journal.build(), Err(ConfigurationError::AlreadyBuilt)));
        assert!(journal.get_or_build().is_none());
    }

    #[test]
    fn test_remove_configurers() {
        let mut journal = Journal::new(DuplicatePolicy::Accumulate);
        journal.apply(Step("a")).unwrap().apply(Step("b")).unwrap().apply(Other).unwrap();
        assert!(journal.lifecycle_mut().remove_configurer::<Step>().is_err());
        let removed = journal.lifecycle_mut().remove_configurers::<Step>();
        assert_eq!(removed.iter().map(|s| s.0).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(journal.lifecycle().len(), 1);
        assert!(journal.lifecycle_mut().remove_configurer::<Step>().unwrap().is_none());
    }

    #[test]
    fn test_state_order() {
        assert!(BuildState::Unbuilt < BuildState::Initializing);
        assert!(BuildState::Configuring < BuildState::Building);
        assert!(BuildState::Building < BuildState::Built);
    }
}
