//! The configurer contract

use std::any::{Any, type_name};

use warden_core::ConfigurationError;

/// A unit of configuration applied to a builder of type `B`
///
/// The builder calls [`init`](Self::init) on every configurer, then
/// [`configure`](Self::configure) on every configurer, both in insertion
/// order. `init` may apply further configurers and publish shared objects;
/// `configure` contributes the actual pieces (usually filters) and may read
/// what any `init` published.
///
/// While one of its hooks runs, a configurer is detached from the builder, so
/// looking up its own type from inside the hook does not find it.
pub trait Configurer<B: 'static>: Any + Send {
    /// First pass
    ///
    /// # Errors
    ///
    /// Any error aborts the build and is returned from it unchanged.
    fn init(&mut self, builder: &mut B) -> Result<(), ConfigurationError> {
        let _ = builder;
        Ok(())
    }

    /// Second pass
    ///
    /// # Errors
    ///
    /// Any error aborts the build and is returned from it unchanged.
    fn configure(&mut self, builder: &mut B) -> Result<(), ConfigurationError> {
        let _ = builder;
        Ok(())
    }

    /// Ordering key used when several configurers are sorted before being applied
    fn order(&self) -> i32 {
        0
    }

    /// Name used in errors and logs
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

pub(crate) fn downcast_ref<B: 'static, C: 'static>(configurer: &dyn Configurer<B>) -> Option<&C> {
    (configurer as &dyn Any).downcast_ref::<C>()
}

pub(crate) fn downcast_mut<B: 'static, C: 'static>(configurer: &mut dyn Configurer<B>) -> Option<&mut C> {
    (configurer as &mut dyn Any).downcast_mut::<C>()
}

pub(crate) fn downcast_box<B: 'static, C: 'static>(configurer: Box<dyn Configurer<B>>) -> Option<Box<C>> {
    let any: Box<dyn Any> = configurer;
    any.downcast::<C>().ok()
}
