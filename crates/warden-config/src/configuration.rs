//! Application-level assembly
//!
//! [`SecurityConfiguration`] gathers the web-level configurers an application
//! declares, applies them to a fresh [`WebSecurity`] in their declared order,
//! and builds the [`FilterChainProxy`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use warden_core::ConfigurationError;
use warden_web::filter::FilterChainProxy;

use crate::configurer::Configurer;
use crate::http::HttpSecurity;
use crate::lifecycle::SecurityBuilder;
use crate::shared::SharedObjects;
use crate::web::{SecurityFilterChainConfigurer, WebSecurity};

struct Declared {
    label: String,
    configurer: Box<dyn Configurer<WebSecurity>>,
}

/// Entry point for assembling an application's security
///
/// ```rust
/// use std::sync::Arc;
/// use warden_config::SecurityConfiguration;
/// use warden_web::authorization::AccessRule;
///
/// let proxy = SecurityConfiguration::new()
///     .filter_chain("app", 0, |http| {
///         http.authorize_requests(|rules| {
///             rules.path("/public/**", AccessRule::PermitAll);
///             rules.any_request(AccessRule::Authenticated);
///         })?;
///         Ok(())
///     })
///     .build()
///     .unwrap();
/// assert_eq!(proxy.chains().count(), 1);
/// ```
#[derive(Default)]
pub struct SecurityConfiguration {
    shared: SharedObjects,
    declared: Vec<Declared>,
}

impl fmt::Debug for SecurityConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.declared.iter().map(|d| d.label.as_str()).collect();
        f.debug_struct("SecurityConfiguration")
            .field("shared", &self.shared)
            .field("declared", &labels)
            .finish()
    }
}

impl SecurityConfiguration {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a shared object to every chain
    #[must_use]
    pub fn shared_object<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.shared.insert(value);
        self
    }

    /// Declare a web-level configurer
    #[must_use]
    pub fn configurer<C: Configurer<WebSecurity>>(mut self, configurer: C) -> Self {
        let label = configurer.name().to_string();
        self.declared.push(Declared {
            label,
            configurer: Box::new(configurer),
        });
        self
    }

    /// Declare a filter chain at `priority`
    #[must_use]
    pub fn filter_chain<F>(mut self, name: impl Into<String>, priority: i32, customize: F) -> Self
    where
        F: FnOnce(&mut HttpSecurity) -> Result<(), ConfigurationError> + Send + 'static,
    {
        let configurer = SecurityFilterChainConfigurer::new(name, priority, customize);
        self.declared.push(Declared {
            label: configurer.chain_name().to_string(),
            configurer: Box::new(configurer),
        });
        self
    }

    /// Apply every configurer in order and build
    ///
    /// Configurers are applied by ascending [`Configurer::order`]. Two
    /// declarations sharing an order are refused before anything runs.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::DuplicateOrder`] naming both declarations
    /// - any error raised while building the chains
    pub fn build(self) -> Result<Arc<FilterChainProxy>, ConfigurationError> {
        let mut declared = self.declared;
        declared.sort_by_key(|d| d.configurer.order());
        for pair in declared.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if first.configurer.order() == second.configurer.order() {
                return Err(ConfigurationError::DuplicateOrder {
                    order: first.configurer.order(),
                    existing: first.label.clone(),
                    conflicting: second.label.clone(),
                });
            }
        }

        let mut web = WebSecurity::with_shared_objects(self.shared);
        for Declared { label, configurer } in declared {
            debug!(configurer = %label, order = configurer.order(), "Applying web configurer");
            web.apply_boxed(configurer)?;
        }
        web.build()
    }
}
