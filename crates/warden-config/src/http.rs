//! Per-chain builder
//!
//! [`HttpSecurity`] collects filters contributed by its configurers and
//! produces one [`DefaultSecurityFilterChain`]. Filters are placed by the
//! [`FilterOrder`] table, so configurers can run in any order and the chain
//! still comes out in the canonical stage order:
//!
//! ```text
//! SecurityContextHolder → Csrf → Logout → UsernamePassword →
//! ConcurrentSession → BearerToken → Basic → Anonymous → Authorization
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use warden_core::{
    AuthenticationEventPublisher, AuthenticationManager, AuthenticationProvider, ConfigurationError,
    DaoAuthenticationProvider, ProviderManager, UserDetailsService,
};
use warden_web::authorization::{AccessDeniedHandler, AuthenticationEntryPoint};
use warden_web::context::SecurityContextRepository;
use warden_web::filter::{DefaultSecurityFilterChain, Filter};
use warden_web::matcher::{AnyRequestMatcher, RequestMatcher};
use warden_web::session::SessionRegistry;

use crate::configurer::Configurer;
use crate::configurers::{
    AnonymousConfigurer, AuthorizeRequestsConfigurer, BearerTokenConfigurer, CsrfConfigurer,
    FormLoginConfigurer, HttpBasicConfigurer, LogoutConfigurer, SecurityContextConfigurer,
    SessionManagementConfigurer,
};
use crate::lifecycle::{DuplicatePolicy, Lifecycle, SecurityBuilder};
use crate::shared::SharedObjects;

/// Filter name of the context holder stage
pub const SECURITY_CONTEXT_HOLDER_FILTER: &str = "SecurityContextHolderFilter";
/// Filter name of the CSRF stage
pub const CSRF_FILTER: &str = "CsrfFilter";
/// Filter name of the logout stage
pub const LOGOUT_FILTER: &str = "LogoutFilter";
/// Filter name of the form login stage
pub const USERNAME_PASSWORD_FILTER: &str = "UsernamePasswordAuthenticationFilter";
/// Filter name of the session reaping stage
pub const CONCURRENT_SESSION_FILTER: &str = "ConcurrentSessionFilter";
/// Filter name of the bearer token stage
pub const BEARER_TOKEN_FILTER: &str = "BearerTokenAuthenticationFilter";
/// Filter name of the HTTP Basic stage
pub const BASIC_FILTER: &str = "BasicAuthenticationFilter";
/// Filter name of the anonymous stage
pub const ANONYMOUS_FILTER: &str = "AnonymousAuthenticationFilter";
/// Filter name of the authorization stage
pub const AUTHORIZATION_FILTER: &str = "AuthorizationFilter";

const ORDER_STEP: i32 = 100;

/// Position of every known filter name in a chain
#[derive(Debug, Clone)]
pub struct FilterOrder {
    orders: HashMap<&'static str, i32>,
}

impl Default for FilterOrder {
    fn default() -> Self {
        let orders = [
            SECURITY_CONTEXT_HOLDER_FILTER,
            CSRF_FILTER,
            LOGOUT_FILTER,
            USERNAME_PASSWORD_FILTER,
            CONCURRENT_SESSION_FILTER,
            BEARER_TOKEN_FILTER,
            BASIC_FILTER,
            ANONYMOUS_FILTER,
            AUTHORIZATION_FILTER,
        ]
        .into_iter()
        .zip((1..).map(|step| step * ORDER_STEP))
        .collect();
        Self { orders }
    }
}

impl FilterOrder {
    /// Order of a filter name
    pub fn order_of(&self, name: &str) -> Option<i32> {
        self.orders.get(name).copied()
    }

    /// Register a name; an existing registration is kept
    pub fn register(&mut self, name: &'static str, order: i32) {
        self.orders.entry(name).or_insert(order);
    }

    fn require(&self, name: &str) -> Result<i32, ConfigurationError> {
        self.order_of(name).ok_or_else(|| {
            ConfigurationError::InvalidSetting(format!(
                "Filter {name} has no registered order; use add_filter_before, add_filter_after or add_filter_at"
            ))
        })
    }
}

struct OrderedFilter {
    order: i32,
    filter: Arc<dyn Filter>,
}

/// Builder of one filter chain
pub struct HttpSecurity {
    lifecycle: Lifecycle<HttpSecurity>,
    name: String,
    matcher: Arc<dyn RequestMatcher>,
    filters: Vec<OrderedFilter>,
    filter_order: FilterOrder,
}

impl fmt::Debug for HttpSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters: Vec<(i32, &str)> = self
            .filters
            .iter()
            .map(|entry| (entry.order, entry.filter.name()))
            .collect();
        f.debug_struct("HttpSecurity")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("filters", &filters)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl HttpSecurity {
    /// Builder for a chain named `name` matching every request
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_shared_objects(name, SharedObjects::new())
    }

    /// Builder starting from shared objects published elsewhere
    ///
    /// Configurers of the same type replace each other.
    pub fn with_shared_objects(name: impl Into<String>, shared: SharedObjects) -> Self {
        Self {
            lifecycle: Lifecycle::with_shared_objects(DuplicatePolicy::Replace, shared),
            name: name.into(),
            matcher: Arc::new(AnyRequestMatcher),
            filters: Vec::new(),
            filter_order: FilterOrder::default(),
        }
    }

    /// Chain name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restrict the chain to requests accepted by `matcher`
    pub fn security_matcher(&mut self, matcher: Arc<dyn RequestMatcher>) -> &mut Self {
        self.matcher = matcher;
        self
    }

    /// Add a filter whose name is in the order table
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for an unregistered name.
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) -> Result<&mut Self, ConfigurationError> {
        let order = self.filter_order.require(filter.name())?;
        Ok(self.push_filter(order, filter))
    }

    /// Add a filter at the position of the registered filter `at`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] when `at` is unregistered.
    pub fn add_filter_at(&mut self, filter: Arc<dyn Filter>, at: &str) -> Result<&mut Self, ConfigurationError> {
        let order = self.filter_order.require(at)?;
        Ok(self.push_filter(order, filter))
    }

    /// Add a filter just before the registered filter `before`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] when `before` is unregistered.
    pub fn add_filter_before(&mut self, filter: Arc<dyn Filter>, before: &str) -> Result<&mut Self, ConfigurationError> {
        let order = self.filter_order.require(before)?;
        Ok(self.push_filter(order - 1, filter))
    }

    /// Add a filter just after the registered filter `after`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] when `after` is unregistered.
    pub fn add_filter_after(&mut self, filter: Arc<dyn Filter>, after: &str) -> Result<&mut Self, ConfigurationError> {
        let order = self.filter_order.require(after)?;
        Ok(self.push_filter(order + 1, filter))
    }

    fn push_filter(&mut self, order: i32, filter: Arc<dyn Filter>) -> &mut Self {
        trace!(chain = %self.name, filter = filter.name(), order, "Adding filter");
        self.filter_order.register(filter.name(), order);
        self.filters.push(OrderedFilter { order, filter });
        self
    }

    /// Form login
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn form_login(&mut self, customize: impl FnOnce(&mut FormLoginConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// HTTP Basic authentication
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn http_basic(&mut self, customize: impl FnOnce(&mut HttpBasicConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Bearer token authentication
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn bearer_token(&mut self, customize: impl FnOnce(&mut BearerTokenConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Session fixation and concurrency control
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn session_management(
        &mut self,
        customize: impl FnOnce(&mut SessionManagementConfigurer),
    ) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Logout handling
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn logout(&mut self, customize: impl FnOnce(&mut LogoutConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Security context persistence
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn security_context(
        &mut self,
        customize: impl FnOnce(&mut SecurityContextConfigurer),
    ) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Anonymous authentication
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn anonymous(&mut self, customize: impl FnOnce(&mut AnonymousConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// CSRF protection
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn csrf(&mut self, customize: impl FnOnce(&mut CsrfConfigurer)) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Access rules
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn authorize_requests(
        &mut self,
        customize: impl FnOnce(&mut AuthorizeRequestsConfigurer),
    ) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(customize)
    }

    /// Remove every configurer of type `C`
    pub fn disable<C: Configurer<Self>>(&mut self) -> &mut Self {
        self.lifecycle.remove_configurers::<C>();
        self
    }

    /// Customize the registered configurer of type `C`, applying a default one first if needed
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn with_configurer<C: Configurer<Self> + Default>(
        &mut self,
        customize: impl FnOnce(&mut C),
    ) -> Result<&mut Self, ConfigurationError> {
        if let Some(existing) = self.lifecycle.configurer_mut::<C>()? {
            customize(existing);
            return Ok(self);
        }
        let mut configurer = C::default();
        customize(&mut configurer);
        self.apply(configurer)
    }

    /// Apply a default `C` unless one is registered
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::add`].
    pub fn get_or_apply<C: Configurer<Self> + Default>(&mut self) -> Result<&mut Self, ConfigurationError> {
        self.with_configurer(|_: &mut C| {})
    }

    /// Whether a configurer of type `C` is registered
    pub fn has_configurer<C: Configurer<Self>>(&self) -> bool {
        !self.lifecycle.configurers::<C>().is_empty()
    }

    /// Shared object cloned out of the registry
    pub fn shared<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.shared_object::<T>().cloned()
    }

    /// Shared object cloned out of the registry, or an error naming the type
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingSharedObject`] when absent.
    pub fn require_shared<T: Clone + Send + Sync + 'static>(&self) -> Result<T, ConfigurationError> {
        self.lifecycle.shared_objects().require::<T>().cloned()
    }

    /// Manager used by every authentication stage
    pub fn authentication_manager(&mut self, manager: Arc<dyn AuthenticationManager>) -> &mut Self {
        self.set_shared_object(manager);
        self
    }

    /// User store; a manager over it is created when none is set
    pub fn user_details_service(&mut self, users: Arc<dyn UserDetailsService>) -> &mut Self {
        self.set_shared_object(users);
        self
    }

    /// Session registry shared with concurrency control and logout
    pub fn session_registry(&mut self, registry: Arc<dyn SessionRegistry>) -> &mut Self {
        self.set_shared_object(registry);
        self
    }

    /// Sink for authentication and authorization events
    pub fn event_publisher(&mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> &mut Self {
        self.set_shared_object(publisher);
        self
    }

    /// Entry point used when an unauthenticated request is refused
    pub fn authentication_entry_point(&mut self, entry_point: Arc<dyn AuthenticationEntryPoint>) -> &mut Self {
        self.set_shared_object(entry_point);
        self
    }

    /// Handler used when an authenticated request is refused
    pub fn access_denied_handler(&mut self, handler: Arc<dyn AccessDeniedHandler>) -> &mut Self {
        self.set_shared_object(handler);
        self
    }

    /// Where security contexts are stored between requests
    pub fn security_context_repository(&mut self, repository: Arc<dyn SecurityContextRepository>) -> &mut Self {
        self.set_shared_object(repository);
        self
    }
}

impl SecurityBuilder for HttpSecurity {
    type Output = DefaultSecurityFilterChain;

    fn lifecycle(&self) -> &Lifecycle<Self> {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle<Self> {
        &mut self.lifecycle
    }

    fn before_configure(&mut self) -> Result<(), ConfigurationError> {
        if self.shared_object::<Arc<dyn AuthenticationManager>>().is_some() {
            return Ok(());
        }
        if let Some(users) = self.shared::<Arc<dyn UserDetailsService>>() {
            debug!(chain = %self.name, "Creating authentication manager from user details service");
            let dao: Arc<dyn AuthenticationProvider> = Arc::new(DaoAuthenticationProvider::new(users));
            let manager: Arc<dyn AuthenticationManager> = Arc::new(ProviderManager::new(vec![dao]));
            self.set_shared_object(manager);
        }
        Ok(())
    }

    fn perform_build(&mut self) -> Result<Self::Output, ConfigurationError> {
        self.filters.sort_by_key(|entry| entry.order);
        let filters: Vec<Arc<dyn Filter>> = self
            .filters
            .iter()
            .map(|entry| Arc::clone(&entry.filter))
            .collect();
        let chain = DefaultSecurityFilterChain::new(self.name.clone(), Arc::clone(&self.matcher), filters);
        debug!(chain = %self.name, filters = ?chain.filter_names(), "Built filter chain");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use warden_web::anonymous::AnonymousAuthenticationFilter;
    use warden_web::exchange::Exchange;
    use warden_web::filter::Next;
    use warden_web::error::WebError;

    use super::*;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Filter for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
            next.run(exchange)
        }
    }

    #[test]
    fn test_filters_sorted_by_table() {
        let mut http = HttpSecurity::new("api");
        http.add_filter(Arc::new(Named(AUTHORIZATION_FILTER)))
            .unwrap()
            .add_filter(Arc::new(AnonymousAuthenticationFilter::default()))
            .unwrap()
            .add_filter(Arc::new(Named(SECURITY_CONTEXT_HOLDER_FILTER)))
            .unwrap();
        let chain = http.build().unwrap();
        assert_eq!(
            chain.filter_names(),
            vec![SECURITY_CONTEXT_HOLDER_FILTER, ANONYMOUS_FILTER, AUTHORIZATION_FILTER]
        );
        assert_eq!(chain.name(), "api");
    }

    #[test]
    fn test_relative_placement() {
        let mut http = HttpSecurity::new("api");
        http.add_filter(Arc::new(Named(AUTHORIZATION_FILTER))).unwrap();
        http.add_filter(Arc::new(Named(ANONYMOUS_FILTER))).unwrap();
        http.add_filter_after(Arc::new(Named("Audit")), ANONYMOUS_FILTER).unwrap();
        http.add_filter_before(Arc::new(Named("TenantFilter")), ANONYMOUS_FILTER).unwrap();
        // Registered by the placement above
        http.add_filter(Arc::new(Named("Audit"))).unwrap();
        let chain = http.build().unwrap();
        assert_eq!(
            chain.filter_names(),
            vec!["TenantFilter", ANONYMOUS_FILTER, "Audit", "Audit", AUTHORIZATION_FILTER]
        );
    }

    #[test]
    fn test_same_position_keeps_insertion_order() {
        let mut http = HttpSecurity::new("api");
        http.add_filter_at(Arc::new(Named("First")), CSRF_FILTER).unwrap();
        http.add_filter(Arc::new(Named(CSRF_FILTER))).unwrap();
        http.add_filter_at(Arc::new(Named("Second")), CSRF_FILTER).unwrap();
        assert_eq!(http.build().unwrap().filter_names(), vec!["First", CSRF_FILTER, "Second"]);
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let mut http = HttpSecurity::new("api");
        assert!(matches!(
            http.add_filter(Arc::new(Named("Mystery"))),
            Err(ConfigurationError::InvalidSetting(_))
        ));
        assert!(http.add_filter_after(Arc::new(Named("Other")), "Mystery").is_err());
    }

    #[test]
    fn test_with_configurer_customizes_existing() {
        let mut http = HttpSecurity::new("web");
        http.form_login(|form| {
            form.login_page("/signin");
        })
        .unwrap();
        http.form_login(|form| {
            form.default_success_url("/home");
        })
        .unwrap();
        let form = http.lifecycle().configurer::<FormLoginConfigurer>().unwrap().unwrap();
        assert_eq!(form.login_page_url(), "/signin");
        assert_eq!(http.lifecycle().len(), 1);
    }

    #[test]
    fn test_disable_removes_configurer() {
        let mut http = HttpSecurity::new("web");
        http.csrf(|_| {}).unwrap().anonymous(|_| {}).unwrap();
        http.disable::<CsrfConfigurer>();
        assert!(!http.has_configurer::<CsrfConfigurer>());
        assert!(http.has_configurer::<AnonymousConfigurer>());
    }
}
