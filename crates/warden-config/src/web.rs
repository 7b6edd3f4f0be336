//! Top-level builder
//!
//! [`WebSecurity`] owns every [`HttpSecurity`] and the paths that bypass
//! security entirely, and builds them into one [`FilterChainProxy`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use warden_core::ConfigurationError;
use warden_web::filter::{DefaultSecurityFilterChain, FilterChainProxy};
use warden_web::firewall::HttpFirewall;
use warden_web::matcher::{PathPatternRequestMatcher, RequestMatcher};

use crate::configurer::Configurer;
use crate::http::HttpSecurity;
use crate::lifecycle::{DuplicatePolicy, Lifecycle, SecurityBuilder};
use crate::shared::SharedObjects;

/// Builder of the [`FilterChainProxy`]
///
/// Configurers accumulate: several [`SecurityFilterChainConfigurer`]s
/// contribute one chain each. Ignored requests get empty chains that are
/// consulted before every other chain.
pub struct WebSecurity {
    lifecycle: Lifecycle<WebSecurity>,
    chains: Vec<(i32, HttpSecurity)>,
    ignoring: Vec<Arc<dyn RequestMatcher>>,
    firewall: Option<Arc<dyn HttpFirewall>>,
}

impl fmt::Debug for WebSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSecurity")
            .field("chains", &self.chains)
            .field("ignoring", &self.ignoring)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Default for WebSecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSecurity {
    /// Empty builder
    pub fn new() -> Self {
        Self::with_shared_objects(SharedObjects::new())
    }

    /// Builder whose chains start from `shared`
    pub fn with_shared_objects(shared: SharedObjects) -> Self {
        Self {
            lifecycle: Lifecycle::with_shared_objects(DuplicatePolicy::Accumulate, shared),
            chains: Vec::new(),
            ignoring: Vec::new(),
            firewall: None,
        }
    }

    /// Bypass security for requests accepted by `matcher`
    pub fn ignoring(&mut self, matcher: Arc<dyn RequestMatcher>) -> &mut Self {
        self.ignoring.push(matcher);
        self
    }

    /// Bypass security for paths matching an Ant-style `pattern`
    pub fn ignoring_path(&mut self, pattern: &str) -> &mut Self {
        self.ignoring(Arc::new(PathPatternRequestMatcher::new(pattern)))
    }

    /// Firewall applied before dispatch
    pub fn http_firewall(&mut self, firewall: Arc<dyn HttpFirewall>) -> &mut Self {
        self.firewall = Some(firewall);
        self
    }

    /// Register a chain builder at `priority` (lower runs first)
    pub fn add_security_filter_chain_builder(&mut self, priority: i32, http: HttpSecurity) -> &mut Self {
        self.chains.push((priority, http));
        self
    }

    /// Chain builders registered so far
    pub fn chain_builders(&self) -> impl Iterator<Item = (i32, &HttpSecurity)> {
        self.chains.iter().map(|(priority, http)| (*priority, http))
    }
}

impl SecurityBuilder for WebSecurity {
    type Output = FilterChainProxy;

    fn lifecycle(&self) -> &Lifecycle<Self> {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle<Self> {
        &mut self.lifecycle
    }

    fn perform_build(&mut self) -> Result<Self::Output, ConfigurationError> {
        if self.chains.is_empty() {
            return Err(ConfigurationError::InvalidSetting(
                "At least one security filter chain needs to be specified".into(),
            ));
        }

        let mut chains = Vec::with_capacity(self.ignoring.len() + self.chains.len());
        for (index, matcher) in (0..).zip(&self.ignoring) {
            debug!(?matcher, "Ignoring requests; security is bypassed for them");
            let name = format!("ignored-{index}");
            chains.push((i32::MIN + index, DefaultSecurityFilterChain::new(name, Arc::clone(matcher), Vec::new())));
        }
        for (priority, http) in &mut self.chains {
            let chain = http.build()?;
            chains.push((*priority, DefaultSecurityFilterChain::clone(&chain)));
        }

        let mut proxy = FilterChainProxy::new(chains)?;
        if let Some(firewall) = &self.firewall {
            proxy = proxy.with_firewall(Arc::clone(firewall));
        }
        info!(
            chains = ?proxy.chains().map(DefaultSecurityFilterChain::name).collect::<Vec<_>>(),
            "Security filter chains assembled"
        );
        Ok(proxy)
    }
}

type Customizer = Box<dyn FnOnce(&mut HttpSecurity) -> Result<(), ConfigurationError> + Send>;

/// Contributes one [`HttpSecurity`] chain to a [`WebSecurity`]
///
/// The chain starts from the web builder's shared objects, so a manager or
/// registry published once is seen by every chain.
pub struct SecurityFilterChainConfigurer {
    name: String,
    priority: i32,
    customize: Option<Customizer>,
}

impl fmt::Debug for SecurityFilterChainConfigurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityFilterChainConfigurer")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl SecurityFilterChainConfigurer {
    /// Chain `name` at `priority`, shaped by `customize`
    pub fn new<F>(name: impl Into<String>, priority: i32, customize: F) -> Self
    where
        F: FnOnce(&mut HttpSecurity) -> Result<(), ConfigurationError> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            customize: Some(Box::new(customize)),
        }
    }

    /// Chain name
    pub fn chain_name(&self) -> &str {
        &self.name
    }
}

impl Configurer<WebSecurity> for SecurityFilterChainConfigurer {
    fn init(&mut self, web: &mut WebSecurity) -> Result<(), ConfigurationError> {
        let Some(customize) = self.customize.take() else {
            return Ok(());
        };
        let mut http = HttpSecurity::with_shared_objects(self.name.clone(), web.lifecycle().shared_objects().clone());
        customize(&mut http)?;
        web.add_security_filter_chain_builder(self.priority, http);
        Ok(())
    }

    fn order(&self) -> i32 {
        self.priority
    }
}
