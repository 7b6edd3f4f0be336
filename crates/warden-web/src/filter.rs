//! Pipeline stages and chain dispatch
//!
//! A [`Filter`] receives the [`Exchange`] and a [`Next`] continuation. It may
//! run the rest of the chain by calling [`Next::run`], or short-circuit by
//! returning without doing so.
//!
//! [`FilterChainProxy`] holds every chain keyed by a unique priority, applies
//! the firewall, and hands each request to the first chain whose matcher
//! accepts it. Requests no chain accepts are reported as
//! [`Dispatch::Unmatched`]; what happens to them is the integrator's call.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, trace, warn};
use warden_core::ConfigurationError;

use crate::error::{RequestRejected, WebError};
use crate::exchange::Exchange;
use crate::firewall::{HttpFirewall, StrictHttpFirewall};
use crate::matcher::RequestMatcher;

/// Final step invoked when a request passes every filter of its chain
pub type Terminal<'a> = dyn FnMut(&mut Exchange) -> Result<(), WebError> + 'a;

/// One pipeline stage
pub trait Filter: Send + Sync {
    /// Stable stage name, used for ordering and logs
    fn name(&self) -> &'static str;

    /// Process the exchange
    ///
    /// # Errors
    ///
    /// Returns a [`WebError`] when the request cannot be processed at all.
    /// Authentication failures are not errors; they are written to the
    /// response.
    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError>;
}

/// Continuation over the remaining stages of a chain
pub struct Next<'a> {
    chain: &'a str,
    remaining: &'a [Arc<dyn Filter>],
    terminal: &'a mut Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Continuation over `filters` ending in `terminal`
    pub fn new(
        chain: &'a str,
        filters: &'a [Arc<dyn Filter>],
        terminal: &'a mut Terminal<'a>,
    ) -> Self {
        Self {
            chain,
            remaining: filters,
            terminal,
        }
    }

    /// Continuation with no stages left
    pub fn terminal(terminal: &'a mut Terminal<'a>) -> Self {
        Self::new("", &[], terminal)
    }

    /// Run the next stage, or the terminal step when none remain
    ///
    /// # Errors
    ///
    /// Propagates the first [`WebError`] raised downstream.
    pub fn run(self, exchange: &mut Exchange) -> Result<(), WebError> {
        match self.remaining.split_first() {
            Some((filter, rest)) => {
                trace!(chain = self.chain, filter = filter.name(), "Invoking filter");
                filter.do_filter(
                    exchange,
                    Next {
                        chain: self.chain,
                        remaining: rest,
                        terminal: self.terminal,
                    },
                )
            }
            None => {
                trace!(chain = self.chain, "Reached end of filter chain");
                (self.terminal)(exchange)
            }
        }
    }
}

/// A matcher plus the ordered stages it guards
#[derive(Clone)]
pub struct DefaultSecurityFilterChain {
    name: String,
    matcher: Arc<dyn RequestMatcher>,
    filters: Vec<Arc<dyn Filter>>,
}

impl fmt::Debug for DefaultSecurityFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultSecurityFilterChain")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("filters", &self.filter_names())
            .finish()
    }
}

impl DefaultSecurityFilterChain {
    /// Create a chain
    pub fn new(
        name: impl Into<String>,
        matcher: Arc<dyn RequestMatcher>,
        filters: Vec<Arc<dyn Filter>>,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            filters,
        }
    }

    /// Chain name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this chain handles the request
    pub fn matches(&self, exchange: &Exchange) -> bool {
        self.matcher.matches(&exchange.request)
    }

    /// Ordered stages
    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    /// Stage names in order
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run the chain
    ///
    /// # Errors
    ///
    /// Propagates the first [`WebError`] raised by a stage.
    pub fn run(&self, exchange: &mut Exchange, terminal: &mut Terminal<'_>) -> Result<(), WebError> {
        Next::new(&self.name, &self.filters, terminal).run(exchange)
    }
}

/// Result of dispatching one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A chain ran
    Handled {
        /// Name of the chain that ran
        chain: String,
        /// Whether the request passed every stage and reached the terminal step
        terminal_reached: bool,
    },
    /// No chain matched; the integrator decides what happens
    Unmatched,
    /// The firewall refused the request; a 400 response was written
    Rejected(RequestRejected),
}

/// Aggregates chains by unique priority and dispatches requests
pub struct FilterChainProxy {
    chains: Vec<(i32, DefaultSecurityFilterChain)>,
    firewall: Arc<dyn HttpFirewall>,
}

impl fmt::Debug for FilterChainProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChainProxy")
            .field("chains", &self.chains)
            .finish_non_exhaustive()
    }
}

impl FilterChainProxy {
    /// Aggregate chains, lowest priority value first
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ConflictingChainPriority`] naming both
    /// chains when two share a priority.
    pub fn new(mut chains: Vec<(i32, DefaultSecurityFilterChain)>) -> Result<Self, ConfigurationError> {
        chains.sort_by_key(|(priority, _)| *priority);
        for pair in chains.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if first.0 == second.0 {
                return Err(ConfigurationError::ConflictingChainPriority {
                    priority: first.0,
                    existing: first.1.name().to_string(),
                    conflicting: second.1.name().to_string(),
                });
            }
        }
        debug!(chains = chains.len(), "Assembled filter chain proxy");
        Ok(Self {
            chains,
            firewall: Arc::new(StrictHttpFirewall::default()),
        })
    }

    /// Replace the firewall
    pub fn with_firewall(mut self, firewall: Arc<dyn HttpFirewall>) -> Self {
        self.firewall = firewall;
        self
    }

    /// Chains in dispatch order
    pub fn chains(&self) -> impl Iterator<Item = &DefaultSecurityFilterChain> {
        self.chains.iter().map(|(_, chain)| chain)
    }

    /// First chain matching the request
    pub fn chain_for(&self, exchange: &Exchange) -> Option<&DefaultSecurityFilterChain> {
        self.chains().find(|chain| chain.matches(exchange))
    }

    /// Dispatch one request
    ///
    /// # Errors
    ///
    /// Propagates a [`WebError`] raised by a stage of the selected chain.
    pub fn dispatch(
        &self,
        exchange: &mut Exchange,
        terminal: &mut Terminal<'_>,
    ) -> Result<Dispatch, WebError> {
        if let Err(rejected) = self.firewall.check(&exchange.request) {
            warn!(
                method = %exchange.request.method,
                path = exchange.request.path(),
                reason = %rejected.reason,
                "Request rejected by firewall"
            );
            exchange.response.send_error(StatusCode::BAD_REQUEST);
            return Ok(Dispatch::Rejected(rejected));
        }

        let Some(chain) = self.chain_for(exchange) else {
            debug!(path = exchange.request.path(), "No filter chain matched request");
            return Ok(Dispatch::Unmatched);
        };

        debug!(
            chain = chain.name(),
            filters = chain.filters().len(),
            path = exchange.request.path(),
            "Securing request"
        );

        let mut terminal_reached = false;
        let mut tracked = |exchange: &mut Exchange| {
            terminal_reached = true;
            terminal(exchange)
        };
        chain.run(exchange, &mut tracked)?;

        Ok(Dispatch::Handled {
            chain: chain.name().to_string(),
            terminal_reached,
        })
    }
}
