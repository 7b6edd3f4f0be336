use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_core::ConfigurationError;
use warden_web::session::{
    ChangeSessionIdStrategy, CompositeSessionStrategy, ConcurrentSessionControlStrategy, ConcurrentSessionFilter,
    ExpiredSessionStrategy, InMemorySessionRegistry, NullSessionStrategy, RedirectExpiredSessionStrategy,
    RegisterSessionStrategy, SessionAuthenticationStrategy, SessionRegistry, StatusExpiredSessionStrategy,
};

use crate::configurer::Configurer;
use crate::configurers::{SecurityContextConfigurer, event_publisher};
use crate::http::HttpSecurity;
use crate::lifecycle::SecurityBuilder;

/// What happens to the session id when a user logs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFixation {
    /// Keep the session, issue a new id
    #[default]
    ChangeSessionId,
    /// Leave the session untouched
    None,
}

/// Session fixation protection and concurrent session control
///
/// With a maximum set, logins are counted per principal in the session
/// registry. Going over the limit either expires the least recently used
/// sessions, which are then reaped on their next request, or refuses the
/// new login.
#[derive(Default)]
pub struct SessionManagementConfigurer {
    fixation: SessionFixation,
    maximum_sessions: Option<i32>,
    prevents_login: bool,
    expired_url: Option<String>,
    registry: Option<Arc<dyn SessionRegistry>>,
}

impl fmt::Debug for SessionManagementConfigurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManagementConfigurer")
            .field("fixation", &self.fixation)
            .field("maximum_sessions", &self.maximum_sessions)
            .field("prevents_login", &self.prevents_login)
            .field("expired_url", &self.expired_url)
            .finish_non_exhaustive()
    }
}

impl SessionManagementConfigurer {
    /// Session fixation protection
    pub fn session_fixation(&mut self, fixation: SessionFixation) -> &mut Self {
        self.fixation = fixation;
        self
    }

    /// Sessions allowed per principal (`-1` for no limit)
    pub fn maximum_sessions(&mut self, maximum: i32) -> &mut Self {
        self.maximum_sessions = Some(maximum);
        self
    }

    /// Refuse new logins over the limit instead of expiring old sessions
    pub fn max_sessions_prevents_login(&mut self, prevents: bool) -> &mut Self {
        self.prevents_login = prevents;
        self
    }

    /// Redirect target for requests on an expired session (`401` otherwise)
    pub fn expired_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.expired_url = Some(url.into());
        self
    }

    /// Registry tracking sessions per principal
    pub fn session_registry(&mut self, registry: Arc<dyn SessionRegistry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    fn fixation_strategy(&self, registry: Option<Arc<dyn SessionRegistry>>) -> Arc<dyn SessionAuthenticationStrategy> {
        match (self.fixation, registry) {
            (SessionFixation::ChangeSessionId, Some(registry)) => {
                Arc::new(ChangeSessionIdStrategy::with_registry(registry))
            }
            (SessionFixation::ChangeSessionId, None) => Arc::new(ChangeSessionIdStrategy::new()),
            (SessionFixation::None, _) => Arc::new(NullSessionStrategy),
        }
    }

    fn resolve_registry(&self, http: &HttpSecurity) -> Arc<dyn SessionRegistry> {
        self.registry
            .clone()
            .or_else(|| http.shared::<Arc<dyn SessionRegistry>>())
            .unwrap_or_else(|| Arc::new(InMemorySessionRegistry::new()))
    }
}

impl Configurer<HttpSecurity> for SessionManagementConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        http.get_or_apply::<SecurityContextConfigurer>()?;

        let strategy: Arc<dyn SessionAuthenticationStrategy> = match self.maximum_sessions {
            Some(maximum) => {
                let registry = self.resolve_registry(http);
                let control = ConcurrentSessionControlStrategy::new(Arc::clone(&registry), maximum)?
                    .with_exception_if_maximum_exceeded(self.prevents_login);
                debug!(maximum, prevents_login = self.prevents_login, "Enabling concurrent session control");
                http.set_shared_object(Arc::clone(&registry));
                Arc::new(CompositeSessionStrategy::new(vec![
                    Arc::new(control),
                    self.fixation_strategy(Some(Arc::clone(&registry))),
                    Arc::new(RegisterSessionStrategy::new(registry)),
                ]))
            }
            None => self.fixation_strategy(http.shared::<Arc<dyn SessionRegistry>>()),
        };
        http.set_shared_object(strategy);
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if self.maximum_sessions.is_none() {
            return Ok(());
        }
        let registry = http.require_shared::<Arc<dyn SessionRegistry>>()?;
        let expired: Arc<dyn ExpiredSessionStrategy> = match &self.expired_url {
            Some(url) => Arc::new(RedirectExpiredSessionStrategy::new(url.clone())),
            None => Arc::new(StatusExpiredSessionStrategy),
        };
        let filter = ConcurrentSessionFilter::new(registry)
            .with_expired_session_strategy(expired)
            .with_event_publisher(event_publisher(http));
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
