use std::sync::Arc;

use http::Method;
use warden_core::{AuthenticationManager, ConfigurationError};
use warden_web::authentication::{
    AuthenticationFailureHandler, AuthenticationProcessingFilter, AuthenticationSuccessHandler,
    DEFAULT_PASSWORD_PARAMETER, DEFAULT_USERNAME_PARAMETER, RedirectFailureHandler, RedirectSuccessHandler,
    UsernamePasswordAttempt,
};
use warden_web::authorization::{AuthenticationEntryPoint, LoginUrlEntryPoint};
use warden_web::matcher::PathPatternRequestMatcher;
use warden_web::session::{ChangeSessionIdStrategy, SessionAuthenticationStrategy};

use crate::configurer::Configurer;
use crate::configurers::{SecurityContextConfigurer, context_repository, event_publisher, permit_all};
use crate::http::{HttpSecurity, USERNAME_PASSWORD_FILTER};
use crate::lifecycle::SecurityBuilder;

/// Username/password login through an HTML form
///
/// Unauthenticated requests are sent to the login page; credentials are
/// POSTed to the processing URL (the login page by default).
#[derive(Debug)]
pub struct FormLoginConfigurer {
    login_page: String,
    processing_url: Option<String>,
    username_parameter: String,
    password_parameter: String,
    default_success_url: String,
    target_parameter: Option<String>,
    failure_url: Option<String>,
    success_handler: Option<Arc<dyn AuthenticationSuccessHandler>>,
    failure_handler: Option<Arc<dyn AuthenticationFailureHandler>>,
    permit_all: bool,
}

impl Default for FormLoginConfigurer {
    fn default() -> Self {
        Self {
            login_page: "/login".to_string(),
            processing_url: None,
            username_parameter: DEFAULT_USERNAME_PARAMETER.to_string(),
            password_parameter: DEFAULT_PASSWORD_PARAMETER.to_string(),
            default_success_url: "/".to_string(),
            target_parameter: None,
            failure_url: None,
            success_handler: None,
            failure_handler: None,
            permit_all: false,
        }
    }
}

impl FormLoginConfigurer {
    /// Page unauthenticated users are redirected to
    pub fn login_page(&mut self, url: impl Into<String>) -> &mut Self {
        self.login_page = url.into();
        self
    }

    /// URL credentials are POSTed to
    pub fn login_processing_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.processing_url = Some(url.into());
        self
    }

    /// Form field carrying the username
    pub fn username_parameter(&mut self, name: impl Into<String>) -> &mut Self {
        self.username_parameter = name.into();
        self
    }

    /// Form field carrying the password
    pub fn password_parameter(&mut self, name: impl Into<String>) -> &mut Self {
        self.password_parameter = name.into();
        self
    }

    /// Where to go after a successful login
    pub fn default_success_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.default_success_url = url.into();
        self
    }

    /// Request parameter that may override the success URL
    pub fn target_parameter(&mut self, name: impl Into<String>) -> &mut Self {
        self.target_parameter = Some(name.into());
        self
    }

    /// Where to go after a failed login (default: login page with `?error`)
    pub fn failure_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.failure_url = Some(url.into());
        self
    }

    /// Custom success handler; overrides the success URL
    pub fn success_handler(&mut self, handler: Arc<dyn AuthenticationSuccessHandler>) -> &mut Self {
        self.success_handler = Some(handler);
        self
    }

    /// Custom failure handler; overrides the failure URL
    pub fn failure_handler(&mut self, handler: Arc<dyn AuthenticationFailureHandler>) -> &mut Self {
        self.failure_handler = Some(handler);
        self
    }

    /// Let everyone reach the login page, processing URL and failure URL
    pub fn permit_all(&mut self, permit_all: bool) -> &mut Self {
        self.permit_all = permit_all;
        self
    }

    /// Login page URL
    pub fn login_page_url(&self) -> &str {
        &self.login_page
    }

    fn processing_url(&self) -> &str {
        self.processing_url.as_deref().unwrap_or(&self.login_page)
    }

    fn failure_url_or_default(&self) -> String {
        self.failure_url
            .clone()
            .unwrap_or_else(|| format!("{}?error", self.login_page))
    }
}

impl Configurer<HttpSecurity> for FormLoginConfigurer {
    fn init(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        if http.shared_object::<Arc<dyn AuthenticationEntryPoint>>().is_none() {
            let entry_point: Arc<dyn AuthenticationEntryPoint> = Arc::new(LoginUrlEntryPoint::new(self.login_page.clone()));
            http.set_shared_object(entry_point);
        }
        http.get_or_apply::<SecurityContextConfigurer>()?;
        if self.permit_all {
            let failure_url = self.failure_url_or_default();
            permit_all(
                http,
                "form_login",
                [self.login_page.as_str(), self.processing_url(), failure_url.as_str()],
            )?;
        }
        Ok(())
    }

    fn configure(&mut self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        let manager = http.require_shared::<Arc<dyn AuthenticationManager>>()?;
        let trigger = Arc::new(PathPatternRequestMatcher::with_method(Method::POST, self.processing_url()));
        let attempt = UsernamePasswordAttempt::new()
            .with_username_parameter(self.username_parameter.clone())
            .with_password_parameter(self.password_parameter.clone());
        let session_strategy = http
            .shared::<Arc<dyn SessionAuthenticationStrategy>>()
            .unwrap_or_else(|| Arc::new(ChangeSessionIdStrategy::new()));
        let success_handler = self.success_handler.clone().unwrap_or_else(|| {
            let mut handler = RedirectSuccessHandler::new(self.default_success_url.clone());
            if let Some(parameter) = &self.target_parameter {
                handler = handler.with_target_parameter(parameter.clone());
            }
            Arc::new(handler)
        });
        let failure_handler = self
            .failure_handler
            .clone()
            .unwrap_or_else(|| Arc::new(RedirectFailureHandler::new(self.failure_url_or_default())));

        let filter = AuthenticationProcessingFilter::new(USERNAME_PASSWORD_FILTER, trigger, Arc::new(attempt), manager)
            .with_session_strategy(session_strategy)
            .with_context_repository(context_repository(http))
            .with_event_publisher(event_publisher(http))
            .with_success_handler(success_handler)
            .with_failure_handler(failure_handler);
        http.add_filter(Arc::new(filter))?;
        Ok(())
    }
}
