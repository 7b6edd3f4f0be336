//! File-based settings
//!
//! [`SecuritySettings`] covers the knobs of the built-in configurers that are
//! plain data (URLs, limits, flags). It is loaded from TOML, YAML or JSON,
//! with `WARDEN_`-prefixed environment variables overriding file values
//! (`WARDEN_SESSION__MAXIMUM_SESSIONS=1`), and applied to an
//! [`HttpSecurity`]. Anything that is code (managers, handlers, access
//! rules) is still configured programmatically.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use warden_core::ConfigurationError;
use warden_web::authentication::{DEFAULT_PASSWORD_PARAMETER, DEFAULT_USERNAME_PARAMETER, BearerTokenResolver};
use warden_web::session::UNLIMITED_SESSIONS;

use crate::configurers::{AnonymousConfigurer, CsrfConfigurer, SessionFixation};
use crate::http::HttpSecurity;

/// Environment prefix used by [`SecuritySettings::from_file`]
pub const ENV_PREFIX: &str = "WARDEN";

/// Settings loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Settings file not found
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported settings file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Settings parsing error
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Settings parsed but are inconsistent
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

/// Form login settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLoginSettings {
    /// Login page
    pub login_page: String,
    /// URL credentials are POSTed to; the login page when unset
    pub processing_url: Option<String>,
    /// Redirect target after login
    pub default_success_url: String,
    /// Redirect target after a failed login; `<login_page>?error` when unset
    pub failure_url: Option<String>,
    /// Username form field
    pub username_parameter: String,
    /// Password form field
    pub password_parameter: String,
    /// Open the login URLs to everyone
    pub permit_all: bool,
}

impl Default for FormLoginSettings {
    fn default() -> Self {
        Self {
            login_page: "/login".to_string(),
            processing_url: None,
            default_success_url: "/".to_string(),
            failure_url: None,
            username_parameter: DEFAULT_USERNAME_PARAMETER.to_string(),
            password_parameter: DEFAULT_PASSWORD_PARAMETER.to_string(),
            permit_all: true,
        }
    }
}

/// HTTP Basic settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBasicSettings {
    /// Realm named in the challenge
    pub realm: String,
}

impl Default for HttpBasicSettings {
    fn default() -> Self {
        Self {
            realm: "Realm".to_string(),
        }
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerSettings {
    /// Realm named in challenges
    pub realm: Option<String>,
    /// Accept `?access_token=` on GET requests
    pub allow_uri_query_parameter: bool,
    /// Accept `access_token` in form-encoded POST bodies
    pub allow_form_encoded_body_parameter: bool,
}

/// Logout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutSettings {
    /// Logout URL
    pub url: String,
    /// Redirect target after logout
    pub success_url: String,
    /// Cookies expired on logout
    pub delete_cookies: Vec<String>,
    /// Invalidate the transport session
    pub invalidate_session: bool,
    /// Open the logout URLs to everyone
    pub permit_all: bool,
}

impl Default for LogoutSettings {
    fn default() -> Self {
        Self {
            url: "/logout".to_string(),
            success_url: "/login?logout".to_string(),
            delete_cookies: Vec::new(),
            invalidate_session: true,
            permit_all: true,
        }
    }
}

/// Session management settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session fixation protection
    pub fixation: SessionFixation,
    /// Sessions per principal; no concurrency control when unset
    pub maximum_sessions: Option<i32>,
    /// Refuse logins over the limit instead of expiring old sessions
    pub max_sessions_prevents_login: bool,
    /// Redirect target for expired sessions
    pub expired_url: Option<String>,
}

/// CSRF settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfSettings {
    /// Enable CSRF protection
    pub enabled: bool,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Anonymous authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymousSettings {
    /// Install an anonymous authentication
    pub enabled: bool,
    /// Its principal name
    pub principal: String,
}

impl Default for AnonymousSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            principal: warden_core::ANONYMOUS_PRINCIPAL.to_string(),
        }
    }
}

/// Data-only settings of one filter chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Form login; disabled when absent
    pub form_login: Option<FormLoginSettings>,
    /// HTTP Basic; disabled when absent
    pub http_basic: Option<HttpBasicSettings>,
    /// Bearer tokens; disabled when absent
    pub bearer: Option<BearerSettings>,
    /// Logout; disabled when absent
    pub logout: Option<LogoutSettings>,
    /// Session management
    pub session: SessionSettings,
    /// CSRF protection
    pub csrf: CsrfSettings,
    /// Anonymous authentication
    pub anonymous: AnonymousSettings,
}

impl SecuritySettings {
    /// Load settings from a file (TOML, YAML, or JSON)
    ///
    /// The format is detected from the extension. Environment variables with
    /// the `WARDEN_` prefix override file values, `__` separating nested keys.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid settings
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load settings from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self, SettingsError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(SettingsError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(path.to_str().ok_or(SettingsError::UnsupportedFormat)?, format))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values that would only fail later, at build time
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for a session limit of
    /// `0` or below `-1`, or a URL that does not start with `/`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(maximum) = self.session.maximum_sessions
            && (maximum == 0 || maximum < UNLIMITED_SESSIONS)
        {
            return Err(ConfigurationError::InvalidSetting(format!(
                "session.maximum_sessions must be positive or -1, got {maximum}"
            )));
        }

        let mut urls: Vec<(&str, &str)> = Vec::new();
        if let Some(form) = &self.form_login {
            urls.push(("form_login.login_page", form.login_page.as_str()));
            urls.push(("form_login.default_success_url", form.default_success_url.as_str()));
            urls.extend(form.processing_url.as_deref().map(|u| ("form_login.processing_url", u)));
            urls.extend(form.failure_url.as_deref().map(|u| ("form_login.failure_url", u)));
        }
        if let Some(logout) = &self.logout {
            urls.push(("logout.url", logout.url.as_str()));
            urls.push(("logout.success_url", logout.success_url.as_str()));
        }
        urls.extend(self.session.expired_url.as_deref().map(|u| ("session.expired_url", u)));

        match urls.into_iter().find(|(_, url)| !url.starts_with('/')) {
            Some((key, url)) => Err(ConfigurationError::InvalidSetting(format!(
                "{key} must be an absolute path, got {url:?}"
            ))),
            None => Ok(()),
        }
    }

    /// Apply the settings to a chain builder
    ///
    /// Enabled features get their configurer (customizing one already
    /// registered); disabled CSRF and anonymous support are removed.
    ///
    /// # Errors
    ///
    /// Returns the first validation error or configurer registration error.
    pub fn apply_to(&self, http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
        self.validate()?;

        if let Some(form) = &self.form_login {
            http.form_login(|c| {
                c.login_page(form.login_page.clone())
                    .default_success_url(form.default_success_url.clone())
                    .username_parameter(form.username_parameter.clone())
                    .password_parameter(form.password_parameter.clone())
                    .permit_all(form.permit_all);
                if let Some(url) = &form.processing_url {
                    c.login_processing_url(url.clone());
                }
                if let Some(url) = &form.failure_url {
                    c.failure_url(url.clone());
                }
            })?;
        }

        if let Some(basic) = &self.http_basic {
            http.http_basic(|c| {
                c.realm(basic.realm.clone());
            })?;
        }

        if let Some(bearer) = &self.bearer {
            http.bearer_token(|c| {
                c.resolver(
                    BearerTokenResolver::new()
                        .allow_uri_query_parameter(bearer.allow_uri_query_parameter)
                        .allow_form_encoded_body_parameter(bearer.allow_form_encoded_body_parameter),
                );
                if let Some(realm) = &bearer.realm {
                    c.realm(realm.clone());
                }
            })?;
        }

        if let Some(logout) = &self.logout {
            http.logout(|c| {
                c.logout_url(logout.url.clone())
                    .logout_success_url(logout.success_url.clone())
                    .delete_cookies(logout.delete_cookies.iter().cloned())
                    .invalidate_http_session(logout.invalidate_session)
                    .permit_all(logout.permit_all);
            })?;
        }

        let session = &self.session;
        http.session_management(|c| {
            c.session_fixation(session.fixation)
                .max_sessions_prevents_login(session.max_sessions_prevents_login);
            if let Some(maximum) = session.maximum_sessions {
                c.maximum_sessions(maximum);
            }
            if let Some(url) = &session.expired_url {
                c.expired_url(url.clone());
            }
        })?;

        if self.csrf.enabled {
            http.csrf(|_| {})?;
        } else {
            http.disable::<CsrfConfigurer>();
        }

        if self.anonymous.enabled {
            http.anonymous(|c| {
                c.principal(self.anonymous.principal.clone());
            })?;
        } else {
            http.disable::<AnonymousConfigurer>();
        }
        Ok(())
    }
}
