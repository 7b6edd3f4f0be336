//! Warden demo
//!
//! Builds two filter chains (a bearer-token API and a form-login web app),
//! puts them in front of a Tower service and replays a short browser and
//! API session against it. Pass a settings file (TOML, YAML or JSON) as the
//! first argument to override the web chain's settings.
//!
//! ```text
//! RUST_LOG=warden_web=debug cargo run -p warden-demo -- demo.toml
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE};
use http::{Method, Request, Response, StatusCode};
use tower::{ServiceBuilder, ServiceExt, service_fn};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_config::SecurityConfiguration;
use warden_config::settings::{FormLoginSettings, LogoutSettings, SecuritySettings};
use warden_core::{
    AuthenticationManager, AuthenticationProvider, DaoAuthenticationProvider, InMemoryTokenIntrospector,
    InMemoryUserDetailsService, ProviderManager, TokenAuthenticationProvider, UserDetails, UserDetailsService,
};
use warden_web::authorization::AccessRule;
use warden_web::matcher::PathPatternRequestMatcher;
use warden_web::session::InMemorySessionStore;
use warden_web::tower::{SESSION_COOKIE, SecurityLayer};
use warden_web::{FilterChainProxy, FormParameters, SecurityContext};

fn default_settings() -> SecuritySettings {
    let mut settings = SecuritySettings {
        form_login: Some(FormLoginSettings::default()),
        logout: Some(LogoutSettings::default()),
        ..SecuritySettings::default()
    };
    settings.session.maximum_sessions = Some(1);
    // The scripted client below does not render forms, so it never sees a token
    settings.csrf.enabled = false;
    settings
}

fn load_settings() -> anyhow::Result<SecuritySettings> {
    match std::env::args().nth(1) {
        Some(path) => SecuritySettings::from_file(&path).with_context(|| format!("loading settings from {path}")),
        None => Ok(default_settings()),
    }
}

fn authentication_manager() -> Arc<dyn AuthenticationManager> {
    let alice = UserDetails::with_username("alice").password("{noop}secret").roles(&["USER"]).build();
    let users: Arc<dyn UserDetailsService> = Arc::new(InMemoryUserDetailsService::with_users([alice.clone()]));
    let tokens = InMemoryTokenIntrospector::new();
    tokens.insert("demo-token", alice);

    let dao: Arc<dyn AuthenticationProvider> = Arc::new(DaoAuthenticationProvider::new(users));
    let token: Arc<dyn AuthenticationProvider> = Arc::new(TokenAuthenticationProvider::new(tokens));
    Arc::new(ProviderManager::new(vec![dao, token]))
}

fn pipeline(settings: SecuritySettings) -> anyhow::Result<Arc<FilterChainProxy>> {
    let proxy = SecurityConfiguration::new()
        .shared_object(authentication_manager())
        .filter_chain("api", 0, |http| {
            http.security_matcher(Arc::new(PathPatternRequestMatcher::new("/api/**")))
                .bearer_token(|bearer| {
                    bearer.realm("demo");
                })?
                .authorize_requests(|rules| {
                    rules.any_request(AccessRule::Authenticated);
                })?;
            Ok(())
        })
        .filter_chain("web", 1, move |http| {
            settings.apply_to(http)?;
            http.authorize_requests(|rules| {
                rules.any_request(AccessRule::has_role("USER"));
            })?;
            Ok(())
        })
        .build()?;
    Ok(proxy)
}

async fn application(req: Request<Bytes>) -> Result<Response<Bytes>, Infallible> {
    let principal = req
        .extensions()
        .get::<SecurityContext>()
        .and_then(SecurityContext::principal)
        .unwrap_or("nobody")
        .to_string();
    Ok(Response::new(Bytes::from(format!("hello, {principal}"))))
}

/// Keeps the session cookie between requests like a browser would
#[derive(Debug, Default)]
struct Browser {
    session: Option<String>,
}

impl Browser {
    fn request(&self, method: Method, uri: &str) -> http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = &self.session {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE}={session}"));
        }
        builder
    }

    fn remember(&mut self, response: &Response<Bytes>) {
        for value in response.headers().get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let Some(pair) = value.split(';').next() else { continue };
            if let Some((name, id)) = pair.split_once('=')
                && name == SESSION_COOKIE
            {
                self.session = (!id.is_empty()).then(|| id.to_string());
            }
        }
    }
}

fn describe(step: &str, response: &Response<Bytes>) {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(
        step,
        status = %response.status(),
        location,
        body = %String::from_utf8_lossy(response.body()),
        "Response"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,warden_web=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let proxy = pipeline(load_settings()?)?;
    for chain in proxy.chains() {
        info!(chain = chain.name(), filters = ?chain.filter_names(), "Filter chain");
    }

    let service = ServiceBuilder::new()
        .layer(SecurityLayer::new(proxy).with_session_store(Arc::new(InMemorySessionStore::new())))
        .service(service_fn(application));

    let mut browser = Browser::default();

    let response = service
        .clone()
        .oneshot(browser.request(Method::GET, "/account").body(Bytes::new())?)
        .await?;
    describe("anonymous page visit", &response);

    let form = FormParameters(vec![
        ("username".to_string(), "alice".to_string()),
        ("password".to_string(), "secret".to_string()),
    ]);
    let response = service
        .clone()
        .oneshot(
            browser
                .request(Method::POST, "/login")
                .extension(form)
                .body(Bytes::new())?,
        )
        .await?;
    browser.remember(&response);
    describe("form login", &response);
    anyhow::ensure!(response.status() == StatusCode::FOUND, "login was not redirected");

    let response = service
        .clone()
        .oneshot(browser.request(Method::GET, "/account").body(Bytes::new())?)
        .await?;
    describe("page visit with session", &response);

    let response = service
        .clone()
        .oneshot(browser.request(Method::POST, "/logout").body(Bytes::new())?)
        .await?;
    browser.remember(&response);
    describe("logout", &response);

    let api = Browser::default();
    let response = service
        .clone()
        .oneshot(
            api.request(Method::GET, "/api/items")
                .header(AUTHORIZATION, "Bearer demo-token")
                .body(Bytes::new())?,
        )
        .await?;
    describe("api call with token", &response);

    let response = service
        .oneshot(
            api.request(Method::GET, "/api/items")
                .header(AUTHORIZATION, "Bearer stolen-token")
                .body(Bytes::new())?,
        )
        .await?;
    describe("api call with unknown token", &response);

    Ok(())
}
