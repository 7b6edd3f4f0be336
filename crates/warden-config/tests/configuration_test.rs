//! Pipelines assembled through `SecurityConfiguration` and driven end to end

use std::sync::Arc;

use http::StatusCode;
use http::header::{AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use warden_config::http::{
    ANONYMOUS_FILTER, AUTHORIZATION_FILTER, BASIC_FILTER, BEARER_TOKEN_FILTER, CONCURRENT_SESSION_FILTER,
    CSRF_FILTER, LOGOUT_FILTER, SECURITY_CONTEXT_HOLDER_FILTER, USERNAME_PASSWORD_FILTER,
};
use warden_config::{Configurer, HttpSecurity, SecurityBuilder, SecurityConfiguration, WebSecurity};
use warden_core::{
    AuthenticationManager, AuthenticationProvider, ConfigurationError, DaoAuthenticationProvider,
    InMemoryTokenIntrospector, InMemoryUserDetailsService, ProviderManager, TokenAuthenticationProvider,
    UserDetails, UserDetailsService,
};
use warden_web::authorization::AccessRule;
use warden_web::error::WebError;
use warden_web::exchange::{Exchange, HttpRequest};
use warden_web::filter::{Dispatch, Filter, FilterChainProxy, Next};
use warden_web::matcher::PathPatternRequestMatcher;
use warden_web::session::{InMemorySessionRegistry, InMemorySessionStore, SessionRegistry, SessionStore};

fn alice() -> UserDetails {
    UserDetails::with_username("alice").password("{noop}secret").roles(&["USER"]).build()
}

fn users() -> Arc<dyn UserDetailsService> {
    let users = InMemoryUserDetailsService::new();
    users.create_user(alice());
    Arc::new(users)
}

struct App {
    proxy: Arc<FilterChainProxy>,
    store: Arc<InMemorySessionStore>,
    registry: Arc<InMemorySessionRegistry>,
}

impl App {
    /// Form login web app allowing one session per user
    fn web(csrf: bool) -> Self {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let shared_registry: Arc<dyn SessionRegistry> = registry.clone();
        let proxy = SecurityConfiguration::new()
            .shared_object(users())
            .shared_object(shared_registry)
            .filter_chain("web", 0, move |http| {
                http.authorize_requests(|rules| {
                    rules.any_request(AccessRule::Authenticated);
                })?
                .form_login(|form| {
                    form.permit_all(true);
                })?
                .session_management(|session| {
                    session.maximum_sessions(1);
                })?
                .logout(|logout| {
                    logout.permit_all(true);
                })?
                .anonymous(|_| {})?;
                if csrf {
                    http.csrf(|_| {})?;
                }
                Ok(())
            })
            .build()
            .unwrap();
        Self {
            proxy,
            store: Arc::new(InMemorySessionStore::new()),
            registry,
        }
    }

    fn send(&self, request: HttpRequest, session: Option<&str>) -> (Exchange, bool) {
        let store: Arc<dyn SessionStore> = self.store.clone();
        let mut request = request.with_session_store(store);
        if let Some(session) = session.and_then(|id| self.store.find(id)) {
            request = request.with_session(session);
        }
        let mut exchange = Exchange::new(request);
        let outcome = self.proxy.dispatch(&mut exchange, &mut |_: &mut Exchange| Ok(())).unwrap();
        let reached = matches!(outcome, Dispatch::Handled { terminal_reached: true, .. });
        (exchange, reached)
    }

    fn login(&self) -> String {
        let request = HttpRequest::post("/login")
            .with_parameter("username", "alice")
            .with_parameter("password", "secret");
        let (exchange, _) = self.send(request, None);
        assert_eq!(exchange.response.status, StatusCode::FOUND);
        assert_eq!(exchange.response.headers[LOCATION], "/");
        exchange.request.session_id().unwrap()
    }
}

#[test]
fn test_web_chain_filters_in_canonical_order() {
    let app = App::web(false);
    let chain = app.proxy.chains().next().unwrap();
    assert_eq!(
        chain.filter_names(),
        vec![
            SECURITY_CONTEXT_HOLDER_FILTER,
            LOGOUT_FILTER,
            USERNAME_PASSWORD_FILTER,
            CONCURRENT_SESSION_FILTER,
            ANONYMOUS_FILTER,
            AUTHORIZATION_FILTER,
        ]
    );
}

#[test]
fn test_unauthenticated_request_redirected_to_login_page() {
    let app = App::web(false);
    let (exchange, reached) = app.send(HttpRequest::get("/account"), None);
    assert!(!reached);
    assert_eq!(exchange.response.headers[LOCATION], "/login");

    let (_, reached) = app.send(HttpRequest::get("/login"), None);
    assert!(reached);
    let (_, reached) = app.send(HttpRequest::get("/login?error"), None);
    assert!(reached);
}

#[test]
fn test_login_then_session_is_authenticated() {
    let app = App::web(false);
    let session = app.login();
    let (exchange, reached) = app.send(HttpRequest::get("/account"), Some(&session));
    assert!(reached);
    assert_eq!(exchange.security.principal(), Some("alice"));
}

#[test]
fn test_bad_credentials_redirect_to_failure_url() {
    let app = App::web(false);
    let request = HttpRequest::post("/login")
        .with_parameter("username", "alice")
        .with_parameter("password", "wrong");
    let (exchange, reached) = app.send(request, None);
    assert!(!reached);
    assert_eq!(exchange.response.headers[LOCATION], "/login?error");
    assert!(app.registry.all_principals().is_empty());
}

#[test]
fn test_second_login_expires_first_session() {
    let app = App::web(false);
    let first = app.login();
    let second = app.login();
    assert_ne!(first, second);

    let (exchange, reached) = app.send(HttpRequest::get("/account"), Some(&first));
    assert!(!reached);
    assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);

    let (_, reached) = app.send(HttpRequest::get("/account"), Some(&second));
    assert!(reached);
}

#[test]
fn test_repeated_login_from_same_session_keeps_it_alive() {
    let app = App::web(false);
    let mut session = app.login();
    for _ in 0..3 {
        let request = HttpRequest::post("/login")
            .with_parameter("username", "alice")
            .with_parameter("password", "secret");
        let (exchange, _) = app.send(request, Some(&session));
        assert_eq!(exchange.response.status, StatusCode::FOUND);
        let rotated = exchange.request.session_id().unwrap();
        assert_ne!(rotated, session);
        assert!(app.registry.session_information(&session).is_none());
        session = rotated;
    }

    assert_eq!(app.registry.all_sessions("alice", true).len(), 1);
    let (exchange, reached) = app.send(HttpRequest::get("/account"), Some(&session));
    assert!(reached);
    assert_eq!(exchange.security.principal(), Some("alice"));
}

#[test]
fn test_logout_forgets_session() {
    let app = App::web(false);
    let session = app.login();
    let (exchange, reached) = app.send(HttpRequest::post("/logout"), Some(&session));
    assert!(!reached);
    assert_eq!(exchange.response.headers[LOCATION], "/login?logout");
    assert!(app.registry.session_information(&session).is_none());

    let (exchange, _) = app.send(HttpRequest::get("/account"), Some(&session));
    assert_eq!(exchange.response.headers[LOCATION], "/login");
    let (_, reached) = app.send(HttpRequest::get("/login?logout"), None);
    assert!(reached);
}

#[test]
fn test_csrf_guards_login_and_restricts_logout_to_post() {
    let app = App::web(true);
    assert_eq!(app.proxy.chains().next().unwrap().filter_names()[1], CSRF_FILTER);

    let request = HttpRequest::post("/login")
        .with_parameter("username", "alice")
        .with_parameter("password", "secret");
    let (exchange, reached) = app.send(request, None);
    assert!(!reached);
    assert_eq!(exchange.response.status, StatusCode::FORBIDDEN);

    // GET is not a logout; the anonymous request is sent to the login page
    let (exchange, _) = app.send(HttpRequest::get("/logout"), None);
    assert_eq!(exchange.response.headers[LOCATION], "/login");
}

fn api_manager() -> Arc<dyn AuthenticationManager> {
    let tokens = InMemoryTokenIntrospector::new();
    tokens.insert("good-token", alice());
    let dao: Arc<dyn AuthenticationProvider> = Arc::new(DaoAuthenticationProvider::new(users()));
    let token: Arc<dyn AuthenticationProvider> = Arc::new(TokenAuthenticationProvider::new(tokens));
    Arc::new(ProviderManager::new(vec![dao, token]))
}

fn api_and_web() -> Arc<FilterChainProxy> {
    SecurityConfiguration::new()
        .shared_object(api_manager())
        .filter_chain("api", 0, |http| {
            http.security_matcher(Arc::new(PathPatternRequestMatcher::new("/api/**")))
                .csrf(|_| {})?
                .bearer_token(|bearer| {
                    bearer.realm("api");
                })?
                .authorize_requests(|rules| {
                    rules.any_request(AccessRule::Authenticated);
                })?;
            Ok(())
        })
        .filter_chain("web", 1, |http| {
            http.http_basic(|_| {})?.authorize_requests(|rules| {
                rules.any_request(AccessRule::has_role("USER"));
            })?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn dispatch(proxy: &FilterChainProxy, request: HttpRequest) -> (Exchange, Dispatch) {
    let mut exchange = Exchange::new(request);
    let outcome = proxy.dispatch(&mut exchange, &mut |_: &mut Exchange| Ok(())).unwrap();
    (exchange, outcome)
}

#[test]
fn test_api_chain_layout() {
    let proxy = api_and_web();
    let chains: Vec<_> = proxy.chains().map(|chain| (chain.name(), chain.filter_names())).collect();
    assert_eq!(
        chains,
        vec![
            ("api", vec![CSRF_FILTER, BEARER_TOKEN_FILTER, AUTHORIZATION_FILTER]),
            ("web", vec![BASIC_FILTER, AUTHORIZATION_FILTER]),
        ]
    );
}

#[test]
fn test_bearer_token_accepted_and_exempt_from_csrf() {
    let proxy = api_and_web();
    let request = HttpRequest::post("/api/items").with_header(AUTHORIZATION, "Bearer good-token");
    let (exchange, outcome) = dispatch(&proxy, request);
    assert_eq!(
        outcome,
        Dispatch::Handled {
            chain: "api".into(),
            terminal_reached: true
        }
    );
    assert_eq!(exchange.security.principal(), Some("alice"));
}

#[test]
fn test_bearer_failures_challenge() {
    let proxy = api_and_web();
    let (exchange, _) = dispatch(&proxy, HttpRequest::get("/api/items"));
    assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(exchange.response.headers[WWW_AUTHENTICATE], "Bearer realm=\"api\"");

    let request = HttpRequest::get("/api/items").with_header(AUTHORIZATION, "Bearer revoked");
    let (exchange, _) = dispatch(&proxy, request);
    assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    let challenge = exchange.response.headers[WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains("error=\"invalid_token\""), "{challenge}");
}

#[test]
fn test_basic_chain_serves_everything_else() {
    let proxy = api_and_web();
    // alice:secret
    let request = HttpRequest::get("/reports").with_header(AUTHORIZATION, "Basic YWxpY2U6c2VjcmV0");
    let (exchange, outcome) = dispatch(&proxy, request);
    assert!(matches!(outcome, Dispatch::Handled { ref chain, terminal_reached: true } if chain == "web"));
    assert!(exchange.security.is_authenticated());

    let (exchange, _) = dispatch(&proxy, HttpRequest::get("/reports"));
    assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(exchange.response.headers[WWW_AUTHENTICATE], "Basic realm=\"Realm\"");
}

/// Web-level configurer recording when its init runs
struct Recorder {
    order: i32,
    log: Arc<Mutex<Vec<i32>>>,
}

impl Configurer<WebSecurity> for Recorder {
    fn init(&mut self, web: &mut WebSecurity) -> Result<(), ConfigurationError> {
        self.log.lock().push(self.order);
        web.ignoring_path("/static/**");
        Ok(())
    }

    fn order(&self) -> i32 {
        self.order
    }
}

fn permit_all(http: &mut HttpSecurity) -> Result<(), ConfigurationError> {
    http.authorize_requests(|rules| {
        rules.any_request(AccessRule::PermitAll);
    })?;
    Ok(())
}

#[test]
fn test_web_configurers_applied_by_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let proxy = SecurityConfiguration::new()
        .configurer(Recorder { order: 20, log: log.clone() })
        .configurer(Recorder { order: -5, log: log.clone() })
        .filter_chain("app", 0, permit_all)
        .build()
        .unwrap();
    assert_eq!(*log.lock(), vec![-5, 20]);
    // Each recorder added an ignored path ahead of the app chain
    let names: Vec<&str> = proxy.chains().map(|chain| chain.name()).collect();
    assert_eq!(names, vec!["ignored-0", "ignored-1", "app"]);
}

#[test]
fn test_duplicate_order_refused_before_any_init() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let err = SecurityConfiguration::new()
        .configurer(Recorder { order: 7, log: log.clone() })
        .filter_chain("app", 7, permit_all)
        .build()
        .unwrap_err();
    match err {
        ConfigurationError::DuplicateOrder {
            order,
            existing,
            conflicting,
        } => {
            assert_eq!(order, 7);
            assert!(existing.ends_with("Recorder"), "{existing}");
            assert_eq!(conflicting, "app");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(log.lock().is_empty());
}

#[test]
fn test_login_without_manager_is_a_wiring_error() {
    let err = SecurityConfiguration::new()
        .filter_chain("web", 0, |http| {
            http.form_login(|_| {})?;
            Ok(())
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::MissingSharedObject(name) if name.contains("AuthenticationManager")));
}

#[test]
fn test_permit_all_needs_access_rules() {
    let err = SecurityConfiguration::new()
        .shared_object(users())
        .filter_chain("web", 0, |http| {
            http.logout(|logout| {
                logout.permit_all(true);
            })?;
            Ok(())
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidSetting(_)));
}

#[test]
fn test_rules_required() {
    let err = SecurityConfiguration::new()
        .filter_chain("web", 0, |http| {
            http.authorize_requests(|_| {})?;
            Ok(())
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidSetting(_)));
}

struct Named(&'static str);

impl Filter for Named {
    fn name(&self) -> &'static str {
        self.0
    }

    fn do_filter(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), WebError> {
        next.run(exchange)
    }
}

const CANONICAL: [&str; 9] = [
    SECURITY_CONTEXT_HOLDER_FILTER,
    CSRF_FILTER,
    LOGOUT_FILTER,
    USERNAME_PASSWORD_FILTER,
    CONCURRENT_SESSION_FILTER,
    BEARER_TOKEN_FILTER,
    BASIC_FILTER,
    ANONYMOUS_FILTER,
    AUTHORIZATION_FILTER,
];

proptest! {
    #[test]
    fn test_filter_order_independent_of_insertion(shuffled in Just(CANONICAL.to_vec()).prop_shuffle()) {
        let mut http = HttpSecurity::new("any");
        for name in shuffled {
            http.add_filter(Arc::new(Named(name))).unwrap();
        }
        let chain = http.build().unwrap();
        prop_assert_eq!(chain.filter_names(), CANONICAL.to_vec());
    }
}
