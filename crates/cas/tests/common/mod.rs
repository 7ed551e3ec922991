#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use ticketeer_auth::{InMemoryServicesManager, ProxyCallbackClient};
use ticketeer_cas::CentralAuthenticationService;
use ticketeer_core::{
    AccessStrategy, Authentication, AuthenticationResult, Clock, ManualClock, Principal, ProxyPolicy,
    RegisteredService, Service,
};
use ticketeer_infra::cipher::CipherExecutor;
use ticketeer_infra::config::Settings;
use ticketeer_infra::registry::InMemoryTicketRegistry;

pub const APP: &str = "https://app.example/login";
pub const PROXY: &str = "https://proxy.example/portal";
pub const PROXY_CALLBACK: &str = "https://proxy.example/callback";
pub const BACKEND: &str = "https://backend.example/api";
pub const CLOSED: &str = "https://closed.example/";
pub const NO_SSO: &str = "https://nosso.example/";

pub type Cas = CentralAuthenticationService<Arc<InMemoryTicketRegistry>, Arc<InMemoryServicesManager>>;

pub struct Harness {
    pub cas: Cas,
    pub registry: Arc<InMemoryTicketRegistry>,
    pub services: Arc<InMemoryServicesManager>,
    pub clock: Arc<ManualClock>,
}

pub fn registered_services() -> Vec<RegisteredService> {
    vec![
        RegisteredService::new(1, "app", "https://app.example/*"),
        RegisteredService::new(2, "portal", "https://proxy.example/*").with_proxy_policy(ProxyPolicy::Allow {
            callback_pattern: "https://proxy.example/*".to_string(),
        }),
        RegisteredService::new(3, "backend", "https://backend.example/*"),
        RegisteredService::new(4, "closed", "https://closed.example/*").with_access_strategy(AccessStrategy {
            enabled: false,
            sso_enabled: true,
        }),
        RegisteredService::new(5, "no-sso", "https://nosso.example/*").with_access_strategy(AccessStrategy {
            enabled: true,
            sso_enabled: false,
        }),
    ]
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings {
            host_name: "cas.test".to_string(),
            ..Settings::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        let cipher = settings.protocol_cipher().unwrap();
        Self::build(settings, cipher)
    }

    pub fn build(settings: Settings, cipher: Arc<dyn CipherExecutor>) -> Self {
        ticketeer_observability::init();
        let registry = Arc::new(settings.in_memory_registry().unwrap());
        let services = Arc::new(InMemoryServicesManager::new(registered_services()));
        let clock = Arc::new(ManualClock::starting_now());
        let factory = settings.ticket_factory_with_cipher(cipher.clone()).unwrap();

        let cas = CentralAuthenticationService::new(registry.clone(), services.clone(), factory)
            .with_clock(clock.clone())
            .with_cipher(cipher);

        Self {
            cas,
            registry,
            services,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    pub fn login(&self, principal: &str) -> AuthenticationResult {
        AuthenticationResult::new(password_authentication(principal, self.now()))
    }
}

pub fn password_authentication(principal: &str, at: DateTime<Utc>) -> Authentication {
    Authentication::new(Principal::new(principal), at).with_success("password", format!("{principal}:password"))
}

pub fn service(url: &str) -> Service {
    Service::new(url)
}

/// Records every callback URL; answers with a fixed verdict.
#[derive(Debug, Default)]
pub struct RecordingCallbackClient {
    pub accept: bool,
    pub delivered: Mutex<Vec<String>>,
}

impl RecordingCallbackClient {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self::default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

impl ProxyCallbackClient for RecordingCallbackClient {
    fn deliver(&self, url: &str) -> bool {
        self.delivered.lock().unwrap().push(url.to_string());
        self.accept
    }
}
