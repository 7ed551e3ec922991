//! Services that request tickets, and their registered configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A service (application URL) asking for, or presenting, a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service {
    id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The service URL without query string or fragment.
    pub fn normalized_path(&self) -> &str {
        let end = self.id.find(['?', '#']).unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// A ticket issued for `self` may be validated by `other`.
    pub fn matches(&self, other: &Service) -> bool {
        self.id == other.id
    }
}

impl core::fmt::Display for Service {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Whether a registered service may be used at all, and whether SSO applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStrategy {
    pub enabled: bool,
    pub sso_enabled: bool,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self {
            enabled: true,
            sso_enabled: true,
        }
    }
}

impl AccessStrategy {
    pub fn is_service_access_allowed(&self) -> bool {
        self.enabled
    }

    pub fn is_sso_participation_allowed(&self) -> bool {
        self.enabled && self.sso_enabled
    }
}

/// Whether a registered service may obtain proxy-granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyPolicy {
    #[default]
    Refuse,
    /// Allowed, for callback URLs matching `callback_pattern` (`*` suffix = prefix match).
    Allow { callback_pattern: String },
}

impl ProxyPolicy {
    pub fn is_allowed_to_proxy(&self) -> bool {
        matches!(self, ProxyPolicy::Allow { .. })
    }

    pub fn is_allowed_proxy_callback(&self, callback: &Service) -> bool {
        match self {
            ProxyPolicy::Refuse => false,
            ProxyPolicy::Allow { callback_pattern } => pattern_matches(callback_pattern, callback.id()),
        }
    }
}

/// How a service is told about logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogoutType {
    None,
    #[default]
    BackChannel,
    FrontChannel,
}

/// Service definition held by the (external) service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    pub id: u64,
    pub name: String,
    /// Exact service URL, or a prefix when ending with `*`.
    pub service_pattern: String,
    #[serde(default)]
    pub evaluation_order: i32,
    #[serde(default)]
    pub access_strategy: AccessStrategy,
    #[serde(default)]
    pub proxy_policy: ProxyPolicy,
    #[serde(default)]
    pub logout_type: LogoutType,
    /// Authentication handlers that must have succeeded for this service.
    #[serde(default)]
    pub required_handlers: BTreeSet<String>,
}

impl RegisteredService {
    pub fn new(id: u64, name: impl Into<String>, service_pattern: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            service_pattern: service_pattern.into(),
            evaluation_order: 0,
            access_strategy: AccessStrategy::default(),
            proxy_policy: ProxyPolicy::default(),
            logout_type: LogoutType::default(),
            required_handlers: BTreeSet::new(),
        }
    }

    pub fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    pub fn with_access_strategy(mut self, access_strategy: AccessStrategy) -> Self {
        self.access_strategy = access_strategy;
        self
    }

    pub fn with_proxy_policy(mut self, proxy_policy: ProxyPolicy) -> Self {
        self.proxy_policy = proxy_policy;
        self
    }

    pub fn with_logout_type(mut self, logout_type: LogoutType) -> Self {
        self.logout_type = logout_type;
        self
    }

    pub fn with_required_handler(mut self, handler: impl Into<String>) -> Self {
        self.required_handlers.insert(handler.into());
        self
    }

    pub fn matches(&self, service: &Service) -> bool {
        pattern_matches(&self.service_pattern, service.id())
    }
}

fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_path_drops_query_and_fragment() {
        assert_eq!(
            Service::new("https://app.example/a?x=1#frag").normalized_path(),
            "https://app.example/a"
        );
        assert_eq!(Service::new("https://app.example/a").normalized_path(), "https://app.example/a");
    }

    #[test]
    fn registered_service_patterns() {
        let exact = RegisteredService::new(1, "app", "https://app.example");
        assert!(exact.matches(&Service::new("https://app.example")));
        assert!(!exact.matches(&Service::new("https://app.example/other")));

        let prefix = RegisteredService::new(2, "all", "https://app.example/*");
        assert!(prefix.matches(&Service::new("https://app.example/other")));
        assert!(!prefix.matches(&Service::new("https://evil.example/")));
    }

    #[test]
    fn proxy_policy_gates_callbacks() {
        let refuse = ProxyPolicy::Refuse;
        assert!(!refuse.is_allowed_to_proxy());

        let allow = ProxyPolicy::Allow {
            callback_pattern: "https://proxy.example/*".into(),
        };
        assert!(allow.is_allowed_to_proxy());
        assert!(allow.is_allowed_proxy_callback(&Service::new("https://proxy.example/cb")));
        assert!(!allow.is_allowed_proxy_callback(&Service::new("http://proxy.example/cb")));
    }
}
