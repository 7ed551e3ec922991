//! Canonicalization of inbound services before registry lookup.
//!
//! Protocol layers sometimes receive a service that wraps the real target (e.g. an
//! endpoint carrying the client application in a query parameter). Strategies unwrap
//! it; the first supporting strategy in `order` wins.

use std::sync::Arc;

use ticketeer_core::Service;

pub trait ServiceSelectionStrategy: Send + Sync + core::fmt::Debug {
    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    fn supports(&self, service: &Service) -> bool;

    fn resolve(&self, service: &Service) -> Service;
}

/// Passes services through unchanged. Always runs last.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServiceSelectionStrategy;

impl ServiceSelectionStrategy for DefaultServiceSelectionStrategy {
    fn order(&self) -> i32 {
        i32::MAX
    }

    fn supports(&self, _: &Service) -> bool {
        true
    }

    fn resolve(&self, service: &Service) -> Service {
        service.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSelectionChain {
    strategies: Vec<Arc<dyn ServiceSelectionStrategy>>,
}

impl Default for ServiceSelectionChain {
    fn default() -> Self {
        Self {
            strategies: vec![Arc::new(DefaultServiceSelectionStrategy)],
        }
    }
}

impl ServiceSelectionChain {
    pub fn with_strategy(mut self, strategy: Arc<dyn ServiceSelectionStrategy>) -> Self {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.order());
        self
    }

    pub fn resolve(&self, service: &Service) -> Service {
        self.strategies
            .iter()
            .find(|s| s.supports(service))
            .map(|s| s.resolve(service))
            .unwrap_or_else(|| service.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unwraps `https://idp.example/callback?client=<target>`.
    #[derive(Debug)]
    struct ClientParameterStrategy;

    impl ServiceSelectionStrategy for ClientParameterStrategy {
        fn supports(&self, service: &Service) -> bool {
            service.id().starts_with("https://idp.example/callback?client=")
        }

        fn resolve(&self, service: &Service) -> Service {
            let target = service
                .id()
                .split_once("client=")
                .map(|(_, target)| target)
                .unwrap_or(service.id());
            Service::new(target)
        }
    }

    #[test]
    fn default_chain_passes_through() {
        let chain = ServiceSelectionChain::default();
        let service = Service::new("https://app.example");
        assert_eq!(chain.resolve(&service), service);
    }

    #[test]
    fn supporting_strategy_runs_before_default() {
        let chain = ServiceSelectionChain::default().with_strategy(Arc::new(ClientParameterStrategy));

        let wrapped = Service::new("https://idp.example/callback?client=https://app.example");
        assert_eq!(chain.resolve(&wrapped), Service::new("https://app.example"));

        let plain = Service::new("https://other.example");
        assert_eq!(chain.resolve(&plain), plain);
    }
}
