//! Registered-service lookup.

use std::sync::{Arc, RwLock};

use tracing::debug;

use ticketeer_core::{RegisteredService, Service, TicketError, TicketResult};

/// Lookup of service definitions, backed by an external service registry.
pub trait ServicesManager: Send + Sync + core::fmt::Debug {
    /// First registered service (by evaluation order) matching `service`.
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService>;

    fn all(&self) -> Vec<RegisteredService>;
}

impl<M> ServicesManager for Arc<M>
where
    M: ServicesManager + ?Sized,
{
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        (**self).find_service_by(service)
    }

    fn all(&self) -> Vec<RegisteredService> {
        (**self).all()
    }
}

/// In-memory service registry, kept sorted by evaluation order.
#[derive(Debug, Default)]
pub struct InMemoryServicesManager {
    services: RwLock<Vec<RegisteredService>>,
}

impl InMemoryServicesManager {
    pub fn new(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        let mut services: Vec<_> = services.into_iter().collect();
        services.sort_by_key(|s| (s.evaluation_order, s.id));
        Self {
            services: RwLock::new(services),
        }
    }

    /// Insert or replace (by id) a service definition.
    pub fn save(&self, service: RegisteredService) {
        let mut services = self.services.write().unwrap_or_else(|p| p.into_inner());
        services.retain(|s| s.id != service.id);
        services.push(service);
        services.sort_by_key(|s| (s.evaluation_order, s.id));
    }

    pub fn delete(&self, id: u64) -> bool {
        let mut services = self.services.write().unwrap_or_else(|p| p.into_inner());
        let before = services.len();
        services.retain(|s| s.id != id);
        services.len() != before
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        let services = self.services.read().unwrap_or_else(|p| p.into_inner());
        services.iter().find(|s| s.matches(service)).cloned()
    }

    fn all(&self) -> Vec<RegisteredService> {
        self.services.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Require that `service` is registered and its access strategy allows it.
pub fn ensure_service_access_is_allowed<'a>(
    service: &Service,
    registered: Option<&'a RegisteredService>,
) -> TicketResult<&'a RegisteredService> {
    let Some(registered) = registered else {
        debug!(service = %service, "service is not registered");
        return Err(TicketError::invalid_service(format!(
            "service '{service}' is not registered"
        )));
    };
    if !registered.access_strategy.is_service_access_allowed() {
        debug!(service = %service, registered_service = %registered.name, "service access is disabled");
        return Err(TicketError::invalid_service(format!(
            "service '{service}' is not allowed to use the ticket service"
        )));
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketeer_core::AccessStrategy;

    #[test]
    fn lookup_honours_evaluation_order() {
        let manager = InMemoryServicesManager::new([
            RegisteredService::new(1, "catch-all", "https://*").with_evaluation_order(100),
            RegisteredService::new(2, "app", "https://app.example").with_evaluation_order(1),
        ]);

        let found = manager.find_service_by(&Service::new("https://app.example")).unwrap();
        assert_eq!(found.name, "app");
        let found = manager.find_service_by(&Service::new("https://other.example")).unwrap();
        assert_eq!(found.name, "catch-all");
        assert!(manager.find_service_by(&Service::new("http://plain.example")).is_none());
    }

    #[test]
    fn save_replaces_and_delete_removes() {
        let manager = InMemoryServicesManager::default();
        manager.save(RegisteredService::new(1, "v1", "https://app.example"));
        manager.save(RegisteredService::new(1, "v2", "https://app.example"));
        assert_eq!(manager.all().len(), 1);
        assert_eq!(manager.all()[0].name, "v2");

        assert!(manager.delete(1));
        assert!(!manager.delete(1));
    }

    #[test]
    fn access_checks() {
        let service = Service::new("https://app.example");
        assert!(matches!(
            ensure_service_access_is_allowed(&service, None),
            Err(TicketError::InvalidService(_))
        ));

        let disabled = RegisteredService::new(1, "app", "https://app.example").with_access_strategy(
            AccessStrategy {
                enabled: false,
                sso_enabled: true,
            },
        );
        assert!(ensure_service_access_is_allowed(&service, Some(&disabled)).is_err());

        let enabled = RegisteredService::new(1, "app", "https://app.example");
        assert!(ensure_service_access_is_allowed(&service, Some(&enabled)).is_ok());
    }
}
