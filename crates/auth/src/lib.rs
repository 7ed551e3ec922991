//! `ticketeer-auth`: pure policy boundary around ticket issuance.
//!
//! No HTTP or storage here. It decides *whether*
//! a ticket may be issued (authentication policies, registered-service access, proxy
//! authorization) and canonicalizes the services tickets are issued for.

pub mod policy;
pub mod proxy;
pub mod selection;
pub mod services;

pub use policy::{
    AcceptAnyAuthenticationPolicy, AllCredentialsSucceededPolicy, AnyCredentialSucceededPolicy,
    AuthenticationPolicy, AuthenticationPolicyConfig, NotPreventedAuthenticationPolicy,
    RequiredHandlerAuthenticationPolicy, ServiceContext,
};
pub use proxy::{Cas10ProxyHandler, Cas20ProxyHandler, ProxyCallbackClient, ProxyHandler};
pub use selection::{
    DefaultServiceSelectionStrategy, ServiceSelectionChain, ServiceSelectionStrategy,
};
pub use services::{InMemoryServicesManager, ServicesManager, ensure_service_access_is_allowed};
