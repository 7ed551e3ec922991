//! Central Authentication Service: the ticket state machine exposed to protocol layers.

pub mod assertion;
pub mod service;

pub use assertion::{Assertion, ProxyCallbackRequest, ProxyGrant};
pub use service::CentralAuthenticationService;
