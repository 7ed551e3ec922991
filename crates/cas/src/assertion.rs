use serde::{Deserialize, Serialize};

use ticketeer_core::{Authentication, GrantingTicket, Service};

/// Outcome of a successful service or proxy ticket validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Authentication of the session at the root of the chain.
    pub primary_authentication: Authentication,
    /// Every authentication from the ticket's granting ticket up to the root, nearest first.
    pub chained_authentications: Vec<Authentication>,
    /// Services the ticket was delegated through, nearest first. Empty for a plain
    /// service ticket.
    pub proxies: Vec<Service>,
    pub service: Service,
    pub from_new_login: bool,
}

impl Assertion {
    pub fn principal_id(&self) -> &str {
        self.primary_authentication.principal_id()
    }

    pub fn is_proxied(&self) -> bool {
        !self.proxies.is_empty()
    }
}

/// A proxy callback asking for a proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCallbackRequest {
    /// Endpoint the proxy-granting ticket is delivered to.
    pub callback: Service,
    /// Authentication of the callback endpoint itself.
    pub authentication: Authentication,
}

impl ProxyCallbackRequest {
    pub fn new(callback: Service, authentication: Authentication) -> Self {
        Self {
            callback,
            authentication,
        }
    }
}

/// A delivered proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGrant {
    pub ticket: GrantingTicket,
    /// The IOU the callback endpoint received alongside the ticket.
    pub iou: String,
}
