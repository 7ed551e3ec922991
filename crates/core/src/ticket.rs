//! The ticket model.
//!
//! Two shapes cover the four kinds:
//! - [`GrantingTicket`]: ticket-granting (TGT) and proxy-granting (PGT) tickets, the roots
//!   that further tickets are issued from.
//! - [`ServiceTicket`]: service (ST) and proxy (PT) tickets, single-service grants that
//!   reference their granting parent by id.
//!
//! Tickets reference each other by id only. A granting ticket owns the set of descendant
//! ids it issued, so revocation is a walk over ids.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authentication::Authentication;
use crate::expiration::ExpirationPolicy;
use crate::id::{TicketId, TicketKind};
use crate::service::Service;
use crate::state::TicketState;

/// Root of a session (TGT) or of a proxy chain (PGT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantingTicket {
    id: TicketId,
    kind: TicketKind,
    state: TicketState,
    expiration_policy: ExpirationPolicy,
    authentication: Authentication,
    /// Service that obtained this ticket by proxy; `None` for a primary login.
    proxied_by: Option<Service>,
    /// Granting ticket of the service ticket this PGT was obtained with.
    granting_ticket_id: Option<TicketId>,
    remember_me: bool,
    /// Sticky expiry set by logout.
    expired: bool,
    /// Service/proxy tickets issued from this ticket, and the service each was issued for.
    services: BTreeMap<TicketId, Service>,
    /// Proxy-granting tickets issued under this session, keyed to the proxying service.
    proxy_granting_tickets: BTreeMap<TicketId, Service>,
    descendant_ids: BTreeSet<TicketId>,
}

impl GrantingTicket {
    /// A session ticket for a primary login.
    pub fn new_ticket_granting(
        id: TicketId,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            TicketKind::TicketGranting,
            authentication,
            expiration_policy,
            None,
            None,
            now,
        )
    }

    /// A proxy-granting ticket for `proxied_by`, obtained with a service ticket issued by
    /// `granting_ticket_id`.
    pub fn new_proxy_granting(
        id: TicketId,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        proxied_by: Service,
        granting_ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            TicketKind::ProxyGranting,
            authentication,
            expiration_policy,
            Some(proxied_by),
            Some(granting_ticket_id),
            now,
        )
    }

    fn new(
        id: TicketId,
        kind: TicketKind,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        proxied_by: Option<Service>,
        granting_ticket_id: Option<TicketId>,
        now: DateTime<Utc>,
    ) -> Self {
        let remember_me = authentication.is_remember_me();
        Self {
            id,
            kind,
            state: TicketState::new(now),
            expiration_policy,
            authentication,
            proxied_by,
            granting_ticket_id,
            remember_me,
            expired: false,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_ids: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &TicketId {
        &self.id
    }

    pub fn kind(&self) -> TicketKind {
        self.kind
    }

    pub fn state(&self) -> &TicketState {
        &self.state
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn proxied_by(&self) -> Option<&Service> {
        self.proxied_by.as_ref()
    }

    pub fn granting_ticket_id(&self) -> Option<&TicketId> {
        self.granting_ticket_id.as_ref()
    }

    pub fn is_remember_me(&self) -> bool {
        self.remember_me
    }

    pub fn services(&self) -> &BTreeMap<TicketId, Service> {
        &self.services
    }

    pub fn proxy_granting_tickets(&self) -> &BTreeMap<TicketId, Service> {
        &self.proxy_granting_tickets
    }

    pub fn descendant_ids(&self) -> &BTreeSet<TicketId> {
        &self.descendant_ids
    }

    pub fn is_root(&self) -> bool {
        self.granting_ticket_id.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(&self.state, self.remember_me, now)
    }

    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.state.record_use(now);
    }

    /// Record that `ticket_id` was issued for `service`.
    ///
    /// Counts as a use of this ticket. With `only_track_most_recent`, earlier tickets for
    /// the same service (compared without query string) stop being tracked; the ids that
    /// were dropped are returned.
    pub fn grant_service(
        &mut self,
        ticket_id: TicketId,
        service: Service,
        now: DateTime<Utc>,
        only_track_most_recent: bool,
    ) -> Vec<TicketId> {
        self.record_use(now);

        let mut untracked = Vec::new();
        if only_track_most_recent {
            let path = service.normalized_path();
            untracked = self
                .services
                .iter()
                .filter(|(_, existing)| existing.normalized_path() == path)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &untracked {
                self.services.remove(id);
                self.descendant_ids.remove(id);
            }
        }

        self.descendant_ids.insert(ticket_id.clone());
        self.services.insert(ticket_id, service);
        untracked
    }

    /// Record a proxy-granting ticket issued under this ticket for `proxied_by`.
    pub fn track_proxy_granting_ticket(&mut self, ticket_id: TicketId, proxied_by: Service) {
        self.descendant_ids.insert(ticket_id.clone());
        self.proxy_granting_tickets.insert(ticket_id, proxied_by);
    }

    pub fn remove_descendant(&mut self, ticket_id: &TicketId) {
        self.descendant_ids.remove(ticket_id);
        self.services.remove(ticket_id);
        self.proxy_granting_tickets.remove(ticket_id);
    }
}

/// Single-service grant (ST), or its proxy counterpart (PT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    id: TicketId,
    kind: TicketKind,
    state: TicketState,
    expiration_policy: ExpirationPolicy,
    granting_ticket_id: TicketId,
    service: Service,
    /// Issued right after credentials were presented, as opposed to SSO reuse.
    from_new_login: bool,
    /// A proxy-granting ticket has already been issued with this ticket.
    granted_ticket_already: bool,
}

impl ServiceTicket {
    pub fn new_service(
        id: TicketId,
        granting_ticket_id: TicketId,
        service: Service,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            TicketKind::Service,
            granting_ticket_id,
            service,
            from_new_login,
            expiration_policy,
            now,
        )
    }

    pub fn new_proxy(
        id: TicketId,
        granting_ticket_id: TicketId,
        service: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            TicketKind::Proxy,
            granting_ticket_id,
            service,
            false,
            expiration_policy,
            now,
        )
    }

    fn new(
        id: TicketId,
        kind: TicketKind,
        granting_ticket_id: TicketId,
        service: Service,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            state: TicketState::new(now),
            expiration_policy,
            granting_ticket_id,
            service,
            from_new_login,
            granted_ticket_already: false,
        }
    }

    pub fn id(&self) -> &TicketId {
        &self.id
    }

    pub fn kind(&self) -> TicketKind {
        self.kind
    }

    pub fn state(&self) -> &TicketState {
        &self.state
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    pub fn granting_ticket_id(&self) -> &TicketId {
        &self.granting_ticket_id
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    pub fn is_valid_for(&self, service: &Service) -> bool {
        self.service.matches(service)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(&self.state, false, now)
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.state.record_use(now);
    }

    pub fn has_granted_ticket(&self) -> bool {
        self.granted_ticket_already
    }

    /// Flag that a proxy-granting ticket was issued with this ticket.
    ///
    /// Returns `false` when one was issued already.
    pub fn mark_proxy_granted(&mut self) -> bool {
        !std::mem::replace(&mut self.granted_ticket_already, true)
    }
}

/// Any ticket held by a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Ticket {
    Granting(GrantingTicket),
    Service(ServiceTicket),
}

impl Ticket {
    pub fn id(&self) -> &TicketId {
        match self {
            Ticket::Granting(t) => t.id(),
            Ticket::Service(t) => t.id(),
        }
    }

    pub fn kind(&self) -> TicketKind {
        match self {
            Ticket::Granting(t) => t.kind(),
            Ticket::Service(t) => t.kind(),
        }
    }

    pub fn state(&self) -> &TicketState {
        match self {
            Ticket::Granting(t) => t.state(),
            Ticket::Service(t) => t.state(),
        }
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        match self {
            Ticket::Granting(t) => t.expiration_policy(),
            Ticket::Service(t) => t.expiration_policy(),
        }
    }

    /// Expiry of this ticket alone; the parent chain is checked by callers holding a registry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Ticket::Granting(t) => t.is_expired(now),
            Ticket::Service(t) => t.is_expired(now),
        }
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        match self {
            Ticket::Granting(t) => t.record_use(now),
            Ticket::Service(t) => t.record_use(now),
        }
    }

    /// The granting parent, if any.
    pub fn granting_ticket_id(&self) -> Option<&TicketId> {
        match self {
            Ticket::Granting(t) => t.granting_ticket_id(),
            Ticket::Service(t) => Some(t.granting_ticket_id()),
        }
    }

    /// Ids of tickets issued from this one; empty for service tickets.
    pub fn descendant_ids(&self) -> Vec<TicketId> {
        match self {
            Ticket::Granting(t) => t.descendant_ids().iter().cloned().collect(),
            Ticket::Service(_) => Vec::new(),
        }
    }

    /// Seconds the ticket may still be worth keeping, for native key expiry.
    pub fn time_to_live(&self) -> Option<i64> {
        match self {
            Ticket::Granting(t) => t.expiration_policy().time_to_live(t.is_remember_me()),
            Ticket::Service(t) => t.expiration_policy().time_to_live(false),
        }
    }

    pub fn as_granting(&self) -> Option<&GrantingTicket> {
        match self {
            Ticket::Granting(t) => Some(t),
            Ticket::Service(_) => None,
        }
    }

    pub fn as_granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match self {
            Ticket::Granting(t) => Some(t),
            Ticket::Service(_) => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceTicket> {
        match self {
            Ticket::Service(t) => Some(t),
            Ticket::Granting(_) => None,
        }
    }

    pub fn as_service_mut(&mut self) -> Option<&mut ServiceTicket> {
        match self {
            Ticket::Service(t) => Some(t),
            Ticket::Granting(_) => None,
        }
    }

    pub fn into_granting(self) -> Option<GrantingTicket> {
        match self {
            Ticket::Granting(t) => Some(t),
            Ticket::Service(_) => None,
        }
    }

    pub fn into_service(self) -> Option<ServiceTicket> {
        match self {
            Ticket::Service(t) => Some(t),
            Ticket::Granting(_) => None,
        }
    }
}

impl From<GrantingTicket> for Ticket {
    fn from(value: GrantingTicket) -> Self {
        Ticket::Granting(value)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(value: ServiceTicket) -> Self {
        Ticket::Service(value)
    }
}
