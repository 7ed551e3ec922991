//! The ticket orchestrator.
//!
//! ## Operation flow
//!
//! ```text
//! grant TGT   authentication ─ policy ─ factory ─ registry.add
//! grant ST    id check ─ service access ─ live TGT ─ proxy chain ─ policy
//!               ─ mutate(TGT: mint + track ST) ─ registry.add(ST)
//! validate    id check ─ service access ─ live chain ─ mutate(ST: consume)
//!               ─ walk chain ─ policy ─ Assertion
//! grant PGT   id check ─ live ST ─ proxy policy ─ mutate(ST: one PGT only)
//!               ─ registry.add(PGT) ─ mutate(parent: track) ─ callback delivery
//! grant PT    as grant ST, rooted at a PGT
//! destroy     mutate(TGT: mark expired) ─ delete_cascading
//! ```
//!
//! Single-use consumption happens inside [`TicketRegistry::mutate`], so of N concurrent
//! validations of one single-use ticket exactly one succeeds.
//!
//! Any read that finds an expired ticket, or a ticket whose granting parent is gone or
//! expired, deletes it before failing with [`TicketError::InvalidTicket`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ticketeer_auth::{
    AnyCredentialSucceededPolicy, AuthenticationPolicy, ProxyHandler, ServiceContext,
    ServiceSelectionChain, ServicesManager, ensure_service_access_is_allowed,
};
use ticketeer_core::{
    Authentication, AuthenticationResult, Clock, GrantingTicket, LogoutType, RegisteredService,
    Service, ServiceTicket, SystemClock, Ticket, TicketError, TicketId, TicketKind, TicketResult,
};
use ticketeer_infra::cipher::{CipherExecutor, NoOpCipherExecutor};
use ticketeer_infra::factory::{DefaultTicketFactory, verify_ticket_authenticity};
use ticketeer_infra::registry::{Mutation, TicketRegistry, is_expired_with_ancestors};

use crate::assertion::{Assertion, ProxyCallbackRequest, ProxyGrant};

/// Upper bound on granting tickets walked while building an assertion.
const MAX_CHAIN_DEPTH: usize = 32;

#[derive(Debug)]
pub struct CentralAuthenticationService<R, S> {
    registry: R,
    services: S,
    factory: DefaultTicketFactory,
    policy: Arc<dyn AuthenticationPolicy>,
    selection: ServiceSelectionChain,
    clock: Arc<dyn Clock>,
    cipher: Arc<dyn CipherExecutor>,
}

impl<R, S> CentralAuthenticationService<R, S>
where
    R: TicketRegistry,
    S: ServicesManager,
{
    pub fn new(registry: R, services: S, factory: DefaultTicketFactory) -> Self {
        Self {
            registry,
            services,
            factory,
            policy: Arc::new(AnyCredentialSucceededPolicy::default()),
            selection: ServiceSelectionChain::default(),
            clock: Arc::new(SystemClock),
            cipher: Arc::new(NoOpCipherExecutor),
        }
    }

    pub fn with_authentication_policy(mut self, policy: Arc<dyn AuthenticationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_selection_strategy(mut self, selection: ServiceSelectionChain) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cipher that protected ids were minted with; must match the factories' cipher.
    pub fn with_cipher(mut self, cipher: Arc<dyn CipherExecutor>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Open an SSO session for a completed authentication.
    pub fn grant_ticket_granting_ticket(&self, result: &AuthenticationResult) -> TicketResult<GrantingTicket> {
        let authentication = &result.authentication;

        let target = match &result.service {
            Some(service) => {
                let selected = self.selection.resolve(service);
                let registered = self.services.find_service_by(&selected);
                ensure_service_access_is_allowed(&selected, registered.as_ref())?;
                Some((selected, registered))
            }
            None => None,
        };
        let context = target
            .as_ref()
            .map(|(service, registered)| ServiceContext::new(service, registered.as_ref()));
        self.ensure_policy(authentication, context.as_ref())?;

        let now = self.now();
        let tgt = self
            .factory
            .ticket_granting
            .create(authentication.clone(), now)?;
        self.registry.add(tgt.clone().into())?;

        info!(principal = authentication.principal_id(), "granted ticket-granting ticket");
        debug!(ticket_id = %tgt.id(), "ticket-granting ticket stored");
        Ok(tgt)
    }

    /// Log out: expire the session and delete it with every ticket issued under it.
    ///
    /// Returns the services that were granted tickets in the session, each with the logout
    /// type of its registration (back channel when unregistered). Unknown ids are not an
    /// error.
    pub fn destroy_ticket_granting_ticket(
        &self,
        tgt_id: &TicketId,
    ) -> TicketResult<Vec<(Service, LogoutType)>> {
        if !self.is_authentic(tgt_id) {
            return Ok(Vec::new());
        }
        if self
            .registry
            .get_of_kind(tgt_id, TicketKind::TicketGranting)?
            .is_none()
        {
            debug!(ticket_id = %tgt_id, "no session to destroy");
            return Ok(Vec::new());
        }

        let mut services = Vec::new();
        self.registry.mutate(tgt_id, &mut |ticket| {
            if let Some(tgt) = ticket.as_granting_mut() {
                tgt.mark_expired();
                services = tgt.services().values().cloned().collect();
            }
            Mutation::Keep
        })?;

        let removed = self.registry.delete_cascading(tgt_id)?;
        info!(removed, services = services.len(), "destroyed ticket-granting ticket");
        Ok(services
            .into_iter()
            .map(|service| {
                let logout_type = self
                    .services
                    .find_service_by(&service)
                    .map(|registered| registered.logout_type)
                    .unwrap_or_default();
                (service, logout_type)
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Service and proxy tickets
    // ─────────────────────────────────────────────────────────────────────────────

    /// Issue a service ticket from a session.
    ///
    /// `result` is the authentication of this request when credentials were presented;
    /// `None` for pure SSO reuse.
    pub fn grant_service_ticket(
        &self,
        tgt_id: &TicketId,
        service: &Service,
        result: Option<&AuthenticationResult>,
    ) -> TicketResult<ServiceTicket> {
        self.ensure_authentic(tgt_id)?;
        let selected = self.selection.resolve(service);
        let registered = self.services.find_service_by(&selected);
        let registered = ensure_service_access_is_allowed(&selected, registered.as_ref())?;

        let credential_provided = result.is_some_and(|r| r.credential_provided);
        if !credential_provided && !registered.access_strategy.is_sso_participation_allowed() {
            debug!(service = %selected, "service requires a fresh login");
            return Err(TicketError::invalid_service(format!(
                "service '{selected}' does not participate in single sign-on"
            )));
        }

        let tgt = self.live_granting_ticket(tgt_id)?;
        let authentication = match result {
            Some(result) => {
                ensure_same_principal(tgt.authentication(), &result.authentication)?;
                &result.authentication
            }
            None => tgt.authentication(),
        };
        self.ensure_proxy_allowed(&tgt)?;
        self.ensure_policy(authentication, Some(&ServiceContext::new(&selected, Some(registered))))?;

        let st = self.mint_under(tgt_id, |parent, now| {
            self.factory
                .service
                .create(parent, selected.clone(), credential_provided, now)
        })?;

        info!(
            principal = authentication.principal_id(),
            service = %selected,
            "granted service ticket"
        );
        debug!(ticket_id = %st.id(), parent = %tgt_id, "service ticket stored");
        Ok(st)
    }

    /// Issue a proxy ticket for `service` from a proxy-granting ticket.
    pub fn grant_proxy_ticket(&self, pgt_id: &TicketId, service: &Service) -> TicketResult<ServiceTicket> {
        self.ensure_authentic(pgt_id)?;
        let selected = self.selection.resolve(service);
        let registered = self.services.find_service_by(&selected);
        ensure_service_access_is_allowed(&selected, registered.as_ref())?;

        let pgt = self.live_granting_ticket(pgt_id)?;
        if pgt.kind() != TicketKind::ProxyGranting {
            return Err(TicketError::invalid_ticket(pgt_id));
        }
        self.ensure_proxy_allowed(&pgt)?;

        let pt = self.mint_under(pgt_id, |parent, now| {
            self.factory.proxy.create(parent, selected.clone(), now)
        })?;

        info!(
            principal = pgt.authentication().principal_id(),
            service = %selected,
            "granted proxy ticket"
        );
        Ok(pt)
    }

    /// Validate a service or proxy ticket for `service`, consuming one of its uses.
    ///
    /// A use is consumed even when the service does not match.
    pub fn validate_service_ticket(&self, ticket_id: &TicketId, service: &Service) -> TicketResult<Assertion> {
        self.ensure_authentic(ticket_id)?;
        let selected = self.selection.resolve(service);
        let registered = self.services.find_service_by(&selected);
        let registered = ensure_service_access_is_allowed(&selected, registered.as_ref())?;

        // Expiry of the granting chain is settled before the ticket is consumed.
        self.live_ticket(ticket_id)?;

        let now = self.now();
        let mut outcome: TicketResult<ServiceTicket> = Err(TicketError::invalid_ticket(ticket_id));
        let found = self.registry.mutate(ticket_id, &mut |ticket| {
            let Some(st) = ticket.as_service_mut() else {
                outcome = Err(TicketError::invalid_ticket(ticket_id));
                return Mutation::Keep;
            };
            if st.is_expired(now) {
                outcome = Err(TicketError::invalid_ticket(ticket_id));
                return Mutation::Remove;
            }

            st.record_use(now);
            outcome = if st.is_valid_for(&selected) {
                Ok(st.clone())
            } else {
                Err(TicketError::invalid_service(format!(
                    "ticket was not issued for service '{selected}'"
                )))
            };

            if st.is_expired(now) {
                Mutation::Remove
            } else {
                Mutation::Keep
            }
        })?;
        if found.is_none() {
            debug!(ticket_id = %ticket_id, "ticket consumed concurrently or absent");
            return Err(TicketError::invalid_ticket(ticket_id));
        }
        let st = outcome.inspect_err(|err| debug!(ticket_id = %ticket_id, error = %err, "validation refused"))?;

        let (chained_authentications, proxies) = self.walk_chain(&st)?;
        let Some(primary_authentication) = chained_authentications.last().cloned() else {
            return Err(TicketError::invalid_ticket(ticket_id));
        };
        self.ensure_policy(
            &primary_authentication,
            Some(&ServiceContext::new(&selected, Some(registered))),
        )?;

        info!(
            principal = primary_authentication.principal_id(),
            service = %selected,
            proxied = !proxies.is_empty(),
            "validated service ticket"
        );
        Ok(Assertion {
            primary_authentication,
            chained_authentications,
            proxies,
            service: selected,
            from_new_login: st.is_from_new_login(),
        })
    }

    /// Issue a proxy-granting ticket to `request.callback` using a live service or proxy
    /// ticket.
    ///
    /// Returns `Ok(None)` when `handler` cannot deliver to the callback at all. A failed
    /// delivery destroys the new ticket again.
    pub fn grant_proxy_granting_ticket(
        &self,
        ticket_id: &TicketId,
        request: &ProxyCallbackRequest,
        handler: &dyn ProxyHandler,
    ) -> TicketResult<Option<ProxyGrant>> {
        self.ensure_authentic(ticket_id)?;
        if !handler.can_handle(&request.callback) {
            debug!(callback = %request.callback, "proxy handler cannot deliver to callback");
            return Ok(None);
        }

        let Some(st) = self.live_ticket(ticket_id)?.into_service() else {
            return Err(TicketError::invalid_ticket(ticket_id));
        };
        let selected = self.selection.resolve(st.service());
        let registered = self.services.find_service_by(&selected);
        let registered = self.ensure_may_proxy(&selected, registered.as_ref())?;
        if !registered.proxy_policy.is_allowed_proxy_callback(&request.callback) {
            return Err(TicketError::unauthorized_proxying(format!(
                "callback '{}' is not allowed for service '{selected}'",
                request.callback
            )));
        }
        self.ensure_policy(
            &request.authentication,
            Some(&ServiceContext::new(&selected, Some(registered))),
        )?;

        let now = self.now();
        let mut first_grant = false;
        let found = self.registry.mutate(ticket_id, &mut |ticket| {
            first_grant = ticket
                .as_service_mut()
                .is_some_and(ServiceTicket::mark_proxy_granted);
            Mutation::Keep
        })?;
        if found.is_none() {
            return Err(TicketError::invalid_ticket(ticket_id));
        }
        if !first_grant {
            return Err(TicketError::unauthorized_proxying(format!(
                "ticket '{ticket_id}' already granted a proxy-granting ticket"
            )));
        }

        let pgt = self.factory.proxy_granting.create(
            &st,
            request.authentication.clone(),
            st.service().clone(),
            now,
        )?;
        self.registry.add(pgt.clone().into())?;

        let parent_id = st.granting_ticket_id();
        let tracked = self.registry.mutate(parent_id, &mut |parent| {
            if let Some(parent) = parent.as_granting_mut() {
                parent.track_proxy_granting_ticket(pgt.id().clone(), st.service().clone());
            }
            Mutation::Keep
        })?;
        if tracked.is_none() {
            self.registry.delete(pgt.id())?;
            return Err(TicketError::invalid_ticket(parent_id));
        }

        match handler.handle(&request.callback, pgt.id()) {
            Some(iou) => {
                info!(
                    principal = pgt.authentication().principal_id(),
                    proxied_by = %st.service(),
                    "granted proxy-granting ticket"
                );
                Ok(Some(ProxyGrant { ticket: pgt, iou }))
            }
            None => {
                warn!(callback = %request.callback, "proxy callback failed, discarding proxy-granting ticket");
                self.registry.delete_cascading(pgt.id())?;
                self.registry.mutate(parent_id, &mut |parent| {
                    if let Some(parent) = parent.as_granting_mut() {
                        parent.remove_descendant(pgt.id());
                    }
                    Mutation::Keep
                })?;
                Err(TicketError::unauthorized_proxying(format!(
                    "callback '{}' did not accept the proxy-granting ticket",
                    request.callback
                )))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────────

    /// A live ticket. Expired tickets are deleted and reported as invalid.
    pub fn get_ticket(&self, ticket_id: &TicketId) -> TicketResult<Ticket> {
        self.ensure_authentic(ticket_id)?;
        self.live_ticket(ticket_id)
    }

    /// Like [`get_ticket`](Self::get_ticket); a ticket of another kind is invalid.
    pub fn get_ticket_of_kind(&self, ticket_id: &TicketId, kind: TicketKind) -> TicketResult<Ticket> {
        let ticket = self.get_ticket(ticket_id)?;
        if ticket.kind() != kind {
            debug!(ticket_id = %ticket_id, expected = %kind, actual = %ticket.kind(), "ticket kind mismatch");
            return Err(TicketError::invalid_ticket(ticket_id));
        }
        Ok(ticket)
    }

    /// Every ticket matching `predicate` whose granting chain is still live. Reporting
    /// only; nothing is deleted.
    pub fn get_tickets(&self, predicate: impl Fn(&Ticket) -> bool) -> TicketResult<Vec<Ticket>> {
        let now = self.now();
        let mut live = Vec::new();
        for ticket in self.registry.scan(&|ticket| predicate(ticket))? {
            if !is_expired_with_ancestors(&self.registry, &ticket, now)? {
                live.push(ticket);
            }
        }
        Ok(live)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────────

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn is_authentic(&self, ticket_id: &TicketId) -> bool {
        verify_ticket_authenticity(self.cipher.as_ref(), ticket_id)
    }

    fn ensure_authentic(&self, ticket_id: &TicketId) -> TicketResult<()> {
        if self.is_authentic(ticket_id) {
            Ok(())
        } else {
            warn!("rejected ticket id that failed authenticity check");
            Err(TicketError::invalid_ticket(ticket_id))
        }
    }

    fn ensure_policy(
        &self,
        authentication: &Authentication,
        context: Option<&ServiceContext<'_>>,
    ) -> TicketResult<()> {
        if self.policy.is_satisfied_by(authentication, context) {
            return Ok(());
        }
        info!(
            principal = authentication.principal_id(),
            policy = self.policy.name(),
            "authentication policy not satisfied"
        );
        Err(TicketError::unsatisfied_policy(self.policy.name()))
    }

    /// Fetch a ticket, deleting it when it or its granting chain has expired.
    fn live_ticket(&self, ticket_id: &TicketId) -> TicketResult<Ticket> {
        let Some(ticket) = self.registry.get(ticket_id)? else {
            debug!(ticket_id = %ticket_id, "ticket not found");
            return Err(TicketError::invalid_ticket(ticket_id));
        };
        if is_expired_with_ancestors(&self.registry, &ticket, self.now())? {
            debug!(ticket_id = %ticket_id, "ticket expired, deleting");
            match ticket {
                Ticket::Granting(_) => self.registry.delete_cascading(ticket_id)?,
                Ticket::Service(_) => usize::from(self.registry.delete(ticket_id)?),
            };
            return Err(TicketError::invalid_ticket(ticket_id));
        }
        Ok(ticket)
    }

    fn live_granting_ticket(&self, ticket_id: &TicketId) -> TicketResult<GrantingTicket> {
        self.live_ticket(ticket_id)?
            .into_granting()
            .ok_or_else(|| TicketError::invalid_ticket(ticket_id))
    }

    /// A ticket obtained by proxy is only usable while the proxying service may proxy.
    fn ensure_proxy_allowed(&self, granting: &GrantingTicket) -> TicketResult<()> {
        let Some(proxied_by) = granting.proxied_by() else {
            return Ok(());
        };
        let registered = self.services.find_service_by(proxied_by);
        self.ensure_may_proxy(proxied_by, registered.as_ref()).map(|_| ())
    }

    fn ensure_may_proxy<'a>(
        &self,
        service: &Service,
        registered: Option<&'a RegisteredService>,
    ) -> TicketResult<&'a RegisteredService> {
        match registered {
            Some(registered) if registered.proxy_policy.is_allowed_to_proxy() => Ok(registered),
            Some(_) => {
                warn!(service = %service, "service is not allowed to proxy");
                Err(TicketError::unauthorized_proxying(format!(
                    "service '{service}' is not allowed to proxy"
                )))
            }
            None => {
                warn!(service = %service, "proxying service is not registered");
                Err(TicketError::unauthorized_proxying(format!(
                    "service '{service}' is not registered"
                )))
            }
        }
    }

    /// Mint a ticket under a granting ticket and persist both.
    ///
    /// The parent is updated atomically; `mint` may run more than once on backends that
    /// retry, and only its final result is kept.
    fn mint_under(
        &self,
        parent_id: &TicketId,
        mint: impl Fn(&mut GrantingTicket, DateTime<Utc>) -> TicketResult<ServiceTicket>,
    ) -> TicketResult<ServiceTicket> {
        let now = self.now();
        let mut minted: TicketResult<ServiceTicket> = Err(TicketError::invalid_ticket(parent_id));
        let found = self.registry.mutate(parent_id, &mut |ticket| {
            let Some(parent) = ticket.as_granting_mut() else {
                minted = Err(TicketError::invalid_ticket(parent_id));
                return Mutation::Keep;
            };
            if parent.is_expired(now) {
                minted = Err(TicketError::invalid_ticket(parent_id));
                return Mutation::Keep;
            }
            minted = mint(parent, now);
            Mutation::Keep
        })?;
        if found.is_none() {
            return Err(TicketError::invalid_ticket(parent_id));
        }

        let ticket = minted?;
        self.registry.add(ticket.clone().into())?;
        Ok(ticket)
    }

    /// Authentications (nearest first, root last) and proxying services above `st`.
    fn walk_chain(&self, st: &ServiceTicket) -> TicketResult<(Vec<Authentication>, Vec<Service>)> {
        let mut authentications = Vec::new();
        let mut proxies = Vec::new();
        let mut next = Some(st.granting_ticket_id().clone());

        while let Some(id) = next {
            if authentications.len() >= MAX_CHAIN_DEPTH {
                warn!(ticket_id = %st.id(), "granting chain too deep");
                return Err(TicketError::invalid_ticket(st.id()));
            }
            let Some(granting) = self.registry.get(&id)?.and_then(Ticket::into_granting) else {
                debug!(ticket_id = %id, "granting ticket vanished during validation");
                return Err(TicketError::invalid_ticket(st.id()));
            };
            if let Some(proxied_by) = granting.proxied_by() {
                proxies.push(proxied_by.clone());
            }
            authentications.push(granting.authentication().clone());
            next = granting.granting_ticket_id().cloned();
        }
        Ok((authentications, proxies))
    }
}

/// A fresh login inside an existing session must be by the same principal.
fn ensure_same_principal(session: &Authentication, fresh: &Authentication) -> TicketResult<()> {
    if session.principal_id() == fresh.principal_id() {
        return Ok(());
    }
    warn!(
        expected = session.principal_id(),
        actual = fresh.principal_id(),
        "mixed principals in one session"
    );
    Err(TicketError::MixedPrincipal {
        expected: session.principal_id().to_string(),
        actual: fresh.principal_id().to_string(),
    })
}
