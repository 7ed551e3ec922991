//! Ticket factories.
//!
//! One factory per ticket kind, each composed from an id generator, an expiration policy
//! and the cipher protecting protocol-visible ids. Factories only mint; persisting the
//! result is the caller's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use ticketeer_core::{
    Authentication, ExpirationPolicy, GrantingTicket, Service, ServiceTicket, TicketError, TicketId,
    TicketKind, TicketResult, UniqueTicketIdGenerator,
};

use crate::cipher::{CipherExecutor, NoOpCipherExecutor};

/// Id generation plus optional protection, shared by every factory.
#[derive(Debug, Clone)]
struct IdMinter {
    generator: Arc<dyn UniqueTicketIdGenerator>,
    cipher: Arc<dyn CipherExecutor>,
}

impl IdMinter {
    fn mint(&self, kind: TicketKind) -> TicketResult<TicketId> {
        let prefix = kind.prefix();
        let raw = self.generator.new_ticket_id(prefix);
        if !self.cipher.is_enabled() {
            return Ok(TicketId::new(raw));
        }
        let sealed = self
            .cipher
            .encode(&raw)
            .map_err(|e| TicketError::creation(format!("{kind} id protection failed: {e}")))?;
        Ok(TicketId::new(format!("{prefix}-{sealed}")))
    }
}

/// Longest raw id whose protected form `{prefix}-{encode(raw)}` fits in `max_length`.
///
/// With a disabled cipher ids are used as generated, so this is `max_length` itself.
/// Zero when not even an empty id would fit.
pub fn raw_id_budget(cipher: &dyn CipherExecutor, kind: TicketKind, max_length: usize) -> usize {
    if !cipher.is_enabled() {
        return max_length;
    }
    let overhead = kind.prefix().len() + 1;
    (0..=max_length)
        .rev()
        .find(|&raw| overhead.saturating_add(cipher.encoded_len(raw)) <= max_length)
        .unwrap_or(0)
}

/// Whether `id` is a protected id this cipher issued: the part after the prefix must
/// decode to a raw id carrying the same prefix.
///
/// Always true with a disabled cipher.
pub fn verify_ticket_authenticity(cipher: &dyn CipherExecutor, id: &TicketId) -> bool {
    if !cipher.is_enabled() {
        return true;
    }
    let Some((prefix, sealed)) = id.as_str().split_once('-') else {
        return false;
    };
    match cipher.decode(sealed) {
        Ok(raw) => raw.starts_with(prefix) && raw[prefix.len()..].starts_with('-'),
        Err(err) => {
            debug!(cipher = cipher.name(), error = %err, "ticket id failed authenticity check");
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct TicketGrantingTicketFactory {
    ids: IdMinter,
    expiration_policy: ExpirationPolicy,
}

impl TicketGrantingTicketFactory {
    pub fn new(
        generator: Arc<dyn UniqueTicketIdGenerator>,
        expiration_policy: ExpirationPolicy,
        cipher: Arc<dyn CipherExecutor>,
    ) -> Self {
        Self {
            ids: IdMinter { generator, cipher },
            expiration_policy,
        }
    }

    pub fn create(&self, authentication: Authentication, now: DateTime<Utc>) -> TicketResult<GrantingTicket> {
        let id = self.ids.mint(TicketKind::TicketGranting)?;
        Ok(GrantingTicket::new_ticket_granting(
            id,
            authentication,
            self.expiration_policy.clone(),
            now,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ServiceTicketFactory {
    ids: IdMinter,
    expiration_policy: ExpirationPolicy,
    only_track_most_recent: bool,
}

impl ServiceTicketFactory {
    pub fn new(
        generator: Arc<dyn UniqueTicketIdGenerator>,
        expiration_policy: ExpirationPolicy,
        cipher: Arc<dyn CipherExecutor>,
        only_track_most_recent: bool,
    ) -> Self {
        Self {
            ids: IdMinter { generator, cipher },
            expiration_policy,
            only_track_most_recent,
        }
    }

    /// Mint a service ticket under `parent` and record it there.
    ///
    /// The parent is mutated (use recorded, descendant tracked) and must be persisted by
    /// the caller.
    pub fn create(
        &self,
        parent: &mut GrantingTicket,
        service: Service,
        from_new_login: bool,
        now: DateTime<Utc>,
    ) -> TicketResult<ServiceTicket> {
        let id = self.ids.mint(TicketKind::Service)?;
        let untracked = parent.grant_service(id.clone(), service.clone(), now, self.only_track_most_recent);
        if !untracked.is_empty() {
            debug!(parent = %parent.id(), untracked = untracked.len(), "stopped tracking earlier service tickets");
        }
        Ok(ServiceTicket::new_service(
            id,
            parent.id().clone(),
            service,
            from_new_login,
            self.expiration_policy.clone(),
            now,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ProxyGrantingTicketFactory {
    ids: IdMinter,
    expiration_policy: ExpirationPolicy,
}

impl ProxyGrantingTicketFactory {
    pub fn new(
        generator: Arc<dyn UniqueTicketIdGenerator>,
        expiration_policy: ExpirationPolicy,
        cipher: Arc<dyn CipherExecutor>,
    ) -> Self {
        Self {
            ids: IdMinter { generator, cipher },
            expiration_policy,
        }
    }

    /// Mint a PGT for `proxied_by` from a validated service ticket.
    ///
    /// The new ticket hangs off the service ticket's granting ticket, which must record
    /// it with [`GrantingTicket::track_proxy_granting_ticket`].
    pub fn create(
        &self,
        service_ticket: &ServiceTicket,
        authentication: Authentication,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> TicketResult<GrantingTicket> {
        let id = self.ids.mint(TicketKind::ProxyGranting)?;
        Ok(GrantingTicket::new_proxy_granting(
            id,
            authentication,
            self.expiration_policy.clone(),
            proxied_by,
            service_ticket.granting_ticket_id().clone(),
            now,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ProxyTicketFactory {
    ids: IdMinter,
    expiration_policy: ExpirationPolicy,
    only_track_most_recent: bool,
}

impl ProxyTicketFactory {
    pub fn new(
        generator: Arc<dyn UniqueTicketIdGenerator>,
        expiration_policy: ExpirationPolicy,
        cipher: Arc<dyn CipherExecutor>,
        only_track_most_recent: bool,
    ) -> Self {
        Self {
            ids: IdMinter { generator, cipher },
            expiration_policy,
            only_track_most_recent,
        }
    }

    pub fn create(
        &self,
        parent: &mut GrantingTicket,
        service: Service,
        now: DateTime<Utc>,
    ) -> TicketResult<ServiceTicket> {
        let id = self.ids.mint(TicketKind::Proxy)?;
        parent.grant_service(id.clone(), service.clone(), now, self.only_track_most_recent);
        Ok(ServiceTicket::new_proxy(
            id,
            parent.id().clone(),
            service,
            self.expiration_policy.clone(),
            now,
        ))
    }
}

/// The four factories an orchestrator needs.
#[derive(Debug, Clone)]
pub struct DefaultTicketFactory {
    pub ticket_granting: TicketGrantingTicketFactory,
    pub service: ServiceTicketFactory,
    pub proxy_granting: ProxyGrantingTicketFactory,
    pub proxy: ProxyTicketFactory,
}

impl DefaultTicketFactory {
    /// Factories sharing one generator and cipher, with the usual policies: 8h/2h
    /// sessions, single-use 10s service and proxy tickets.
    pub fn with_defaults(generator: Arc<dyn UniqueTicketIdGenerator>) -> Self {
        let cipher: Arc<dyn CipherExecutor> = Arc::new(NoOpCipherExecutor);
        let session = ExpirationPolicy::ticket_granting(28_800, 7_200);
        let single_use = ExpirationPolicy::multi_use_or_timeout(1, 10);
        Self {
            ticket_granting: TicketGrantingTicketFactory::new(generator.clone(), session.clone(), cipher.clone()),
            service: ServiceTicketFactory::new(generator.clone(), single_use.clone(), cipher.clone(), false),
            proxy_granting: ProxyGrantingTicketFactory::new(generator.clone(), session, cipher.clone()),
            proxy: ProxyTicketFactory::new(generator, single_use, cipher, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesGcmCipherExecutor, CipherKeys};
    use crate::id_generator::HostNameBasedUniqueTicketIdGenerator;
    use ticketeer_core::Principal;

    fn generator() -> Arc<dyn UniqueTicketIdGenerator> {
        Arc::new(HostNameBasedUniqueTicketIdGenerator::new(64, "cas.example").unwrap())
    }

    fn authentication(now: DateTime<Utc>) -> Authentication {
        Authentication::new(Principal::new("alice"), now)
    }

    #[test]
    fn minted_ids_carry_kind_prefix() {
        let now = Utc::now();
        let factory = DefaultTicketFactory::with_defaults(generator());

        let mut tgt = factory.ticket_granting.create(authentication(now), now).unwrap();
        assert_eq!(tgt.id().advertised_kind(), Some(TicketKind::TicketGranting));

        let st = factory
            .service
            .create(&mut tgt, Service::new("https://app.example"), true, now)
            .unwrap();
        assert_eq!(st.id().advertised_kind(), Some(TicketKind::Service));
        assert_eq!(st.granting_ticket_id(), tgt.id());
        assert!(tgt.descendant_ids().contains(st.id()));
        assert_eq!(tgt.state().count_of_uses, 1);
    }

    #[test]
    fn proxy_granting_ticket_hangs_off_session() {
        let now = Utc::now();
        let factory = DefaultTicketFactory::with_defaults(generator());
        let mut tgt = factory.ticket_granting.create(authentication(now), now).unwrap();
        let st = factory
            .service
            .create(&mut tgt, Service::new("https://proxy.example"), false, now)
            .unwrap();

        let mut pgt = factory
            .proxy_granting
            .create(&st, tgt.authentication().clone(), Service::new("https://proxy.example/cb"), now)
            .unwrap();
        assert_eq!(pgt.kind(), TicketKind::ProxyGranting);
        assert_eq!(pgt.granting_ticket_id(), Some(tgt.id()));

        let pt = factory
            .proxy
            .create(&mut pgt, Service::new("https://backend.example"), now)
            .unwrap();
        assert_eq!(pt.kind(), TicketKind::Proxy);
        assert_eq!(pt.granting_ticket_id(), pgt.id());
    }

    #[test]
    fn raw_budget_keeps_protected_ids_within_max_length() {
        let cipher = AesGcmCipherExecutor::new("protocol", CipherKeys::generate());
        assert_eq!(raw_id_budget(&NoOpCipherExecutor, TicketKind::Service, 64), 64);
        assert_eq!(raw_id_budget(&cipher, TicketKind::Service, 64), 0);

        for (kind, max_length) in [(TicketKind::Service, 160), (TicketKind::TicketGranting, 200)] {
            let budget = raw_id_budget(&cipher, kind, max_length);
            assert!(budget > 0);
            let generator = Arc::new(HostNameBasedUniqueTicketIdGenerator::new(budget, "cas.example").unwrap());
            let ids = IdMinter {
                generator,
                cipher: Arc::new(cipher.clone()),
            };
            let id = ids.mint(kind).unwrap();
            assert!(id.as_str().len() <= max_length, "{} > {max_length}", id.as_str().len());
            assert!(kind.prefix().len() + 1 + cipher.encoded_len(budget + 1) > max_length);
        }
    }

    #[test]
    fn only_track_most_recent_drops_sibling() {
        let now = Utc::now();
        let factory = ServiceTicketFactory::new(
            generator(),
            ExpirationPolicy::multi_use_or_timeout(1, 10),
            Arc::new(NoOpCipherExecutor),
            true,
        );
        let mut tgt = DefaultTicketFactory::with_defaults(generator())
            .ticket_granting
            .create(authentication(now), now)
            .unwrap();

        let first = factory.create(&mut tgt, Service::new("https://app.example?a=1"), false, now).unwrap();
        let second = factory.create(&mut tgt, Service::new("https://app.example?a=2"), false, now).unwrap();
        assert!(!tgt.descendant_ids().contains(first.id()));
        assert!(tgt.descendant_ids().contains(second.id()));
    }

    #[test]
    fn protected_ids_verify_only_with_issuing_cipher() {
        let now = Utc::now();
        let cipher: Arc<dyn CipherExecutor> =
            Arc::new(AesGcmCipherExecutor::new("protocol", CipherKeys::generate()));
        let factory = TicketGrantingTicketFactory::new(
            generator(),
            ExpirationPolicy::NeverExpires,
            cipher.clone(),
        );

        let tgt = factory.create(authentication(now), now).unwrap();
        assert!(tgt.id().as_str().starts_with("TGT-"));
        assert!(!tgt.id().as_str().contains("cas.example"));
        assert!(verify_ticket_authenticity(cipher.as_ref(), tgt.id()));

        let other = AesGcmCipherExecutor::new("other", CipherKeys::generate());
        assert!(!verify_ticket_authenticity(&other, tgt.id()));
        assert!(!verify_ticket_authenticity(cipher.as_ref(), &TicketId::new("TGT-forged")));
        assert!(!verify_ticket_authenticity(cipher.as_ref(), &TicketId::new("nodash")));
    }

    #[test]
    fn protected_id_cannot_change_kind() {
        let now = Utc::now();
        let cipher: Arc<dyn CipherExecutor> =
            Arc::new(AesGcmCipherExecutor::new("protocol", CipherKeys::generate()));
        let factory = TicketGrantingTicketFactory::new(generator(), ExpirationPolicy::NeverExpires, cipher.clone());
        let tgt = factory.create(authentication(now), now).unwrap();

        let relabelled = TicketId::new(tgt.id().as_str().replacen("TGT-", "ST-", 1));
        assert!(!verify_ticket_authenticity(cipher.as_ref(), &relabelled));
    }

    #[test]
    fn disabled_cipher_accepts_anything() {
        assert!(verify_ticket_authenticity(&NoOpCipherExecutor, &TicketId::new("ST-1")));
    }
}
