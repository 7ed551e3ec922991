//! Behaviour every [`TicketRegistry`] backend must show.
//!
//! Backends call [`run_all`] from their own tests with a constructor returning an empty
//! registry.

use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use chrono::{DateTime, Duration, Utc};

use ticketeer_core::{
    Authentication, ExpirationPolicy, GrantingTicket, Principal, Service, ServiceTicket, Ticket,
    TicketId, TicketKind,
};

use super::{Mutation, TicketRegistry};

pub fn ticket_granting(id: &str, now: DateTime<Utc>) -> GrantingTicket {
    GrantingTicket::new_ticket_granting(
        TicketId::new(id),
        Authentication::new(Principal::new("casuser"), now),
        ExpirationPolicy::ticket_granting(28_800, 7_200),
        now,
    )
}

pub fn service_ticket(id: &str, parent: &str, now: DateTime<Utc>) -> ServiceTicket {
    ServiceTicket::new_service(
        TicketId::new(id),
        TicketId::new(parent),
        Service::new("https://app.example"),
        true,
        ExpirationPolicy::multi_use_or_timeout(1, 10),
        now,
    )
}

pub fn run_all<R, F>(make: F)
where
    R: TicketRegistry,
    F: Fn() -> R,
{
    add_then_get(&make());
    add_is_an_upsert(&make());
    get_of_kind_checks_kind(&make());
    delete_is_idempotent(&make());
    delete_all_reports_count(&make());
    scan_applies_predicate(&make());
    mutate_keep_persists(&make());
    mutate_remove_deletes(&make());
    mutate_absent_skips_callback(&make());
    delete_cascading_walks_tree(&make());
    concurrent_consume_has_one_winner(&make());
    concurrent_updates_of_distinct_tickets(&make());
}

pub fn add_then_get<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    let tgt = Ticket::from(ticket_granting("TGT-contract-1", now));
    registry.add(tgt.clone()).unwrap();

    assert_eq!(registry.get(tgt.id()).unwrap(), Some(tgt));
    assert_eq!(registry.get(&TicketId::new("TGT-missing")).unwrap(), None);
}

pub fn add_is_an_upsert<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    let mut tgt = ticket_granting("TGT-contract-2", now);
    registry.add(tgt.clone().into()).unwrap();

    tgt.record_use(now + Duration::seconds(5));
    registry.update(tgt.clone().into()).unwrap();

    let stored = registry.get(tgt.id()).unwrap().unwrap();
    assert_eq!(stored.state().count_of_uses, 1);
    assert_eq!(registry.count().unwrap(), 1);
}

pub fn get_of_kind_checks_kind<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    registry.add(service_ticket("ST-contract-3", "TGT-contract-3", now).into()).unwrap();
    let id = TicketId::new("ST-contract-3");

    assert!(registry.get_of_kind(&id, TicketKind::Service).unwrap().is_some());
    assert!(registry.get_of_kind(&id, TicketKind::TicketGranting).unwrap().is_none());
    assert!(registry.get_of_kind(&id, TicketKind::Proxy).unwrap().is_none());
}

pub fn delete_is_idempotent<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    registry.add(ticket_granting("TGT-contract-4", now).into()).unwrap();
    let id = TicketId::new("TGT-contract-4");

    assert!(registry.delete(&id).unwrap());
    assert!(!registry.delete(&id).unwrap());
    assert_eq!(registry.get(&id).unwrap(), None);
}

pub fn delete_all_reports_count<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    for i in 0..5 {
        registry
            .add(ticket_granting(&format!("TGT-contract-5-{i}"), now).into())
            .unwrap();
    }

    assert_eq!(registry.delete_all().unwrap(), 5);
    assert_eq!(registry.count().unwrap(), 0);
    assert_eq!(registry.delete_all().unwrap(), 0);
}

pub fn scan_applies_predicate<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    registry.add(ticket_granting("TGT-contract-6", now).into()).unwrap();
    registry.add(service_ticket("ST-contract-6a", "TGT-contract-6", now).into()).unwrap();
    registry.add(service_ticket("ST-contract-6b", "TGT-contract-6", now).into()).unwrap();

    let services = registry.scan(&|t| t.kind() == TicketKind::Service).unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(registry.session_count().unwrap(), 1);
    assert_eq!(registry.service_ticket_count().unwrap(), 2);
    assert_eq!(registry.scan(&|_| true).unwrap().len(), 3);
}

pub fn mutate_keep_persists<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    registry.add(ticket_granting("TGT-contract-7", now).into()).unwrap();
    let id = TicketId::new("TGT-contract-7");

    let returned = registry
        .mutate(&id, &mut |t| {
            t.record_use(now + Duration::seconds(1));
            Mutation::Keep
        })
        .unwrap()
        .unwrap();
    assert_eq!(returned.state().count_of_uses, 1);
    assert_eq!(registry.get(&id).unwrap(), Some(returned));
}

pub fn mutate_remove_deletes<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    registry.add(service_ticket("ST-contract-8", "TGT-contract-8", now).into()).unwrap();
    let id = TicketId::new("ST-contract-8");

    let returned = registry
        .mutate(&id, &mut |t| {
            t.record_use(now);
            Mutation::Remove
        })
        .unwrap();
    assert_eq!(returned.map(|t| t.state().count_of_uses), Some(1));
    assert_eq!(registry.get(&id).unwrap(), None);
}

pub fn mutate_absent_skips_callback<R: TicketRegistry>(registry: &R) {
    let mut called = false;
    let returned = registry
        .mutate(&TicketId::new("ST-contract-9"), &mut |_| {
            called = true;
            Mutation::Keep
        })
        .unwrap();
    assert!(returned.is_none());
    assert!(!called);
    assert_eq!(registry.count().unwrap(), 0);
}

pub fn delete_cascading_walks_tree<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    let mut tgt = ticket_granting("TGT-contract-10", now);
    tgt.grant_service(TicketId::new("ST-contract-10"), Service::new("https://app.example"), now, false);
    tgt.track_proxy_granting_ticket(TicketId::new("PGT-contract-10"), Service::new("https://proxy.example"));

    let mut pgt = GrantingTicket::new_proxy_granting(
        TicketId::new("PGT-contract-10"),
        tgt.authentication().clone(),
        ExpirationPolicy::NeverExpires,
        Service::new("https://proxy.example"),
        tgt.id().clone(),
        now,
    );
    pgt.grant_service(TicketId::new("PT-contract-10"), Service::new("https://backend.example"), now, false);
    let pt = ServiceTicket::new_proxy(
        TicketId::new("PT-contract-10"),
        pgt.id().clone(),
        Service::new("https://backend.example"),
        ExpirationPolicy::multi_use_or_timeout(1, 10),
        now,
    );

    registry.add(tgt.into()).unwrap();
    registry.add(service_ticket("ST-contract-10", "TGT-contract-10", now).into()).unwrap();
    registry.add(pgt.into()).unwrap();
    registry.add(pt.into()).unwrap();
    registry.add(ticket_granting("TGT-contract-10-other", now).into()).unwrap();

    assert_eq!(registry.delete_cascading(&TicketId::new("TGT-contract-10")).unwrap(), 4);
    assert_eq!(registry.count().unwrap(), 1);
    assert!(registry.get(&TicketId::new("PT-contract-10")).unwrap().is_none());
}

pub fn concurrent_consume_has_one_winner<R: TicketRegistry>(registry: &R) {
    const RACERS: usize = 16;
    let now = Utc::now();
    registry.add(service_ticket("ST-contract-11", "TGT-contract-11", now).into()).unwrap();
    let id = TicketId::new("ST-contract-11");

    let winners = AtomicUsize::new(0);
    let barrier = Barrier::new(RACERS);
    thread::scope(|scope| {
        for _ in 0..RACERS {
            scope.spawn(|| {
                barrier.wait();
                // Callbacks may rerun on optimistic backends; only the final call counts.
                let mut won = false;
                let consumed = registry
                    .mutate(&id, &mut |t| {
                        won = !t.is_expired(now);
                        t.record_use(now);
                        Mutation::Remove
                    })
                    .unwrap();
                if consumed.is_some() && won {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(registry.get(&id).unwrap().is_none());
}

pub fn concurrent_updates_of_distinct_tickets<R: TicketRegistry>(registry: &R) {
    let now = Utc::now();
    let ids: Vec<_> = (0..8).map(|i| format!("TGT-contract-12-{i}")).collect();
    for id in &ids {
        registry.add(ticket_granting(id, now).into()).unwrap();
    }

    thread::scope(|scope| {
        for id in &ids {
            scope.spawn(move || {
                let id = TicketId::new(id.as_str());
                for _ in 0..10 {
                    registry
                        .mutate(&id, &mut |t| {
                            t.record_use(now);
                            Mutation::Keep
                        })
                        .unwrap();
                }
            });
        }
    });

    for id in &ids {
        let ticket = registry.get(&TicketId::new(id.as_str())).unwrap().unwrap();
        assert_eq!(ticket.state().count_of_uses, 10);
    }
}
