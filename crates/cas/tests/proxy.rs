mod common;

use std::sync::Arc;

use common::*;
use ticketeer_auth::{Cas10ProxyHandler, Cas20ProxyHandler, ProxyHandler};
use ticketeer_cas::{ProxyCallbackRequest, ProxyGrant};
use ticketeer_core::{
    Authentication, GrantingTicket, Principal, ProxyPolicy, RegisteredService, ServiceTicket, TicketError,
    TicketKind,
};
use ticketeer_infra::id_generator::HostNameBasedUniqueTicketIdGenerator;
use ticketeer_infra::registry::TicketRegistry;

fn callback_request(h: &Harness, callback: &str) -> ProxyCallbackRequest {
    let authentication = Authentication::new(Principal::new(callback), h.now())
        .with_success("http_based_service_credentials", callback);
    ProxyCallbackRequest::new(service(callback), authentication)
}

fn cas20(client: Arc<RecordingCallbackClient>) -> Cas20ProxyHandler {
    Cas20ProxyHandler::new(
        client,
        Arc::new(HostNameBasedUniqueTicketIdGenerator::new(64, "cas.test").unwrap()),
    )
}

/// Session for alice plus a service ticket issued to the proxying portal.
fn portal_ticket(h: &Harness) -> (GrantingTicket, ServiceTicket) {
    let tgt = h.cas.grant_ticket_granting_ticket(&h.login("alice")).unwrap();
    let st = h.cas.grant_service_ticket(tgt.id(), &service(PROXY), None).unwrap();
    (tgt, st)
}

fn grant_pgt(h: &Harness, st: &ServiceTicket) -> ProxyGrant {
    let client = Arc::new(RecordingCallbackClient::accepting());
    h.cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(h, PROXY_CALLBACK), &cas20(client))
        .unwrap()
        .unwrap()
}

fn count_of(h: &Harness, kind: TicketKind) -> usize {
    h.registry.scan(&|t| t.kind() == kind).unwrap().len()
}

#[test]
fn proxy_chain_end_to_end() {
    let h = Harness::new();
    let (tgt, st) = portal_ticket(&h);

    let client = Arc::new(RecordingCallbackClient::accepting());
    let grant = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, PROXY_CALLBACK), &cas20(client.clone()))
        .unwrap()
        .unwrap();
    assert!(grant.iou.starts_with("PGTIOU-"));
    assert_eq!(grant.ticket.kind(), TicketKind::ProxyGranting);
    assert_eq!(grant.ticket.proxied_by(), Some(&service(PROXY)));

    let urls = client.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with(PROXY_CALLBACK));
    assert!(urls[0].contains(&format!("pgtIou={}", grant.iou)));
    assert!(urls[0].contains(&format!("pgtId={}", grant.ticket.id())));

    // The ticket the PGT was obtained with still validates afterwards.
    let portal = h.cas.validate_service_ticket(st.id(), &service(PROXY)).unwrap();
    assert!(!portal.is_proxied());

    let pt = h.cas.grant_proxy_ticket(grant.ticket.id(), &service(BACKEND)).unwrap();
    assert_eq!(pt.kind(), TicketKind::Proxy);

    let assertion = h.cas.validate_service_ticket(pt.id(), &service(BACKEND)).unwrap();
    assert_eq!(assertion.principal_id(), "alice");
    assert_eq!(assertion.proxies, vec![service(PROXY)]);
    assert_eq!(assertion.chained_authentications.len(), 2);
    assert_eq!(assertion.chained_authentications[0].principal_id(), PROXY_CALLBACK);
    assert_eq!(&assertion.chained_authentications[1], tgt.authentication());
}

#[test]
fn cas10_handler_grants_nothing() {
    let h = Harness::new();
    let (_, st) = portal_ticket(&h);

    let outcome = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, PROXY_CALLBACK), &Cas10ProxyHandler)
        .unwrap();
    assert!(outcome.is_none());
    assert_eq!(count_of(&h, TicketKind::ProxyGranting), 0);
}

#[test]
fn plain_http_callback_is_not_handled() {
    let h = Harness::new();
    let (_, st) = portal_ticket(&h);
    let handler = cas20(Arc::new(RecordingCallbackClient::accepting()));
    assert!(!handler.can_handle(&service("http://proxy.example/callback")));

    let outcome = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, "http://proxy.example/callback"), &handler)
        .unwrap();
    assert!(outcome.is_none());
}

#[test]
fn failed_delivery_discards_the_ticket() {
    let h = Harness::new();
    let (tgt, st) = portal_ticket(&h);

    let client = Arc::new(RecordingCallbackClient::refusing());
    let err = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, PROXY_CALLBACK), &cas20(client.clone()))
        .unwrap_err();
    assert!(matches!(err, TicketError::UnauthorizedProxying(_)));
    assert_eq!(client.urls().len(), 1);
    assert_eq!(count_of(&h, TicketKind::ProxyGranting), 0);

    let session = h.cas.get_ticket(tgt.id()).unwrap().into_granting().unwrap();
    assert!(session.proxy_granting_tickets().is_empty());
}

#[test]
fn service_without_proxy_policy_cannot_proxy() {
    let h = Harness::new();
    let tgt = h.cas.grant_ticket_granting_ticket(&h.login("alice")).unwrap();
    let st = h.cas.grant_service_ticket(tgt.id(), &service(APP), None).unwrap();

    let client = Arc::new(RecordingCallbackClient::accepting());
    let err = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, PROXY_CALLBACK), &cas20(client.clone()))
        .unwrap_err();
    assert!(matches!(err, TicketError::UnauthorizedProxying(_)));
    assert!(client.urls().is_empty());
}

#[test]
fn callback_outside_allowed_pattern_is_refused() {
    let h = Harness::new();
    let (_, st) = portal_ticket(&h);

    let client = Arc::new(RecordingCallbackClient::accepting());
    let err = h
        .cas
        .grant_proxy_granting_ticket(
            st.id(),
            &callback_request(&h, "https://evil.example/callback"),
            &cas20(client.clone()),
        )
        .unwrap_err();
    assert!(matches!(err, TicketError::UnauthorizedProxying(_)));
    assert!(client.urls().is_empty());
}

#[test]
fn one_proxy_granting_ticket_per_service_ticket() {
    let h = Harness::new();
    let (_, st) = portal_ticket(&h);
    grant_pgt(&h, &st);

    let client = Arc::new(RecordingCallbackClient::accepting());
    let err = h
        .cas
        .grant_proxy_granting_ticket(st.id(), &callback_request(&h, PROXY_CALLBACK), &cas20(client))
        .unwrap_err();
    assert!(matches!(err, TicketError::UnauthorizedProxying(_)));
    assert_eq!(count_of(&h, TicketKind::ProxyGranting), 1);
}

#[test]
fn revoked_proxy_policy_blocks_further_grants() {
    let h = Harness::new();
    let (_, st) = portal_ticket(&h);
    let pgt = grant_pgt(&h, &st).ticket;

    h.services.save(
        RegisteredService::new(2, "portal", "https://proxy.example/*").with_proxy_policy(ProxyPolicy::Refuse),
    );

    assert!(matches!(
        h.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)),
        Err(TicketError::UnauthorizedProxying(_))
    ));
    assert!(matches!(
        h.cas.grant_service_ticket(pgt.id(), &service(BACKEND), None),
        Err(TicketError::UnauthorizedProxying(_))
    ));
    assert_eq!(count_of(&h, TicketKind::Proxy), 0);
    assert_eq!(count_of(&h, TicketKind::Service), 1);
}

#[test]
fn proxy_ticket_needs_a_proxy_granting_ticket() {
    let h = Harness::new();
    let (tgt, st) = portal_ticket(&h);

    assert!(matches!(
        h.cas.grant_proxy_ticket(tgt.id(), &service(BACKEND)),
        Err(TicketError::InvalidTicket(_))
    ));
    assert!(matches!(
        h.cas.grant_proxy_ticket(st.id(), &service(BACKEND)),
        Err(TicketError::InvalidTicket(_))
    ));
}

#[test]
fn logout_revokes_the_whole_proxy_tree() {
    let h = Harness::new();
    let (tgt, st) = portal_ticket(&h);
    let pgt = grant_pgt(&h, &st).ticket;
    let pt = h.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)).unwrap();

    h.cas.destroy_ticket_granting_ticket(tgt.id()).unwrap();

    for id in [tgt.id(), st.id(), pgt.id(), pt.id()] {
        assert!(matches!(h.cas.get_ticket(id), Err(TicketError::InvalidTicket(_))), "{id}");
    }
    assert!(matches!(
        h.cas.validate_service_ticket(pt.id(), &service(BACKEND)),
        Err(TicketError::InvalidTicket(_))
    ));
    assert_eq!(h.registry.count().unwrap(), 0);
}

#[test]
fn expired_session_invalidates_proxy_descendants() {
    let h = Harness::new();
    let (tgt, st) = portal_ticket(&h);
    let pgt = grant_pgt(&h, &st).ticket;

    // Idle past the session's time to kill.
    h.advance_secs(7_201);
    assert!(matches!(
        h.cas.grant_proxy_ticket(pgt.id(), &service(BACKEND)),
        Err(TicketError::InvalidTicket(_))
    ));
    assert!(h.registry.get(pgt.id()).unwrap().is_none());
    assert!(h.cas.get_ticket(tgt.id()).is_err());
}
