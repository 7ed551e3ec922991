//! Proxy-granting ticket delivery.
//!
//! After a service ticket is validated with a proxy callback, a handler decides whether
//! the callback can receive a proxy-granting ticket and delivers it.

use std::sync::Arc;

use tracing::{debug, warn};

use ticketeer_core::{PROXY_GRANTING_TICKET_IOU_PREFIX, Service, TicketId, UniqueTicketIdGenerator};

pub trait ProxyHandler: Send + Sync + core::fmt::Debug {
    /// Whether this handler can deliver to `callback` at all.
    fn can_handle(&self, callback: &Service) -> bool;

    /// Deliver `pgt_id` to `callback`. Returns the IOU the callback was given, or `None`
    /// when delivery failed.
    fn handle(&self, callback: &Service, pgt_id: &TicketId) -> Option<String>;
}

/// Transport to the callback endpoint. Returns whether the endpoint acknowledged it.
pub trait ProxyCallbackClient: Send + Sync + core::fmt::Debug {
    fn deliver(&self, url: &str) -> bool;
}

/// CAS 1.0 has no proxying; nothing is ever handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cas10ProxyHandler;

impl ProxyHandler for Cas10ProxyHandler {
    fn can_handle(&self, _: &Service) -> bool {
        false
    }

    fn handle(&self, _: &Service, _: &TicketId) -> Option<String> {
        None
    }
}

/// CAS 2.0 callback: the PGT id and a fresh IOU are passed to an HTTPS endpoint.
#[derive(Debug, Clone)]
pub struct Cas20ProxyHandler {
    client: Arc<dyn ProxyCallbackClient>,
    id_generator: Arc<dyn UniqueTicketIdGenerator>,
}

impl Cas20ProxyHandler {
    pub fn new(client: Arc<dyn ProxyCallbackClient>, id_generator: Arc<dyn UniqueTicketIdGenerator>) -> Self {
        Self {
            client,
            id_generator,
        }
    }

    fn callback_url(callback: &Service, iou: &str, pgt_id: &TicketId) -> String {
        let separator = if callback.id().contains('?') { '&' } else { '?' };
        format!("{callback}{separator}pgtIou={iou}&pgtId={pgt_id}")
    }
}

impl ProxyHandler for Cas20ProxyHandler {
    fn can_handle(&self, callback: &Service) -> bool {
        let secure = callback.id().starts_with("https://");
        if !secure {
            debug!(callback = %callback, "proxy callback is not https");
        }
        secure
    }

    fn handle(&self, callback: &Service, pgt_id: &TicketId) -> Option<String> {
        let iou = self.id_generator.new_ticket_id(PROXY_GRANTING_TICKET_IOU_PREFIX);
        let url = Self::callback_url(callback, &iou, pgt_id);
        if self.client.deliver(&url) {
            debug!(callback = %callback, "delivered proxy-granting ticket");
            Some(iou)
        } else {
            warn!(callback = %callback, "proxy callback did not accept the proxy-granting ticket");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingClient {
        accept: bool,
        urls: Mutex<Vec<String>>,
    }

    impl ProxyCallbackClient for RecordingClient {
        fn deliver(&self, url: &str) -> bool {
            self.urls.lock().unwrap().push(url.to_string());
            self.accept
        }
    }

    #[derive(Debug)]
    struct FixedIds;

    impl UniqueTicketIdGenerator for FixedIds {
        fn new_ticket_id(&self, prefix: &str) -> String {
            format!("{prefix}-1-fixed")
        }
    }

    #[test]
    fn cas10_never_handles() {
        let handler = Cas10ProxyHandler;
        let callback = Service::new("https://proxy.example/cb");
        assert!(!handler.can_handle(&callback));
        assert_eq!(handler.handle(&callback, &TicketId::new("PGT-1")), None);
    }

    #[test]
    fn cas20_delivers_iou_and_pgt() {
        let client = Arc::new(RecordingClient {
            accept: true,
            ..Default::default()
        });
        let handler = Cas20ProxyHandler::new(client.clone(), Arc::new(FixedIds));
        let callback = Service::new("https://proxy.example/cb?tenant=a");

        assert!(handler.can_handle(&callback));
        assert!(!handler.can_handle(&Service::new("http://proxy.example/cb")));

        let iou = handler.handle(&callback, &TicketId::new("PGT-9"));
        assert_eq!(iou.as_deref(), Some("PGTIOU-1-fixed"));
        assert_eq!(
            client.urls.lock().unwrap().as_slice(),
            ["https://proxy.example/cb?tenant=a&pgtIou=PGTIOU-1-fixed&pgtId=PGT-9"]
        );
    }

    #[test]
    fn cas20_reports_failed_delivery() {
        let handler = Cas20ProxyHandler::new(Arc::new(RecordingClient::default()), Arc::new(FixedIds));
        assert_eq!(
            handler.handle(&Service::new("https://proxy.example/cb"), &TicketId::new("PGT-9")),
            None
        );
    }
}
