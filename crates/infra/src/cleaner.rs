//! Background reaping of expired tickets.
//!
//! [`TicketRegistryCleaner::clean`] runs one pass; [`CleanerWorker`] repeats it on a
//! fixed schedule in its own thread. Failures are logged and retried on the next pass.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use ticketeer_core::{Clock, SystemClock, Ticket};

use crate::lock::LockingStrategy;
use crate::registry::{RegistryError, TicketRegistry, is_expired_with_ancestors};

#[derive(Debug)]
pub struct TicketRegistryCleaner<R, L> {
    registry: R,
    locking: L,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl<R, L> TicketRegistryCleaner<R, L>
where
    R: TicketRegistry,
    L: LockingStrategy,
{
    pub fn new(registry: R, locking: L) -> Self {
        Self {
            registry,
            locking,
            clock: Arc::new(SystemClock),
            enabled: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One reap pass. Returns how many tickets were deleted.
    pub fn clean(&self) -> usize {
        if !self.enabled {
            debug!("ticket registry cleaner disabled");
            return 0;
        }

        match self.locking.acquire() {
            Ok(true) => {}
            Ok(false) => {
                debug!("another node holds the cleaner lock, skipping pass");
                return 0;
            }
            Err(err) => {
                warn!(error = %err, "could not acquire cleaner lock, skipping pass");
                return 0;
            }
        }

        let removed = match self.reap() {
            Ok(removed) => removed,
            Err(err) => {
                error!(error = %err, "ticket registry cleaning failed");
                0
            }
        };

        if let Err(err) = self.locking.release() {
            warn!(error = %err, "could not release cleaner lock");
        }

        info!(removed, "ticket registry cleaned");
        removed
    }

    fn reap(&self) -> Result<usize, RegistryError> {
        let now = self.clock.now();
        let mut removed = 0;

        // Every ticket is read once here; parents are re-read per child by id.
        for ticket in self.registry.scan(&|_| true)? {
            if !is_expired_with_ancestors(&self.registry, &ticket, now)? {
                continue;
            }
            removed += match &ticket {
                Ticket::Granting(granting) => self.registry.delete_cascading(granting.id())?,
                Ticket::Service(service) => usize::from(self.registry.delete(service.id())?),
            };
        }
        Ok(removed)
    }
}

/// Handle to stop a running [`CleanerWorker`].
#[derive(Debug)]
pub struct CleanerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl CleanerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Passes completed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct CleanerWorker;

impl CleanerWorker {
    /// Run `cleaner` after `start_delay`, then every `interval`, until shut down.
    pub fn spawn<R, L>(
        cleaner: TicketRegistryCleaner<R, L>,
        start_delay: Duration,
        interval: Duration,
    ) -> io::Result<CleanerHandle>
    where
        R: TicketRegistry + 'static,
        L: LockingStrategy + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let passes = Arc::new(AtomicU64::new(0));
        let counter = passes.clone();

        let join = thread::Builder::new()
            .name("ticket-registry-cleaner".to_string())
            .spawn(move || cleaner_loop(cleaner, start_delay, interval, shutdown_rx, counter))?;

        Ok(CleanerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            passes,
        })
    }
}

fn cleaner_loop<R, L>(
    cleaner: TicketRegistryCleaner<R, L>,
    start_delay: Duration,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    passes: Arc<AtomicU64>,
) where
    R: TicketRegistry,
    L: LockingStrategy,
{
    info!(
        start_delay_ms = start_delay.as_millis() as u64,
        interval_ms = interval.as_millis() as u64,
        "ticket registry cleaner started"
    );

    let mut wait = start_delay;
    loop {
        match shutdown_rx.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        cleaner.clean();
        passes.fetch_add(1, Ordering::SeqCst);
        wait = interval;
    }

    info!("ticket registry cleaner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{InMemoryLockingStrategy, NoOpLockingStrategy};
    use crate::registry::InMemoryTicketRegistry;
    use crate::registry::contract::{service_ticket, ticket_granting};
    use chrono::Duration as ChronoDuration;
    use ticketeer_core::{ExpirationPolicy, GrantingTicket, ManualClock, Service, TicketId};

    fn setup() -> (Arc<InMemoryTicketRegistry>, Arc<ManualClock>) {
        (Arc::new(InMemoryTicketRegistry::default()), Arc::new(ManualClock::starting_now()))
    }

    #[test]
    fn removes_only_expired_tickets() {
        let (registry, clock) = setup();
        let now = clock.now();

        let mut tgt = ticket_granting("TGT-live", now);
        tgt.grant_service(TicketId::new("ST-old"), Service::new("https://app.example"), now, false);
        registry.add(tgt.into()).unwrap();
        registry.add(service_ticket("ST-old", "TGT-live", now).into()).unwrap();

        clock.advance(ChronoDuration::seconds(11));
        registry
            .add(service_ticket("ST-fresh", "TGT-live", clock.now()).into())
            .unwrap();

        let cleaner = TicketRegistryCleaner::new(registry.clone(), NoOpLockingStrategy).with_clock(clock.clone());
        assert_eq!(cleaner.clean(), 1);
        assert!(registry.get(&TicketId::new("ST-old")).unwrap().is_none());
        assert!(registry.get(&TicketId::new("ST-fresh")).unwrap().is_some());
        assert!(registry.get(&TicketId::new("TGT-live")).unwrap().is_some());
    }

    #[test]
    fn expired_session_takes_descendants_along() {
        let (registry, clock) = setup();
        let now = clock.now();

        let mut tgt = GrantingTicket::new_ticket_granting(
            TicketId::new("TGT-short"),
            ticket_granting("unused", now).authentication().clone(),
            ExpirationPolicy::hard_timeout(5),
            now,
        );
        tgt.grant_service(TicketId::new("ST-child"), Service::new("https://app.example"), now, false);
        registry.add(tgt.into()).unwrap();
        registry.add(service_ticket("ST-child", "TGT-short", now).into()).unwrap();
        registry.add(ticket_granting("TGT-other", now).into()).unwrap();

        clock.advance(ChronoDuration::seconds(6));
        let cleaner = TicketRegistryCleaner::new(registry.clone(), NoOpLockingStrategy).with_clock(clock);
        assert_eq!(cleaner.clean(), 2);
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn orphaned_child_is_reaped() {
        let (registry, clock) = setup();
        registry
            .add(service_ticket("ST-orphan", "TGT-gone", clock.now()).into())
            .unwrap();

        let cleaner = TicketRegistryCleaner::new(registry.clone(), NoOpLockingStrategy).with_clock(clock);
        assert_eq!(cleaner.clean(), 1);
        assert_eq!(registry.count().unwrap(), 0);
    }

    #[test]
    fn disabled_cleaner_does_nothing() {
        let (registry, clock) = setup();
        registry.add(service_ticket("ST-orphan", "TGT-gone", clock.now()).into()).unwrap();

        let cleaner = TicketRegistryCleaner::new(registry.clone(), NoOpLockingStrategy)
            .with_clock(clock)
            .with_enabled(false);
        assert_eq!(cleaner.clean(), 0);
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn held_lock_skips_pass_and_is_not_released() {
        let (registry, clock) = setup();
        registry.add(service_ticket("ST-orphan", "TGT-gone", clock.now()).into()).unwrap();

        let other_node = InMemoryLockingStrategy::new(std::time::Duration::from_secs(60));
        assert!(other_node.acquire().unwrap());

        let cleaner = TicketRegistryCleaner::new(registry.clone(), other_node.peer()).with_clock(clock);
        assert_eq!(cleaner.clean(), 0);
        assert_eq!(registry.count().unwrap(), 1);

        other_node.release().unwrap();
        assert_eq!(cleaner.clean(), 1);
    }

    #[test]
    fn lock_is_released_after_pass() {
        let (registry, clock) = setup();
        let lock = InMemoryLockingStrategy::new(std::time::Duration::from_secs(60));
        let peer = lock.peer();

        let cleaner = TicketRegistryCleaner::new(registry, lock).with_clock(clock);
        cleaner.clean();
        assert!(peer.acquire().unwrap());
    }

    #[test]
    fn worker_runs_until_shutdown() {
        let (registry, clock) = setup();
        registry.add(service_ticket("ST-orphan", "TGT-gone", clock.now()).into()).unwrap();

        let cleaner = TicketRegistryCleaner::new(registry.clone(), NoOpLockingStrategy).with_clock(clock);
        let handle = CleanerWorker::spawn(cleaner, Duration::ZERO, Duration::from_millis(5)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.passes() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.passes() >= 2);
        handle.shutdown();
        assert_eq!(registry.count().unwrap(), 0);
    }
}
