//! Ticket registry boundary.
//!
//! Every storage backend implements [`TicketRegistry`] with identical semantics; the
//! shared [`contract`] suite runs unmodified against each of them.

pub mod codec;
pub mod in_memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(any(test, feature = "test-support"))]
pub mod contract;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use ticketeer_core::{Ticket, TicketError, TicketId, TicketKind};

pub use codec::TicketCodec;
pub use in_memory::{InMemoryRegistryConfig, InMemoryTicketRegistry};

#[cfg(feature = "redis")]
pub use self::redis::RedisTicketRegistry;

/// Registry operation error.
///
/// Infrastructure failures only; "not found" is `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Backend unreachable or timed out. Retrying may succeed.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("ticket serialization failed: {0}")]
    Serialization(String),

    #[error("registry lock poisoned")]
    Poisoned,
}

impl From<RegistryError> for TicketError {
    fn from(value: RegistryError) -> Self {
        TicketError::registry_unavailable(value.to_string())
    }
}

/// Outcome of a [`TicketRegistry::mutate`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Persist the mutated ticket.
    Keep,
    /// Delete the ticket.
    Remove,
}

/// Storage contract for tickets.
///
/// Implementations must be safe for concurrent use from many threads without external
/// locking.
pub trait TicketRegistry: Send + Sync + core::fmt::Debug {
    /// Upsert by id; last writer wins.
    fn add(&self, ticket: Ticket) -> Result<(), RegistryError>;

    /// Absent when never added, deleted, or unreadable (e.g. fails decryption).
    ///
    /// Expiry is not evaluated here.
    fn get(&self, id: &TicketId) -> Result<Option<Ticket>, RegistryError>;

    /// Like [`get`](Self::get), but a ticket of another kind is absent.
    fn get_of_kind(&self, id: &TicketId, kind: TicketKind) -> Result<Option<Ticket>, RegistryError> {
        Ok(self.get(id)?.filter(|t| t.kind() == kind))
    }

    /// Persist mutated usage metadata.
    fn update(&self, ticket: Ticket) -> Result<(), RegistryError> {
        self.add(ticket)
    }

    /// Atomically apply `f` to the stored ticket and persist or delete it.
    ///
    /// No other `mutate`, `add` or `delete` of the same id interleaves with `f`. Returns the
    /// ticket as `f` left it, or `None` (without calling `f`) when absent.
    fn mutate(
        &self,
        id: &TicketId,
        f: &mut dyn FnMut(&mut Ticket) -> Mutation,
    ) -> Result<Option<Ticket>, RegistryError>;

    /// Idempotent; whether something was removed.
    fn delete(&self, id: &TicketId) -> Result<bool, RegistryError>;

    fn delete_all(&self) -> Result<usize, RegistryError>;

    /// Every readable ticket matching `predicate`.
    fn scan(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>, RegistryError>;

    fn count(&self) -> Result<usize, RegistryError> {
        Ok(self.scan(&|_| true)?.len())
    }

    fn session_count(&self) -> Result<usize, RegistryError> {
        Ok(self.scan(&|t| t.kind() == TicketKind::TicketGranting)?.len())
    }

    fn service_ticket_count(&self) -> Result<usize, RegistryError> {
        Ok(self.scan(&|t| t.kind() == TicketKind::Service)?.len())
    }

    /// Delete `id` and, breadth-first, every ticket it issued. Returns how many were removed.
    fn delete_cascading(&self, id: &TicketId) -> Result<usize, RegistryError> {
        let mut queue = VecDeque::from([id.clone()]);
        let mut seen = HashSet::new();
        let mut removed = 0;

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(ticket) = self.get(&next)? {
                queue.extend(ticket.descendant_ids());
            }
            if self.delete(&next)? {
                removed += 1;
            }
        }

        debug!(ticket_id = %id, removed, "deleted ticket tree");
        Ok(removed)
    }
}

impl<R> TicketRegistry for Arc<R>
where
    R: TicketRegistry + ?Sized,
{
    fn add(&self, ticket: Ticket) -> Result<(), RegistryError> {
        (**self).add(ticket)
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>, RegistryError> {
        (**self).get(id)
    }

    fn get_of_kind(&self, id: &TicketId, kind: TicketKind) -> Result<Option<Ticket>, RegistryError> {
        (**self).get_of_kind(id, kind)
    }

    fn update(&self, ticket: Ticket) -> Result<(), RegistryError> {
        (**self).update(ticket)
    }

    fn mutate(
        &self,
        id: &TicketId,
        f: &mut dyn FnMut(&mut Ticket) -> Mutation,
    ) -> Result<Option<Ticket>, RegistryError> {
        (**self).mutate(id, f)
    }

    fn delete(&self, id: &TicketId) -> Result<bool, RegistryError> {
        (**self).delete(id)
    }

    fn delete_all(&self) -> Result<usize, RegistryError> {
        (**self).delete_all()
    }

    fn scan(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>, RegistryError> {
        (**self).scan(predicate)
    }

    fn count(&self) -> Result<usize, RegistryError> {
        (**self).count()
    }

    fn delete_cascading(&self, id: &TicketId) -> Result<usize, RegistryError> {
        (**self).delete_cascading(id)
    }
}

/// Upper bound on parent hops; chains are short in practice.
const MAX_CHAIN_DEPTH: usize = 32;

/// Whether `ticket`, or any granting ticket above it, is expired or gone.
pub fn is_expired_with_ancestors<R>(
    registry: &R,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> Result<bool, RegistryError>
where
    R: TicketRegistry + ?Sized,
{
    if ticket.is_expired(now) {
        return Ok(true);
    }

    let mut parent_id = ticket.granting_ticket_id().cloned();
    let mut depth = 0;
    while let Some(id) = parent_id {
        depth += 1;
        if depth > MAX_CHAIN_DEPTH {
            return Ok(true);
        }
        let Some(parent) = registry.get(&id)? else {
            return Ok(true);
        };
        if parent.is_expired(now) {
            return Ok(true);
        }
        parent_id = parent.granting_ticket_id().cloned();
    }
    Ok(false)
}
