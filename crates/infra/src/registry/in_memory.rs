use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use ticketeer_core::{Ticket, TicketId};

use super::codec::TicketCodec;
use super::{Mutation, RegistryError, TicketRegistry};
use crate::cipher::CipherExecutor;

/// Sizing of the in-memory map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InMemoryRegistryConfig {
    pub initial_capacity: usize,
    pub load_factor: f32,
    /// Number of independently locked shards.
    pub concurrency: usize,
}

impl Default for InMemoryRegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1000,
            load_factor: 1.0,
            concurrency: 20,
        }
    }
}

/// Upper bound on shards, however high the configured concurrency.
const MAX_SHARDS: usize = 1024;

/// Upper bound on entries preallocated across all shards; maps still grow past it.
const MAX_PREALLOCATED: usize = 1 << 14;

impl InMemoryRegistryConfig {
    fn shard_count(&self) -> usize {
        self.concurrency.clamp(1, MAX_SHARDS)
    }

    fn shard_capacity(&self) -> usize {
        let shards = self.shard_count() as f32;
        let load_factor = if self.load_factor.is_finite() && self.load_factor > 0.0 {
            self.load_factor
        } else {
            1.0
        };
        let wanted = (self.initial_capacity as f32 / load_factor / shards).ceil();
        (wanted as usize).min(MAX_PREALLOCATED / self.shard_count())
    }
}

/// What a shard holds for one key.
#[derive(Debug, Clone)]
enum StoredTicket {
    Plain(Ticket),
    Encoded(String),
}

/// Process-local registry.
///
/// Tickets do not survive a restart; with it, every SSO session is lost.
#[derive(Debug)]
pub struct InMemoryTicketRegistry {
    shards: Vec<RwLock<HashMap<String, StoredTicket>>>,
    hasher: RandomState,
    codec: TicketCodec,
}

impl Default for InMemoryTicketRegistry {
    fn default() -> Self {
        Self::new(InMemoryRegistryConfig::default())
    }
}

impl InMemoryTicketRegistry {
    pub fn new(config: InMemoryRegistryConfig) -> Self {
        Self::with_codec(config, TicketCodec::default())
    }

    pub fn with_cipher(config: InMemoryRegistryConfig, cipher: Arc<dyn CipherExecutor>) -> Self {
        Self::with_codec(config, TicketCodec::new(cipher))
    }

    fn with_codec(config: InMemoryRegistryConfig, codec: TicketCodec) -> Self {
        warn!(
            shards = config.shard_count(),
            "in-memory ticket registry in use: tickets are lost on restart and single sign-on \
             degrades to per-process sessions"
        );
        let capacity = config.shard_capacity();
        let shards = (0..config.shard_count())
            .map(|_| RwLock::new(HashMap::with_capacity(capacity)))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            codec,
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, StoredTicket>> {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn read(
        shard: &RwLock<HashMap<String, StoredTicket>>,
    ) -> Result<RwLockReadGuard<'_, HashMap<String, StoredTicket>>, RegistryError> {
        shard.read().map_err(|_| RegistryError::Poisoned)
    }

    fn write(
        shard: &RwLock<HashMap<String, StoredTicket>>,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredTicket>>, RegistryError> {
        shard.write().map_err(|_| RegistryError::Poisoned)
    }

    fn store(&self, ticket: Ticket) -> Result<StoredTicket, RegistryError> {
        if self.codec.is_enabled() {
            Ok(StoredTicket::Encoded(self.codec.encode_ticket(&ticket)?))
        } else {
            Ok(StoredTicket::Plain(ticket))
        }
    }

    fn load(&self, id: &TicketId, stored: &StoredTicket) -> Option<Ticket> {
        match stored {
            StoredTicket::Plain(ticket) => Some(ticket.clone()),
            StoredTicket::Encoded(value) => self.codec.decode_ticket(id, value),
        }
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    fn add(&self, ticket: Ticket) -> Result<(), RegistryError> {
        let key = self.codec.encode_id(ticket.id())?;
        let stored = self.store(ticket)?;
        Self::write(self.shard_for(&key))?.insert(key, stored);
        Ok(())
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>, RegistryError> {
        let key = self.codec.encode_id(id)?;
        let shard = Self::read(self.shard_for(&key))?;
        Ok(shard.get(&key).and_then(|stored| self.load(id, stored)))
    }

    fn mutate(
        &self,
        id: &TicketId,
        f: &mut dyn FnMut(&mut Ticket) -> Mutation,
    ) -> Result<Option<Ticket>, RegistryError> {
        let key = self.codec.encode_id(id)?;
        let mut shard = Self::write(self.shard_for(&key))?;

        let Some(mut ticket) = shard.get(&key).and_then(|stored| self.load(id, stored)) else {
            return Ok(None);
        };

        match f(&mut ticket) {
            Mutation::Keep => {
                let stored = self.store(ticket.clone())?;
                shard.insert(key, stored);
            }
            Mutation::Remove => {
                shard.remove(&key);
            }
        }
        Ok(Some(ticket))
    }

    fn delete(&self, id: &TicketId) -> Result<bool, RegistryError> {
        let key = self.codec.encode_id(id)?;
        Ok(Self::write(self.shard_for(&key))?.remove(&key).is_some())
    }

    fn delete_all(&self) -> Result<usize, RegistryError> {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = Self::write(shard)?;
            removed += shard.len();
            shard.clear();
        }
        Ok(removed)
    }

    fn scan(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>, RegistryError> {
        let mut matched = Vec::new();
        for shard in &self.shards {
            let shard = Self::read(shard)?;
            for stored in shard.values() {
                let ticket = match stored {
                    StoredTicket::Plain(ticket) => Some(ticket.clone()),
                    // No plain id to compare against in a scan.
                    StoredTicket::Encoded(value) => self.codec.decode_ticket_unchecked(value),
                };
                if let Some(ticket) = ticket.filter(|t| predicate(t)) {
                    matched.push(ticket);
                }
            }
        }
        Ok(matched)
    }

    fn count(&self) -> Result<usize, RegistryError> {
        let mut total = 0;
        for shard in &self.shards {
            total += Self::read(shard)?.len();
        }
        Ok(total)
    }
}
