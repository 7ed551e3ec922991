//! Redis-backed ticket registry.
//!
//! - **Keys**: `{prefix}{encode(id)}`
//! - **Values**: `encode(json(ticket))`
//! - **Expiry**: native `EX` from the ticket's expiration policy, so Redis evicts tickets
//!   even when no cleaner runs
//! - **Atomic mutate**: `WATCH`/`MULTI`/`EXEC` with retry on conflict
//!
//! Every connection carries read/write timeouts; a timeout surfaces as
//! [`RegistryError::Unavailable`].

use std::sync::Arc;
use std::time::Duration;

use ::redis::{Commands, Connection};
use tracing::{debug, instrument};

use ticketeer_core::{Ticket, TicketId};

use super::codec::TicketCodec;
use super::{Mutation, RegistryError, TicketRegistry};
use crate::cipher::CipherExecutor;

/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "ticketeer:tickets:";

#[derive(Debug, Clone)]
pub struct RedisTicketRegistry {
    client: Arc<::redis::Client>,
    codec: TicketCodec,
    key_prefix: String,
    timeout: Duration,
}

fn unavailable(err: ::redis::RedisError) -> RegistryError {
    RegistryError::Unavailable(err.to_string())
}

impl RedisTicketRegistry {
    pub fn new(
        redis_url: impl AsRef<str>,
        cipher: Arc<dyn CipherExecutor>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = ::redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        Ok(Self {
            client: Arc::new(client),
            codec: TicketCodec::new(cipher),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout,
        })
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    fn connection(&self) -> Result<Connection, RegistryError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(unavailable)?;
        conn.set_read_timeout(Some(self.timeout)).map_err(unavailable)?;
        conn.set_write_timeout(Some(self.timeout)).map_err(unavailable)?;
        Ok(conn)
    }

    fn key(&self, id: &TicketId) -> Result<String, RegistryError> {
        Ok(format!("{}{}", self.key_prefix, self.codec.encode_id(id)?))
    }

    /// Seconds until Redis may evict the ticket; at least one.
    fn expiry_secs(ticket: &Ticket) -> Option<u64> {
        ticket.time_to_live().map(|ttl| ttl.max(1) as u64)
    }

    fn keys(&self, conn: &mut Connection) -> Result<Vec<String>, RegistryError> {
        let pattern = format!("{}*", self.key_prefix);
        let keys: Vec<String> = conn
            .scan_match::<_, String>(pattern)
            .map_err(unavailable)?
            .collect();
        Ok(keys)
    }
}

impl TicketRegistry for RedisTicketRegistry {
    #[instrument(skip(self, ticket), fields(ticket_id = %ticket.id()), err)]
    fn add(&self, ticket: Ticket) -> Result<(), RegistryError> {
        let key = self.key(ticket.id())?;
        let value = self.codec.encode_ticket(&ticket)?;
        let mut conn = self.connection()?;

        let mut cmd = ::redis::cmd("SET");
        cmd.arg(&key).arg(value);
        if let Some(secs) = Self::expiry_secs(&ticket) {
            cmd.arg("EX").arg(secs);
        }
        cmd.query::<()>(&mut conn).map_err(unavailable)
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>, RegistryError> {
        let key = self.key(id)?;
        let mut conn = self.connection()?;
        let value: Option<String> = conn.get(&key).map_err(unavailable)?;
        Ok(value.and_then(|v| self.codec.decode_ticket(id, &v)))
    }

    fn mutate(
        &self,
        id: &TicketId,
        f: &mut dyn FnMut(&mut Ticket) -> Mutation,
    ) -> Result<Option<Ticket>, RegistryError> {
        let key = self.key(id)?;
        let mut conn = self.connection()?;

        let mut outcome: Result<Option<Ticket>, RegistryError> = Ok(None);
        ::redis::transaction(&mut conn, &[&key], |con, pipe| {
            let value: Option<String> = con.get(&key)?;
            let Some(mut ticket) = value.and_then(|v| self.codec.decode_ticket(id, &v)) else {
                outcome = Ok(None);
                return Ok(Some(()));
            };

            match f(&mut ticket) {
                Mutation::Keep => {
                    let encoded = match self.codec.encode_ticket(&ticket) {
                        Ok(encoded) => encoded,
                        Err(err) => {
                            outcome = Err(err);
                            return Ok(Some(()));
                        }
                    };
                    match Self::expiry_secs(&ticket) {
                        Some(secs) => pipe.set_ex(&key, encoded, secs).ignore(),
                        None => pipe.set(&key, encoded).ignore(),
                    };
                }
                Mutation::Remove => {
                    pipe.del(&key).ignore();
                }
            }

            let committed: Option<()> = pipe.query(con)?;
            if committed.is_some() {
                outcome = Ok(Some(ticket));
            } else {
                debug!(ticket_id = %id, "concurrent ticket update, retrying");
            }
            Ok(committed)
        })
        .map_err(unavailable)?;

        outcome
    }

    fn delete(&self, id: &TicketId) -> Result<bool, RegistryError> {
        let key = self.key(id)?;
        let mut conn = self.connection()?;
        let removed: i64 = conn.del(&key).map_err(unavailable)?;
        Ok(removed > 0)
    }

    fn delete_all(&self) -> Result<usize, RegistryError> {
        let mut conn = self.connection()?;
        let keys = self.keys(&mut conn)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = conn.del(&keys).map_err(unavailable)?;
        Ok(removed.max(0) as usize)
    }

    fn scan(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>, RegistryError> {
        let mut conn = self.connection()?;
        let keys = self.keys(&mut conn)?;

        let mut matched = Vec::new();
        for key in keys {
            let value: Option<String> = conn.get(&key).map_err(unavailable)?;
            let ticket = value.and_then(|v| self.codec.decode_ticket_unchecked(&v));
            if let Some(ticket) = ticket.filter(|t| predicate(t)) {
                matched.push(ticket);
            }
        }
        Ok(matched)
    }
}
