//! Registry-side encoding of ticket keys and payloads.
//!
//! With an enabled cipher, keys are `encode(id)` (deterministic) and values are
//! `encode(json(ticket))`. Values that fail to decode, or that decode to a ticket with a
//! different id than requested, are treated as absent.

use std::sync::Arc;

use tracing::warn;

use ticketeer_core::{Ticket, TicketId};

use super::RegistryError;
use crate::cipher::{CipherExecutor, NoOpCipherExecutor};

#[derive(Debug, Clone)]
pub struct TicketCodec {
    cipher: Arc<dyn CipherExecutor>,
}

impl Default for TicketCodec {
    fn default() -> Self {
        Self::new(Arc::new(NoOpCipherExecutor))
    }
}

impl TicketCodec {
    pub fn new(cipher: Arc<dyn CipherExecutor>) -> Self {
        Self { cipher }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_enabled()
    }

    pub fn encode_id(&self, id: &TicketId) -> Result<String, RegistryError> {
        self.cipher
            .encode(id.as_str())
            .map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    pub fn encode_ticket(&self, ticket: &Ticket) -> Result<String, RegistryError> {
        let json =
            serde_json::to_string(ticket).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        self.cipher
            .encode(&json)
            .map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    /// `None` when the payload cannot be trusted or read, or belongs to another id.
    pub fn decode_ticket(&self, expected: &TicketId, encoded: &str) -> Option<Ticket> {
        let ticket = self.decode_ticket_unchecked(encoded)?;
        if ticket.id() != expected {
            warn!("registry entry does not belong to its key");
            return None;
        }
        Some(ticket)
    }

    /// Decode a payload found without knowing its id (scans).
    pub fn decode_ticket_unchecked(&self, encoded: &str) -> Option<Ticket> {
        let json = match self.cipher.decode(encoded) {
            Ok(json) => json,
            Err(err) => {
                warn!(cipher = self.cipher.name(), error = %err, "dropping undecodable registry entry");
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                warn!(error = %err, "dropping unreadable registry entry");
                None
            }
        }
    }
}
