//! Ticket identifiers and kinds.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::TicketError;

/// Prefix of the opaque IOU handed to a proxy callback alongside a new PGT.
pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";

/// The four ticket kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    TicketGranting,
    Service,
    ProxyGranting,
    Proxy,
}

impl TicketKind {
    pub const ALL: [TicketKind; 4] = [
        TicketKind::TicketGranting,
        TicketKind::Service,
        TicketKind::ProxyGranting,
        TicketKind::Proxy,
    ];

    /// Kind-specific tag every identifier of this kind starts with.
    pub fn prefix(self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "TGT",
            TicketKind::Service => "ST",
            TicketKind::ProxyGranting => "PGT",
            TicketKind::Proxy => "PT",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// Granting tickets (TGT/PGT) are roots for further tickets.
    pub fn is_granting(self) -> bool {
        matches!(self, TicketKind::TicketGranting | TicketKind::ProxyGranting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "ticket_granting",
            TicketKind::Service => "service",
            TicketKind::ProxyGranting => "proxy_granting",
            TicketKind::Proxy => "proxy",
        }
    }
}

impl core::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, never-reused ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading tag up to the first `-`, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once('-').map(|(prefix, _)| prefix)
    }

    /// Kind advertised by the identifier's prefix.
    ///
    /// Routing/logging hint only; registries check the stored ticket's kind.
    pub fn advertised_kind(&self) -> Option<TicketKind> {
        self.prefix().and_then(TicketKind::from_prefix)
    }
}

impl core::fmt::Display for TicketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for TicketId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for TicketId {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TicketError::InvalidTicket(TicketId::new(s)));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Source of unique, prefixed, unguessable identifiers.
pub trait UniqueTicketIdGenerator: Send + Sync + core::fmt::Debug {
    /// Produce a fresh identifier starting with `prefix`.
    fn new_ticket_id(&self, prefix: &str) -> String;
}

impl<G> UniqueTicketIdGenerator for std::sync::Arc<G>
where
    G: UniqueTicketIdGenerator + ?Sized,
{
    fn new_ticket_id(&self, prefix: &str) -> String {
        (**self).new_ticket_id(prefix)
    }
}
