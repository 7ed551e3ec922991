//! `ticketeer-core`: ticket domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): ticket
//! identifiers, the four ticket kinds, usage state, expiration policies and the
//! caller-facing error taxonomy.

pub mod authentication;
pub mod clock;
pub mod error;
pub mod expiration;
pub mod id;
pub mod service;
pub mod state;
pub mod ticket;

pub use authentication::{
    Attributes, Authentication, AuthenticationFailure, AuthenticationResult, Principal,
    REMEMBER_ME_ATTRIBUTE,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{TicketError, TicketResult};
pub use expiration::ExpirationPolicy;
pub use id::{PROXY_GRANTING_TICKET_IOU_PREFIX, TicketId, TicketKind, UniqueTicketIdGenerator};
pub use service::{AccessStrategy, LogoutType, ProxyPolicy, RegisteredService, Service};
pub use state::TicketState;
pub use ticket::{GrantingTicket, ServiceTicket, Ticket};
