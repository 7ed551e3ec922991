//! Infrastructure layer: ticket storage, id generation, ciphers, factories, cleanup and
//! configuration.

pub mod cipher;
pub mod cleaner;
pub mod config;
pub mod factory;
pub mod id_generator;
pub mod lock;
pub mod registry;

pub use cipher::{AesGcmCipherExecutor, CipherError, CipherExecutor, CipherKeys, NoOpCipherExecutor};
pub use cleaner::{CleanerHandle, CleanerWorker, TicketRegistryCleaner};
pub use config::Settings;
pub use factory::{
    DefaultTicketFactory, ProxyGrantingTicketFactory, ProxyTicketFactory, ServiceTicketFactory,
    TicketGrantingTicketFactory, raw_id_budget, verify_ticket_authenticity,
};
pub use id_generator::{HostNameBasedUniqueTicketIdGenerator, IdGeneratorError};
pub use lock::{InMemoryLockingStrategy, LockError, LockingStrategy, NoOpLockingStrategy};
pub use registry::{
    InMemoryRegistryConfig, InMemoryTicketRegistry, Mutation, RegistryError, TicketRegistry,
    is_expired_with_ancestors,
};
