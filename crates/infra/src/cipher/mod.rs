//! Cipher executors protecting ticket identifiers and registry payloads.
//!
//! An executor is injected per use site (protocol ids, each registry backend), so two
//! backends can run with different keys.

pub mod aes;

use std::sync::Arc;

use thiserror::Error;

pub use aes::{AesGcmCipherExecutor, CipherKeys};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("malformed cipher text")]
    Malformed,

    #[error("cipher text failed integrity check")]
    Tampered,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,
}

pub trait CipherExecutor: Send + Sync + core::fmt::Debug {
    fn name(&self) -> &str;

    /// Whether `encode` changes its input at all.
    fn is_enabled(&self) -> bool {
        true
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError>;

    /// Length of what `encode` returns for a plain text of `plain_len` bytes.
    fn encoded_len(&self, plain_len: usize) -> usize {
        plain_len
    }

    /// Recover the plain text. Any tampering or foreign input is an error.
    fn decode(&self, encoded: &str) -> Result<String, CipherError>;
}

impl<C> CipherExecutor for Arc<C>
where
    C: CipherExecutor + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        (**self).encode(plain)
    }

    fn encoded_len(&self, plain_len: usize) -> usize {
        (**self).encoded_len(plain_len)
    }

    fn decode(&self, encoded: &str) -> Result<String, CipherError> {
        (**self).decode(encoded)
    }
}

/// Passthrough used when protection is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCipherExecutor;

impl CipherExecutor for NoOpCipherExecutor {
    fn name(&self) -> &str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        Ok(plain.to_string())
    }

    fn decode(&self, encoded: &str) -> Result<String, CipherError> {
        Ok(encoded.to_string())
    }
}
