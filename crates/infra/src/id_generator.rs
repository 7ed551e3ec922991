//! Host-discriminated unique ticket id generator.
//!
//! Layout: `{prefix}-{counter}-{random}-{host}`. The counter is base36, the random part
//! is alphanumeric from the thread-local CSPRNG and fills the remaining length.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;

use ticketeer_core::{PROXY_GRANTING_TICKET_IOU_PREFIX, UniqueTicketIdGenerator};

/// Least amount of randomness in any id.
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Width of `u64::MAX` in base36.
const MAX_COUNTER_LENGTH: usize = 13;

const SEPARATORS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdGeneratorError {
    #[error("max length {max_length} cannot hold prefix, counter, host '{host}' and {MIN_RANDOM_LENGTH} random characters (need {required})")]
    MaxLengthTooSmall {
        max_length: usize,
        required: usize,
        host: String,
    },

    #[error("host discriminator is empty")]
    EmptyHost,
}

#[derive(Debug)]
pub struct HostNameBasedUniqueTicketIdGenerator {
    max_length: usize,
    host: String,
    counter: AtomicU64,
}

impl HostNameBasedUniqueTicketIdGenerator {
    /// Fails when `max_length` cannot fit the longest ticket prefix, a full counter, the
    /// host and [`MIN_RANDOM_LENGTH`] random characters.
    pub fn new(max_length: usize, host_name: &str) -> Result<Self, IdGeneratorError> {
        let host = sanitize_host(host_name);
        if host.is_empty() {
            return Err(IdGeneratorError::EmptyHost);
        }

        let required = Self::overhead(PROXY_GRANTING_TICKET_IOU_PREFIX.len(), MAX_COUNTER_LENGTH, &host)
            + MIN_RANDOM_LENGTH;
        if max_length < required {
            return Err(IdGeneratorError::MaxLengthTooSmall {
                max_length,
                required,
                host,
            });
        }

        Ok(Self {
            max_length,
            host,
            counter: AtomicU64::new(1),
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn overhead(prefix_len: usize, counter_len: usize, host: &str) -> usize {
        prefix_len + counter_len + host.len() + SEPARATORS
    }
}

impl UniqueTicketIdGenerator for HostNameBasedUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let counter = to_base36(self.counter.fetch_add(1, Ordering::Relaxed));
        let overhead = Self::overhead(prefix.len(), counter.len(), &self.host);
        let random_len = self
            .max_length
            .saturating_sub(overhead)
            .max(MIN_RANDOM_LENGTH);

        let random: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(random_len)
            .map(char::from)
            .collect();

        format!("{prefix}-{counter}-{random}-{}", self.host)
    }
}

/// Keep the characters that are safe in URLs and ids; `-` separates id parts.
fn sanitize_host(host_name: &str) -> String {
    host_name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(MAX_COUNTER_LENGTH);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use ticketeer_core::TicketKind;

    #[test]
    fn ids_are_prefixed_and_host_discriminated() {
        let generator = HostNameBasedUniqueTicketIdGenerator::new(64, "node-1.example").unwrap();
        let id = generator.new_ticket_id("ST");

        assert!(id.starts_with("ST-1-"));
        assert!(id.ends_with("-node1.example"));
        assert_eq!(id.len(), 64);
        assert_eq!(
            ticketeer_core::TicketId::new(id).advertised_kind(),
            Some(TicketKind::Service)
        );
    }

    #[test]
    fn ids_are_unique() {
        let generator = HostNameBasedUniqueTicketIdGenerator::new(64, "localhost").unwrap();
        let ids: HashSet<_> = (0..10_000).map(|_| generator.new_ticket_id("TGT")).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn too_short_max_length_fails_at_construction() {
        let err = HostNameBasedUniqueTicketIdGenerator::new(30, "localhost").unwrap_err();
        assert!(matches!(err, IdGeneratorError::MaxLengthTooSmall { .. }));
        assert_eq!(
            HostNameBasedUniqueTicketIdGenerator::new(64, "--").unwrap_err(),
            IdGeneratorError::EmptyHost
        );
    }

    #[test]
    fn base36_counter() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u64::MAX).len(), MAX_COUNTER_LENGTH);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 200,
                ..ProptestConfig::default()
            })]

            #[test]
            fn ids_respect_max_length(
                max_length in 48usize..200,
                host in "[a-z0-9]{1,10}",
                prefix in prop::sample::select(vec!["TGT", "ST", "PGT", "PT", "PGTIOU"]),
            ) {
                let generator = HostNameBasedUniqueTicketIdGenerator::new(max_length, &host).unwrap();
                let id = generator.new_ticket_id(prefix);
                prop_assert!(id.len() <= max_length);
                prop_assert!(id.starts_with(prefix));
            }
        }
    }
}
