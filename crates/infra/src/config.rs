//! Runtime settings and the wiring built from them.
//!
//! Every value has a default; [`Settings::from_env`] overrides them from `TICKETEER_*`
//! environment variables.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ticketeer_core::{ExpirationPolicy, TicketKind, UniqueTicketIdGenerator};

use crate::cipher::{AesGcmCipherExecutor, CipherExecutor, CipherKeys, NoOpCipherExecutor};
use crate::factory::{
    DefaultTicketFactory, ProxyGrantingTicketFactory, ProxyTicketFactory, ServiceTicketFactory,
    TicketGrantingTicketFactory, raw_id_budget,
};
use crate::id_generator::HostNameBasedUniqueTicketIdGenerator;
use crate::registry::{InMemoryRegistryConfig, InMemoryTicketRegistry};

const ENV_PREFIX: &str = "TICKETEER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RememberMeSettings {
    pub enabled: bool,
    pub time_to_kill_secs: i64,
}

impl Default for RememberMeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            time_to_kill_secs: 1_209_600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottledSettings {
    pub time_to_kill_secs: i64,
    pub time_in_between_uses_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketGrantingSettings {
    pub max_length: usize,
    /// Negative together with `time_to_kill_secs` means sessions never expire.
    pub max_time_to_live_secs: i64,
    pub time_to_kill_secs: i64,
    pub remember_me: RememberMeSettings,
    pub hard_timeout_secs: Option<i64>,
    pub idle_timeout_secs: Option<i64>,
    pub throttled: Option<ThrottledSettings>,
    pub only_track_most_recent_session: bool,
}

impl Default for TicketGrantingSettings {
    fn default() -> Self {
        Self {
            max_length: 128,
            max_time_to_live_secs: 28_800,
            time_to_kill_secs: 7_200,
            remember_me: RememberMeSettings::default(),
            hard_timeout_secs: None,
            idle_timeout_secs: None,
            throttled: None,
            only_track_most_recent_session: false,
        }
    }
}

/// Service and proxy tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTicketSettings {
    pub max_length: usize,
    pub number_of_uses: u32,
    pub time_to_kill_secs: i64,
}

impl Default for ServiceTicketSettings {
    fn default() -> Self {
        Self {
            max_length: 64,
            number_of_uses: 1,
            time_to_kill_secs: 10,
        }
    }
}

impl ServiceTicketSettings {
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_use_or_timeout(self.number_of_uses, self.time_to_kill_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyGrantingSettings {
    pub max_length: usize,
}

impl Default for ProxyGrantingSettings {
    fn default() -> Self {
        Self { max_length: 128 }
    }
}

/// Cipher switch plus optional base64url keys; missing keys are generated at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoSettings {
    pub enabled: bool,
    pub encryption_key: Option<String>,
    pub signing_key: Option<String>,
}

impl CryptoSettings {
    pub fn cipher(&self, name: &str) -> anyhow::Result<Arc<dyn CipherExecutor>> {
        if !self.enabled {
            return Ok(Arc::new(NoOpCipherExecutor));
        }
        let keys = match (&self.encryption_key, &self.signing_key) {
            (Some(encryption), Some(signing)) => CipherKeys::from_encoded(encryption, signing)
                .with_context(|| format!("invalid {name} cipher keys"))?,
            (None, None) => {
                warn!(
                    cipher = name,
                    "no cipher keys configured, generated ephemeral keys; protected values \
                     will not survive a restart or be readable by other nodes"
                );
                CipherKeys::generate()
            }
            _ => bail!("{name} cipher needs both an encryption and a signing key"),
        };
        Ok(Arc::new(AesGcmCipherExecutor::new(name, keys)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub in_memory: InMemoryRegistryConfig,
    pub crypto: CryptoSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerSettings {
    pub enabled: bool,
    pub start_delay_secs: u64,
    pub repeat_interval_secs: u64,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_secs: 20,
            repeat_interval_secs: 120,
        }
    }
}

impl CleanerSettings {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_secs(self.repeat_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: Option<String>,
    pub timeout_millis: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_millis: 2_000,
        }
    }
}

impl RedisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host discriminator embedded in generated ids.
    pub host_name: String,
    pub tgt: TicketGrantingSettings,
    pub st: ServiceTicketSettings,
    pub pgt: ProxyGrantingSettings,
    pub pt: ServiceTicketSettings,
    pub registry: RegistrySettings,
    /// Protection of protocol-visible ticket ids.
    pub security: CryptoSettings,
    pub cleaner: CleanerSettings,
    pub redis: RedisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            tgt: TicketGrantingSettings::default(),
            st: ServiceTicketSettings::default(),
            pgt: ProxyGrantingSettings::default(),
            pt: ServiceTicketSettings::default(),
            registry: RegistrySettings::default(),
            security: CryptoSettings::default(),
            cleaner: CleanerSettings::default(),
            redis: RedisSettings::default(),
        }
    }
}

/// Parse `TICKETEER_{key}` when set.
fn read<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{ENV_PREFIX}{key}");
    match lookup(&name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        _ => Ok(None),
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut s = Settings::default();
        let l = &lookup;

        match read::<String>(l, "HOST_NAME")? {
            Some(host) => s.host_name = host,
            None => set(&mut s.host_name, lookup("HOSTNAME").filter(|h| !h.trim().is_empty())),
        }

        set(&mut s.tgt.max_length, read(l, "TGT_MAX_LENGTH")?);
        set(&mut s.tgt.max_time_to_live_secs, read(l, "TGT_MAX_TIME_TO_LIVE_SECS")?);
        set(&mut s.tgt.time_to_kill_secs, read(l, "TGT_TIME_TO_KILL_SECS")?);
        set(&mut s.tgt.remember_me.enabled, read(l, "TGT_REMEMBER_ME_ENABLED")?);
        set(
            &mut s.tgt.remember_me.time_to_kill_secs,
            read(l, "TGT_REMEMBER_ME_TIME_TO_KILL_SECS")?,
        );
        s.tgt.hard_timeout_secs = read(l, "TGT_HARD_TIMEOUT_SECS")?;
        s.tgt.idle_timeout_secs = read(l, "TGT_IDLE_TIMEOUT_SECS")?;
        s.tgt.throttled = match (
            read(l, "TGT_THROTTLED_TIME_TO_KILL_SECS")?,
            read(l, "TGT_THROTTLED_TIME_IN_BETWEEN_USES_SECS")?,
        ) {
            (Some(time_to_kill_secs), Some(time_in_between_uses_secs)) => Some(ThrottledSettings {
                time_to_kill_secs,
                time_in_between_uses_secs,
            }),
            (None, None) => None,
            _ => bail!("throttled session expiry needs both a time to kill and a time between uses"),
        };
        set(
            &mut s.tgt.only_track_most_recent_session,
            read(l, "TGT_ONLY_TRACK_MOST_RECENT_SESSION")?,
        );

        for (target, kind) in [(&mut s.st, "ST"), (&mut s.pt, "PT")] {
            set(&mut target.max_length, read(l, &format!("{kind}_MAX_LENGTH"))?);
            set(&mut target.number_of_uses, read(l, &format!("{kind}_NUMBER_OF_USES"))?);
            set(&mut target.time_to_kill_secs, read(l, &format!("{kind}_TIME_TO_KILL_SECS"))?);
        }
        set(&mut s.pgt.max_length, read(l, "PGT_MAX_LENGTH")?);

        let mem = &mut s.registry.in_memory;
        set(&mut mem.initial_capacity, read(l, "REGISTRY_INITIAL_CAPACITY")?);
        set(&mut mem.load_factor, read(l, "REGISTRY_LOAD_FACTOR")?);
        if !(mem.load_factor.is_finite() && mem.load_factor > 0.0) {
            bail!(
                "{ENV_PREFIX}REGISTRY_LOAD_FACTOR must be a positive number, got {}",
                mem.load_factor
            );
        }
        set(&mut mem.concurrency, read(l, "REGISTRY_CONCURRENCY")?);

        for (target, key) in [
            (&mut s.registry.crypto, "REGISTRY_CRYPTO"),
            (&mut s.security, "SECURITY_CIPHER"),
        ] {
            set(&mut target.enabled, read(l, &format!("{key}_ENABLED"))?);
            target.encryption_key = read(l, &format!("{key}_ENCRYPTION_KEY"))?;
            target.signing_key = read(l, &format!("{key}_SIGNING_KEY"))?;
        }

        set(&mut s.cleaner.enabled, read(l, "CLEANER_ENABLED")?);
        set(&mut s.cleaner.start_delay_secs, read(l, "CLEANER_START_DELAY_SECS")?);
        set(&mut s.cleaner.repeat_interval_secs, read(l, "CLEANER_REPEAT_INTERVAL_SECS")?);

        s.redis.url = read(l, "REDIS_URL")?;
        set(&mut s.redis.timeout_millis, read(l, "REDIS_TIMEOUT_MILLIS")?);

        Ok(s)
    }

    /// Session expiry, picked in this order: never, idle timeout, max-life plus idle,
    /// throttled, hard timeout, always. Remember-me logins get their own hard timeout
    /// when enabled.
    pub fn ticket_granting_expiration_policy(&self) -> ExpirationPolicy {
        let tgt = &self.tgt;
        let session = if tgt.max_time_to_live_secs < 0 && tgt.time_to_kill_secs < 0 {
            ExpirationPolicy::NeverExpires
        } else if let Some(idle) = tgt.idle_timeout_secs.filter(|s| *s > 0) {
            ExpirationPolicy::timeout(idle)
        } else if tgt.max_time_to_live_secs > 0 && tgt.time_to_kill_secs > 0 {
            ExpirationPolicy::ticket_granting(tgt.max_time_to_live_secs, tgt.time_to_kill_secs)
        } else if let Some(t) = tgt
            .throttled
            .filter(|t| t.time_to_kill_secs > 0 && t.time_in_between_uses_secs > 0)
        {
            ExpirationPolicy::throttled(t.time_to_kill_secs, t.time_in_between_uses_secs)
        } else if let Some(hard) = tgt.hard_timeout_secs.filter(|s| *s > 0) {
            ExpirationPolicy::hard_timeout(hard)
        } else {
            ExpirationPolicy::AlwaysExpires
        };

        if tgt.remember_me.enabled {
            ExpirationPolicy::remember_me_delegating(
                session,
                ExpirationPolicy::hard_timeout(tgt.remember_me.time_to_kill_secs),
            )
        } else {
            session
        }
    }

    /// Proxy-granting tickets live as long as sessions, without remember-me.
    pub fn proxy_granting_expiration_policy(&self) -> ExpirationPolicy {
        match self.ticket_granting_expiration_policy() {
            ExpirationPolicy::RememberMeDelegating { session, .. } => *session,
            policy => policy,
        }
    }

    pub fn protocol_cipher(&self) -> anyhow::Result<Arc<dyn CipherExecutor>> {
        self.security.cipher("protocol")
    }

    pub fn registry_cipher(&self) -> anyhow::Result<Arc<dyn CipherExecutor>> {
        self.registry.crypto.cipher("registry")
    }

    /// Factories for every ticket kind, sharing one protocol cipher.
    pub fn ticket_factory(&self) -> anyhow::Result<DefaultTicketFactory> {
        self.ticket_factory_with_cipher(self.protocol_cipher()?)
    }

    /// Fails when a configured `max_length` cannot hold an id of its kind, protected by
    /// `cipher` when it is enabled.
    pub fn ticket_factory_with_cipher(
        &self,
        cipher: Arc<dyn CipherExecutor>,
    ) -> anyhow::Result<DefaultTicketFactory> {
        let track_recent = self.tgt.only_track_most_recent_session;
        let generator = |kind: TicketKind, max_length: usize, setting: &str| {
            self.kind_id_generator(cipher.as_ref(), kind, max_length, setting)
        };
        Ok(DefaultTicketFactory {
            ticket_granting: TicketGrantingTicketFactory::new(
                generator(TicketKind::TicketGranting, self.tgt.max_length, "TGT_MAX_LENGTH")?,
                self.ticket_granting_expiration_policy(),
                cipher.clone(),
            ),
            service: ServiceTicketFactory::new(
                generator(TicketKind::Service, self.st.max_length, "ST_MAX_LENGTH")?,
                self.st.expiration_policy(),
                cipher.clone(),
                track_recent,
            ),
            proxy_granting: ProxyGrantingTicketFactory::new(
                generator(TicketKind::ProxyGranting, self.pgt.max_length, "PGT_MAX_LENGTH")?,
                self.proxy_granting_expiration_policy(),
                cipher.clone(),
            ),
            proxy: ProxyTicketFactory::new(
                generator(TicketKind::Proxy, self.pt.max_length, "PT_MAX_LENGTH")?,
                self.pt.expiration_policy(),
                cipher.clone(),
                track_recent,
            ),
        })
    }

    fn kind_id_generator(
        &self,
        cipher: &dyn CipherExecutor,
        kind: TicketKind,
        max_length: usize,
        setting: &str,
    ) -> anyhow::Result<Arc<dyn UniqueTicketIdGenerator>> {
        let raw_length = raw_id_budget(cipher, kind, max_length);
        let generator = HostNameBasedUniqueTicketIdGenerator::new(raw_length, &self.host_name).with_context(|| {
            if cipher.is_enabled() {
                format!("{ENV_PREFIX}{setting}={max_length} is too short for protected {kind} ids")
            } else {
                format!("invalid {ENV_PREFIX}{setting}={max_length}")
            }
        })?;
        Ok(Arc::new(generator))
    }

    pub fn in_memory_registry(&self) -> anyhow::Result<InMemoryTicketRegistry> {
        Ok(InMemoryTicketRegistry::with_cipher(
            self.registry.in_memory,
            self.registry_cipher()?,
        ))
    }

    #[cfg(feature = "redis")]
    pub fn redis_registry(&self) -> anyhow::Result<crate::registry::RedisTicketRegistry> {
        let url = self
            .redis
            .url
            .as_deref()
            .context("TICKETEER_REDIS_URL is required for the redis registry")?;
        crate::registry::RedisTicketRegistry::new(url, self.registry_cipher()?, self.redis.timeout())
            .context("failed to configure redis ticket registry")
    }
}
