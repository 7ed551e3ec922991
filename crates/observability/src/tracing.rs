//! Tracing subscriber initialization.
//!
//! `RUST_LOG` selects the filter (default `info`); `TICKETEER_LOG_FORMAT` picks
//! `json` (default) or `pretty` output.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_VAR: &str = "TICKETEER_LOG_FORMAT";

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("unknown log format '{0}', expected 'json' or 'pretty'")]
    UnknownFormat(String),

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(ObservabilityError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObservabilityError> {
        let mut config = Self::default();
        if let Some(filter) = lookup(EnvFilter::DEFAULT_ENV).filter(|f| !f.trim().is_empty()) {
            config.filter = filter;
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR) {
            config.format = format.parse()?;
        }
        Ok(config)
    }
}

/// Install the global subscriber described by `config`.
pub fn try_init(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ObservabilityError::Filter(e.to_string()))?;

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
    installed.map_err(|_| ObservabilityError::AlreadyInitialized)
}

/// Initialize from the environment, falling back to defaults on a bad setting.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let config = LogConfig::from_env().unwrap_or_else(|err| {
        eprintln!("ticketeer: {err}; using default logging");
        LogConfig::default()
    });
    let config = if EnvFilter::try_new(&config.filter).is_ok() {
        config
    } else {
        eprintln!("ticketeer: invalid RUST_LOG '{}'; using 'info'", config.filter);
        LogConfig {
            filter: "info".to_string(),
            ..config
        }
    };
    let _ = try_init(&config);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn defaults_to_json_at_info() {
        let config = LogConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn reads_filter_and_format() {
        let config =
            LogConfig::from_lookup(lookup(&[("RUST_LOG", "ticketeer_cas=debug"), (LOG_FORMAT_VAR, "Pretty")])).unwrap();
        assert_eq!(config.filter, "ticketeer_cas=debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = LogConfig::from_lookup(lookup(&[(LOG_FORMAT_VAR, "xml")])).unwrap_err();
        assert!(matches!(err, ObservabilityError::UnknownFormat(f) if f == "xml"));
    }

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
        assert!(matches!(
            try_init(&LogConfig::default()),
            Err(ObservabilityError::AlreadyInitialized)
        ));
    }
}
