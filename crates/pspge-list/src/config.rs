//! Runtime configuration.
//!
//! Values come from [`GeConfig::default`], a JSON document (the `serde` impl), or the process
//! environment via [`GeConfig::from_env`].

use serde::Deserialize;
use thiserror::Error;

pub const LIST_COUNT_ENV: &str = "PSPGE_LIST_COUNT";
pub const SYNC_TIMEOUT_MS_ENV: &str = "PSPGE_SYNC_TIMEOUT_MS";
pub const EXTERNAL_BACKEND_ENV: &str = "PSPGE_EXTERNAL_BACKEND";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeConfig {
    /// Number of pooled list slots.
    pub list_count: usize,
    /// How long the builtin engine waits at a stall address before giving control back.
    pub sync_timeout_ms: u64,
    /// Route lists to the external backend instead of the builtin engine.
    pub external_backend: bool,
}

impl Default for GeConfig {
    fn default() -> Self {
        Self {
            list_count: Self::DEFAULT_LIST_COUNT,
            sync_timeout_ms: Self::DEFAULT_SYNC_TIMEOUT_MS,
            external_backend: false,
        }
    }
}

fn truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

impl GeConfig {
    pub const DEFAULT_LIST_COUNT: usize = 64;
    pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 100;

    /// Defaults overridden by `PSPGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`GeConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(LIST_COUNT_ENV) {
            config.list_count =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: LIST_COUNT_ENV,
                        value: raw.clone(),
                        reason: "expected an unsigned integer",
                    })?;
        }
        if let Some(raw) = lookup(SYNC_TIMEOUT_MS_ENV) {
            config.sync_timeout_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: SYNC_TIMEOUT_MS_ENV,
                        value: raw.clone(),
                        reason: "expected milliseconds",
                    })?;
        }
        if let Some(raw) = lookup(EXTERNAL_BACKEND_ENV) {
            config.external_backend = truthy(&raw);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.list_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "list_count",
                value: self.list_count.to_string(),
                reason: "at least one list slot is required",
            });
        }
        Ok(())
    }
}
