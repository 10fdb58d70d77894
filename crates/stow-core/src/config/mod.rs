//! Sync engine configuration.
//!
//! `EngineConfig` tells the engine where the remote service lives and how long
//! it may wait on it. Values come from the process environment (`from_env`) or
//! any lookup closure (`from_lookup`), which keeps parsing testable without
//! touching global state.

use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const API_BASE_URL_VAR: &str = "STOW_API_BASE_URL";
pub const REQUEST_TIMEOUT_VAR: &str = "STOW_REQUEST_TIMEOUT_SECS";
pub const PROBE_TIMEOUT_VAR: &str = "STOW_PROBE_TIMEOUT_SECS";
pub const CALL_TIMEOUT_VAR: &str = "STOW_CALL_TIMEOUT_SECS";
pub const MAX_CONCURRENT_CALLS_VAR: &str = "STOW_MAX_CONCURRENT_CALLS";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 2;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_CONCURRENT_CALLS: usize = 4;

/// Remote endpoint and timing knobs for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Base URL of the remote service, without trailing slash
    pub api_base_url: String,
    /// Timeout applied by the HTTP client to every request
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Timeout of the reachability check
    #[serde(default = "default_probe_timeout", with = "duration_secs")]
    pub probe_timeout: Duration,
    /// Upper bound on a single gateway call, retries included
    #[serde(default = "default_call_timeout", with = "duration_secs")]
    pub call_timeout: Duration,
    /// Gateway calls allowed in flight within one pass phase
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl EngineConfig {
    /// Configuration with default timings for the given remote service
    pub fn new(api_base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_base_url: normalize_base_url(api_base_url.into())?,
            request_timeout: default_request_timeout(),
            probe_timeout: default_probe_timeout(),
            call_timeout: default_call_timeout(),
            max_concurrent_calls: default_max_concurrent_calls(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_base_url = optional_trimmed(&lookup, API_BASE_URL_VAR).ok_or_else(|| {
            Error::Config(format!(
                "Missing required environment variable: {API_BASE_URL_VAR}"
            ))
        })?;

        let request_timeout_secs = parse_in_range(
            &lookup,
            REQUEST_TIMEOUT_VAR,
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1..=120,
        )?;
        let probe_timeout_secs = parse_in_range(
            &lookup,
            PROBE_TIMEOUT_VAR,
            DEFAULT_PROBE_TIMEOUT_SECS,
            1..=30,
        )?;
        let call_timeout_secs =
            parse_in_range(&lookup, CALL_TIMEOUT_VAR, DEFAULT_CALL_TIMEOUT_SECS, 1..=300)?;
        let max_concurrent_calls = parse_in_range(
            &lookup,
            MAX_CONCURRENT_CALLS_VAR,
            DEFAULT_MAX_CONCURRENT_CALLS as u64,
            1..=64,
        )?;

        Ok(Self {
            api_base_url: normalize_base_url(api_base_url)?,
            request_timeout: Duration::from_secs(request_timeout_secs),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            call_timeout: Duration::from_secs(call_timeout_secs),
            max_concurrent_calls: usize::try_from(max_concurrent_calls)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CALLS),
        })
    }

    /// Check values that did not come through `from_lookup` (e.g. deserialized)
    pub fn validate(&self) -> Result<()> {
        normalize_base_url(self.api_base_url.clone())?;
        if self.request_timeout.is_zero()
            || self.probe_timeout.is_zero()
            || self.call_timeout.is_zero()
        {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if !(1..=64).contains(&self.max_concurrent_calls) {
            return Err(Error::Config(
                "max_concurrent_calls must be in [1, 64]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trim a base URL, require an http(s) scheme, and drop trailing slashes.
pub(crate) fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        Error::Config(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(Error::Config(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

const fn default_probe_timeout() -> Duration {
    Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS)
}

const fn default_call_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)
}

const fn default_max_concurrent_calls() -> usize {
    DEFAULT_MAX_CONCURRENT_CALLS
}

/// Durations as whole seconds on the wire
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
