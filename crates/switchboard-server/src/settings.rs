//! Settings loader: JSON file over defaults, then environment overrides.
//!
//! Loading follows three layers:
//! 1. Compiled defaults ([`ServerConfig::default`])
//! 2. An optional JSON file, deep-merged over the defaults
//! 3. `SWITCHBOARD_*` environment variables

use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::errors::SettingsError;

/// Host override.
pub const ENV_HOST: &str = "SWITCHBOARD_HOST";
/// Port override (1..=65535).
pub const ENV_PORT: &str = "SWITCHBOARD_PORT";
/// Comma-separated API keys.
pub const ENV_API_KEYS: &str = "SWITCHBOARD_API_KEYS";
/// Heartbeat timeout in milliseconds (1..=600000).
pub const ENV_HEARTBEAT_TIMEOUT_MS: &str = "SWITCHBOARD_HEARTBEAT_TIMEOUT_MS";
/// CORS on/off.
pub const ENV_CORS: &str = "SWITCHBOARD_CORS";

/// Load settings from a file with env var overrides.
///
/// A missing file yields the defaults. A file that is not valid JSON, or
/// whose values have the wrong types, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ServerConfig, SettingsError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` environment variables to `config`.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
///
/// Empty values count as unset.
pub fn apply_overrides_from<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let ignored = |key: &str, value: &str| warn!(key, value, "invalid settings override, ignoring");

    if let Some(host) = read(ENV_HOST) {
        config.host = host.trim().to_owned();
    }
    if let Some(v) = read(ENV_PORT) {
        match within(&v, &PORT_RANGE) {
            Some(port) => config.port = port,
            None => ignored(ENV_PORT, &v),
        }
    }
    if let Some(v) = read(ENV_API_KEYS) {
        config.api_keys = v
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = read(ENV_HEARTBEAT_TIMEOUT_MS) {
        match within(&v, &HEARTBEAT_TIMEOUT_RANGE_MS) {
            Some(ms) => config.heartbeat_timeout_ms = Some(ms),
            None => ignored(ENV_HEARTBEAT_TIMEOUT_MS, &v),
        }
    }
    if let Some(v) = read(ENV_CORS) {
        match toggle(&v) {
            Some(on) => config.cors = on,
            None => ignored(ENV_CORS, &v),
        }
    }
}

const PORT_RANGE: RangeInclusive<u16> = 1..=65_535;
const HEARTBEAT_TIMEOUT_RANGE_MS: RangeInclusive<u64> = 1..=600_000;

fn within<T>(value: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    value.trim().parse().ok().filter(|n| range.contains(n))
}

/// `on`/`off` style switch, case-insensitive.
fn toggle(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
