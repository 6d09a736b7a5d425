//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RELAY_*` environment variable overrides
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogFormat, RelaySettings};

/// Resolve the settings file path.
///
/// `$RELAY_SETTINGS` if set, otherwise `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("RELAY_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// `lookup` is `std::env::var` in production; tests pass a map so they never
/// touch the process environment. Values that fail to parse or fall outside
/// their range are logged and ignored.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let server = &mut settings.server;
    if let Some(v) = non_empty(&lookup, "RELAY_HOST") {
        server.host = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_PORT", parse_u16_range, 0, u16::MAX) {
        server.port = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_MAX_CONNECTIONS", parse_usize_range, 1, 1_000_000) {
        server.max_connections = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_CHANNEL_CAPACITY", parse_usize_range, 1, 1_000_000) {
        server.channel_capacity = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_HEARTBEAT_INTERVAL_SECS", parse_u64_range, 0, 3600) {
        server.heartbeat_interval_secs = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_IDLE_TIMEOUT_SECS", parse_u64_range, 0, 86_400) {
        server.idle_timeout_secs = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_WRITE_TIMEOUT_SECS", parse_u64_range, 0, 3600) {
        server.write_timeout_secs = v;
    }
    if let Some(v) = ranged(
        &lookup,
        "RELAY_MAX_MESSAGE_SIZE",
        parse_usize_range,
        1024,
        1024 * 1024 * 1024,
    ) {
        server.max_message_size = v;
    }

    let logging = &mut settings.logging;
    if let Some(v) = non_empty(&lookup, "RELAY_LOG_LEVEL") {
        logging.level = v;
    }
    if let Some(v) = non_empty(&lookup, "RELAY_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => logging.format = format,
            Err(e) => warn!(key = "RELAY_LOG_FORMAT", value = %v, error = %e, "ignoring env var"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Lookup helpers ──────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.is_empty())
}

fn ranged<F, T>(lookup: &F, name: &str, parse: fn(&str, T, T) -> Option<T>, min: T, max: T) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
{
    let val = non_empty(lookup, name)?;
    let result = parse(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}
