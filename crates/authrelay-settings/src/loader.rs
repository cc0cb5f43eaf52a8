//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AuthRelaySettings::default()`]
//! 2. If `~/.authrelay/settings.json` exists, deep-merge its values over defaults
//! 3. Apply `AUTHRELAY_*` environment overrides
//!
//! Callers layer their own overrides (command-line flags) on top and then
//! call [`AuthRelaySettings::validate`] once on the final result.
//!
//! Merge rules: objects merge per-key, arrays and primitives are replaced,
//! and `null` in the file leaves the default in place.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::AuthRelaySettings;

/// Resolve the path to the settings file (`~/.authrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".authrelay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults and invalid JSON is an error. The result
/// is not validated.
pub fn load_settings_from_path(path: &Path) -> Result<AuthRelaySettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with<F>(path: &Path, lookup: F) -> Result<AuthRelaySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(AuthRelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AuthRelaySettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup`.
///
/// Empty values are ignored. Values that fail to parse are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut AuthRelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("AUTHRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env
        .u16("AUTHRELAY_PORT", 1, 65535)
        .or_else(|| env.u16("PORT", 1, 65535))
    {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("AUTHRELAY_LISTENER_QUEUE", 1, 65_536) {
        settings.server.listener_queue_capacity = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.u64("AUTHRELAY_POLL_DELAY_MS", 0, 600_000) {
        settings.relay.poll_delay_ms = v;
    }
    if let Some(v) = env.u64("AUTHRELAY_COMPLETION_DELAY_MS", 0, 600_000) {
        settings.relay.completion_delay_ms = v;
    }
    if let Some(v) = env.string("AUTHRELAY_SESSION_ID_TYPE") {
        settings.relay.session_id_type = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.string("AUTHRELAY_UPSTREAM_URL") {
        settings.upstream.base_url = v;
    }
    if let Some(v) = env.u64("AUTHRELAY_UPSTREAM_TIMEOUT_MS", 100, 600_000) {
        settings.upstream.timeout_ms = v;
    }
    if let Some(v) = env.string("AUTHRELAY_UPSTREAM_API_KEY") {
        settings.upstream.api_key = Some(v);
    }
    if let Some(v) = env.string("AUTHRELAY_UPSTREAM_LABELS") {
        settings.upstream.labels = Some(v);
    }
    if let Some(v) = env.bool("AUTHRELAY_ACCEPT_INVALID_CERTS") {
        settings.upstream.accept_invalid_certs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("AUTHRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("AUTHRELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).map(|v| v.trim().to_string())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env override, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
