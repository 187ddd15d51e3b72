//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClawSettings::default()`]
//! 2. If `~/.claw/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CLAW_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use claw_core::policy::ApprovalMode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ClawSettings;

/// Resolve the path to the settings file (`~/.claw/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".claw").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClawSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClawSettings> {
    let defaults = serde_json::to_value(ClawSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ClawSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides. Invalid values are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut ClawSettings) {
    if let Some(v) = read_env("CLAW_MAX_TURNS", |s| parse_u32_range(s, 1, 10_000)) {
        settings.agent.max_turns = v;
    }
    if let Some(v) = read_env("CLAW_TEMPERATURE", |s| parse_f64_range(s, 0.0, 2.0)) {
        settings.agent.temperature = v;
    }
    if let Some(v) = read_env("CLAW_APPROVAL_MODE", parse_approval_mode) {
        settings.agent.approval_mode = v;
    }
    if let Some(v) = read_env("CLAW_ENABLE_COMPRESSION", parse_bool) {
        settings.agent.enable_compression = v;
    }
    if let Some(v) = read_env("CLAW_TOOL_TIMEOUT_MS", |s| parse_u64_range(s, 100, 3_600_000)) {
        settings.tools.timeout_ms = v;
    }
    if let Some(v) = read_env("CLAW_CONFIRMATION_TIMEOUT_SECS", |s| parse_u64_range(s, 1, 86_400)) {
        settings.confirmation.timeout_secs = v;
    }
    if let Ok(v) = std::env::var("CLAW_LOG_LEVEL") {
        if !v.is_empty() {
            settings.telemetry.level = v;
        }
    }
    if let Some(v) = read_env("CLAW_LOG_JSON", parse_bool) {
        settings.telemetry.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Accepts the serialized mode names plus the `yolo` alias.
pub fn parse_approval_mode(val: &str) -> Option<ApprovalMode> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

fn read_env<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}
