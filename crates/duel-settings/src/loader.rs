//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DuelSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `DUEL_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::DuelSettings;

/// Resolve the path to the settings file (`~/.duel/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".duel").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DuelSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<DuelSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<DuelSettings> {
    let defaults = serde_json::to_value(DuelSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DuelSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `DUEL_*` overrides. Invalid values are logged and ignored (fall
/// back to file/default).
fn apply_overrides(settings: &mut DuelSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(v) = read("DUEL_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = read("DUEL_PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(v) => settings.server.port = v,
            None => warn!(key = "DUEL_PORT", value = %raw, "invalid u16 env var, ignoring"),
        }
    }
    if let Some(v) = read("DUEL_JUDGE_URL") {
        settings.judge.url = Some(v);
    }
    if let Some(raw) = read("DUEL_JUDGE_TIMEOUT_MS") {
        match parse_u64_range(&raw, 100, 600_000) {
            Some(v) => settings.judge.timeout_ms = v,
            None => {
                warn!(key = "DUEL_JUDGE_TIMEOUT_MS", value = %raw, "invalid u64 env var, ignoring")
            }
        }
    }
    if let Some(v) = read("DUEL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = read("DUEL_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => warn!(key = "DUEL_LOG_JSON", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4, 5]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with_env(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, DuelSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4000}, "judge": {"url": "http://judge:8000/run", "maxRetries": 4}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.judge.url.as_deref(), Some("http://judge:8000/run"));
        assert_eq!(settings.judge.max_retries, 4);
        assert_eq!(settings.judge.timeout_ms, 10_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxSendQueue": 0}}"#).unwrap();

        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4000}, "logging": {"json": true}}"#).unwrap();

        let env = env_from(&[
            ("DUEL_PORT", "5000"),
            ("DUEL_HOST", "127.0.0.1"),
            ("DUEL_JUDGE_URL", "http://localhost:9000/judge"),
            ("DUEL_JUDGE_TIMEOUT_MS", "2500"),
            ("DUEL_LOG_LEVEL", "debug"),
            ("DUEL_LOG_JSON", "off"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.judge.url.as_deref(), Some("http://localhost:9000/judge"));
        assert_eq!(settings.judge.timeout_ms, 2500);
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let env = env_from(&[
            ("DUEL_PORT", "0"),
            ("DUEL_JUDGE_TIMEOUT_MS", "soon"),
            ("DUEL_LOG_JSON", "maybe"),
            ("DUEL_HOST", ""),
        ]);
        let settings = load_with_env(Path::new("/nonexistent/settings.json"), env).unwrap();
        assert_eq!(settings, DuelSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }
}
