//! TOML-based application configuration.
//!
//! Holds the named timer profiles and the persistence settings.
//! Stored at `<data_dir>/config.toml`; values are validated here so the
//! engine can treat profiles as pre-validated.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::profile::TimerProfile;

/// One profile as written in the config file (minutes, like the UI
/// presents them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u32,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u32,
    #[serde(default = "default_pomodoros_until_long_break")]
    pub pomodoros_until_long_break: u32,
    #[serde(default = "default_extend_minutes")]
    pub extend_minutes: u32,
    #[serde(default = "default_extend_minutes")]
    pub extend_break_minutes: u32,
}

/// Snapshot/recovery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Periodic snapshot cadence.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Snapshots older than this are discarded instead of recovered.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_profile_name")]
    pub current_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_work_minutes() -> u32 {
    25
}
fn default_short_break_minutes() -> u32 {
    5
}
fn default_long_break_minutes() -> u32 {
    15
}
fn default_pomodoros_until_long_break() -> u32 {
    4
}
fn default_extend_minutes() -> u32 {
    5
}
fn default_snapshot_interval_secs() -> u64 {
    30
}
fn default_stale_after_secs() -> i64 {
    3600
}
fn default_profile_name() -> String {
    "default".into()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            pomodoros_until_long_break: default_pomodoros_until_long_break(),
            extend_minutes: default_extend_minutes(),
            extend_break_minutes: default_extend_minutes(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), ProfileConfig::default());
        Self {
            current_profile: default_profile_name(),
            profiles,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl ProfileConfig {
    fn to_profile(&self, name: &str) -> TimerProfile {
        TimerProfile {
            name: name.to_string(),
            work_seconds: u64::from(self.work_minutes) * 60,
            short_break_seconds: u64::from(self.short_break_minutes) * 60,
            long_break_seconds: u64::from(self.long_break_minutes) * 60,
            pomodoros_until_long_break: self.pomodoros_until_long_break.max(1),
            work_extend_seconds: u64::from(self.extend_minutes) * 60,
            break_extend_seconds: u64::from(self.extend_break_minutes) * 60,
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk; a missing file is created with defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|err| ConfigError::LoadFailed {
                path,
                message: err.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|err| ConfigError::SaveFailed {
            path: path.clone(),
            message: err.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|err| ConfigError::SaveFailed {
            path,
            message: err.to_string(),
        })
    }

    /// Resolve a profile by name, defaulting to the current one.
    pub fn profile(&self, name: Option<&str>) -> Result<TimerProfile, ConfigError> {
        let name = name.unwrap_or(&self.current_profile);
        self.profiles
            .get(name)
            .map(|p| p.to_profile(name))
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key and persist. The new
    /// value must parse as the same JSON type the key already holds.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::LoadFailed {
            path: Self::path().unwrap_or_default(),
            message,
        };
        let mut json = serde_json::to_value(&*self)
            .map_err(|err| invalid(err.to_string()))?;

        let mut parts = key.split('.').peekable();
        let mut current = &mut json;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            let obj = current
                .as_object_mut()
                .ok_or_else(|| invalid(format!("unknown config key: {key}")))?;
            if is_leaf {
                let existing = obj
                    .get(part)
                    .ok_or_else(|| invalid(format!("unknown config key: {key}")))?;
                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|e| invalid(e.to_string()))?;
                        serde_json::Value::Number(n.into())
                    }
                    _ => serde_json::Value::String(value.into()),
                };
                obj.insert(part.to_string(), new_value);
                break;
            }
            current = obj
                .get_mut(part)
                .ok_or_else(|| invalid(format!("unknown config key: {key}")))?;
        }

        *self = serde_json::from_value(json).map_err(|err| invalid(err.to_string()))?;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.current_profile, "default");
        assert_eq!(parsed.persistence.snapshot_interval_secs, 30);
    }

    #[test]
    fn profile_converts_minutes_to_seconds() {
        let cfg = Config::default();
        let p = cfg.profile(None).unwrap();
        assert_eq!(p.work_seconds, 1500);
        assert_eq!(p.short_break_seconds, 300);
        assert_eq!(p.long_break_seconds, 900);
        assert_eq!(p.work_extend_seconds, 300);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.profile(Some("deep-focus")),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("current_profile").as_deref(), Some("default"));
        assert_eq!(
            cfg.get("profiles.default.work_minutes").as_deref(),
            Some("25")
        );
        assert!(cfg.get("profiles.default.missing").is_none());
    }
}
