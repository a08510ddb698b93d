//! Loads the broker's single structured configuration document (TOML) and
//! validates the invariants spec.md §6 requires: the vault must be present,
//! gated containers require at least one channel, and every standing rule
//! carries both `item` and `reason_match`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::matcher::StandingRule;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/secret-broker/config.toml";
pub const DEFAULT_SOCKET_PATH: &str = "/run/secret-broker.sock";
pub const DEFAULT_DROP_DIR: &str = "/run/secret-broker/pending";
pub const DEFAULT_AUDIT_LOG: &str = "/var/log/secret-broker/audit.jsonl";
pub const DEFAULT_PID_FILE: &str = "/run/secret-broker.pid";
pub const MIN_APPROVAL_TIMEOUT_MS: i64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub transport_socket_path: Option<String>,
    pub http_port: u16,
    pub pid_file: Option<String>,
    pub audit_log_path: Option<String>,
    pub pending_drop_dir: Option<String>,
    #[serde(default)]
    pub session_scan_dir: Option<String>,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: i64,
    pub approval_timeout_ms: i64,
    #[serde(default)]
    pub open_containers: Vec<String>,
    #[serde(default)]
    pub gated_containers: Vec<String>,
    #[serde(default)]
    pub standing_rules: Vec<StandingRule>,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channels: std::collections::BTreeMap<String, toml::Value>,
}

fn default_cache_ttl_ms() -> i64 {
    0
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(Default::default())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("config has neither open_containers nor gated_containers configured")]
    MissingVault,
    #[error("gated containers are configured but no channel is configured")]
    GatedWithoutChannel,
    #[error("standing rule at index {0} is missing 'item' or 'reason_match'")]
    IncompleteStandingRule(usize),
    #[error("approval_timeout_ms must be at least {MIN_APPROVAL_TIMEOUT_MS}, got {0}")]
    TimeoutTooShort(i64),
}

#[derive(Debug)]
pub struct Config {
    pub raw: RawConfig,
    pub transport_socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub audit_log_path: PathBuf,
    pub pending_drop_dir: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read(path.to_path_buf(), err))?;
        let raw: RawConfig = toml::from_str(&text).map_err(|err| ConfigError::Parse(path.to_path_buf(), err))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.open_containers.is_empty() && raw.gated_containers.is_empty() {
            return Err(ConfigError::MissingVault);
        }
        if !raw.gated_containers.is_empty() && raw.channels.is_empty() {
            return Err(ConfigError::GatedWithoutChannel);
        }
        for (idx, rule) in raw.standing_rules.iter().enumerate() {
            if rule.item.is_empty() || rule.reason_match.is_empty() {
                return Err(ConfigError::IncompleteStandingRule(idx));
            }
        }
        if raw.approval_timeout_ms < MIN_APPROVAL_TIMEOUT_MS {
            return Err(ConfigError::TimeoutTooShort(raw.approval_timeout_ms));
        }

        let transport_socket_path = env_override("SECRET_BROKER_SOCKET")
            .or_else(|| raw.transport_socket_path.clone())
            .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string())
            .into();
        let pid_file = raw
            .pid_file
            .clone()
            .unwrap_or_else(|| DEFAULT_PID_FILE.to_string())
            .into();
        let audit_log_path = raw
            .audit_log_path
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIT_LOG.to_string())
            .into();
        let pending_drop_dir = env_override("SECRET_BROKER_DROP_DIR")
            .or_else(|| raw.pending_drop_dir.clone())
            .unwrap_or_else(|| DEFAULT_DROP_DIR.to_string())
            .into();

        Ok(Self {
            raw,
            transport_socket_path,
            pid_file,
            audit_log_path,
            pending_drop_dir,
        })
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.approval_timeout_ms as u64)
    }

    pub fn config_path() -> PathBuf {
        env_override("SECRET_BROKER_CONFIG")
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
            .into()
    }
}

fn env_override(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn rejects_gated_containers_without_any_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            http_port = 8787
            approval_timeout_ms = 30000
            gated_containers = ["sec"]
            [provider]
            name = "static"
            "#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::GatedWithoutChannel));
    }

    #[test]
    fn rejects_timeout_below_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            http_port = 8787
            approval_timeout_ms = 500
            open_containers = ["pub"]
            [provider]
            name = "static"
            "#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TimeoutTooShort(500)));
    }

    #[test]
    fn rejects_config_with_no_containers_at_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            http_port = 8787
            approval_timeout_ms = 30000
            [provider]
            name = "static"
            "#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVault));
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            http_port = 8787
            approval_timeout_ms = 30000
            open_containers = ["pub"]
            [provider]
            name = "static"
            "#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.approval_timeout(), Duration::from_secs(30));
    }
}
