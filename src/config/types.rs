use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resource::fingerprint::FingerprintMode;

/// Contents of `pgkeep.yaml`. Every field has a default, so an empty or
/// missing file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Base directory on each server under which database configuration lives.
    #[serde(default = "default_database_configuration_dir")]
    pub database_configuration_dir: PathBuf,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub fingerprint_mode: FingerprintMode,
    /// Retries applied by the CLI around remote operations.
    #[serde(default)]
    pub remote_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            database_configuration_dir: default_database_configuration_dir(),
            ssh: SshSettings::default(),
            metrics: MetricsSettings::default(),
            fingerprint_mode: FingerprintMode::default(),
            remote_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            connect_timeout_secs: default_connect_timeout_secs(),
            strict_host_key_checking: false,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where the on-host metrics agent listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_agent_container")]
    pub agent_container: String,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default = "default_window_mins")]
    pub default_window_mins: i64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            agent_container: default_agent_container(),
            agent_port: default_agent_port(),
            default_window_mins: default_window_mins(),
        }
    }
}

fn default_state_path() -> String {
    ".pgkeep/state.db".to_string()
}

fn default_database_configuration_dir() -> PathBuf {
    PathBuf::from("/data/pgkeep/databases")
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_agent_container() -> String {
    "pgkeep-sentinel".to_string()
}

fn default_agent_port() -> u16 {
    8888
}

fn default_window_mins() -> i64 {
    5
}
