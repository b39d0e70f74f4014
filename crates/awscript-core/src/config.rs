//! Client configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, a TOML
//! file, `AWSCRIPT_*` environment variables, then command-line flags applied
//! by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default address of the bridge process.
pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:7400";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Timeouts, retry budgets and the bridge endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub bridge_addr: String,
    /// Upper bound on the time the ego may take to reach its goal.
    pub goal_timeout_secs: u64,
    /// Upper bound on the wait of each gated command.
    pub gate_timeout_secs: u64,
    pub ack_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub inter_scenario_delay_ms: u64,
    pub localization_retries: u32,
    pub reset_retries: u32,
    pub retry_interval_ms: u64,
    /// Wait for the trace recorder to finish before the next scenario.
    pub wait_for_trace: bool,
    pub trace_timeout_secs: u64,
    /// Engage autonomous mode once the stack reports it is ready.
    pub engage_autonomous: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bridge_addr: DEFAULT_BRIDGE_ADDR.to_string(),
            goal_timeout_secs: 600,
            gate_timeout_secs: 60,
            ack_timeout_ms: 5_000,
            poll_interval_ms: 2_000,
            inter_scenario_delay_ms: 3_000,
            localization_retries: 10,
            reset_retries: 10,
            retry_interval_ms: 1_000,
            wait_for_trace: true,
            trace_timeout_secs: 300,
            engage_autonomous: true,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Override fields from environment-style variables supplied by `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("AWSCRIPT_BRIDGE_ADDR") {
            self.bridge_addr = addr;
        }
        set_parsed(&lookup, "AWSCRIPT_GOAL_TIMEOUT_SECS", &mut self.goal_timeout_secs)?;
        set_parsed(&lookup, "AWSCRIPT_GATE_TIMEOUT_SECS", &mut self.gate_timeout_secs)?;
        set_parsed(&lookup, "AWSCRIPT_ACK_TIMEOUT_MS", &mut self.ack_timeout_ms)?;
        set_parsed(&lookup, "AWSCRIPT_POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        set_parsed(
            &lookup,
            "AWSCRIPT_INTER_SCENARIO_DELAY_MS",
            &mut self.inter_scenario_delay_ms,
        )?;
        set_parsed(&lookup, "AWSCRIPT_LOCALIZATION_RETRIES", &mut self.localization_retries)?;
        set_parsed(&lookup, "AWSCRIPT_RESET_RETRIES", &mut self.reset_retries)?;
        set_parsed(&lookup, "AWSCRIPT_RETRY_INTERVAL_MS", &mut self.retry_interval_ms)?;
        set_parsed(&lookup, "AWSCRIPT_WAIT_FOR_TRACE", &mut self.wait_for_trace)?;
        set_parsed(&lookup, "AWSCRIPT_TRACE_TIMEOUT_SECS", &mut self.trace_timeout_secs)?;
        set_parsed(&lookup, "AWSCRIPT_ENGAGE_AUTONOMOUS", &mut self.engage_autonomous)?;
        self.validate()
    }

    /// Reject values that would make a scenario unbounded or stuck.
    pub fn validate(&self) -> ConfigResult<()> {
        let non_zero = [
            ("goal_timeout_secs", self.goal_timeout_secs),
            ("gate_timeout_secs", self.gate_timeout_secs),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("trace_timeout_secs", self.trace_timeout_secs),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.bridge_addr.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "bridge_addr".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn goal_timeout(&self) -> Duration {
        Duration::from_secs(self.goal_timeout_secs)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inter_scenario_delay(&self) -> Duration {
        Duration::from_millis(self.inter_scenario_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_secs(self.trace_timeout_secs)
    }
}

fn set_parsed<T, F>(lookup: &F, key: &str, slot: &mut T) -> ConfigResult<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.goal_timeout(), Duration::from_secs(600));
        assert_eq!(config.inter_scenario_delay(), Duration::from_secs(3));
        assert_eq!(config.localization_retries, 10);
        assert!(config.wait_for_trace);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            "bridge_addr = \"10.0.0.2:9000\"\ngate_timeout_secs = 5\nwait_for_trace = false\n",
        )
        .unwrap();
        assert_eq!(config.bridge_addr, "10.0.0.2:9000");
        assert_eq!(config.gate_timeout_secs, 5);
        assert!(!config.wait_for_trace);
        assert_eq!(config.goal_timeout_secs, 600);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ClientConfig::from_toml_str("goal_timeout = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ClientConfig::from_toml_str("goal_timeout_secs = 0\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "goal_timeout_secs"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AWSCRIPT_BRIDGE_ADDR", "sim:7000"),
            ("AWSCRIPT_GOAL_TIMEOUT_SECS", "120"),
            ("AWSCRIPT_WAIT_FOR_TRACE", "false"),
        ]
        .into_iter()
        .collect();
        let mut config = ClientConfig::default();
        config
            .apply_env_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.bridge_addr, "sim:7000");
        assert_eq!(config.goal_timeout_secs, 120);
        assert!(!config.wait_for_trace);
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_env_from(|key| (key == "AWSCRIPT_RESET_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
