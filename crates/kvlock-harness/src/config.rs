//! Test run configuration.
//!
//! Configuration is read from a TOML file, then `VIS_ENABLE` / `VIS_FILE`
//! from the environment, then command-line overrides applied by the caller.
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvlock_transport::NetworkConfig;

use crate::error::{HarnessError, Result};

/// Environment variable selecting when a timeline is written.
pub const VIS_ENABLE: &str = "VIS_ENABLE";

/// Environment variable naming the timeline output file.
pub const VIS_FILE: &str = "VIS_FILE";

/// Harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of concurrent clients.
    pub clients: usize,

    /// How long clients run, in milliseconds.
    pub duration_ms: u64,

    /// Start on a reliable network.
    pub reliable: bool,

    /// Wall-clock ceiling of a whole test, in seconds.
    pub test_timeout_secs: u64,

    /// Time budget of the linearizability check, in milliseconds.
    pub linearizability_timeout_ms: u64,

    /// Search states per key the linearizability check may visit.
    pub linearizability_max_states: u64,

    /// Wait between lock retries, in milliseconds.
    pub retry_interval_ms: u64,

    /// Unreliable network behaviour.
    pub network: NetworkSettings,

    /// Timeline output.
    pub vis: VisConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            clients: 10,
            duration_ms: 2000,
            reliable: true,
            test_timeout_secs: 120,
            linearizability_timeout_ms: 1000,
            linearizability_max_states: 10_000_000,
            retry_interval_ms: 100,
            network: NetworkSettings::default(),
            vis: VisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Set the number of clients.
    pub fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    /// Set how long clients run.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set whether the network starts reliable.
    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// Apply `VIS_ENABLE` and `VIS_FILE` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply `VIS_ENABLE` and `VIS_FILE` from a lookup function.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(VIS_ENABLE) {
            self.vis.mode = VisMode::from_env_value(&mode);
        }
        if let Some(file) = lookup(VIS_FILE).filter(|f| !f.is_empty()) {
            self.vis.file = Some(PathBuf::from(file));
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(HarnessError::config(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(HarnessError::config(format!(
                "invalid log format: {}",
                self.logging.format
            )));
        }

        if self.clients == 0 {
            return Err(HarnessError::config("at least one client is required"));
        }
        if self.test_timeout_secs == 0 {
            return Err(HarnessError::config("test timeout must be positive"));
        }
        if self.linearizability_max_states == 0 {
            return Err(HarnessError::config("linearizability state limit must be positive"));
        }
        if self.network.drop_request_per_mille > 1000 || self.network.drop_reply_per_mille > 1000 {
            return Err(HarnessError::config("drop rates are per mille and must not exceed 1000"));
        }

        Ok(())
    }

    /// How long clients run.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Wall-clock ceiling of a test.
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// Time budget of the linearizability check.
    pub fn linearizability_timeout(&self) -> Duration {
        Duration::from_millis(self.linearizability_timeout_ms)
    }

    /// Wait between lock retries.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Network configuration for this run.
    pub fn network_config(&self) -> NetworkConfig {
        self.network.to_network_config(self.reliable)
    }
}

/// Fault settings used while the network is unreliable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Chance, out of 1000, of dropping a request.
    pub drop_request_per_mille: u32,

    /// Chance, out of 1000, of dropping a reply.
    pub drop_reply_per_mille: u32,

    /// Upper bound of the per-request delay, in milliseconds.
    pub max_short_delay_ms: u64,

    /// Long simulated timeouts.
    pub long_delays: bool,

    /// Long reply delays that reorder calls.
    pub long_reordering: bool,

    /// Fault RNG seed.
    pub seed: Option<u64>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        let defaults = NetworkConfig::default();
        Self {
            drop_request_per_mille: defaults.drop_request_per_mille,
            drop_reply_per_mille: defaults.drop_reply_per_mille,
            max_short_delay_ms: defaults.max_short_delay_ms,
            long_delays: defaults.long_delays,
            long_reordering: defaults.long_reordering,
            seed: None,
        }
    }
}

impl NetworkSettings {
    /// Builds the transport's network configuration.
    pub fn to_network_config(&self, reliable: bool) -> NetworkConfig {
        let config = NetworkConfig::default()
            .with_reliable(reliable)
            .with_drop_request_per_mille(self.drop_request_per_mille)
            .with_drop_reply_per_mille(self.drop_reply_per_mille)
            .with_max_short_delay_ms(self.max_short_delay_ms)
            .with_long_delays(self.long_delays)
            .with_long_reordering(self.long_reordering);
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

/// When a timeline file is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisMode {
    /// Never write a timeline.
    #[default]
    Never,
    /// Write a timeline after every test.
    Always,
    /// Write a timeline only when a test fails.
    OnFailure,
}

impl VisMode {
    /// Parses a `VIS_ENABLE` value. An empty value or `never` disables
    /// timelines, `always` writes one after every test, and any other
    /// value writes one on failure.
    pub fn from_env_value(value: &str) -> Self {
        match value.trim() {
            "" | "never" => VisMode::Never,
            "always" => VisMode::Always,
            _ => VisMode::OnFailure,
        }
    }

    /// Whether a test with this outcome produces a timeline.
    pub fn should_write(self, failed: bool) -> bool {
        match self {
            VisMode::Never => false,
            VisMode::Always => true,
            VisMode::OnFailure => failed,
        }
    }
}

/// Timeline output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisConfig {
    /// When to write.
    pub mode: VisMode,

    /// Output file. A fresh temp file is used when unset.
    pub file: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();

        assert_eq!(config.clients, 10);
        assert_eq!(config.duration(), Duration::from_secs(2));
        assert!(config.reliable);
        assert_eq!(config.test_timeout(), Duration::from_secs(120));
        assert_eq!(config.linearizability_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_interval(), Duration::from_millis(100));
        assert_eq!(config.vis.mode, VisMode::Never);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = HarnessConfig::default();
        assert!(config.validate().is_ok());

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "json".to_string();

        config.clients = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
        config.clients = 1;

        config.linearizability_max_states = 0;
        assert!(config.validate().is_err());
        config.linearizability_max_states = 1;

        config.network.drop_reply_per_mille = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = HarnessConfig::default().with_clients(3).with_reliable(false);
        let toml_str = toml::to_string(&config).unwrap();

        let parsed: HarnessConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.clients, 3);
        assert!(!parsed.reliable);
        assert_eq!(parsed.network.drop_request_per_mille, 100);
    }

    #[test]
    fn test_partial_file() {
        let parsed: HarnessConfig = toml::from_str(
            r#"
            clients = 4

            [vis]
            mode = "always"

            [network]
            seed = 9
            "#,
        )
        .unwrap();

        assert_eq!(parsed.clients, 4);
        assert_eq!(parsed.duration_ms, 2000);
        assert_eq!(parsed.vis.mode, VisMode::Always);
        assert_eq!(parsed.network.seed, Some(9));
        assert_eq!(parsed.network_config().seed, Some(9));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"duration_ms = 500\nreliable = false\n").unwrap();

        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(config.duration(), Duration::from_millis(500));
        assert!(!config.network_config().reliable);

        assert!(matches!(
            HarnessConfig::from_file("/nonexistent/kvlock.toml"),
            Err(HarnessError::Io(_))
        ));
    }

    #[test]
    fn test_vis_env() {
        let env: HashMap<&str, &str> = [(VIS_ENABLE, "never"), (VIS_FILE, "/tmp/out.json")].into();
        let mut config = HarnessConfig::default();
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.vis.mode, VisMode::Never);
        assert_eq!(config.vis.file, Some(PathBuf::from("/tmp/out.json")));

        let mut config = HarnessConfig::default();
        config.apply_env_from(|_| None);
        assert_eq!(config.vis.mode, VisMode::Never);
        assert!(config.vis.file.is_none());

        let mut config = HarnessConfig::default();
        config.apply_env_from(|name| (name == VIS_ENABLE).then(|| "1".to_string()));
        assert_eq!(config.vis.mode, VisMode::OnFailure);
    }

    #[test]
    fn test_vis_mode() {
        assert_eq!(VisMode::from_env_value("always"), VisMode::Always);
        assert_eq!(VisMode::from_env_value(""), VisMode::Never);
        assert_eq!(VisMode::from_env_value("never"), VisMode::Never);
        assert_eq!(VisMode::from_env_value("sometimes"), VisMode::OnFailure);

        assert!(!VisMode::Never.should_write(true));
        assert!(VisMode::Always.should_write(false));
        assert!(VisMode::OnFailure.should_write(true));
        assert!(!VisMode::OnFailure.should_write(false));
    }
}
