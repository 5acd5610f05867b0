use anyhow::Result;
use chrono::Duration;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::controller::ControllerSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub telemetry: TelemetryConfig,
    pub controllers: ControllerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Loop period; also the amount the simulation clock advances per tick
    pub tick_millis: u64,
    pub scan_period_millis: u64,
    /// Fixed seed for reproducible runs; entropy when unset
    pub random_seed: Option<u64>,
    /// Topology file (json, toml, yaml); the built-in reference network when unset
    pub topology_path: Option<PathBuf>,
    pub broadcast_every_ticks: u64,
    pub broadcast_capacity: usize,
    pub stop_timeout_millis: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_millis: 100,
            scan_period_millis: 100,
            random_seed: None,
            topology_path: None,
            broadcast_every_ticks: 10,
            broadcast_capacity: 16,
            stop_timeout_millis: 2000,
        }
    }
}

impl SimulationConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::milliseconds(self.tick_millis as i64)
    }

    pub fn scan_period(&self) -> Duration {
        Duration::milliseconds(self.scan_period_millis as i64)
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stop_timeout_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
    pub log_format: LogFormat,
    /// JSON-lines file receiving one record per tick; nothing is persisted when unset
    pub records_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Json,
            records_path: None,
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `GPT__`-prefixed environment
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("GPT__").split("__"));
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.simulation.tick_millis, 100);
        assert_eq!(cfg.simulation.broadcast_every_ticks, 10);
        assert!(cfg.telemetry.records_path.is_none());
        assert_eq!(cfg.controllers.pressure_control.setpoint_bar, 50.0);
    }

    #[test]
    fn test_file_overrides_nested_tunables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[simulation]\nrandom_seed = 7\nscan_period_millis = 200\n\n\
             [controllers.compressor_management]\nmax_start_attempts = 5\n"
        )
        .unwrap();
        let cfg = Config::load_from(file.path()).unwrap();
        assert_eq!(cfg.simulation.random_seed, Some(7));
        assert_eq!(cfg.simulation.scan_period(), Duration::milliseconds(200));
        assert_eq!(cfg.controllers.compressor_management.max_start_attempts, 5);
        // Untouched fields keep their defaults
        assert_eq!(cfg.controllers.compressor_management.start_cooldown_secs, 60);
        assert_eq!(cfg.simulation.tick_millis, 100);
    }
}
