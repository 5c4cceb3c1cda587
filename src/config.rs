//! Daemon configuration
//!
//! The configuration is a JSON document:
//!
//! ```json
//! {
//!   "syslog": 1,
//!   "ipc": { "sub": "ipc:///tmp/to.modbus", "pub": "ipc:///tmp/from.modbus" },
//!   "mbtcp": { "connect_timeout": 200000.0 }
//! }
//! ```
//!
//! The file is read once at startup and written back at shutdown with the
//! current response timeout. Keys the daemon does not know are kept.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModbusError, ModbusResult};
use crate::DEFAULT_TIMEOUT_US;

/// Environment variable holding the configuration path
pub const CONFIG_ENV: &str = "CONF_MODBUSD";

/// Path used when neither the environment nor the command line names one
pub const DEFAULT_CONFIG_PATH: &str = "./modbusd.json";

pub const DEFAULT_SUB_ENDPOINT: &str = "ipc:///tmp/to.modbus";
pub const DEFAULT_PUB_ENDPOINT: &str = "ipc:///tmp/from.modbus";

/// Logging switch, written either as 0/1 or as a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogFlag {
    Bool(bool),
    Int(i64),
}

impl LogFlag {
    pub fn enabled(self) -> bool {
        match self {
            LogFlag::Bool(b) => b,
            LogFlag::Int(v) => v != 0,
        }
    }
}

impl Default for LogFlag {
    fn default() -> Self {
        LogFlag::Int(0)
    }
}

/// Message bus endpoints, both bound by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Endpoint of the command subscriber
    #[serde(default = "default_sub")]
    pub sub: String,
    /// Endpoint of the response publisher
    #[serde(rename = "pub", default = "default_pub")]
    pub publish: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            sub: default_sub(),
            publish: default_pub(),
            extra: Map::new(),
        }
    }
}

/// Modbus TCP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbtcpConfig {
    /// Response timeout in microseconds, stored as a float
    #[serde(default = "default_timeout")]
    pub connect_timeout: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MbtcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_timeout(),
            extra: Map::new(),
        }
    }
}

fn default_sub() -> String {
    DEFAULT_SUB_ENDPOINT.to_string()
}

fn default_pub() -> String {
    DEFAULT_PUB_ENDPOINT.to_string()
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_US as f64
}

/// Full configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub syslog: LogFlag,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub mbtcp: MbtcpConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GatewayConfig {
    /// Pick the configuration path: environment first, then the first
    /// command line argument, then [`DEFAULT_CONFIG_PATH`]
    pub fn resolve_path(env: Option<String>, args: &[String]) -> PathBuf {
        if let Some(path) = env.filter(|p| !p.is_empty()) {
            info!("config path from {}: {}", CONFIG_ENV, path);
            return PathBuf::from(path);
        }
        match args.first() {
            Some(path) => {
                info!("config path from argument: {}", path);
                PathBuf::from(path)
            }
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// [`GatewayConfig::resolve_path`] for the running process
    pub fn path_from_env() -> PathBuf {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::resolve_path(std::env::var(CONFIG_ENV).ok(), &args)
    }

    /// Load the configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            error!("failed to read config {}: {}", path.display(), e);
            ModbusError::configuration(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            error!("failed to parse config {}: {}", path.display(), e);
            ModbusError::configuration(format!("{}: {}", path.display(), e))
        })?;
        debug!("loaded config {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Write the configuration back
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ModbusResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .map_err(|e| ModbusError::configuration(format!("{}: {}", path.display(), e)))?;
        debug!("saved config {}", path.display());
        Ok(())
    }

    /// Response timeout in whole microseconds
    pub fn timeout_us(&self) -> u64 {
        if self.mbtcp.connect_timeout.is_finite() && self.mbtcp.connect_timeout > 0.0 {
            self.mbtcp.connect_timeout as u64
        } else {
            0
        }
    }

    pub fn set_timeout_us(&mut self, timeout_us: u64) {
        self.mbtcp.connect_timeout = timeout_us as f64;
    }

    pub fn logging_enabled(&self) -> bool {
        self.syslog.enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "syslog": 1,
        "ipc": { "sub": "ipc:///tmp/to.modbus", "pub": "ipc:///tmp/from.modbus" },
        "mbtcp": { "connect_timeout": 200000 },
        "version": "0.3.0"
    }"#;

    #[test]
    fn test_path_resolution_order() {
        let args = vec!["/etc/modbusd/arg.json".to_string()];

        assert_eq!(
            GatewayConfig::resolve_path(Some("/env.json".into()), &args),
            PathBuf::from("/env.json")
        );
        assert_eq!(
            GatewayConfig::resolve_path(None, &args),
            PathBuf::from("/etc/modbusd/arg.json")
        );
        assert_eq!(
            GatewayConfig::resolve_path(None, &[]),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn test_load() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert!(config.logging_enabled());
        assert_eq!(config.ipc.sub, "ipc:///tmp/to.modbus");
        assert_eq!(config.ipc.publish, "ipc:///tmp/from.modbus");
        assert_eq!(config.timeout_us(), 200000);
    }

    #[test]
    fn test_save_keeps_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let mut config = GatewayConfig::load(file.path()).unwrap();
        config.set_timeout_us(350000);
        config.save(file.path()).unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(saved["version"], "0.3.0");
        assert_eq!(saved["mbtcp"]["connect_timeout"].as_f64(), Some(350000.0));

        let reloaded = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(reloaded.timeout_us(), 350000);
    }

    #[test]
    fn test_load_failures_are_configuration_errors() {
        let missing = GatewayConfig::load("/nonexistent/modbusd.json").unwrap_err();
        assert!(matches!(missing, ModbusError::Configuration { .. }));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ syslog: ").unwrap();
        let broken = GatewayConfig::load(file.path()).unwrap_err();
        assert!(matches!(broken, ModbusError::Configuration { .. }));
    }

    #[test]
    fn test_boolean_flag_and_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{"syslog": false}"#).unwrap();
        assert!(!config.logging_enabled());
        assert_eq!(config.ipc, IpcConfig::default());
        assert_eq!(config.timeout_us(), DEFAULT_TIMEOUT_US);
    }
}
