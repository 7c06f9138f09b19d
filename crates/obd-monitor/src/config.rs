//! Monitor configuration

use obd_protocol::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-monitor";

/// Settings for the monitor process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial device of the adapter (e.g. "/dev/ttyUSB0" or "COM6")
    pub device: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// PIDs registered for polling once the adapter is up
    pub pollers: Vec<String>,
    /// Poll cadence; derived from the poller count when unset
    pub poll_interval_ms: Option<u64>,
    /// Ask for stored trouble codes right after connecting
    pub request_dtc_on_connect: bool,
    /// Max log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Protocol engine tuning
    pub client: ClientConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            pollers: ["rpm", "vss", "throttlepos", "temp", "maf"]
                .map(String::from)
                .to_vec(),
            poll_interval_ms: Some(10),
            request_dtc_on_connect: true,
            log_level: "info".to_string(),
            json_logs: false,
            client: ClientConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load defaults, then the config file, then `OBD__*` environment overrides.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let file = config::File::with_name(path.unwrap_or(DEFAULT_CONFIG_FILE))
            .required(path.is_some());
        let env = config::Environment::with_prefix("OBD")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("pollers");

        config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = MonitorConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.pollers, vec!["rpm", "vss", "throttlepos", "temp", "maf"]);
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(10)));
        assert_eq!(config.client.command_budget_ms, 50);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("obd-monitor-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "device = \"/dev/rfcomm0\"\npollers = [\"rpm\"]\n\n[client]\nadapter_timeout = 50\nprotocol = \"j1850_pwm\""
        )
        .unwrap();

        let config = MonitorConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.device, "/dev/rfcomm0");
        assert_eq!(config.pollers, vec!["rpm"]);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.client.adapter_timeout, 50);
        assert_eq!(config.client.init_sequence()[6], "ATSP1");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(MonitorConfig::load(Some("/nonexistent/obd-monitor.toml")).is_err());
    }
}
