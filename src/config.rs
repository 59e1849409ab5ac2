//! Configuration system for the transport agent
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TRANSPORT_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identity and basic settings
    pub agent: AgentSettings,

    /// Platform endpoint addresses
    pub endpoints: EndpointSettings,

    /// Driver loop settings
    pub driver: DriverSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Agent identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Human-readable agent name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Base data directory (identity file lives here)
    pub data_dir: String,
}

/// Platform endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Fare quoting API base URL (payment service)
    pub fare_api_url: String,

    /// Booking API base URL (transport service)
    pub booking_api_url: String,

    /// Ride tracking stream base URL
    pub tracking_url: String,

    /// Driver location socket base URL
    pub location_ws_url: String,

    /// Driver assignment socket base URL
    pub assignment_ws_url: String,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Driver loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Interval between position samples in milliseconds
    pub publish_interval_ms: u64,

    /// Bound on waiting for the first GPS fix, in milliseconds
    pub first_fix_timeout_ms: u64,

    /// Simulated ride duration in seconds
    pub ride_duration_secs: u64,

    /// Accept assignments without prompting
    pub auto_accept: bool,

    /// Initial reconnect delay for the assignment socket, in milliseconds
    pub reconnect_initial_delay_ms: u64,

    /// Reconnect delay ceiling, in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSettings::default(),
            endpoints: EndpointSettings::default(),
            driver: DriverSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: "~/.transport-agent".to_string(),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            fare_api_url: "http://localhost:8080".to_string(),
            booking_api_url: "http://localhost:8081".to_string(),
            tracking_url: "http://localhost:8082".to_string(),
            location_ws_url: "ws://localhost:8083".to_string(),
            assignment_ws_url: "ws://localhost:8084".to_string(),
            connect_timeout_ms: 10000,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            publish_interval_ms: 2000,
            first_fix_timeout_ms: 5000,
            ride_duration_secs: 20,
            auto_accept: false,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            max_reconnect_attempts: 0, // Infinite
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("transport-agent.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("transport-agent").join("agent.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".transport-agent").join("agent.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/transport-agent/agent.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Agent settings
        if let Ok(val) = std::env::var("TRANSPORT_AGENT_NAME") {
            self.agent.name = Some(val);
        }
        if let Ok(val) = std::env::var("TRANSPORT_DATA_DIR") {
            self.agent.data_dir = val;
        }

        // Endpoint settings
        if let Ok(val) = std::env::var("TRANSPORT_FARE_API_URL") {
            self.endpoints.fare_api_url = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_BOOKING_API_URL") {
            self.endpoints.booking_api_url = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_TRACKING_URL") {
            self.endpoints.tracking_url = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_LOCATION_WS_URL") {
            self.endpoints.location_ws_url = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_ASSIGNMENT_WS_URL") {
            self.endpoints.assignment_ws_url = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.endpoints.connect_timeout_ms = n;
            }
        }

        // Driver settings
        if let Ok(val) = std::env::var("TRANSPORT_PUBLISH_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.driver.publish_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("TRANSPORT_RIDE_DURATION_SECS") {
            if let Ok(n) = val.parse() {
                self.driver.ride_duration_secs = n;
            }
        }
        if let Ok(val) = std::env::var("TRANSPORT_AUTO_ACCEPT") {
            self.driver.auto_accept = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("TRANSPORT_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.driver.max_reconnect_attempts = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("TRANSPORT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TRANSPORT_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TRANSPORT_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.agent.data_dir = expand_path(&self.agent.data_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("fare_api_url", &self.endpoints.fare_api_url),
            ("booking_api_url", &self.endpoints.booking_api_url),
            ("tracking_url", &self.endpoints.tracking_url),
        ] {
            if url.is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }

        for (name, url) in [
            ("location_ws_url", &self.endpoints.location_ws_url),
            ("assignment_ws_url", &self.endpoints.assignment_ws_url),
        ] {
            if url.is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(Error::Config(format!(
                    "{} must start with ws:// or wss://",
                    name
                )));
            }
        }

        if self.driver.publish_interval_ms == 0 {
            return Err(Error::Config(
                "publish_interval_ms must be greater than zero".to_string(),
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Get the data directory as a PathBuf
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.agent.data_dir)
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".transport-agent")
                .join("agent.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    // Generate default config with comments
    let config_content = generate_default_config();

    // Write the file
    fs::write(&config_path, config_content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Transport Agent Configuration

[agent]
# Human-readable agent name
# name = "My Agent"

# Base data directory (driver and user ids persist here)
data_dir = "~/.transport-agent"

[endpoints]
# Fare quoting API (payment service)
fare_api_url = "http://localhost:8080"

# Booking API (transport service)
booking_api_url = "http://localhost:8081"

# Ride tracking stream
tracking_url = "http://localhost:8082"

# Driver location socket
location_ws_url = "ws://localhost:8083"

# Driver assignment socket
assignment_ws_url = "ws://localhost:8084"

# Connection timeout in milliseconds
connect_timeout_ms = 10000

[driver]
# Interval between position samples in milliseconds
publish_interval_ms = 2000

# Bound on waiting for the first GPS fix, in milliseconds
first_fix_timeout_ms = 5000

# Simulated ride duration in seconds
ride_duration_secs = 20

# Accept assignments without prompting
auto_accept = false

# Assignment socket reconnect backoff, in milliseconds
reconnect_initial_delay_ms = 1000
reconnect_max_delay_ms = 30000

# Maximum reconnection attempts (0 = infinite)
max_reconnect_attempts = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.transport-agent/logs/agent.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.endpoints.booking_api_url, "http://localhost:8081");
        assert_eq!(config.driver.publish_interval_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        // Set env vars
        env::set_var("TRANSPORT_BOOKING_API_URL", "http://test.example.com");
        env::set_var("TRANSPORT_PUBLISH_INTERVAL_MS", "500");
        env::set_var("TRANSPORT_LOG_LEVEL", "debug");

        let mut config = AgentConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.endpoints.booking_api_url, "http://test.example.com");
        assert_eq!(config.driver.publish_interval_ms, 500);
        assert_eq!(config.logging.level, "debug");

        // Cleanup
        env::remove_var("TRANSPORT_BOOKING_API_URL");
        env::remove_var("TRANSPORT_PUBLISH_INTERVAL_MS");
        env::remove_var("TRANSPORT_LOG_LEVEL");
    }

    #[test]
    fn test_validation_invalid_ws_url() {
        let mut config = AgentConfig::default();
        config.endpoints.assignment_ws_url = "http://invalid.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_http_url() {
        let mut config = AgentConfig::default();
        config.endpoints.fare_api_url = "ws://invalid.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut config = AgentConfig::default();
        config.driver.publish_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AgentConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = AgentConfig::default();
        config.agent.data_dir = "~/test/data".to_string();
        config.expand_paths();

        // Should not contain ~
        assert!(!config.agent.data_dir.contains('~'));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AgentConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.endpoints.booking_api_url, parsed.endpoints.booking_api_url);
        assert_eq!(config.driver.ride_duration_secs, parsed.driver.ride_duration_secs);
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[agent]
name = "test-agent"
data_dir = "/tmp/agent"

[endpoints]
booking_api_url = "http://custom.example.com:9081"
connect_timeout_ms = 5000

[driver]
publish_interval_ms = 1000
auto_accept = true

[logging]
level = "debug"
"#;

        let config: AgentConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.agent.name, Some("test-agent".to_string()));
        assert_eq!(config.agent.data_dir, "/tmp/agent");
        assert_eq!(
            config.endpoints.booking_api_url,
            "http://custom.example.com:9081"
        );
        assert_eq!(config.endpoints.connect_timeout_ms, 5000);
        assert_eq!(config.driver.publish_interval_ms, 1000);
        assert!(config.driver.auto_accept);
        assert_eq!(config.logging.level, "debug");
    }
}
