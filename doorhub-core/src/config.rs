use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub control: ControlConfig,
    pub bus: BusConfig,
    pub audio: AudioConfig,
    pub vision: VisionConfig,
    pub logging: LoggingConfig,
}

/// Trigger operating mode, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Only explicit button/remote triggers start capture
    Manual,
    /// Motion sensor can also auto-start capture, subject to the override lock
    Motion,
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self::Manual
    }
}

impl std::str::FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "motion" => Ok(Self::Motion),
            other => Err(format!("invalid mode '{other}' (expected manual|motion)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Serve HTTPS instead of HTTP
    pub secure: bool,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    /// Root directory of the client application assets
    pub asset_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
            https_port: 8001,
            secure: false,
            tls_cert_path: "./certs/doorhub.crt".to_string(),
            tls_key_path: "./certs/doorhub.key".to_string(),
            asset_root: "./wwwroot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Target capture rate in frames per second
    pub frame_rate: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub mode: OperatingMode,
    /// Seconds before a manual-stop override lock is released
    pub override_reset_seconds: u64,
    /// Minimum seconds between accepted bell presses
    pub bell_cooldown_seconds: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Manual,
            override_reset_seconds: 60,
            bell_cooldown_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_seconds: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "doorhub".to_string(),
            keep_alive_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Bell alert sound file played on accepted button presses
    pub alert_sound_path: String,
    /// Volume step in percent for remote volume commands
    pub volume_step: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            alert_sound_path: "./bell1.mp3".to_string(),
            volume_step: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub max_tokens: u32,
    pub prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 400,
            prompt: "Describe the image in detail in 2-3 sentences.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (DOORHUB_SERVER__HTTP_PORT, etc.)
        builder = builder.add_source(env_source());

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Address the HTTP(S) server binds to, depending on secure mode
    #[must_use]
    pub fn http_address(&self) -> String {
        let port = if self.server.secure {
            self.server.https_port
        } else {
            self.server.http_port
        };
        format!("{}:{}", self.server.host, port)
    }

    /// Target frame interval derived from the configured frame rate
    #[must_use]
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.camera.frame_rate.max(1)))
    }

    /// Validate configuration, collecting every error (fail fast at startup)
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.camera.frame_rate == 0 {
            errors.push("camera.frame_rate must be greater than zero".to_string());
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            errors.push("camera resolution must be non-zero".to_string());
        }
        if self.bus.host.is_empty() {
            errors.push("bus.host must not be empty".to_string());
        }
        if self.server.secure {
            if !Path::new(&self.server.tls_cert_path).exists() {
                errors.push(format!(
                    "TLS certificate not found at {}",
                    self.server.tls_cert_path
                ));
            }
            if !Path::new(&self.server.tls_key_path).exists() {
                errors.push(format!(
                    "TLS private key not found at {}",
                    self.server.tls_key_path
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Environment override source. Sections and fields are separated by `__`
/// so multi-word field names like `http_port` stay addressable
/// (`DOORHUB_SERVER__HTTP_PORT`, `DOORHUB_CONTROL__OVERRIDE_RESET_SECONDS`).
fn env_source() -> Environment {
    Environment::with_prefix("DOORHUB")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_secure_mode_selects_https_port() {
        let config = Config {
            server: ServerConfig {
                secure: true,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.http_address(), "0.0.0.0:8001");
    }

    #[test]
    fn test_secure_mode_requires_tls_material() {
        let config = Config {
            server: ServerConfig {
                secure: true,
                tls_cert_path: "/nonexistent/doorhub.crt".to_string(),
                tls_key_path: "/nonexistent/doorhub.key".to_string(),
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_frame_interval() {
        let config = Config::default();
        let interval = config.frame_interval();
        assert!(interval > std::time::Duration::from_millis(41));
        assert!(interval < std::time::Duration::from_millis(42));
    }

    #[test]
    fn test_env_overrides_reach_nested_fields() {
        let mut vars = config::Map::new();
        vars.insert("DOORHUB_SERVER__HTTP_PORT".to_string(), "9000".to_string());
        vars.insert("DOORHUB_CONTROL__MODE".to_string(), "motion".to_string());
        vars.insert(
            "DOORHUB_CONTROL__OVERRIDE_RESET_SECONDS".to_string(),
            "90".to_string(),
        );

        let config: Config = ConfigBuilder::builder()
            .add_source(env_source().source(Some(vars)))
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config");

        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.control.mode, OperatingMode::Motion);
        assert_eq!(config.control.override_reset_seconds, 90);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("manual".parse::<OperatingMode>(), Ok(OperatingMode::Manual));
        assert_eq!("MOTION".parse::<OperatingMode>(), Ok(OperatingMode::Motion));
        assert!("auto".parse::<OperatingMode>().is_err());
    }
}
