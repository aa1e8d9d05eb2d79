//! Configuration management for the Inside client
//!
//! Layered the usual way: built-in defaults, then the TOML file, then
//! `INSIDE_*` environment variables.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{ClientCredentials, DEFAULT_CLIENT_TYPE};
use crate::audio::{DEFAULT_BLOCK_SIZE, WIRE_SAMPLE_RATE};
use crate::{Error, Result};

pub use file::config_file_path;
use file::InsideConfigFile;

/// Default server `host:port`
pub const DEFAULT_SERVER: &str = "inside-dev.gigagenie.ai:30109";

/// Websocket subprotocol token
pub const DEFAULT_SUBPROTOCOL: &str = "device-protocol";

/// Device model sent with authorize
pub const DEFAULT_DEVICE_MODEL: &str = "sample-cli-web";

/// DSS status tags reported until the server changes them
pub const DEFAULT_DSS_STATUS: [&str; 4] = ["SU:016", "SU:027", "SI:002", "SG:000"];

/// Inside client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server `host:port`, or a full websocket URL
    pub server: String,

    /// Client type tag sent with every signed exchange
    pub client_type: String,

    /// Websocket subprotocol token
    pub subprotocol: String,

    /// Device model sent with authorize
    pub device_model: String,

    /// Credentials, when all of id, key and secret are configured
    pub credentials: Option<ClientCredentials>,

    /// Reconnect behaviour
    pub reconnect: ReconnectPolicy,

    /// Audio settings
    pub audio: AudioConfig,

    /// DSS status tags at session start
    pub initial_dss_status: Vec<String>,

    /// Path to data directory (credential store)
    pub data_dir: PathBuf,
}

/// When the session reconnects on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect after a transport error (off by default)
    pub auto_reconnect_on_error: bool,

    /// Connect attempts allowed before giving up on auto-reconnect
    pub max_retries: u32,

    /// Delay before reconnecting after a service disconnect event
    pub service_disconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect_on_error: false,
            max_retries: 5,
            service_disconnect_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Whether a transport error after `attempts` connect attempts should reconnect
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        self.auto_reconnect_on_error && attempts < self.max_retries
    }
}

/// Audio settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Samples per capture block
    pub block_size: usize,

    /// Wire sample rate in both directions
    pub wire_sample_rate: u32,

    /// Number of TTS channels (channel ids `0..tts_channels`)
    pub tts_channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            wire_sample_rate: WIRE_SAMPLE_RATE,
            tts_channels: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            device_model: DEFAULT_DEVICE_MODEL.to_string(),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
            audio: AudioConfig::default(),
            initial_dss_status: DEFAULT_DSS_STATUS.iter().map(ToString::to_string).collect(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".inside"),
        |d| d.data_dir().join("inside"),
    )
}

fn parse_env<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {name}: {v:?}")))
        })
        .transpose()
}

fn parse_bool_env(name: &str, value: Option<String>) -> Result<Option<bool>> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid value for {name}: {v:?}"))),
        })
        .transpose()
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an invalid value
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |name| std::env::var(name).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an invalid value
    pub fn from_sources(
        fc: InsideConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let server = env("INSIDE_SERVER")
            .or(fc.server.address)
            .unwrap_or(defaults.server);

        let id = env("INSIDE_CLIENT_ID").or(fc.client.id);
        let key = env("INSIDE_CLIENT_KEY").or(fc.client.key);
        let secret = env("INSIDE_CLIENT_SECRET").or(fc.client.secret);
        let uuid = env("INSIDE_CLIENT_UUID").or(fc.client.uuid);
        let credentials = match (id, key, secret) {
            (Some(id), Some(key), Some(secret)) => {
                let mut creds = ClientCredentials::new(id, key, secret);
                creds.uuid = uuid;
                Some(creds)
            }
            (None, None, None) => None,
            _ => {
                tracing::warn!("incomplete client credentials configured, ignoring");
                None
            }
        };

        let reconnect = ReconnectPolicy {
            auto_reconnect_on_error: parse_bool_env(
                "INSIDE_AUTO_RECONNECT",
                env("INSIDE_AUTO_RECONNECT"),
            )?
            .or(fc.reconnect.auto_reconnect_on_error)
            .unwrap_or(defaults.reconnect.auto_reconnect_on_error),
            max_retries: parse_env("INSIDE_MAX_RETRIES", env("INSIDE_MAX_RETRIES"))?
                .or(fc.reconnect.max_retries)
                .unwrap_or(defaults.reconnect.max_retries),
            service_disconnect_delay: fc
                .reconnect
                .service_disconnect_delay_secs
                .map_or(defaults.reconnect.service_disconnect_delay, Duration::from_secs),
        };

        let audio = AudioConfig {
            block_size: fc.audio.block_size.unwrap_or(defaults.audio.block_size),
            wire_sample_rate: defaults.audio.wire_sample_rate,
            tts_channels: fc.audio.tts_channels.unwrap_or(defaults.audio.tts_channels),
        };

        let data_dir = env("INSIDE_DATA_DIR")
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        Ok(Self {
            server,
            client_type: fc.server.client_type.unwrap_or(defaults.client_type),
            subprotocol: fc.server.subprotocol.unwrap_or(defaults.subprotocol),
            device_model: fc.server.device_model.unwrap_or(defaults.device_model),
            credentials,
            reconnect,
            audio,
            initial_dss_status: fc
                .initial_dss_status
                .unwrap_or(defaults.initial_dss_status),
            data_dir,
        })
    }

    /// Websocket URL for the configured server
    #[must_use]
    pub fn websocket_url(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("wss://{}", self.server)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(InsideConfigFile::default(), env_of(&[])).unwrap();
        assert_eq!(config.server, DEFAULT_SERVER);
        assert_eq!(config.client_type, "GINSIDE");
        assert_eq!(config.subprotocol, "device-protocol");
        assert!(config.credentials.is_none());
        assert!(!config.reconnect.auto_reconnect_on_error);
        assert_eq!(config.reconnect.max_retries, 5);
        assert_eq!(config.reconnect.service_disconnect_delay, Duration::from_secs(5));
        assert_eq!(config.audio.block_size, 4096);
        assert_eq!(config.audio.tts_channels, 2);
        assert_eq!(
            config.initial_dss_status,
            vec!["SU:016", "SU:027", "SI:002", "SG:000"]
        );
        assert_eq!(config.websocket_url(), format!("wss://{DEFAULT_SERVER}"));
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse_config_file(
            r#"
            [server]
            address = "file-host:1"

            [client]
            id = "file-id"
            key = "file-key"
            secret = "file-secret"

            [reconnect]
            max_retries = 2
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_of(&[
                ("INSIDE_SERVER", "ws://127.0.0.1:9000"),
                ("INSIDE_CLIENT_UUID", "u-9"),
                ("INSIDE_AUTO_RECONNECT", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.websocket_url(), "ws://127.0.0.1:9000");
        let creds = config.credentials.unwrap();
        assert_eq!(creds.id, "file-id");
        assert_eq!(creds.uuid.as_deref(), Some("u-9"));
        assert!(config.reconnect.auto_reconnect_on_error);
        assert_eq!(config.reconnect.max_retries, 2);
    }

    #[test]
    fn test_incomplete_credentials_ignored() {
        let config = Config::from_sources(
            InsideConfigFile::default(),
            env_of(&[("INSIDE_CLIENT_ID", "only-id")]),
        )
        .unwrap();
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_invalid_env_value() {
        let err = Config::from_sources(
            InsideConfigFile::default(),
            env_of(&[("INSIDE_MAX_RETRIES", "many")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(
            Config::from_sources(
                InsideConfigFile::default(),
                env_of(&[("INSIDE_AUTO_RECONNECT", "maybe")]),
            )
            .is_err()
        );
    }

    #[test]
    fn test_should_retry() {
        let mut policy = ReconnectPolicy::default();
        assert!(!policy.should_retry(0));
        policy.auto_reconnect_on_error = true;
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }
}
