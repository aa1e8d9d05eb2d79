//! TOML configuration file loading
//!
//! Supports `~/.config/inside/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct InsideConfigFile {
    /// Server connection settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Client credentials
    #[serde(default)]
    pub client: ClientFileConfig,

    /// Reconnect behaviour
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,

    /// Capture and playback settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// DSS status tags reported before the server changes them
    pub initial_dss_status: Option<Vec<String>>,

    /// Where the credential store lives
    pub data_dir: Option<String>,
}

/// Server connection settings
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// `host:port`, or a full `wss://` URL
    pub address: Option<String>,
    /// Client type tag
    pub client_type: Option<String>,
    /// Websocket subprotocol token
    pub subprotocol: Option<String>,
    /// Device model sent with authorize
    pub device_model: Option<String>,
}

/// Client credentials
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    pub id: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub uuid: Option<String>,
}

/// Reconnect behaviour
#[derive(Debug, Default, Deserialize)]
pub struct ReconnectFileConfig {
    /// Reconnect automatically after a transport error
    pub auto_reconnect_on_error: Option<bool>,
    /// Connect attempts before giving up
    pub max_retries: Option<u32>,
    /// Seconds to wait before reconnecting after a service disconnect
    pub service_disconnect_delay_secs: Option<u64>,
}

/// Capture and playback settings
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per capture block
    pub block_size: Option<usize>,
    /// Number of TTS channels (starting at 0)
    pub tts_channels: Option<u32>,
}

/// Parse config file text
///
/// # Errors
///
/// Returns error if the text is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<InsideConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `InsideConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> InsideConfigFile {
    let Some(path) = config_file_path() else {
        return InsideConfigFile::default();
    };

    if !path.exists() {
        return InsideConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                InsideConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            InsideConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/inside/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("inside").join("config.toml"))
}
