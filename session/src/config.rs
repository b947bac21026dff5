use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use codeforge_utils_home_dir::find_codeforge_home;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable holding the bearer credential. The token is never
/// read from the config file.
pub const API_TOKEN_ENV: &str = "CODEFORGE_API_TOKEN";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to locate the Codeforge home directory: {0}")]
    Home(#[source] io::Error),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings for a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Websocket endpoint of the agent service. `http(s)` URLs are accepted
    /// and converted.
    pub url: Option<String>,
    /// Fixed wait before every reconnection attempt.
    pub reconnect_delay: Duration,
    /// Reconnection attempts per outage; `0` retries forever.
    pub max_reconnect_attempts: u32,
    /// Capacity of the event channel handed to the consumer.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: 0,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    #[serde(default)]
    session: SessionToml,
}

#[derive(Debug, Default, Deserialize)]
struct SessionToml {
    url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    event_buffer: Option<usize>,
}

impl SessionConfig {
    /// Loads `config.toml` from the Codeforge home directory.
    pub fn load() -> Result<Self, ConfigError> {
        let home = find_codeforge_home().map_err(ConfigError::Home)?;
        Self::load_from_home(&home)
    }

    /// Loads `config.toml` from `home`. A missing file yields defaults.
    pub fn load_from_home(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE_NAME);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let parsed: ConfigToml = match toml::from_str(&contents) {
            Ok(parsed) => parsed,
            Err(source) => return Err(ConfigError::Parse { path, source }),
        };
        Ok(Self::from_toml(parsed.session))
    }

    fn from_toml(session: SessionToml) -> Self {
        let defaults = Self::default();
        Self {
            url: session.url.filter(|url| !url.is_empty()),
            reconnect_delay: session
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            max_reconnect_attempts: session
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            event_buffer: session
                .event_buffer
                .unwrap_or(defaults.event_buffer)
                .max(1),
        }
    }
}

/// Reads the bearer credential from [`API_TOKEN_ENV`].
pub fn api_token_from_env() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
        .ok()
        .filter(|token| !token.is_empty())
}
