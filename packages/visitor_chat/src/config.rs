use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ChatError;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     api_url = "https://chat.example.com"
//                    reconnect_delay_ms = 3000
//
//   env var:         VISITOR_CHAT_API_URL=https://chat.example.com

/// Tunables as they appear in `config.toml` / the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    /// Realtime endpoint base. Derived from `api_url` when absent.
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Open the chat window as soon as the controller starts.
    #[serde(default)]
    pub auto_open: bool,
    /// Open the chat window when an operator or system message arrives.
    #[serde(default)]
    pub open_on_new_message: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            websocket_url: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            auto_open: false,
            open_on_new_message: false,
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

/// Build a figment that layers: defaults → config file → VISITOR_CHAT_* env vars.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("VISITOR_CHAT_"))
}

/// Default data directory: `<platform data dir>/visitor-chat`.
pub fn default_data_dir() -> Result<PathBuf, ChatError> {
    dirs::data_dir()
        .map(|dir| dir.join("visitor-chat"))
        .ok_or_else(|| ChatError::Config("could not determine a data directory".into()))
}

// =============================================================================
// Runtime config (resolved from FileConfig, used by the controller)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Base URL of the chat API, without a trailing slash.
    pub api_url: String,
    /// Realtime endpoint base; the session token is appended as a path segment.
    pub websocket_url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub auto_open: bool,
    pub open_on_new_message: bool,
}

impl ChatConfig {
    /// Config with default tunables for the given API base URL.
    pub fn new(api_url: &str) -> Result<Self, ChatError> {
        Self::from_file(&FileConfig {
            api_url: Some(api_url.to_string()),
            ..Default::default()
        })
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self, ChatError> {
        let api_url = fc
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Config("api_url is required".into()))?
            .trim_end_matches('/')
            .to_string();

        let websocket_url = match fc.websocket_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => derive_websocket_url(&api_url)?,
        };

        Ok(Self {
            api_url,
            websocket_url,
            reconnect_delay: Duration::from_millis(fc.reconnect_delay_ms),
            max_reconnect_attempts: fc.max_reconnect_attempts,
            auto_open: fc.auto_open,
            open_on_new_message: fc.open_on_new_message,
        })
    }
}

/// `https://host:port/...` → `wss://host:port/ws`; any other scheme maps to `ws`.
pub fn derive_websocket_url(api_url: &str) -> Result<String, ChatError> {
    let url = Url::parse(api_url)
        .map_err(|e| ChatError::Config(format!("api_url {api_url:?} is not a URL: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ChatError::Config(format!("api_url {api_url:?} has no host")))?;

    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}/ws"),
        None => format!("{scheme}://{host}/ws"),
    })
}
