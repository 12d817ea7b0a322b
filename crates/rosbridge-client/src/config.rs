//! Client configuration – reads/writes `~/.rosbridge/client.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use rosbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Where the rosbridge server lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host name or address of the rosbridge server.
    #[serde(default = "default_host")]
    pub host: String,

    /// rosbridge WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use `wss://` instead of `ws://`.
    #[serde(default)]
    pub tls: bool,

    /// Optional URL path, e.g. `"rosbridge"` behind a reverse proxy.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    9090
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: false,
            path: String::new(),
        }
    }
}

impl ClientConfig {
    /// Shorthand for a plain `ws://host:port` endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// The WebSocket URL the transport connects to.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            format!("{scheme}://{}:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}/{path}", self.host, self.port)
        }
    }
}

/// Return the path to `~/.rosbridge/client.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosbridge").join("client.toml")
}

/// Load the config from the default path, with environment overrides.
/// Returns `None` if the file does not exist.
pub fn load() -> Result<Option<ClientConfig>, BridgeError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path, as written.
pub fn load_from(path: &Path) -> Result<Option<ClientConfig>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: ClientConfig = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `ROSBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSBRIDGE_HOST` | `host` |
/// | `ROSBRIDGE_PORT` | `port` (ignored unless a valid `u16`) |
/// | `ROSBRIDGE_TLS` | `tls` (`1`/`true` enables) |
pub fn apply_env_overrides(cfg: &mut ClientConfig) {
    if let Ok(v) = std::env::var("ROSBRIDGE_HOST") {
        cfg.host = v;
    }
    if let Ok(v) = std::env::var("ROSBRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("ROSBRIDGE_TLS") {
        cfg.tls = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
    }
}

/// Save the config, creating the parent directory if necessary.
pub fn save_to(cfg: &ClientConfig, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::Config(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        BridgeError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
