//! Hub configuration: TOML file + CLI overrides.

use std::path::{Path, PathBuf};

use beamdrop_core::{HubError, HubResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Relay payload traffic through the hub for peers that cannot
    /// establish a direct connection.
    #[serde(default)]
    pub ws_fallback: bool,
    /// Header carrying the real client address behind a reverse proxy
    /// (e.g. `x-forwarded-for`). Unset means the socket address is used.
    #[serde(default)]
    pub trusted_proxy_header: Option<String>,
    /// Path to a JSON blob handed to clients verbatim as `rtcConfig`.
    #[serde(default)]
    pub rtc_config_file: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_fallback: false,
            trusted_proxy_header: None,
            rtc_config_file: None,
        }
    }
}

/// `[limits]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    /// Join-family attempts allowed per peer within the window.
    #[serde(default = "default_join_attempts")]
    pub join_attempts: u32,
    /// Window length in seconds.
    #[serde(default = "default_join_window_secs")]
    pub join_window_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            join_attempts: default_join_attempts(),
            join_window_secs: default_join_window_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_join_attempts() -> u32 {
    10
}
fn default_join_window_secs() -> u64 {
    10
}

/// STUN-only fallback handed to clients when no blob is configured.
fn default_rtc_config() -> Value {
    serde_json::json!({
        "sdpSemantics": "unified-plan",
        "iceServers": [{ "urls": "stun:stun.l.google.com:19302" }],
    })
}

/// Resolved hub configuration (CLI overrides applied, blob loaded).
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    pub ws_fallback: bool,
    pub trusted_proxy_header: Option<String>,
    /// Opaque ICE/TURN blob pushed in `ws-config`.
    pub rtc_config: Value,
    pub join_attempts: u32,
    pub join_window_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_fallback: false,
            trusted_proxy_header: None,
            rtc_config: default_rtc_config(),
            join_attempts: default_join_attempts(),
            join_window_secs: default_join_window_secs(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a TOML file, then apply CLI overrides.
    ///
    /// A missing config file silently falls back to defaults; a file that
    /// exists but does not parse is an error. CLI arguments, when `Some`
    /// (or set, for flags), take precedence over file values.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
        cli_ws_fallback: bool,
        cli_rtc_config: Option<&str>,
    ) -> HubResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| HubError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let rtc_config_path = cli_rtc_config
            .map(|s| s.to_string())
            .or(file_config.server.rtc_config_file);
        let rtc_config = match rtc_config_path {
            Some(path) => {
                let expanded = expand_tilde(Path::new(&path));
                let content = std::fs::read_to_string(&expanded)?;
                serde_json::from_str(&content)
                    .map_err(|e| HubError::Config(format!("rtc config parse error: {e}")))?
            }
            None => default_rtc_config(),
        };

        Ok(Self {
            bind: cli_bind
                .map(|s| s.to_string())
                .unwrap_or(file_config.server.bind),
            port: cli_port.unwrap_or(file_config.server.port),
            ws_fallback: cli_ws_fallback || file_config.server.ws_fallback,
            trusted_proxy_header: file_config.server.trusted_proxy_header,
            rtc_config,
            join_attempts: file_config.limits.join_attempts,
            join_window_secs: file_config.limits.join_window_secs,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}
