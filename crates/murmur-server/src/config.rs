//! Server configuration: TOML file + CLI overrides.

use murmur_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Port of the auth HTTP API.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Port of the WebSocket relay.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Per-connection outbound channel capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_port: default_ws_port(),
            ws_path: default_ws_path(),
            outbound_buffer: default_outbound_buffer(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Session token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    /// Hex-encoded token signing secret. Random per process when absent.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_ttl: default_token_ttl(),
            secret: None,
            cookie_name: default_cookie_name(),
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    3000
}
fn default_ws_port() -> u16 {
    3001
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_outbound_buffer() -> usize {
    64
}
fn default_max_frame_size() -> usize {
    1_048_576
}
fn default_token_ttl() -> u64 {
    7200
}
fn default_cookie_name() -> String {
    "token".to_string()
}
fn default_login_attempts() -> u32 {
    5
}

/// Values supplied on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub ws_port: Option<u16>,
    pub ws_path: Option<String>,
    pub token_ttl: Option<u64>,
    pub secret: Option<String>,
}

/// Resolved server configuration (CLI overrides applied, secret decoded).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub ws_port: u16,
    pub ws_path: String,
    pub outbound_buffer: usize,
    pub max_frame_size: usize,
    pub token_ttl: u64,
    /// Decoded signing secret; `None` means generate one at startup.
    pub secret: Option<Vec<u8>>,
    pub cookie_name: String,
    pub login_attempts_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_port: default_ws_port(),
            ws_path: default_ws_path(),
            outbound_buffer: default_outbound_buffer(),
            max_frame_size: default_max_frame_size(),
            token_ttl: default_token_ttl(),
            secret: None,
            cookie_name: default_cookie_name(),
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file (if present), then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Parse config file contents.
    pub fn parse(content: &str) -> RelayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Merge a parsed file with CLI overrides.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> RelayResult<Self> {
        let ws_path = overrides.ws_path.unwrap_or(file.server.ws_path);
        if !ws_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "ws_path must start with '/': {ws_path}"
            )));
        }
        if file.server.outbound_buffer == 0 {
            return Err(RelayError::Config("outbound_buffer must be > 0".into()));
        }

        let secret = overrides
            .secret
            .or(file.auth.secret)
            .map(|hex_secret| {
                hex::decode(hex_secret.trim())
                    .map_err(|e| RelayError::Config(format!("auth.secret is not valid hex: {e}")))
            })
            .transpose()?;
        if matches!(&secret, Some(s) if s.len() < 16) {
            return Err(RelayError::Config(
                "auth.secret must be at least 16 bytes".into(),
            ));
        }

        Ok(Self {
            bind: overrides.bind.unwrap_or(file.server.bind),
            port: overrides.port.unwrap_or(file.server.port),
            ws_port: overrides.ws_port.unwrap_or(file.server.ws_port),
            ws_path,
            outbound_buffer: file.server.outbound_buffer,
            max_frame_size: file.server.max_frame_size,
            token_ttl: overrides.token_ttl.unwrap_or(file.auth.token_ttl),
            secret,
            cookie_name: file.auth.cookie_name,
            login_attempts_per_minute: file.auth.login_attempts_per_minute,
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
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = ServerConfig::resolve(ServerConfig::parse("").unwrap(), Overrides::default())
            .unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.ws_port, 3001);
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.token_ttl, 7200);
        assert_eq!(cfg.cookie_name, "token");
        assert!(cfg.secret.is_none());
    }

    #[test]
    fn file_values_and_overrides() {
        let file = ServerConfig::parse(
            r#"
            [server]
            port = 8080
            ws_port = 8081
            outbound_buffer = 16

            [auth]
            token_ttl = 60
            cookie_name = "session"
            secret = "00112233445566778899aabbccddeeff"
            "#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(
            file,
            Overrides {
                ws_port: Some(9001),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.ws_port, 9001);
        assert_eq!(cfg.outbound_buffer, 16);
        assert_eq!(cfg.token_ttl, 60);
        assert_eq!(cfg.cookie_name, "session");
        assert_eq!(cfg.secret.as_deref().map(<[u8]>::len), Some(16));
    }

    #[test]
    fn rejects_bad_secret() {
        let file = ServerConfig::parse("[auth]\nsecret = \"not-hex\"").unwrap();
        assert!(ServerConfig::resolve(file, Overrides::default()).is_err());

        let file = ServerConfig::parse("[auth]\nsecret = \"abcd\"").unwrap();
        assert!(ServerConfig::resolve(file, Overrides::default()).is_err());
    }

    #[test]
    fn rejects_relative_ws_path() {
        let overrides = Overrides {
            ws_path: Some("ws".into()),
            ..Overrides::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), overrides).is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(ServerConfig::parse("[server\nport = ").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/murmur/config.toml")),
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 3000);
    }
}
