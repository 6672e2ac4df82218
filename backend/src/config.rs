//! Configuration management.

use crate::workspace::WorkspaceConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    gateway: GatewaySection,
    #[serde(default)]
    workspace: WorkspaceConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_bind")]
    bind: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewaySection {
    #[serde(default = "default_session_ttl_secs")]
    session_ttl_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
    /// Browser origins accepted besides localhost
    #[serde(default)]
    allowed_origins: Vec<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Directory for daily rotated log files (in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    chromedash_types::DEFAULT_PORT
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_session_ttl_secs() -> u64 {
    crate::gateway::DEFAULT_SESSION_TTL.as_secs()
}

fn default_keep_alive_secs() -> u64 {
    15
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Address to bind to
    pub bind: IpAddr,
    /// Idle time after which a gateway session is reclaimed
    pub session_ttl: Duration,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
    /// Extra browser origins accepted by the gateway and CORS
    pub allowed_origins: Vec<String>,
    /// Google Workspace API settings
    pub workspace: WorkspaceConfig,
    /// Directory for log files (if set, logs are also written to a daily rotated file)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in user config directory (~/.config/chromedash/ on Linux)
    /// 2. `.chromedash.toml` in current directory
    ///
    /// Environment variables use the `CHROMEDASH_` prefix with `__` between
    /// sections, e.g. `CHROMEDASH_GATEWAY__SESSION_TTL_SECS=600`.
    pub fn from_figment(
        port: Option<u16>,
        bind: Option<IpAddr>,
        customer_id: Option<String>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".chromedash.toml"));
        let user_config = directories::ProjectDirs::from("", "", "chromedash")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("CHROMEDASH_").split("__"));

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(b) = bind {
            figment = figment.merge(Serialized::default("server.bind", b));
        }
        if let Some(ref c) = customer_id {
            figment = figment.merge(Serialized::default("workspace.customer_id", c));
        }

        let config_file: ConfigFile = figment.extract()?;
        Self::from_file(config_file)
    }

    fn from_file(file: ConfigFile) -> anyhow::Result<Self> {
        if file.gateway.session_ttl_secs == 0 {
            anyhow::bail!("gateway.session_ttl_secs must be greater than zero");
        }
        if file.gateway.keep_alive_secs == 0 {
            anyhow::bail!("gateway.keep_alive_secs must be greater than zero");
        }

        Ok(Self {
            port: file.server.port,
            bind: file.server.bind,
            session_ttl: Duration::from_secs(file.gateway.session_ttl_secs),
            keep_alive: Duration::from_secs(file.gateway.keep_alive_secs),
            allowed_origins: file.gateway.allowed_origins,
            workspace: file.workspace,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            session_ttl: Duration::from_secs(default_session_ttl_secs()),
            keep_alive: Duration::from_secs(default_keep_alive_secs()),
            allowed_origins: Vec::new(),
            workspace: WorkspaceConfig::default(),
            log_file: None,
            log_level: None,
        }
    }
}
