use anyhow::{Context, Result};
use hickory_server::proto::op::ResponseCode;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use url::Url;

/// Problems found while turning the configuration into engine settings.
///
/// All of these are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("blocklist requires a location")]
    MissingLocation,
    #[error("invalid duration for reload '{0}'")]
    InvalidDuration(String),
    #[error("invalid negative duration for reload '{0}'")]
    NegativeReload(String),
    #[error("unknown response code '{0}', must be either 'nxdomain' or 'refused'")]
    UnknownBlockResponse(String),
    #[error("invalid bootstrap_dns address '{0}'")]
    InvalidBootstrap(String),
    #[error("list file '{}' does not exist", .0.display())]
    ListNotFound(PathBuf),
    #[error("unable to access list file '{}': {reason}", .path.display())]
    ListUnreadable { path: PathBuf, reason: String },
    #[error("list file '{}' is a directory", .0.display())]
    ListIsDirectory(PathBuf),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_upstream_servers")]
    pub upstream_servers: Vec<String>,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Filter stages, applied in file order.
    #[serde(default, rename = "blocklist")]
    pub blocklists: Vec<BlocklistStanza>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Directory relative list paths are resolved against.
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

/// One `[[blocklist]]` table, as written by the operator.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct BlocklistStanza {
    pub location: String,
    #[serde(default)]
    pub allowlist: Option<String>,
    #[serde(default)]
    pub domain_metrics: bool,
    #[serde(default)]
    pub bootstrap_dns: Option<String>,
    #[serde(default)]
    pub block_response: Option<String>,
    #[serde(default)]
    pub reload: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enable")]
    pub enable: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Response code written back for a blocked query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockResponse {
    #[default]
    NxDomain,
    Refused,
}

impl BlockResponse {
    pub fn response_code(self) -> ResponseCode {
        match self {
            BlockResponse::NxDomain => ResponseCode::NXDomain,
            BlockResponse::Refused => ResponseCode::Refused,
        }
    }
}

impl FromStr for BlockResponse {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nxdomain" => Ok(BlockResponse::NxDomain),
            "refused" => Ok(BlockResponse::Refused),
            other => Err(ConfigError::UnknownBlockResponse(other.to_string())),
        }
    }
}

/// Validated, immutable settings for one filter engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistConfig {
    pub location: String,
    pub allowlist: Option<String>,
    pub domain_metrics: bool,
    pub bootstrap_dns: Option<SocketAddr>,
    pub block_response: BlockResponse,
    /// Zero disables periodic reload.
    pub reload: Duration,
}

impl BlocklistConfig {
    /// Settings for a block list with every option at its default.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            allowlist: None,
            domain_metrics: false,
            bootstrap_dns: None,
            block_response: BlockResponse::default(),
            reload: Duration::ZERO,
        }
    }
}

impl BlocklistStanza {
    pub fn validate(&self, root: Option<&Path>) -> Result<BlocklistConfig, ConfigError> {
        if self.location.trim().is_empty() {
            return Err(ConfigError::MissingLocation);
        }
        let location = check_file_or_url(self.location.trim(), root)?;

        let allowlist = match &self.allowlist {
            Some(loc) => Some(check_file_or_url(loc.trim(), root)?),
            None => None,
        };

        let bootstrap_dns = self
            .bootstrap_dns
            .as_deref()
            .map(parse_bootstrap)
            .transpose()?;

        let block_response = match &self.block_response {
            Some(s) => s.parse()?,
            None => BlockResponse::default(),
        };

        let reload = match &self.reload {
            Some(s) => parse_reload(s)?,
            None => Duration::ZERO,
        };

        Ok(BlocklistConfig {
            location,
            allowlist,
            domain_metrics: self.domain_metrics,
            bootstrap_dns,
            block_response,
            reload,
        })
    }
}

/// Parses a reload interval such as `"30m"` or `"1h 30m"`. `"0s"` disables reload.
pub fn parse_reload(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.starts_with('-') {
        return Err(ConfigError::NegativeReload(s.to_string()));
    }
    humantime::parse_duration(s).map_err(|_| ConfigError::InvalidDuration(s.to_string()))
}

/// Accepts `ip` or `ip:port`; the port defaults to 53.
pub fn parse_bootstrap(s: &str) -> Result<SocketAddr, ConfigError> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| ConfigError::InvalidBootstrap(s.to_string()))
}

/// URLs are taken as-is; anything else must be an existing, non-directory file.
fn check_file_or_url(location: &str, root: Option<&Path>) -> Result<String, ConfigError> {
    if let Ok(url) = Url::parse(location) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(location.to_string());
        }
    }

    let mut path = PathBuf::from(location);
    if path.is_relative() {
        if let Some(root) = root {
            path = root.join(path);
        }
    }

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => Err(ConfigError::ListIsDirectory(path)),
        Ok(_) => Ok(path.to_string_lossy().into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::ListNotFound(path)),
        Err(e) => Err(ConfigError::ListUnreadable {
            path,
            reason: e.to_string(),
        }),
    }
}

// Defaults
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5300
}
fn default_upstream_servers() -> Vec<String> {
    vec!["udp://8.8.8.8:53".to_string()]
}
fn default_upstream_timeout_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_stats_enable() -> bool {
    true
}
fn default_log_interval() -> u64 {
    300
}
fn default_api_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream_servers: default_upstream_servers(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            blocklists: Vec::new(),
            logging: LoggingConfig::default(),
            stats: StatsConfig::default(),
            api: ApiConfig::default(),
            root: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_stats_enable(),
            log_interval_seconds: default_log_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: default_api_port(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let mut config = Self::parse(&contents)?;
        config.root = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }

    /// Validates every `[[blocklist]]` stanza, in order.
    pub fn blocklist_configs(&self) -> Result<Vec<BlocklistConfig>, ConfigError> {
        self.blocklists
            .iter()
            .map(|stanza| stanza.validate(self.root.as_deref()))
            .collect()
    }
}
