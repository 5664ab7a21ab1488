//! speedex.toml configuration parser.
//!
//! The raw [`ExporterConfig`] mirrors the TOML file and accepts environment
//! overrides. [`ExporterConfig::validate`] turns it into typed [`Settings`];
//! anything the core cannot act on is rejected there, before the daemon
//! starts.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Default listen port for /metrics.
pub const DEFAULT_PORT: u16 = 9142;

/// Background interval used when the configured schedule is unusable.
pub const DEFAULT_SCHEDULE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub server: ServerConfig,
    pub scrape: ScrapeConfig,
    pub tool: ToolConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub mode: String,
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub binary: PathBuf,
    pub server_id: Option<String>,
    pub timeout: String,
    pub accept_license: bool,
    pub license_marker: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
    pub poll_interval: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            mode: ScrapeMode::OnDemand.to_string(),
            schedule: None,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("speedtest"),
            server_id: None,
            timeout: "120s".to_string(),
            accept_license: true,
            license_marker: PathBuf::from("/var/lib/speedex/license-accepted"),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval: "10s".to_string(),
        }
    }
}

/// How scrapes obtain a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    /// Every scrape runs a measurement or joins the one in flight.
    OnDemand,
    /// Scrapes read whatever the background runs last stored.
    Cached,
}

impl ScrapeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeMode::OnDemand => "on_demand",
            ScrapeMode::Cached => "cached",
        }
    }
}

impl fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_demand" => Ok(ScrapeMode::OnDemand),
            "cached" => Ok(ScrapeMode::Cached),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Validated settings for the measurement tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub binary: PathBuf,
    pub server_id: Option<String>,
    pub timeout: Duration,
    pub accept_license: bool,
    pub license_marker: PathBuf,
}

/// Validated, typed configuration the daemon runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub mode: ScrapeMode,
    /// Background interval; only acted on in cached mode.
    pub schedule: Option<Duration>,
    pub tool: ToolSettings,
    pub state_path: Option<PathBuf>,
    pub state_poll_interval: Duration,
}

impl ExporterConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values count as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(mode) = get("SPEEDEX_MODE") {
            self.scrape.mode = mode;
        }
        if let Some(id) = get("SERVER_ID") {
            self.tool.server_id = Some(id);
        }
        if let Some(schedule) = get("SPEEDEX_SCHEDULE") {
            self.scrape.schedule = Some(schedule);
        }
        if let Some(binary) = get("SPEEDEX_BINARY") {
            self.tool.binary = PathBuf::from(binary);
        }
        if let Some(port) = get("SPEEDEX_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;
        }
        if let Some(path) = get("SPEEDEX_STATE_PATH") {
            self.state.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Check every field and produce typed settings.
    ///
    /// Mode, server id and timeout errors are fatal. A bad schedule is
    /// replaced by [`DEFAULT_SCHEDULE`] with a warning.
    pub fn validate(&self) -> ConfigResult<Settings> {
        let ip: IpAddr = self
            .server
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.listen.clone()))?;

        let mode: ScrapeMode = self.scrape.mode.parse()?;

        let server_id = match self.tool.server_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(id) if id.bytes().all(|b| b.is_ascii_digit()) => Some(id.to_string()),
            Some(id) => return Err(ConfigError::InvalidServerId(id.to_string())),
        };

        let timeout = parse_duration(&self.tool.timeout)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::InvalidDuration {
                field: "tool.timeout",
                value: self.tool.timeout.clone(),
            })?;

        let state_poll_interval = parse_duration(&self.state.poll_interval)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::InvalidDuration {
                field: "state.poll_interval",
                value: self.state.poll_interval.clone(),
            })?;

        let schedule = self.scrape.schedule.as_deref().map(|expr| {
            match parse_duration(expr).filter(|d| !d.is_zero()) {
                Some(interval) => interval,
                None => {
                    warn!(
                        schedule = %expr,
                        default_secs = DEFAULT_SCHEDULE.as_secs(),
                        "invalid schedule expression, using default"
                    );
                    DEFAULT_SCHEDULE
                }
            }
        });

        Ok(Settings {
            listen_addr: SocketAddr::new(ip, self.server.port),
            mode,
            schedule,
            tool: ToolSettings {
                binary: self.tool.binary.clone(),
                server_id,
                timeout,
                accept_license: self.tool.accept_license,
                license_marker: self.tool.license_marker.clone(),
            },
            state_path: self.state.path.clone(),
            state_poll_interval,
        })
    }
}

/// Parse a compact duration: `500ms`, `30s`, `2m`, `1h`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
