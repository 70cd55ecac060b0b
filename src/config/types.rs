use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::common::error::{Result, SwitchError};

pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const DEFAULT_PROXY_SERVER: &str = "10.0.66.52:3128";
pub const DEFAULT_PROXY_OVERRIDE: &str = "192.168.*.*;192.25.*.*;<local>";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;

/// Which conditions decide whether the proxy is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    #[default]
    Gateway,
    User,
    Both,
}

impl CheckMode {
    pub fn checks_gateway(self) -> bool {
        matches!(self, CheckMode::Gateway | CheckMode::Both)
    }

    pub fn checks_user(self) -> bool {
        matches!(self, CheckMode::User | CheckMode::Both)
    }
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Gateway => write!(f, "gateway"),
            CheckMode::User => write!(f, "user"),
            CheckMode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for CheckMode {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gateway" => Ok(CheckMode::Gateway),
            "user" => Ok(CheckMode::User),
            "both" => Ok(CheckMode::Both),
            other => Err(SwitchError::Configuration(format!(
                "unknown check mode: {} (expected gateway, user or both)",
                other
            ))),
        }
    }
}

/// The username matching strategy derived from the configured fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMatch {
    /// No criteria configured; a user check never matches.
    Unset,
    /// Exact and/or substring match; either one matching is enough.
    Names {
        full: Option<String>,
        partial: Option<String>,
    },
    /// Identity must equal one entry of the list.
    AllowList(Vec<String>),
}

/// One configuration layer. Every field is optional so layers can be stacked:
/// defaults, then the YAML file, then command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub mode: Option<String>,
    pub gateway: Option<String>,
    pub proxy: Option<String>,
    #[serde(rename = "override")]
    pub proxy_override: Option<String>,
    pub full_name: Option<String>,
    pub find_name: Option<String>,
    pub allowed_users: Option<Vec<String>>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

/// Immutable policy, built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub mode: CheckMode,
    pub target_gateway: Ipv4Addr,
    pub full_username: Option<String>,
    pub partial_username: Option<String>,
    pub allowed_usernames: Vec<String>,
    pub proxy_server: String,
    pub proxy_override: String,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub log_file: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: CheckMode::Gateway,
            target_gateway: DEFAULT_GATEWAY,
            full_username: None,
            partial_username: None,
            allowed_usernames: Vec::new(),
            proxy_server: DEFAULT_PROXY_SERVER.to_string(),
            proxy_override: DEFAULT_PROXY_OVERRIDE.to_string(),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            log_file: None,
        }
    }
}

impl PolicyConfig {
    /// Apply a layer on top of this config. Empty strings clear optional
    /// username fields.
    pub fn apply_layer(&mut self, layer: &ConfigLayer) -> Result<()> {
        if let Some(ref mode) = layer.mode {
            self.mode = mode.parse()?;
        }
        if let Some(ref gateway) = layer.gateway {
            self.target_gateway = gateway.trim().parse().map_err(|_| {
                SwitchError::Configuration(format!("invalid gateway IPv4 address: {}", gateway))
            })?;
        }
        if let Some(ref proxy) = layer.proxy {
            self.proxy_server = proxy.trim().to_string();
        }
        if let Some(ref over) = layer.proxy_override {
            self.proxy_override = over.clone();
        }
        if let Some(ref full) = layer.full_name {
            self.full_username = non_empty(full);
        }
        if let Some(ref find) = layer.find_name {
            self.partial_username = non_empty(find);
        }
        if let Some(ref allowed) = layer.allowed_users {
            self.allowed_usernames = allowed
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(secs) = layer.interval_secs {
            self.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = layer.timeout_secs {
            self.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(ref path) = layer.log_file {
            self.log_file = Some(path.clone());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if parse_host_port(&self.proxy_server).is_none() {
            return Err(SwitchError::Configuration(format!(
                "proxy server must be host:port, got '{}'",
                self.proxy_server
            )));
        }
        if self.interval.is_zero() {
            return Err(SwitchError::Configuration(
                "check interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(SwitchError::Configuration(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        let has_names = self.full_username.is_some() || self.partial_username.is_some();
        if has_names && !self.allowed_usernames.is_empty() {
            return Err(SwitchError::Configuration(
                "fullname/findname and the allowed user list cannot be combined".to_string(),
            ));
        }
        Ok(())
    }

    /// Stricter check for configurations that get persisted into a service.
    pub fn validate_for_install(&self) -> Result<()> {
        self.validate()?;
        if self.mode.checks_user() && !self.has_user_criteria() {
            return Err(SwitchError::Configuration(format!(
                "mode '{}' needs --fullname, --findname or --allowed",
                self.mode
            )));
        }
        Ok(())
    }

    pub fn has_user_criteria(&self) -> bool {
        self.user_match() != UserMatch::Unset
    }

    pub fn user_match(&self) -> UserMatch {
        if !self.allowed_usernames.is_empty() {
            return UserMatch::AllowList(self.allowed_usernames.clone());
        }
        if self.full_username.is_none() && self.partial_username.is_none() {
            return UserMatch::Unset;
        }
        UserMatch::Names {
            full: self.full_username.clone(),
            partial: self.partial_username.clone(),
        }
    }

    /// One-line summary written at startup and on every cycle.
    pub fn summary(&self) -> String {
        format!(
            "mode={}, gateway={}, fullname={}, findname={}, allowed=[{}], proxy={}, override={}",
            self.mode,
            self.target_gateway,
            self.full_username.as_deref().unwrap_or(""),
            self.partial_username.as_deref().unwrap_or(""),
            self.allowed_usernames.join(","),
            self.proxy_server,
            self.proxy_override,
        )
    }
}

/// Split a comma-delimited allow list, trimming each entry.
pub fn parse_allow_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn parse_host_port(s: &str) -> Option<(String, u16)> {
    let s = s.trim();
    let (host, port) = s.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
