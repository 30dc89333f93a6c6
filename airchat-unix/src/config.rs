//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ping intervals without any captured frame before the capture counts as dead.
pub const STALL_PINGS: u32 = 6;

/// Client configuration. File: ~/.config/airchat/config.toml or /etc/airchat/config.toml.
/// Env overrides: AIRCHAT_INTERFACE, AIRCHAT_PORT, AIRCHAT_NICK, SKIP_CHECK.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Link to capture on and send through (default awdl0).
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Chat UDP port (default 1337).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Multicast group the chat is sent to (default ff02::fb).
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_preamble")]
    pub preamble: String,
    /// Nickname; prompted for when unset.
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Copies sent of every outbound message.
    #[serde(default = "default_reliability_factor")]
    pub reliability_factor: u32,
    #[serde(default = "default_retransmit_delay_ms")]
    pub retransmit_delay_ms: u64,
    /// Link silence after which the link trigger is invoked.
    #[serde(default = "default_link_idle_secs")]
    pub link_idle_secs: u64,
    /// How long to wait for link activity at startup.
    #[serde(default = "default_link_check_secs")]
    pub link_check_secs: u64,
    #[serde(default)]
    pub skip_link_check: bool,
    /// Program and arguments run to wake the link up. Empty: log only.
    #[serde(default = "default_link_trigger")]
    pub link_trigger: Vec<String>,
    #[serde(default = "default_tcpdump")]
    pub tcpdump: String,
    /// Capture silence treated as a dead capture source. Unset: `STALL_PINGS` ping intervals
    /// (our own pings are captured too). 0 disables the check.
    #[serde(default)]
    pub capture_stall_secs: Option<u64>,
}

fn default_interface() -> String {
    "awdl0".into()
}
fn default_port() -> u16 {
    1337
}
fn default_group() -> String {
    "ff02::fb".into()
}
fn default_preamble() -> String {
    airchat_core::DEFAULT_PREAMBLE.into()
}
fn default_ping_interval_secs() -> u64 {
    10
}
fn default_reliability_factor() -> u32 {
    crate::sender::DEFAULT_RELIABILITY_FACTOR
}
fn default_retransmit_delay_ms() -> u64 {
    crate::sender::DEFAULT_RETRANSMIT_DELAY.as_millis() as u64
}
fn default_link_idle_secs() -> u64 {
    3 * 60
}
fn default_link_check_secs() -> u64 {
    5
}
fn default_tcpdump() -> String {
    "tcpdump".into()
}

/// Opens the AirDrop window on macOS, which keeps the AWDL interface awake.
#[cfg(target_os = "macos")]
fn default_link_trigger() -> Vec<String> {
    const SCRIPT: &str = r#"tell application "System Events"
  set frontmostProcess to (path to frontmost application as text)
end tell
activate application "Finder"
tell application "System Events" to keystroke "R" using {command down, shift down}
activate application frontmostProcess"#;
    vec!["osascript".into(), "-e".into(), SCRIPT.into()]
}

#[cfg(not(target_os = "macos"))]
fn default_link_trigger() -> Vec<String> {
    Vec::new()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
            group: default_group(),
            preamble: default_preamble(),
            nickname: None,
            ping_interval_secs: default_ping_interval_secs(),
            reliability_factor: default_reliability_factor(),
            retransmit_delay_ms: default_retransmit_delay_ms(),
            link_idle_secs: default_link_idle_secs(),
            link_check_secs: default_link_check_secs(),
            skip_link_check: false,
            link_trigger: default_link_trigger(),
            tcpdump: default_tcpdump(),
            capture_stall_secs: None,
        }
    }
}

impl Config {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn retransmit_delay(&self) -> Duration {
        Duration::from_millis(self.retransmit_delay_ms)
    }

    pub fn link_idle(&self) -> Duration {
        Duration::from_secs(self.link_idle_secs)
    }

    pub fn link_check(&self) -> Duration {
        Duration::from_secs(self.link_check_secs)
    }

    pub fn capture_stall(&self) -> Option<Duration> {
        match self.capture_stall_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(self.ping_interval().saturating_mul(STALL_PINGS)),
        }
    }
}

/// Load config: explicit path if given, else the first default location present, then env vars.
/// A config file that exists but does not parse is an error; a missing one is not.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("AIRCHAT_INTERFACE") {
        c.interface = s;
    }
    if let Some(s) = var("AIRCHAT_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => log::warn!("ignoring AIRCHAT_PORT={s:?}: not a port number"),
        }
    }
    if let Some(s) = var("AIRCHAT_NICK") {
        c.nickname = Some(s);
    }
    if var("SKIP_CHECK").is_some() {
        c.skip_link_check = true;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/airchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/airchat/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
