//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Result;

const CONFIG_FILE: &str = "ircheck.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Server under test
    #[serde(default)]
    pub server: ServerConfig,

    /// Optional auxiliary bot process
    #[serde(default)]
    pub bot: Option<BotConfig>,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Configuration for the server under test
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Path to the server executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Build command run before starting the server; unset skips the build
    #[serde(default = "default_build_command")]
    pub build_command: Option<String>,

    /// Port the server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection password passed to the server and used by clients
    #[serde(default = "default_password")]
    pub password: String,

    /// Delay after spawn before the server is considered ready to accept
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Whether `run` starts the server itself
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            build_command: default_build_command(),
            port: default_port(),
            password: default_password(),
            settle_ms: default_settle_ms(),
            autostart: default_autostart(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("./ircserv")
}
fn default_build_command() -> Option<String> {
    Some("make".to_string())
}
fn default_port() -> u16 {
    6667
}
fn default_password() -> String {
    "password".to_string()
}
fn default_settle_ms() -> u64 {
    500
}
fn default_autostart() -> bool {
    true
}

/// Configuration for the auxiliary bot, started with no arguments
#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Path to the bot executable
    pub binary: PathBuf,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default deadline for a step's pattern expectation
    #[serde(default = "default_await_ms")]
    pub await_default_ms: u64,

    /// Interval at which a waiting step re-scans the session log
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for opening a client connection
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            await_default_ms: default_await_ms(),
            poll_interval_ms: default_poll_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

fn default_await_ms() -> u64 {
    1500
}
fn default_poll_ms() -> u64 {
    100
}
fn default_connect_ms() -> u64 {
    2000
}

impl Timeouts {
    pub fn await_default(&self) -> Duration {
        Duration::from_millis(self.await_default_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Config {
    /// Load configuration from `path`, or from `ircheck.toml` in the current
    /// directory, falling back to defaults when neither exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => PathBuf::from(CONFIG_FILE),
        };

        if !candidate.exists() {
            if path.is_some() {
                return Err(super::Error::FileRead {
                    path: candidate.display().to_string(),
                    error: "file not found".to_string(),
                });
            }
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&candidate).map_err(|e| super::Error::FileRead {
                path: candidate.display().to_string(),
                error: e.to_string(),
            })?;
        toml::from_str(&content).map_err(|e| super::Error::Config(e.to_string()))
    }

    /// Address simulated clients connect to
    pub fn server_addr(&self) -> String {
        format!("127.0.0.1:{}", self.server.port)
    }

    /// Variables available to every step unless overridden
    pub fn base_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("password".to_string(), self.server.password.clone());
        vars.insert("port".to_string(), self.server.port.to_string());
        vars
    }
}
