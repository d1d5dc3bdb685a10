//! Configuration for the webhook daemon.
//!
//! Plain `key=value` lines, `#` comments, optional quotes around values.
//! Precedence: CLI flags > config file > defaults.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides the configured slash-command token.
pub const TOKEN_ENV: &str = "VBOT_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // HTTP listener
    pub address: String,
    pub port: u16,
    /// Largest accepted webhook body in bytes.
    pub max_payload_bytes: usize,
    /// Slash-command token; requests carrying a different token are rejected.
    pub token: Option<String>,

    // Repository layout
    pub repository_path: PathBuf,
    /// Cloned into `repository_path` at startup when that is not a checkout.
    pub repository_url: Option<String>,
    /// Directory below the repository holding one subdirectory per machine.
    pub machines_dir: PathBuf,

    // Runs
    pub default_branch: String,
    /// Checkout and pull the requested branch before starting machines.
    pub git_sync: bool,
    /// Include skip reasons when rendering logs.
    pub show_skips: bool,
    /// How long shutdown waits for running machines before giving up.
    pub shutdown_grace_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8085,
            max_payload_bytes: 512,
            token: None,
            repository_path: PathBuf::from("."),
            repository_url: None,
            machines_dir: PathBuf::from("maintenance/vagrant"),
            default_branch: "master".to_string(),
            git_sync: true,
            show_skips: false,
            shutdown_grace_sec: 10,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
    }

    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "address" => self.address = value.to_string(),
            "port" => self.port = Self::parse_int(key, value)?,
            "max_payload_bytes" => self.max_payload_bytes = Self::parse_int(key, value)?,
            "token" => {
                self.token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "repository_path" => self.repository_path = PathBuf::from(value),
            "repository_url" => {
                self.repository_url = (!value.is_empty()).then(|| value.to_string());
            }
            "machines_dir" => self.machines_dir = PathBuf::from(value),
            "default_branch" => self.default_branch = value.to_string(),
            "git_sync" => self.git_sync = Self::parse_bool(key, value)?,
            "show_skips" => self.show_skips = Self::parse_bool(key, value)?,
            "shutdown_grace_sec" => self.shutdown_grace_sec = Self::parse_int(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Repository path with a leading `~` expanded to the home directory.
    pub fn repository_root(&self) -> PathBuf {
        expand_home(&self.repository_path)
    }

    /// Directory scanned for machines.
    pub fn machines_root(&self) -> PathBuf {
        self.repository_root().join(&self.machines_dir)
    }

    /// Serialize back into the `key=value` file format.
    pub fn to_file_content(&self) -> String {
        let mut out = String::from("# vbotd configuration\n");
        let _ = writeln!(out, "address=\"{}\"", self.address);
        let _ = writeln!(out, "port={}", self.port);
        let _ = writeln!(out, "max_payload_bytes={}", self.max_payload_bytes);
        match &self.token {
            Some(token) => {
                let _ = writeln!(out, "token=\"{token}\"");
            }
            None => out.push_str("# token=\"...\"\n"),
        }
        let _ = writeln!(
            out,
            "repository_path=\"{}\"",
            self.repository_path.display()
        );
        match &self.repository_url {
            Some(url) => {
                let _ = writeln!(out, "repository_url=\"{url}\"");
            }
            None => out.push_str("# repository_url=\"https://...\"\n"),
        }
        let _ = writeln!(out, "machines_dir=\"{}\"", self.machines_dir.display());
        let _ = writeln!(out, "default_branch=\"{}\"", self.default_branch);
        let _ = writeln!(out, "git_sync={}", self.git_sync);
        let _ = writeln!(out, "show_skips={}", self.show_skips);
        let _ = writeln!(out, "shutdown_grace_sec={}", self.shutdown_grace_sec);
        out
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}
