//! Configuration module for scripthost.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Result, ScriptHostError};

/// Scripts directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    /// Root directory holding command scripts.
    #[serde(default = "default_scripts_directory")]
    pub directory: String,
    /// Descend into subdirectories when scanning and watching.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Watch the directory for changes after the initial scan.
    #[serde(default = "default_watch")]
    pub watch: bool,
    /// Poll interval in milliseconds (0 = use native filesystem notifications).
    #[serde(default)]
    pub poll_interval_ms: u64,
    /// Treat `Heal` and `heal` as different commands.
    #[serde(default)]
    pub case_sensitive_commands: bool,
}

fn default_scripts_directory() -> String {
    "scripts".to_string()
}

fn default_recursive() -> bool {
    true
}

fn default_watch() -> bool {
    true
}

impl ScriptsConfig {
    /// Scripts root as a path.
    pub fn directory_path(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: default_scripts_directory(),
            recursive: default_recursive(),
            watch: default_watch(),
            poll_interval_ms: 0,
            case_sensitive_commands: false,
        }
    }
}

/// Lua engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LuaConfig {
    /// Remove `os`, `io`, `require` and friends from the global scope.
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

fn default_sandbox() -> bool {
    true
}

impl Default for LuaConfig {
    fn default() -> Self {
        Self {
            sandbox: default_sandbox(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/scripthost.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Scripts directory configuration.
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Lua engine configuration.
    #[serde(default)]
    pub lua: LuaConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ScriptHostError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ScriptHostError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SCRIPTHOST_SCRIPTS_DIR`: Override the scripts directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SCRIPTHOST_SCRIPTS_DIR") {
            if !dir.is_empty() {
                self.scripts.directory = dir;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scripts.directory.trim().is_empty() {
            return Err(ScriptHostError::Config(
                "scripts.directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
