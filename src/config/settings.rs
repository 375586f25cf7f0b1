//! TOML-based configuration for streat.
//!
//! Supports a config file (streat.toml) with environment variable expansion
//! in the worker program path.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! program = "${HOME}/bin/exiftool"
//! args = ["-stay_open", "True", "-@", "-"]
//! command_args = ["-b", "-j", "-fast"]
//! restart_backoff_ms = 1000
//! max_reply_bytes = 1048576
//!
//! [extract]
//! step = 32768
//! limit = 0
//! read_chunk_size = 16384
//! scratch_dir = "/var/tmp"
//!
//! [reply]
//! error_field = "Error"
//! warning_field = "Warning"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default window step in bytes.
pub const DEFAULT_STEP: u64 = 32768;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Worker process configuration.
    pub worker: WorkerSettings,

    /// Windowing defaults for extraction requests.
    pub extract: ExtractSettings,

    /// Reply field names used to classify worker answers.
    pub reply: ReplySettings,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker executable (supports ${ENV_VAR} expansion).
    pub program: String,

    /// Arguments that put the worker into stay-open batch mode.
    pub args: Vec<String>,

    /// Arguments sent with every analyze command, before the scratch path.
    pub command_args: Vec<String>,

    /// Delay before respawning a crashed worker.
    pub restart_backoff_ms: u64,

    /// Largest reply the decoder buffers before giving up.
    pub max_reply_bytes: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "exiftool".to_string(),
            args: vec![
                "-stay_open".to_string(),
                "True".to_string(),
                "-@".to_string(),
                "-".to_string(),
            ],
            command_args: vec!["-b".to_string(), "-j".to_string(), "-fast".to_string()],
            restart_backoff_ms: 1000,
            max_reply_bytes: 1024 * 1024,
        }
    }
}

impl WorkerSettings {
    /// Get the program with environment variables expanded.
    pub fn resolved_program(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.program)
    }

    /// Restart back-off as a duration.
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Build the analyze command lines for a scratch file.
    pub fn command_for(&self, path: &Path) -> Vec<String> {
        let mut lines = self.command_args.clone();
        lines.push(path.display().to_string());
        lines
    }
}

/// Windowing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractSettings {
    /// Default window step in bytes.
    pub step: u64,

    /// Default byte limit (0 = unlimited).
    pub limit: u64,

    /// Size of each read from a source stream.
    pub read_chunk_size: usize,

    /// Directory for the scratch file (system temp dir when unset).
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            limit: 0,
            read_chunk_size: 16 * 1024,
            scratch_dir: None,
        }
    }
}

/// Names of the reply fields that drive classification.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplySettings {
    /// Field whose presence means "not enough data yet".
    pub error_field: String,

    /// Field that is logged and otherwise ignored.
    pub warning_field: String,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            error_field: "Error".to_string(),
            warning_field: "Warning".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `STREAT_CONFIG`
    /// 2. `./streat.toml`
    /// 3. `~/.config/streat/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("STREAT_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("streat.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("streat").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.worker.program.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "worker.program must not be empty".to_string(),
            ));
        }
        if self.extract.step == 0 {
            return Err(SettingsError::InvalidConfig(
                "extract.step must be positive".to_string(),
            ));
        }
        if self.extract.read_chunk_size == 0 {
            return Err(SettingsError::InvalidConfig(
                "extract.read_chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the settings as TOML.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
