//! Configuration module for streat.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, ExtractSettings, ReplySettings, Settings, SettingsError, WorkerSettings,
    DEFAULT_STEP,
};
