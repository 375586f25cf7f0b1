//! Errors delivered to callers of the extraction engine.

use std::io;
use thiserror::Error;

use super::request::Metadata;
use crate::config::SettingsError;
use crate::worker::WorkerError;

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Terminal outcome of a failed extraction.
///
/// "Not enough data yet" replies never show up here: the engine absorbs them
/// by feeding the worker another window.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The worker exited, was stopped, or could not be reached while a
    /// command was outstanding.
    #[error("worker transport failed: {0}")]
    Transport(#[source] WorkerError),

    /// The worker's reply could not be decoded or carried no tags.
    #[error("unusable worker reply: {0}")]
    Protocol(String),

    /// The worker reported an error and no further data can be supplied.
    #[error("analysis failed: {message}")]
    Analysis {
        /// Error text reported by the worker.
        message: String,
        /// Everything else the worker returned alongside the error.
        metadata: Metadata,
    },

    /// The source stream failed before analysis finished.
    #[error("source stream aborted: {0}")]
    SourceAborted(#[source] io::Error),

    /// The scratch buffer could not be written.
    #[error("scratch buffer failed: {0}")]
    Scratch(#[source] io::Error),

    /// The request options were rejected at submission.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The engine settings were rejected.
    #[error("invalid settings: {0}")]
    Config(#[from] SettingsError),

    /// The engine shut down before the request finished.
    #[error("extraction engine closed")]
    EngineClosed,
}

impl ExtractError {
    /// Check if the worker itself reported this failure.
    pub fn is_analysis(&self) -> bool {
        matches!(self, Self::Analysis { .. })
    }

    /// Metadata returned alongside a worker-reported failure.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Analysis { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}
