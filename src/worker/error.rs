//! Worker-specific error types.

use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while supervising or talking to the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// A standard pipe of the spawned worker was not captured.
    #[error("worker {0} pipe was not captured")]
    PipeUnavailable(&'static str),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to read from worker stdout.
    #[error("failed to read from worker: {0}")]
    ReadFailed(#[source] io::Error),

    /// A reply could not be decoded as JSON.
    #[error("failed to decode worker reply: {0}")]
    DecodeFailed(#[source] serde_json::Error),

    /// The reply buffer grew past the configured maximum without a complete value.
    #[error("worker reply exceeds {0} bytes")]
    ReplyTooLarge(usize),

    /// A command was issued while the worker was not running.
    #[error("worker is not running")]
    NotRunning,

    /// Worker process exited unexpectedly.
    #[error("worker process exited unexpectedly ({0})")]
    Exited(ExitStatus),

    /// Worker process was stopped on request.
    #[error("worker process was stopped")]
    Stopped,
}

impl WorkerError {
    /// Check if this error indicates the worker has gone away.
    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Stopped | Self::NotRunning)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodeFailed(err)
    }
}
