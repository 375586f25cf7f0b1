//! Worker process supervision.
//!
//! This module owns the long-lived analysis worker (exiftool in stay-open
//! mode by default): spawning it, framing commands onto its stdin, decoding
//! the reply stream on its stdout and restarting it after a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   ProcessSupervisor (Tokio)                     │
//! │  - spawns the worker with `-stay_open True -@ -` → Started      │
//! │  - writer task: framed commands → stdin                         │
//! │  - reader task: stdout → ReplyDecoder → WorkerEvent::Reply      │
//! │  - monitor task: exit → WorkerEvent::Exited + delayed restart   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!         stdin (`-q` … `-execute`) │ stdout (JSON values, `{ready}`)
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Worker (long-running child process)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replies carry no request id: they pair with commands strictly in send
//! order, so only one command may be outstanding at a time.

mod error;
pub mod protocol;
mod supervisor;

pub use error::{WorkerError, WorkerResult};
pub use supervisor::{ProcessSupervisor, WorkerEvent, WorkerEvents, WorkerStatus};
