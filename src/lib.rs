//! # Streat
//!
//! Incremental metadata extraction from byte streams.
//!
//! ## Architecture
//!
//! Streat feeds a stream to a persistent metadata worker (exiftool in
//! stay-open mode) a window at a time, stopping as soon as the worker can
//! answer:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Extractor::submit(source, options)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [RequestQueue: FIFO, one active]
//! ┌─────────────────────────────────────────────────────────┐
//! │        WindowFeeder → ScratchBuffer (temp file)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [ProcessSupervisor: -q … -execute]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 exiftool -stay_open True                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [ResponseRouter]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Success │ NeedMoreData (next window) │ Failed        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod extract;
pub mod logging;
pub mod worker;

pub use config::Settings;
pub use extract::{ExtractError, ExtractOptions, ExtractResult, Extraction, Extractor, Metadata};
