//! Incremental metadata extraction from streams.
//!
//! Most media formats keep their metadata near the start of the file, so the
//! engine never waits for a whole stream. It copies the source into a scratch
//! file one window of `step` bytes at a time and asks the worker to analyze
//! what it has so far. A reply carrying the error field means "not enough
//! data"; the engine then appends another window and asks again.
//!
//! ```text
//!  submit() ──► RequestQueue ──► head ──► WindowFeeder ──► ScratchBuffer
//!                                             ▲                 │
//!                                 NeedMoreData│                 │ command
//!                                             │                 ▼
//!   Extraction ◄── Success / Failed ── ResponseRouter ◄── ProcessSupervisor
//! ```
//!
//! Only the request at the head of the queue reads its source or talks to the
//! worker. Everything behind it waits, unread.

mod engine;
mod error;
mod feeder;
mod queue;
mod request;
mod router;
mod scratch;

pub use engine::Extractor;
pub use error::{ExtractError, ExtractResult};
pub use feeder::{Boundary, WindowCursor};
pub use queue::RequestQueue;
pub use request::{BoxedSource, ExtractOptions, Extraction, Metadata};
pub use router::{ResponseRouter, Verdict};
pub use scratch::{ScratchBuffer, ScratchSession, SessionMode};
