//! Windowed draining of a source stream into the scratch buffer.
//!
//! A request's source is read by a pump task into a channel with room for a
//! single chunk. The engine pulls chunks only while a window is open, so a
//! closed window leaves the pump parked on a full channel: that is the pause.
//! Dropping the receiving end detaches the source for good.

use std::io;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::request::{BoxedSource, Metadata};
use super::scratch::{ScratchBuffer, ScratchSession, SessionMode};

/// What the pump observed on the source.
#[derive(Debug)]
pub enum SourceSignal {
    Chunk(Vec<u8>),
    End,
    Abort(io::Error),
}

/// Where the cursor stands after accepting bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The window has room left.
    Open,
    /// The window holds exactly one step.
    WindowFull,
    /// The byte limit is reached; nothing more will ever be accepted.
    LimitReached,
}

/// Byte accounting for one request. Windows grow linearly, one step each.
#[derive(Debug, Clone)]
pub struct WindowCursor {
    limit: u64,
    step: u64,
    consumed: u64,
    base: u64,
    windows: u32,
}

impl WindowCursor {
    /// `limit` of 0 means unlimited; `step` must be positive.
    pub fn new(limit: u64, step: u64) -> Self {
        Self {
            limit,
            step,
            consumed: 0,
            base: 0,
            windows: 0,
        }
    }

    /// Start the next window at the current position.
    pub fn open(&mut self) {
        self.base = self.consumed;
        self.windows += 1;
    }

    /// Bytes that still fit in the current window.
    pub fn room(&self) -> u64 {
        let mut end = self.base + self.step;
        if self.limit > 0 {
            end = end.min(self.limit);
        }
        end.saturating_sub(self.consumed)
    }

    /// Record `n` accepted bytes; `n` must not exceed [`room`](Self::room).
    pub fn accept(&mut self, n: u64) -> Boundary {
        self.consumed += n;
        if self.limit_reached() {
            Boundary::LimitReached
        } else if self.consumed >= self.base + self.step {
            Boundary::WindowFull
        } else {
            Boundary::Open
        }
    }

    pub fn limit_reached(&self) -> bool {
        self.limit > 0 && self.consumed >= self.limit
    }

    /// Total bytes accepted.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes accepted before the current window.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Bytes accepted in the current window.
    pub fn window_len(&self) -> u64 {
        self.consumed - self.base
    }

    /// Number of windows opened so far.
    pub fn windows(&self) -> u32 {
        self.windows
    }
}

/// Result of advancing the feed.
#[derive(Debug)]
pub(crate) enum FeedStep {
    /// Keep pulling from the source.
    Continue,
    /// The window is flushed to the scratch buffer; a command is due.
    WindowClosed,
    /// The source is exhausted and the last reply is final.
    Exhausted(Metadata),
    /// The source failed; no command is sent for the partial window.
    Aborted(io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Draining,
    AwaitingReply,
}

/// Feeding state of one request.
pub(crate) struct Feed {
    cursor: WindowCursor,
    phase: Phase,
    source: Option<BoxedSource>,
    signals: Option<mpsc::Receiver<SourceSignal>>,
    pump: Option<JoinHandle<()>>,
    session: Option<ScratchSession>,
    /// Bytes read past the last window boundary, written first in the next one.
    carry: Vec<u8>,
    ended: bool,
    last_reply: Option<Metadata>,
}

impl Feed {
    pub(crate) fn new(source: BoxedSource, limit: u64, step: u64) -> Self {
        Self {
            cursor: WindowCursor::new(limit, step),
            phase: Phase::Queued,
            source: Some(source),
            signals: None,
            pump: None,
            session: None,
            carry: Vec::new(),
            ended: false,
            last_reply: None,
        }
    }

    pub(crate) fn cursor(&self) -> &WindowCursor {
        &self.cursor
    }

    pub(crate) fn is_started(&self) -> bool {
        self.phase != Phase::Queued
    }

    /// True while the engine should pull source signals.
    pub(crate) fn is_receiving(&self) -> bool {
        self.phase == Phase::Draining && self.signals.is_some()
    }

    pub(crate) fn awaiting_reply(&self) -> bool {
        self.phase == Phase::AwaitingReply
    }

    /// More bytes may still arrive for another window.
    pub(crate) fn can_grow(&self) -> bool {
        !self.ended && !self.cursor.limit_reached() && self.signals.is_some()
    }

    /// Spawn the pump and open the first window.
    pub(crate) async fn start(
        &mut self,
        scratch: &ScratchBuffer,
        chunk_size: usize,
    ) -> io::Result<FeedStep> {
        if let Some(source) = self.source.take() {
            let (tx, rx) = mpsc::channel(1);
            self.pump = Some(tokio::spawn(pump(source, tx, chunk_size)));
            self.signals = Some(rx);
        }
        self.open_window(scratch).await
    }

    /// Keep the recoverable reply and open the next window in append mode.
    pub(crate) async fn reopen(
        &mut self,
        scratch: &ScratchBuffer,
        reply: Metadata,
    ) -> io::Result<FeedStep> {
        self.last_reply = Some(reply);
        self.open_window(scratch).await
    }

    /// Wait for the next source signal; never resolves once detached.
    pub(crate) async fn next_signal(&mut self) -> SourceSignal {
        match self.signals.as_mut() {
            Some(signals) => signals.recv().await.unwrap_or(SourceSignal::End),
            None => std::future::pending().await,
        }
    }

    pub(crate) async fn on_signal(&mut self, signal: SourceSignal) -> io::Result<FeedStep> {
        match signal {
            SourceSignal::Chunk(bytes) => {
                let boundary = self.take_in(bytes).await?;
                self.after(boundary).await
            }
            SourceSignal::End => {
                debug!(consumed = self.cursor.consumed(), "source ended");
                self.ended = true;
                self.detach();
                if self.cursor.window_len() == 0 {
                    if let Some(last) = self.last_reply.take() {
                        self.session = None;
                        return Ok(FeedStep::Exhausted(last));
                    }
                }
                self.close_window().await?;
                Ok(FeedStep::WindowClosed)
            }
            SourceSignal::Abort(err) => {
                debug!(error = %err, consumed = self.cursor.consumed(), "source aborted");
                self.detach();
                if let Some(session) = self.session.take() {
                    // The request fails with the source error either way.
                    let _ = session.finish().await;
                }
                Ok(FeedStep::Aborted(err))
            }
        }
    }

    /// Stop reading the source and discard whatever it still holds.
    pub(crate) fn detach(&mut self) {
        self.signals = None;
        self.source = None;
        self.carry.clear();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    async fn open_window(&mut self, scratch: &ScratchBuffer) -> io::Result<FeedStep> {
        self.cursor.open();
        let mode = if self.cursor.windows() == 1 {
            SessionMode::Truncate
        } else {
            SessionMode::Append
        };
        self.session = Some(scratch.open(mode).await?);
        self.phase = Phase::Draining;
        debug!(
            window = self.cursor.windows(),
            base = self.cursor.base(),
            ?mode,
            "window opened"
        );

        if self.carry.is_empty() {
            return Ok(FeedStep::Continue);
        }
        let carry = std::mem::take(&mut self.carry);
        let boundary = self.take_in(carry).await?;
        self.after(boundary).await
    }

    /// Write as much of `bytes` as the window allows and carry the rest.
    async fn take_in(&mut self, mut bytes: Vec<u8>) -> io::Result<Boundary> {
        let fits = self.cursor.room().min(bytes.len() as u64) as usize;
        let rest = bytes.split_off(fits);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| io::Error::other("scratch session is closed"))?;
        session.write(&bytes).await?;
        self.carry = rest;
        Ok(self.cursor.accept(fits as u64))
    }

    async fn after(&mut self, boundary: Boundary) -> io::Result<FeedStep> {
        match boundary {
            Boundary::Open => Ok(FeedStep::Continue),
            Boundary::WindowFull => {
                debug!(consumed = self.cursor.consumed(), "window full");
                self.close_window().await?;
                Ok(FeedStep::WindowClosed)
            }
            Boundary::LimitReached => {
                debug!(consumed = self.cursor.consumed(), "reached limit");
                self.detach();
                self.close_window().await?;
                Ok(FeedStep::WindowClosed)
            }
        }
    }

    async fn close_window(&mut self) -> io::Result<()> {
        self.phase = Phase::AwaitingReply;
        if let Some(session) = self.session.take() {
            session.finish().await?;
        }
        Ok(())
    }
}

async fn pump(mut source: BoxedSource, tx: mpsc::Sender<SourceSignal>, chunk_size: usize) {
    loop {
        let mut buf = vec![0u8; chunk_size];
        let signal = match source.read(&mut buf).await {
            Ok(0) => SourceSignal::End,
            Ok(n) => {
                buf.truncate(n);
                SourceSignal::Chunk(buf)
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => SourceSignal::Abort(err),
        };
        let last = !matches!(signal, SourceSignal::Chunk(_));
        if tx.send(signal).await.is_err() || last {
            break;
        }
    }
}
