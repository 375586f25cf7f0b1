//! Request options, the success payload, and the completion handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::error::{ExtractError, ExtractResult};
use super::feeder::Feed;
use crate::config::ExtractSettings;

/// A source stream handed to the engine.
pub type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;

/// Per-request options.
///
/// Unset fields fall back to the engine's `[extract]` settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Stop reading after this many bytes (0 = unlimited).
    pub limit: Option<u64>,
    /// Bytes added to the scratch buffer per window.
    pub step: Option<u64>,
}

impl ExtractOptions {
    /// Options that use the engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the byte limit (0 = unlimited).
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the window step.
    pub fn with_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolve against the defaults into `(limit, step)`.
    pub(crate) fn resolve(&self, defaults: &ExtractSettings) -> ExtractResult<(u64, u64)> {
        let limit = self.limit.unwrap_or(defaults.limit);
        let step = self.step.unwrap_or(defaults.step);
        if step == 0 {
            return Err(ExtractError::InvalidOptions(
                "step must be a positive byte count".to_string(),
            ));
        }
        Ok((limit, step))
    }
}

/// Tags extracted by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    tags: Map<String, Value>,
}

impl Metadata {
    /// Wrap a tag map.
    pub fn new(tags: Map<String, Value>) -> Self {
        Self { tags }
    }

    /// Take the tag object out of a raw reply.
    ///
    /// exiftool's `-j` output is an array holding one object per file; a bare
    /// object is accepted too. Anything else carries no tags.
    pub fn from_reply(reply: Value) -> Option<Self> {
        let object = match reply {
            Value::Array(items) => items.into_iter().next()?,
            other => other,
        };
        match object {
            Value::Object(tags) => Some(Self { tags }),
            _ => None,
        }
    }

    /// Look up a tag.
    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.tags.get(tag)
    }

    /// Look up a tag holding a string.
    pub fn get_str(&self, tag: &str) -> Option<&str> {
        self.get(tag).and_then(Value::as_str)
    }

    /// All tags.
    pub fn tags(&self) -> &Map<String, Value> {
        &self.tags
    }

    pub fn into_tags(self) -> Map<String, Value> {
        self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Pending result of a submitted request.
///
/// Resolves exactly once, to the metadata or to the error that ended the
/// request. Dropping it does not cancel the request.
#[derive(Debug)]
pub struct Extraction {
    id: Uuid,
    rx: oneshot::Receiver<ExtractResult<Metadata>>,
}

impl Extraction {
    pub(crate) fn new(id: Uuid, rx: oneshot::Receiver<ExtractResult<Metadata>>) -> Self {
        Self { id, rx }
    }

    /// Identifier used for this request in log output.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for Extraction {
    type Output = ExtractResult<Metadata>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ExtractError::EngineClosed)))
    }
}

/// One submitted job as the engine sees it.
pub(crate) struct Request {
    pub(crate) id: Uuid,
    pub(crate) feed: Feed,
    done: oneshot::Sender<ExtractResult<Metadata>>,
}

impl Request {
    pub(crate) fn new(
        source: BoxedSource,
        limit: u64,
        step: u64,
    ) -> (Self, Extraction) {
        let id = Uuid::new_v4();
        let (done, rx) = oneshot::channel();
        let request = Self {
            id,
            feed: Feed::new(source, limit, step),
            done,
        };
        (request, Extraction::new(id, rx))
    }

    /// Deliver the outcome. Consumes the request, so it can only happen once.
    pub(crate) fn complete(mut self, result: ExtractResult<Metadata>) {
        self.feed.detach();
        // The caller may have dropped its handle; the outcome is then discarded.
        let _ = self.done.send(result);
    }
}
