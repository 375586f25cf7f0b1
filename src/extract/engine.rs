//! The extraction engine: one task owning the queue, the scratch buffer and
//! the worker conversation.

use std::io;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{ExtractError, ExtractResult};
use super::feeder::{FeedStep, SourceSignal};
use super::queue::RequestQueue;
use super::request::{ExtractOptions, Extraction, Metadata, Request};
use super::router::{ResponseRouter, Verdict};
use super::scratch::ScratchBuffer;
use crate::config::{ExtractSettings, Settings, WorkerSettings};
use crate::worker::{ProcessSupervisor, WorkerError, WorkerEvent, WorkerEvents, WorkerStatus};

/// Incremental metadata extractor.
///
/// Requests are served strictly one at a time in submission order. The active
/// request's source is copied into the scratch buffer one window at a time
/// and the worker is asked to analyze the buffer after every window, until it
/// answers without an error or no more data can be supplied.
///
/// ```no_run
/// use streat::{ExtractOptions, Extractor, Settings};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = Extractor::new(Settings::load()?)?;
/// let file = tokio::fs::File::open("photo.jpg").await?;
/// let metadata = extractor.extract(file, ExtractOptions::new()).await?;
/// println!("{:?}", metadata.get_str("MIMEType"));
/// extractor.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Extractor {
    submissions: mpsc::UnboundedSender<Request>,
    supervisor: ProcessSupervisor,
    defaults: ExtractSettings,
    task: JoinHandle<()>,
}

impl Extractor {
    /// Create an engine with a temporary scratch file.
    ///
    /// Must be called from within a tokio runtime. The worker is spawned on
    /// the first command, or earlier through [`start_worker`](Self::start_worker).
    pub fn new(settings: Settings) -> ExtractResult<Self> {
        settings.validate()?;
        let scratch = ScratchBuffer::temporary(settings.extract.scratch_dir.as_deref())
            .map_err(ExtractError::Scratch)?;
        Self::with_scratch(settings, scratch)
    }

    /// Create an engine that writes windows to the given scratch buffer.
    pub fn with_scratch(settings: Settings, scratch: ScratchBuffer) -> ExtractResult<Self> {
        settings.validate()?;
        let Settings {
            worker,
            extract,
            reply,
        } = settings;

        debug!(scratch = %scratch.path().display(), "creating extraction engine");
        let (supervisor, events) = ProcessSupervisor::new(worker.clone());
        let (submissions, requests) = mpsc::unbounded_channel();
        let engine = Engine {
            queue: RequestQueue::new(),
            scratch,
            supervisor: supervisor.clone(),
            router: ResponseRouter::new(&reply),
            worker,
            read_chunk_size: extract.read_chunk_size,
            deferred: false,
        };
        let task = tokio::spawn(engine.run(requests, events));

        Ok(Self {
            submissions,
            supervisor,
            defaults: extract,
            task,
        })
    }

    /// Queue a source for extraction.
    ///
    /// Fails immediately on invalid options; otherwise returns a handle that
    /// resolves once the request reaches a terminal outcome.
    pub fn submit<R>(&self, source: R, options: ExtractOptions) -> ExtractResult<Extraction>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (limit, step) = options.resolve(&self.defaults)?;
        let (request, extraction) = Request::new(Box::new(source), limit, step);
        debug!(id = %request.id, limit, step, "request submitted");
        self.submissions
            .send(request)
            .map_err(|_| ExtractError::EngineClosed)?;
        Ok(extraction)
    }

    /// Submit a source and wait for its outcome.
    pub async fn extract<R>(&self, source: R, options: ExtractOptions) -> ExtractResult<Metadata>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.submit(source, options)?.await
    }

    /// Spawn the worker ahead of the first request.
    pub fn start_worker(&self) -> ExtractResult<()> {
        self.supervisor.start().map_err(ExtractError::Transport)
    }

    /// Kill the worker. A request waiting on it fails with a transport error.
    pub fn stop_worker(&self) {
        self.supervisor.stop();
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.supervisor.status()
    }

    /// Stop accepting requests, fail everything still queued with
    /// [`ExtractError::EngineClosed`], kill the worker and remove the
    /// temporary scratch file.
    pub async fn shutdown(self) {
        let Self {
            submissions,
            supervisor,
            task,
            ..
        } = self;
        drop(submissions);
        if let Err(err) = task.await {
            warn!(error = %err, "extraction engine task ended abnormally");
        }
        supervisor.stop();
    }
}

/// Next thing the engine does for the head of the queue.
enum Step {
    Idle,
    Activate,
    Dispatch,
    Reopen(Metadata),
    Complete(ExtractResult<Metadata>),
}

struct Engine {
    queue: RequestQueue<Request>,
    scratch: ScratchBuffer,
    supervisor: ProcessSupervisor,
    router: ResponseRouter,
    worker: WorkerSettings,
    read_chunk_size: usize,
    /// A closed window is waiting for the worker to come back from a crash.
    deferred: bool,
}

impl Engine {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: WorkerEvents,
    ) {
        loop {
            let receiving = self
                .queue
                .head()
                .is_some_and(|head| head.feed.is_receiving());

            tokio::select! {
                biased;
                Some(event) = events.recv() => self.on_worker_event(event).await,
                signal = next_signal(&mut self.queue), if receiving => {
                    self.on_source_signal(signal).await
                }
                request = requests.recv() => match request {
                    Some(request) => self.admit(request).await,
                    None => break,
                },
            }
        }

        debug!(queued = self.queue.len(), "extraction engine closing");
        self.supervisor.stop();
        for request in self.queue.drain() {
            request.complete(Err(ExtractError::EngineClosed));
        }
    }

    async fn admit(&mut self, request: Request) {
        let id = request.id;
        if self.queue.enqueue(request) {
            self.drive(Step::Activate).await;
        } else {
            debug!(%id, position = self.queue.len() - 1, "request queued");
        }
    }

    async fn on_source_signal(&mut self, signal: SourceSignal) {
        let Some(head) = self.queue.head_mut() else {
            return;
        };
        let fed = head.feed.on_signal(signal).await;
        let step = self.after_feed(fed);
        self.drive(step).await;
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        let awaiting = self
            .queue
            .head()
            .is_some_and(|head| head.feed.awaiting_reply());

        let step = match event {
            WorkerEvent::Started if awaiting && self.deferred => Step::Dispatch,
            WorkerEvent::Started => Step::Idle,
            WorkerEvent::Reply(reply) => {
                let Some(head) = self.queue.head().filter(|_| awaiting && !self.deferred) else {
                    warn!("discarding worker reply with no command outstanding");
                    return;
                };
                match self.router.classify(reply, head.feed.can_grow()) {
                    Verdict::Success(metadata) => Step::Complete(Ok(metadata)),
                    Verdict::NeedMoreData(metadata) => Step::Reopen(metadata),
                    Verdict::Failed(err) => Step::Complete(Err(err)),
                }
            }
            WorkerEvent::Exited(err) if awaiting => {
                // The crash that put the worker into restart; nothing was sent yet.
                if self.deferred && matches!(err, WorkerError::Exited(_)) {
                    return;
                }
                Step::Complete(Err(ExtractError::Transport(err)))
            }
            WorkerEvent::Exited(err) if err.is_worker_exited() => {
                debug!(error = %err, "worker went away with no command outstanding");
                Step::Idle
            }
            WorkerEvent::Exited(err) => {
                warn!(error = %err, "worker failed with no command outstanding");
                Step::Idle
            }
        };
        self.drive(step).await;
    }

    /// Advance the head until it has to wait for the source or the worker.
    async fn drive(&mut self, mut step: Step) {
        loop {
            step = match step {
                Step::Idle => return,
                Step::Activate => {
                    let Some(head) = self.queue.head_mut() else {
                        return;
                    };
                    if head.feed.is_started() {
                        return;
                    }
                    debug!(id = %head.id, "request activated");
                    let fed = head.feed.start(&self.scratch, self.read_chunk_size).await;
                    self.after_feed(fed)
                }
                Step::Reopen(reply) => {
                    let Some(head) = self.queue.head_mut() else {
                        return;
                    };
                    debug!(id = %head.id, "worker needs more data");
                    let fed = head.feed.reopen(&self.scratch, reply).await;
                    self.after_feed(fed)
                }
                Step::Dispatch => match self.dispatch() {
                    Ok(()) => Step::Idle,
                    Err(err) => Step::Complete(Err(ExtractError::Transport(err))),
                },
                Step::Complete(result) => {
                    self.deferred = false;
                    let Some(request) = self.queue.pop_head() else {
                        return;
                    };
                    let consumed = request.feed.cursor().consumed();
                    match &result {
                        Ok(metadata) => {
                            info!(id = %request.id, consumed, tags = metadata.len(), "extraction finished")
                        }
                        Err(err) => {
                            warn!(id = %request.id, consumed, error = %err, "extraction failed")
                        }
                    }
                    request.complete(result);
                    Step::Activate
                }
            };
        }
    }

    /// Ask the worker to analyze the scratch buffer.
    fn dispatch(&mut self) -> Result<(), WorkerError> {
        match self.supervisor.status() {
            WorkerStatus::CrashedPendingRestart => {
                debug!("worker is restarting; holding the command");
                self.deferred = true;
                return Ok(());
            }
            WorkerStatus::Down => self.supervisor.start()?,
            WorkerStatus::Starting | WorkerStatus::Running => {}
        }
        self.deferred = false;

        if let Some(head) = self.queue.head() {
            let cursor = head.feed.cursor();
            debug!(
                id = %head.id,
                window = cursor.windows(),
                bytes = cursor.consumed(),
                "sending window to worker"
            );
        }
        self.supervisor
            .send(&self.worker.command_for(self.scratch.path()))
    }

    fn after_feed(&self, fed: io::Result<FeedStep>) -> Step {
        match fed {
            Ok(FeedStep::Continue) => Step::Idle,
            Ok(FeedStep::WindowClosed) => Step::Dispatch,
            Ok(FeedStep::Exhausted(last)) => Step::Complete(Err(self.router.exhausted(last))),
            Ok(FeedStep::Aborted(err)) => Step::Complete(Err(ExtractError::SourceAborted(err))),
            Err(err) => Step::Complete(Err(ExtractError::Scratch(err))),
        }
    }
}

async fn next_signal(queue: &mut RequestQueue<Request>) -> SourceSignal {
    match queue.head_mut() {
        Some(head) => head.feed.next_signal().await,
        None => std::future::pending().await,
    }
}
