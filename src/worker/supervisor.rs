//! Supervision of the persistent worker process.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{frame_command, ReplyDecoder};
use crate::config::WorkerSettings;

/// Size of each read from the worker's stdout.
const READ_BUFFER_SIZE: usize = 8192;

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// No process and no restart scheduled.
    Down,
    /// A process is being spawned.
    Starting,
    /// The process is up and accepting commands.
    Running,
    /// The process died and a restart timer is pending.
    CrashedPendingRestart,
}

/// Something the worker did that the engine has to react to.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A new process is up and accepting commands.
    Started,
    /// One decoded reply, in the order commands were sent.
    Reply(WorkerResult<Value>),
    /// The process went away; any outstanding command will never be answered.
    Exited(WorkerError),
}

/// Receiving half of the worker event stream.
pub type WorkerEvents = mpsc::UnboundedReceiver<WorkerEvent>;

/// Owner of the external worker's lifecycle.
///
/// The supervisor spawns the worker in stay-open mode, forwards framed
/// commands to its stdin, decodes stdout into [`WorkerEvent::Reply`] values
/// and respawns the process after a back-off when it dies unexpectedly.
/// Cloning yields another handle to the same process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: Mutex<State>,
}

struct State {
    status: WorkerStatus,
    /// Bumped on every spawn and stop; tasks of older processes go quiet.
    generation: u64,
    spawns: u64,
    commands: Option<mpsc::UnboundedSender<Vec<u8>>>,
    kill: Option<oneshot::Sender<()>>,
    restart: Option<JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Create a supervisor; the worker is not spawned until [`start`](Self::start).
    pub fn new(settings: WorkerSettings) -> (Self, WorkerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            settings,
            events,
            state: Mutex::new(State {
                status: WorkerStatus::Down,
                generation: 0,
                spawns: 0,
                commands: None,
                kill: None,
                restart: None,
            }),
        });
        (Self { inner }, rx)
    }

    /// Spawn the worker unless it is already starting or running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> WorkerResult<()> {
        self.inner.start()
    }

    /// Send one analyze command: `-q`, `lines`, then the execute sentinel.
    pub fn send<S: AsRef<str>>(&self, lines: &[S]) -> WorkerResult<()> {
        let state = self.inner.state.lock();
        if state.status != WorkerStatus::Running {
            return Err(WorkerError::NotRunning);
        }
        let commands = state.commands.as_ref().ok_or(WorkerError::NotRunning)?;
        debug!(generation = state.generation, "sending command to worker");
        commands
            .send(frame_command(lines))
            .map_err(|_| WorkerError::NotRunning)
    }

    /// Kill the worker and cancel any pending restart. No-op when down.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Current lifecycle state.
    pub fn status(&self) -> WorkerStatus {
        self.inner.state.lock().status
    }

    /// Number of processes spawned so far, restarts included.
    pub fn spawns(&self) -> u64 {
        self.inner.state.lock().spawns
    }
}

impl Inner {
    fn start(self: &Arc<Self>) -> WorkerResult<()> {
        let mut state = self.state.lock();
        if matches!(state.status, WorkerStatus::Starting | WorkerStatus::Running) {
            return Ok(());
        }
        if let Some(timer) = state.restart.take() {
            timer.abort();
        }

        state.status = WorkerStatus::Starting;
        state.generation += 1;
        let generation = state.generation;

        match self.spawn_process(generation) {
            Ok((commands, kill)) => {
                state.status = WorkerStatus::Running;
                state.spawns += 1;
                state.commands = Some(commands);
                state.kill = Some(kill);
                let _ = self.events.send(WorkerEvent::Started);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to spawn worker");
                state.status = WorkerStatus::Down;
                Err(err)
            }
        }
    }

    fn spawn_process(
        self: &Arc<Self>,
        generation: u64,
    ) -> WorkerResult<(mpsc::UnboundedSender<Vec<u8>>, oneshot::Sender<()>)> {
        let program = self.settings.resolved_program().map_err(|err| {
            WorkerError::SpawnFailed(io::Error::new(io::ErrorKind::InvalidInput, err))
        })?;

        info!(%program, generation, "spawning worker");
        let mut child = Command::new(&program)
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(WorkerError::PipeUnavailable("stdin"))?;
        let stdout = child.stdout.take().ok_or(WorkerError::PipeUnavailable("stdout"))?;
        let stderr = child.stderr.take().ok_or(WorkerError::PipeUnavailable("stderr"))?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (kill, kill_rx) = oneshot::channel();

        tokio::spawn(write_commands(stdin, commands_rx));
        tokio::spawn(log_diagnostics(stderr));
        let reader = tokio::spawn(read_replies(
            stdout,
            Arc::downgrade(self),
            generation,
            self.settings.max_reply_bytes,
        ));
        tokio::spawn(monitor(child, reader, kill_rx, Arc::downgrade(self), generation));

        Ok((commands, kill))
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.restart.take() {
            timer.abort();
        }
        let was_up = matches!(
            state.status,
            WorkerStatus::Starting | WorkerStatus::Running | WorkerStatus::CrashedPendingRestart
        );
        state.status = WorkerStatus::Down;
        state.generation += 1;
        state.commands = None;
        if let Some(kill) = state.kill.take() {
            info!("stopping worker");
            let _ = kill.send(());
        }
        if was_up {
            let _ = self.events.send(WorkerEvent::Exited(WorkerError::Stopped));
        }
    }

    /// Forward an event if it comes from the current process.
    fn publish(&self, generation: u64, event: WorkerEvent) -> bool {
        let state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        self.events.send(event).is_ok()
    }

    fn handle_exit(self: &Arc<Self>, generation: u64, status: ExitStatus) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(%status, "previous worker process reaped");
            return;
        }

        error!(code = ?status.code(), %status, "worker exited unexpectedly");
        state.status = WorkerStatus::CrashedPendingRestart;
        state.commands = None;
        state.kill = None;
        let _ = self.events.send(WorkerEvent::Exited(WorkerError::Exited(status)));

        if state.restart.is_some() {
            return;
        }
        let backoff = self.settings.restart_backoff();
        let weak = Arc::downgrade(self);
        state.restart = Some(tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.state.lock();
                state.restart = None;
                if state.status != WorkerStatus::CrashedPendingRestart {
                    return;
                }
            }
            info!("restarting worker after crash");
            if let Err(err) = inner.start() {
                error!(error = %err, "worker restart failed");
                let _ = inner.events.send(WorkerEvent::Exited(err));
            }
        }));
    }
}

async fn write_commands(mut stdin: ChildStdin, mut commands: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(command) = commands.recv().await {
        let written = async {
            stdin.write_all(&command).await?;
            stdin.flush().await
        };
        if let Err(err) = written.await {
            warn!(error = %WorkerError::WriteFailed(err), "dropping worker command pipe");
            break;
        }
    }
}

async fn log_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => warn!(target: "streat::worker::stderr", "{}", line),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "worker stderr closed");
                break;
            }
        }
    }
}

async fn read_replies(
    mut stdout: ChildStdout,
    inner: Weak<Inner>,
    generation: u64,
    max_reply_bytes: usize,
) {
    let mut decoder = ReplyDecoder::new(max_reply_bytes);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %WorkerError::ReadFailed(err), "worker stdout closed");
                break;
            }
        };

        for reply in decoder.feed(&buf[..n]) {
            if let Err(err) = &reply {
                warn!(error = %err, "unparseable worker reply");
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if !inner.publish(generation, WorkerEvent::Reply(reply)) {
                return;
            }
        }
    }

    if decoder.pending() > 0 {
        debug!(bytes = decoder.pending(), "discarding partial reply at end of stream");
    }
}

async fn monitor(
    mut child: Child,
    reader: JoinHandle<()>,
    kill: oneshot::Receiver<()>,
    inner: Weak<Inner>,
    generation: u64,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };

    let status = match exited {
        Some(Ok(status)) => status,
        Some(Err(err)) => {
            error!(error = %err, "failed to wait for worker");
            return;
        }
        None => {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill worker");
            }
            reader.abort();
            return;
        }
    };

    // Every reply written before the exit must reach the engine first.
    let _ = reader.await;

    if let Some(inner) = inner.upgrade() {
        inner.handle_exit(generation, status);
    }
}
