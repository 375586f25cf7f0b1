#[path = "../support/mod.rs"]
mod support;

use std::time::Duration;

use serde_json::json;
use streat::worker::{ProcessSupervisor, WorkerError, WorkerEvent, WorkerEvents, WorkerStatus};
use support::FakeWorker;

async fn next_event(events: &mut WorkerEvents) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for worker event")
        .expect("event channel closed")
}

fn supervisor(worker: &FakeWorker) -> (ProcessSupervisor, WorkerEvents) {
    ProcessSupervisor::new(worker.settings(0).worker)
}

#[tokio::test]
async fn test_send_requires_running_worker() {
    let worker = FakeWorker::new();
    let (supervisor, _events) = supervisor(&worker);

    assert_eq!(supervisor.status(), WorkerStatus::Down);
    assert!(matches!(
        supervisor.send(&["-j", "/dev/null"]),
        Err(WorkerError::NotRunning)
    ));
}

#[tokio::test]
async fn test_reply_follows_command() {
    let worker = FakeWorker::new();
    let target = worker.dir().join("sample.bin");
    std::fs::write(&target, [0u8; 42]).unwrap();

    let (supervisor, mut events) = supervisor(&worker);
    supervisor.start().unwrap();
    assert!(matches!(next_event(&mut events).await, WorkerEvent::Started));

    supervisor
        .send(&["-j".to_string(), target.display().to_string()])
        .unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Reply(Ok(reply)) => {
            assert_eq!(reply[0]["FileSize"], json!(42));
            assert_eq!(reply[0]["Command"], json!(1));
        }
        other => panic!("expected reply, got {:?}", other),
    }
    supervisor.stop();
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let worker = FakeWorker::new();
    let (supervisor, _events) = supervisor(&worker);

    supervisor.start().unwrap();
    supervisor.start().unwrap();
    assert_eq!(supervisor.spawns(), 1);
    assert_eq!(supervisor.status(), WorkerStatus::Running);
    supervisor.stop();
}

#[tokio::test]
async fn test_crash_schedules_exactly_one_restart() {
    let worker = FakeWorker::new();
    let (supervisor, mut events) = supervisor(&worker);
    supervisor.start().unwrap();
    assert!(matches!(next_event(&mut events).await, WorkerEvent::Started));

    supervisor.send(&["crash"]).unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Exited(WorkerError::Exited(status)) => assert_eq!(status.code(), Some(3)),
        other => panic!("expected exit, got {:?}", other),
    }
    assert_eq!(supervisor.status(), WorkerStatus::CrashedPendingRestart);
    assert!(matches!(
        supervisor.send(&["-j", "/dev/null"]),
        Err(WorkerError::NotRunning)
    ));

    assert!(matches!(next_event(&mut events).await, WorkerEvent::Started));
    assert_eq!(supervisor.status(), WorkerStatus::Running);
    assert_eq!(supervisor.spawns(), 2);

    // Well past the back-off: no second restart sneaks in.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.spawns(), 2);
    assert!(events.try_recv().is_err());
    supervisor.stop();
}

#[tokio::test]
async fn test_stop_cancels_pending_restart() {
    let worker = FakeWorker::new();
    let (supervisor, mut events) = supervisor(&worker);
    supervisor.start().unwrap();
    next_event(&mut events).await;

    supervisor.send(&["crash"]).unwrap();
    assert!(matches!(next_event(&mut events).await, WorkerEvent::Exited(_)));
    supervisor.stop();
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::Exited(WorkerError::Stopped)
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.status(), WorkerStatus::Down);
    assert_eq!(supervisor.spawns(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let worker = FakeWorker::new();
    let (supervisor, mut events) = supervisor(&worker);
    supervisor.stop();
    supervisor.start().unwrap();
    next_event(&mut events).await;

    supervisor.stop();
    supervisor.stop();
    assert_eq!(supervisor.status(), WorkerStatus::Down);
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::Exited(WorkerError::Stopped)
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_program_fails_to_spawn() {
    let worker = FakeWorker::new();
    let mut settings = worker.settings(0).worker;
    settings.program = worker.dir().join("no-such-worker").display().to_string();
    let (supervisor, _events) = ProcessSupervisor::new(settings);

    assert!(matches!(supervisor.start(), Err(WorkerError::SpawnFailed(_))));
    assert_eq!(supervisor.status(), WorkerStatus::Down);
    assert_eq!(supervisor.spawns(), 0);
}
