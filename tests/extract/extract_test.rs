#[path = "../support/mod.rs"]
mod support;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::json;
use streat::extract::ScratchBuffer;
use streat::worker::{WorkerError, WorkerStatus};
use streat::{ExtractError, ExtractOptions, Extractor};
use support::{payload, FakeWorker, NEVER};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Fails every read, like a dropped upload.
struct Reset;

impl AsyncRead for Reset {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }
}

#[tokio::test]
async fn test_success_on_third_window() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(9000)).unwrap();

    let source = std::io::Cursor::new(payload(10_000));
    let metadata = within(extractor.extract(source, ExtractOptions::new().with_step(4096)))
        .await
        .unwrap();

    assert_eq!(metadata.get("Command"), Some(&json!(3)));
    assert_eq!(metadata.get("FileSize"), Some(&json!(10_000)));
    assert_eq!(metadata.get_str("Warning"), Some("fake worker"));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_limit_stops_draining_mid_window() {
    let worker = FakeWorker::new();
    let scratch_path = worker.dir().join("scratch.bin");
    let extractor = Extractor::with_scratch(
        worker.settings(NEVER),
        ScratchBuffer::at(scratch_path.clone()),
    )
    .unwrap();

    let source = std::io::Cursor::new(payload(100_000));
    let options = ExtractOptions::new().with_limit(5000).with_step(4096);
    let err = within(extractor.extract(source, options)).await.unwrap_err();

    match &err {
        ExtractError::Analysis { message, metadata } => {
            assert_eq!(message, "File format error");
            assert_eq!(metadata.get("FileSize"), Some(&json!(5000)));
            assert_eq!(metadata.get("Command"), Some(&json!(2)));
        }
        other => panic!("expected analysis error, got {:?}", other),
    }
    assert_eq!(std::fs::read(&scratch_path).unwrap(), payload(5000));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_limit_below_step_sends_one_command() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();

    let source = std::io::Cursor::new(payload(100_000));
    let options = ExtractOptions::new().with_limit(1000).with_step(4096);
    let metadata = within(extractor.extract(source, options)).await.unwrap();

    assert_eq!(metadata.get("Command"), Some(&json!(1)));
    assert_eq!(metadata.get("FileSize"), Some(&json!(1000)));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_source_makes_last_error_terminal() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(NEVER)).unwrap();

    let source = std::io::Cursor::new(payload(8192));
    let err = within(extractor.extract(source, ExtractOptions::new().with_step(4096)))
        .await
        .unwrap_err();

    assert!(err.is_analysis());
    let metadata = err.metadata().unwrap();
    assert_eq!(metadata.get("FileSize"), Some(&json!(8192)));
    assert_eq!(metadata.get("Command"), Some(&json!(2)));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_empty_source_is_analyzed_once() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(1)).unwrap();

    let err = within(extractor.extract(tokio::io::empty(), ExtractOptions::new()))
        .await
        .unwrap_err();

    let metadata = err.metadata().unwrap();
    assert_eq!(metadata.get("FileSize"), Some(&json!(0)));
    assert_eq!(metadata.get("Command"), Some(&json!(1)));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_aborted_source_sends_nothing_and_queue_moves_on() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();

    let broken = (&b"partial window"[..]).chain(Reset);
    let first = extractor.submit(broken, ExtractOptions::new()).unwrap();
    let second = extractor
        .submit(std::io::Cursor::new(payload(300)), ExtractOptions::new())
        .unwrap();

    let err = within(first).await.unwrap_err();
    assert!(matches!(err, ExtractError::SourceAborted(_)));

    let metadata = within(second).await.unwrap();
    assert_eq!(metadata.get("Command"), Some(&json!(1)));
    assert_eq!(metadata.get("FileSize"), Some(&json!(300)));
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_requests_complete_in_submission_order() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();

    let sizes = [700usize, 50, 2000, 1];
    let pending: Vec<_> = sizes
        .iter()
        .map(|&size| {
            extractor
                .submit(std::io::Cursor::new(payload(size)), ExtractOptions::new())
                .unwrap()
        })
        .collect();

    let results = within(futures::future::join_all(pending)).await;
    for (i, (result, size)) in results.into_iter().zip(sizes).enumerate() {
        let metadata = result.unwrap();
        assert_eq!(metadata.get("Command"), Some(&json!(i + 1)));
        assert_eq!(metadata.get("FileSize"), Some(&json!(size)));
    }
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_success_discards_unread_bytes() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();

    // The writer stays open: the request must finish without waiting for EOF.
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    writer.write_all(&payload(20_000)).await.unwrap();

    let metadata = within(extractor.extract(reader, ExtractOptions::new().with_step(4096)))
        .await
        .unwrap();
    assert_eq!(metadata.get("FileSize"), Some(&json!(4096)));

    let next = within(extractor.extract(std::io::Cursor::new(payload(10)), ExtractOptions::new()))
        .await
        .unwrap();
    assert_eq!(next.get("Command"), Some(&json!(2)));
    drop(writer);
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_crash_mid_command_fails_request_and_recovers() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();
    extractor.start_worker().unwrap();
    worker.arm_crash();

    let first = extractor
        .submit(std::io::Cursor::new(payload(100)), ExtractOptions::new())
        .unwrap();
    let second = extractor
        .submit(std::io::Cursor::new(payload(200)), ExtractOptions::new())
        .unwrap();

    match within(first).await {
        Err(ExtractError::Transport(WorkerError::Exited(_))) => {}
        other => panic!("expected transport failure, got {:?}", other),
    }

    // The follow-up waits for the restarted worker instead of failing.
    let metadata = within(second).await.unwrap();
    assert_eq!(metadata.get("Command"), Some(&json!(1)));
    assert_eq!(metadata.get("FileSize"), Some(&json!(200)));
    assert_eq!(extractor.worker_status(), WorkerStatus::Running);
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_stop_worker_while_draining_leaves_request_queued() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();

    let (_writer, reader) = tokio::io::duplex(64);
    let pending = extractor.submit(reader, ExtractOptions::new()).unwrap();
    extractor.start_worker().unwrap();
    assert_eq!(extractor.worker_status(), WorkerStatus::Running);

    // Nothing is outstanding while the source is still draining.
    extractor.stop_worker();
    assert_eq!(extractor.worker_status(), WorkerStatus::Down);

    extractor.shutdown().await;
    assert!(matches!(within(pending).await, Err(ExtractError::EngineClosed)));
}

#[tokio::test]
async fn test_stop_worker_fails_outstanding_request() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();
    worker.arm_hang();

    let first = extractor
        .submit(std::io::Cursor::new(payload(100)), ExtractOptions::new())
        .unwrap();
    let second = extractor
        .submit(std::io::Cursor::new(payload(200)), ExtractOptions::new())
        .unwrap();

    // The worker has swallowed the first command and will never answer it.
    within(async {
        while !worker.hang_taken() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    extractor.stop_worker();

    match within(first).await {
        Err(ExtractError::Transport(WorkerError::Stopped)) => {}
        other => panic!("expected stopped transport, got {:?}", other),
    }

    // The next request starts a fresh worker on demand.
    let metadata = within(second).await.unwrap();
    assert_eq!(metadata.get("Command"), Some(&json!(1)));
    assert_eq!(metadata.get("FileSize"), Some(&json!(200)));
    assert_eq!(extractor.worker_status(), WorkerStatus::Running);
    extractor.shutdown().await;
}

#[tokio::test]
async fn test_short_source_single_window() {
    let worker = FakeWorker::new();
    let extractor = Extractor::new(worker.settings(0)).unwrap();
    let metadata = within(extractor.extract(&b"tiny"[..], ExtractOptions::new()))
        .await
        .unwrap();
    assert_eq!(metadata.get("FileSize"), Some(&json!(4)));
    extractor.shutdown().await;
}
