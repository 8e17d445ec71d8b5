mod common;

use std::fs::{create_dir_all, write};
use std::path::Path;
use std::time::Duration;

use common::FakeRemote;
use gemini_context_core::cleanup::{cleanup, guarded, sweep};
use gemini_context_core::contract::{RemoteClient, RemoteError};
use gemini_context_core::discover::{discover, DiscoverOptions};
use gemini_context_core::ingest::{ingest, AdmissionResult, IngestOptions};
use gemini_context_core::prepare::PrepareLimits;
use gemini_context_core::registry::HandleRegistry;
use gemini_context_core::retry::RetryPolicy;
use tempfile::tempdir;

fn options(ceiling: u64, concurrency: usize) -> IngestOptions {
    IngestOptions {
        ceiling,
        concurrency,
        limits: PrepareLimits::default(),
        retry: RetryPolicy::new(4, Duration::from_millis(1)),
    }
}

fn write_files(root: &Path, count: usize, size: usize) {
    for i in 0..count {
        write(root.join(format!("test_file_{i}.txt")), "x".repeat(size)).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_small_files_fit_and_are_all_cleaned_up() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 10, 50);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();
    assert_eq!(files.len(), 10);

    // Cost is the uploaded length (header + 50 bytes of content).
    let remote = FakeRemote::new(|_, content| content.len() as u64);
    let registry = HandleRegistry::new();

    let (report, cleaned) = guarded(&remote, &registry, 8, async {
        ingest(&remote, files, &options(1_000_000, 8), &registry).await
    })
    .await;

    assert_eq!(report.admitted_count(), 10);
    assert!(report.rejected().is_empty());
    assert!(report.failed().is_empty());
    let measured: u64 = report
        .results
        .iter()
        .map(|r| match r {
            AdmissionResult::Admitted { cost, .. } => *cost,
            other => panic!("unexpected result {other:?}"),
        })
        .sum();
    assert_eq!(report.consumed, measured);

    assert_eq!(cleaned.deleted.len(), 10);
    assert!(cleaned.is_clean());
    assert_eq!(remote.live_count(), 0);
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn budget_of_25_admits_two_of_five_ten_unit_files() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 5, 50);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    let remote = FakeRemote::flat(10);
    let registry = HandleRegistry::new();
    let report = ingest(&remote, files, &options(25, 5), &registry).await;

    assert_eq!(report.admitted_count(), 2);
    assert_eq!(report.rejected().len(), 3);
    assert_eq!(report.consumed, 20);
    assert!(report.consumed <= 25);

    // Rejected uploads were deleted inline; only the admitted ones remain.
    assert_eq!(remote.live_count(), 2);
    assert_eq!(registry.len(), 2);
    let mut admitted: Vec<String> = report
        .admitted_handles()
        .into_iter()
        .map(|h| h.display_name)
        .collect();
    admitted.sort();
    assert_eq!(remote.live_names(), admitted);

    let cleaned = cleanup(&remote, registry.drain(), 4).await;
    assert_eq!(cleaned.deleted.len(), 2);
    assert_eq!(remote.live_count(), 0);
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 3, 10);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    let remote = FakeRemote::flat(1);
    remote.fail_store("test_file_1.txt", 2, RemoteError::Transient("503".into()));
    let registry = HandleRegistry::new();

    let report = ingest(&remote, files, &options(100, 2), &registry).await;

    assert_eq!(report.admitted_count(), 3);
    assert_eq!(
        remote.store_calls.load(std::sync::atomic::Ordering::SeqCst),
        5
    );
    cleanup(&remote, registry.drain(), 2).await;
}

#[tokio::test]
async fn one_failing_file_does_not_stop_the_batch() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 4, 10);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    let remote = FakeRemote::flat(1);
    remote.fail_store(
        "test_file_2.txt",
        1,
        RemoteError::Permanent("400 unsupported mime type".into()),
    );
    remote.fail_store(
        "test_file_3.txt",
        10,
        RemoteError::Timeout("deadline exceeded".into()),
    );
    let registry = HandleRegistry::new();

    let report = ingest(&remote, files, &options(100, 4), &registry).await;

    assert_eq!(report.admitted_count(), 2);
    let mut failed: Vec<&str> = report.failed().into_iter().map(|(p, _)| p).collect();
    failed.sort();
    assert_eq!(failed, vec!["test_file_2.txt", "test_file_3.txt"]);
    // 1 + 1 + 1 (permanent, no retry) + 4 (timeouts until exhausted)
    assert_eq!(
        remote.store_calls.load(std::sync::atomic::Ordering::SeqCst),
        7
    );
    cleanup(&remote, registry.drain(), 2).await;
}

#[tokio::test]
async fn oversized_files_are_uploaded_as_their_tail() {
    let tmp = tempdir().unwrap();
    create_dir_all(tmp.path().join("logs")).unwrap();
    let log: String = (1..=50).map(|i| format!("event {i}\n")).collect();
    write(tmp.path().join("logs/app.log"), &log).unwrap();
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    let remote = FakeRemote::flat(1);
    let registry = HandleRegistry::new();
    let mut opts = options(100, 1);
    opts.limits = PrepareLimits {
        max_bytes_verbatim: 100,
        max_lines_if_truncated: 2,
        mime_type: "text/x-log".into(),
    };

    let report = ingest(&remote, files, &opts, &registry).await;
    assert_eq!(report.admitted_count(), 1);
    let handle = &report.admitted_handles()[0];
    assert_eq!(handle.display_name, "logs/app.log");
    assert_eq!(handle.mime_type, "text/x-log");

    let uploaded = String::from_utf8(remote.content_of("logs/app.log").unwrap()).unwrap();
    assert!(uploaded.starts_with("File: logs/app.log\n"));
    assert!(uploaded.contains("showing the last 2 lines"));
    assert!(uploaded.ends_with("\n\nevent 49\nevent 50\n"));
    cleanup(&remote, registry.drain(), 1).await;
}

#[tokio::test]
async fn failing_conversation_still_releases_admitted_files() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 3, 20);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    let remote = FakeRemote::flat(5);
    let registry = HandleRegistry::new();

    let (result, cleaned) = guarded(&remote, &registry, 4, async {
        let report = ingest(&remote, files, &options(100, 3), &registry).await;
        assert_eq!(report.admitted_count(), 3);
        Err::<(), String>("chat session crashed".into())
    })
    .await;

    assert!(result.is_err());
    assert_eq!(cleaned.deleted.len(), 3);
    assert_eq!(remote.live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_ingestion_releases_every_stored_file() {
    let tmp = tempdir().unwrap();
    write_files(tmp.path(), 3, 20);
    let files = discover(tmp.path(), &DiscoverOptions::default()).unwrap();

    // Measurement hangs, so the run is cut off after every store has succeeded.
    let remote = FakeRemote::flat(1).with_measure_delay(Duration::from_secs(30));
    let registry = HandleRegistry::new();

    let (interrupted, cleaned) = guarded(&remote, &registry, 4, async {
        tokio::time::timeout(
            Duration::from_millis(500),
            ingest(&remote, files, &options(100, 3), &registry),
        )
        .await
        .is_err()
    })
    .await;

    assert!(interrupted);
    assert_eq!(cleaned.deleted.len(), 3);
    assert_eq!(remote.live_count(), 0);
}

#[tokio::test]
async fn cleanup_reports_already_deleted_handles() {
    let remote = FakeRemote::flat(1);
    let a = remote.store(b"a", "a.txt", "text/plain").await.unwrap();
    let b = remote.store(b"b", "b.txt", "text/plain").await.unwrap();
    remote.delete(&b).await.unwrap();

    let report = cleanup(&remote, vec![a.clone(), b.clone()], 4).await;

    assert_eq!(report.deleted, vec![a]);
    assert_eq!(report.failed_handles(), vec![&b]);
}

#[tokio::test]
async fn sweep_clears_leftovers_from_earlier_runs() {
    let remote = FakeRemote::flat(1);
    for name in ["old1.txt", "old2.txt", "old3.txt"] {
        remote.store(b"stale", name, "text/plain").await.unwrap();
    }

    let report = sweep(&remote, 2).await.unwrap();

    assert_eq!(report.deleted.len(), 3);
    assert_eq!(remote.live_count(), 0);
}
