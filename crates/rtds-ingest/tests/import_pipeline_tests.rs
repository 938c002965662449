//! End-to-end import tests: fetch, chunk, dual write and job lifecycle

mod common;

use common::*;
use rtds_ingest::error::IngestError;
use rtds_ingest::retrieval::{SourcePreference, SourceUsed};
use rtds_ingest::storage::{MemoryRecordStore, RecordStore, SqliteRecordStore};
use rtds_ingest::types::{Destination, DestinationSet, JobStatus};
use rtds_common::OwnerId;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_three_records_chunk_size_one() {
    let durable = Arc::new(FaultyStore::new());
    let h = harness(Arc::new(ScriptedProvider::new(3)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(1))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 3);
    assert_eq!(job.chunks_processed, 3);
    assert_eq!(job.estimated_total, Some(3));
    assert!(job.error_log.is_empty());
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(durable.appended_chunks(), vec![0, 1, 2]);

    let session = h.sessions.get(&OwnerId::new("alice").unwrap()).await.unwrap();
    let page = session.page(&key("alice"), 0, 10).await.unwrap();
    let indices: Vec<u64> = page.records.iter().map(|r| r.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(page.records.iter().all(|r| r.job_id == job_id && r.record_index == 0));
}

#[tokio::test]
async fn test_chunk_indices_contiguous_for_larger_chunks() {
    let durable = Arc::new(FaultyStore::new());
    let h = harness(Arc::new(ScriptedProvider::new(95)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 95);
    assert_eq!(durable.appended_chunks(), (0..10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_fatal_fetch_without_partial_import_fails() {
    let provider = ScriptedProvider::new(5).fatal_at(1);
    let h = harness(Arc::new(provider), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(1))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_count, 1);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].kind, "fetch_fatal");
    assert_eq!(job.error_log[0].chunk_index, Some(1));
    assert_eq!(job.error_log[0].destination, None);
}

#[tokio::test]
async fn test_fatal_fetch_with_partial_import_continues() {
    let provider = ScriptedProvider::new(5).fatal_at(1);
    let h = harness(Arc::new(provider), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(1).with_partial_import(true),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::PartiallyCompleted);
    assert_eq!(job.processed_count, 4);
    assert_eq!(job.error_log.len(), 1);
}

#[tokio::test]
async fn test_no_artificial_ceiling() {
    const TOTAL: u64 = 120_000;
    let durable = Arc::new(MemoryRecordStore::new());
    let h = harness(Arc::new(ScriptedProvider::new(TOTAL)), durable.clone());

    let opts = options(1000).with_max_import_size(0);
    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", opts)
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, TOTAL);
    assert_eq!(job.durable_written, TOTAL);
    assert_eq!(durable.stats(&key("alice")).await.unwrap().total_records, TOTAL);
}

#[tokio::test]
async fn test_caller_ceiling_truncates_import() {
    let h = harness(Arc::new(ScriptedProvider::new(120)), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(20).with_max_import_size(50),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 50);
    assert_eq!(job.estimated_total, Some(50));
    assert_eq!(job.chunks_processed, 3);
}

#[tokio::test]
async fn test_unknown_total_reports_absolute_progress() {
    let provider = ScriptedProvider::new(7).without_total();
    let h = harness(Arc::new(provider), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(3))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 7);
    assert_eq!(job.estimated_total, None);
    assert_eq!(job.completion_fraction(), None);
}

#[tokio::test]
async fn test_partial_write_isolation() {
    let durable = Arc::new(FaultyStore::new().fatal_on_chunk(1));
    let h = harness(Arc::new(ScriptedProvider::new(4)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(1).with_partial_import(true),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::PartiallyCompleted);
    assert_eq!(job.ephemeral_written, 4);
    assert_eq!(job.durable_written, 3);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].chunk_index, Some(1));
    assert_eq!(job.error_log[0].destination, Some(Destination::Durable));
    assert_eq!(job.error_log[0].kind, "write_fatal");

    // chunks after the failed one were still attempted
    assert_eq!(durable.appended_chunks(), vec![0, 2, 3]);
    let session = h.sessions.get(&OwnerId::new("alice").unwrap()).await.unwrap();
    assert_eq!(session.stats(&key("alice")).await.unwrap().total_records, 4);
}

#[tokio::test]
async fn test_required_destination_failure_fails_job() {
    let durable = Arc::new(FaultyStore::new().fatal_on_chunk(1));
    let h = harness(Arc::new(ScriptedProvider::new(4)), durable.clone());

    let opts = options(1)
        .with_partial_import(true)
        .with_required(DestinationSet::only(Destination::Durable));
    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", opts)
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_count, 1);
    assert_eq!(durable.appended_chunks(), vec![0]);
}

#[tokio::test]
async fn test_memory_budget_too_small_fails_despite_partial_import() {
    let provider = Arc::new(ScriptedProvider::new(50));
    let durable = Arc::new(FaultyStore::new());
    let h = harness(provider.clone(), durable.clone());

    // records are ~33 bytes: single records fit, five of them never do
    let opts = options(5)
        .with_partial_import(true)
        .with_max_memory_bytes(100);
    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", opts)
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].kind, "budget_exceeded");
    assert_eq!(job.error_log[0].chunk_index, Some(job.chunks_processed));

    // only chunks emitted before the sample window filled were written
    assert!(job.chunks_processed > 0);
    assert!(job.processed_count < 10);
    assert_eq!(
        durable.appended_chunks(),
        (0..job.chunks_processed).collect::<Vec<_>>()
    );
    assert_eq!(durable.raw_len(&key("alice")).await as u64, job.processed_count);
    assert_eq!(provider.opened_at(), vec![0]);
}

#[tokio::test]
async fn test_transient_write_retry_loses_no_records() {
    let durable = Arc::new(FaultyStore::new().transient_failures(1).commit_then_fail());
    let h = harness(Arc::new(ScriptedProvider::new(5)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(5))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_log.is_empty());
    // the first attempt committed before failing, so the retry duplicated it
    assert!(durable.raw_len(&key("alice")).await >= 5);
    assert_eq!(durable.stats(&key("alice")).await.unwrap().total_records, 5);
    assert_eq!(durable.append_calls(), 2);
}

#[tokio::test]
async fn test_exhausted_write_retries_are_logged() {
    let durable = Arc::new(FaultyStore::new().transient_failures(100));
    let h = harness(Arc::new(ScriptedProvider::new(3)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(3))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_log.len(), 1);
    let entry = &job.error_log[0];
    assert_eq!(entry.kind, "write_transient");
    assert_eq!(entry.attempt, fast_retry().max_retries);
    assert_eq!(entry.destination, Some(Destination::Durable));
    // one initial attempt plus one per retry
    assert_eq!(durable.append_calls(), 1 + fast_retry().max_retries as usize);
}

#[tokio::test]
async fn test_transient_fetch_error_resumes_at_offset() {
    let provider = Arc::new(ScriptedProvider::new(6).transient_once_at(3));
    let h = harness(provider.clone(), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(2))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_log.is_empty());
    assert_eq!(job.processed_count, 6);
    assert_eq!(provider.opened_at(), vec![0, 3]);

    let page = h
        .orchestrator
        .retrieval()
        .get_page("alice", SCRIPTED, 0, 10, SourcePreference::Auto)
        .await
        .unwrap();
    let offsets: Vec<u64> = page
        .page
        .records
        .iter()
        .map(|r| r.value["offset"].as_u64().unwrap())
        .collect();
    assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_fatal_reopen_ends_partial_import() {
    let provider = Arc::new(ScriptedProvider::new(6).transient_once_at(3).fatal_reopen());
    let h = harness(provider.clone(), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(1).with_partial_import(true),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::PartiallyCompleted);
    assert_eq!(job.processed_count, 3);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].kind, "fetch_fatal");
    assert_eq!(job.error_log[0].chunk_index, Some(3));
    // a fatal reopen is not retried
    assert_eq!(provider.open_attempts(), 2);
    assert_eq!(provider.opened_at(), vec![0]);
}

#[tokio::test]
async fn test_transient_open_errors_retried() {
    let provider = Arc::new(ScriptedProvider::new(3).failing_opens(2));
    let h = harness(provider.clone(), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(1))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(provider.open_attempts(), 3);
}

#[tokio::test]
async fn test_open_retries_exhausted_fails_job() {
    let provider = Arc::new(ScriptedProvider::new(3).failing_opens(100));
    let h = harness(provider.clone(), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(1).with_partial_import(true),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_count, 0);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].kind, "fetch_transient");
    assert_eq!(job.error_log[0].chunk_index, None);
    assert_eq!(provider.open_attempts(), 1 + fast_retry().max_retries as usize);
}

#[tokio::test]
async fn test_cancellation_stops_at_chunk_boundary() {
    let provider = ScriptedProvider::new(1000).with_delay(Duration::from_millis(2));
    let h = harness(Arc::new(provider), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(5))
        .await
        .unwrap();

    let mut sub = h.orchestrator.subscribe_progress(job_id).await.unwrap();
    while let Some(event) = sub.recv().await {
        if event.processed_count >= 10 {
            break;
        }
    }
    assert!(h.orchestrator.cancel_import(job_id).await.unwrap());

    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.processed_count < 1000);
    assert_eq!(job.processed_count % 5, 0);
    assert_eq!(job.ephemeral_written, job.processed_count);
    assert_eq!(job.durable_written, job.processed_count);

    // cancelling a finished job is a no-op
    assert!(!h.orchestrator.cancel_import(job_id).await.unwrap());
}

#[tokio::test]
async fn test_cleanup_on_cancel_removes_written_records() {
    let provider = ScriptedProvider::new(1000).with_delay(Duration::from_millis(2));
    let durable = Arc::new(MemoryRecordStore::new());
    let h = harness(Arc::new(provider), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(5).with_cleanup_on_failure(true),
        )
        .await
        .unwrap();

    let mut sub = h.orchestrator.subscribe_progress(job_id).await.unwrap();
    while let Some(event) = sub.recv().await {
        if event.processed_count >= 5 {
            break;
        }
    }
    h.orchestrator.cancel_import(job_id).await.unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.processed_count >= 5);
    assert_eq!(durable.stats(&key("alice")).await.unwrap().total_records, 0);
    let session = h.sessions.get(&OwnerId::new("alice").unwrap()).await.unwrap();
    assert_eq!(session.stats(&key("alice")).await.unwrap().total_records, 0);
}

#[tokio::test]
async fn test_cleanup_on_failure_removes_written_records() {
    let durable = Arc::new(FaultyStore::new().fatal_on_chunk(2));
    let h = harness(Arc::new(ScriptedProvider::new(5)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(1).with_cleanup_on_failure(true),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_count, 2);
    assert_eq!(durable.stats(&key("alice")).await.unwrap().total_records, 0);
}

#[tokio::test]
async fn test_jobs_beyond_limit_are_queued() {
    let provider = ScriptedProvider::new(40).with_delay(Duration::from_millis(5));
    let h = harness_with_limit(Arc::new(provider), Arc::new(MemoryRecordStore::new()), 1);

    let first = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "bob", options(10))
        .await
        .unwrap();

    let mut sub = h.orchestrator.subscribe_progress(first).await.unwrap();
    while let Some(event) = sub.recv().await {
        if event.status == JobStatus::Running {
            break;
        }
    }

    let queued = h.orchestrator.get_job_status(second).await.unwrap();
    assert_eq!(queued.status, JobStatus::Pending);
    assert!(queued.started_at.is_none());
    assert_eq!(h.orchestrator.active_jobs().await, 2);

    let first = h.orchestrator.wait_for_job(first).await.unwrap();
    let second = h.orchestrator.wait_for_job(second).await.unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let provider = ScriptedProvider::new(40).with_delay(Duration::from_millis(5));
    let h = harness_with_limit(Arc::new(provider), Arc::new(MemoryRecordStore::new()), 1);

    let first = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap();

    assert!(h.orchestrator.cancel_import(second).await.unwrap());
    let cancelled = h.orchestrator.wait_for_job(second).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert_eq!(cancelled.processed_count, 0);

    let done = h.orchestrator.wait_for_job(first).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_progress_events_monotonic_and_replayed() {
    let h = harness(Arc::new(ScriptedProvider::new(30)), Arc::new(MemoryRecordStore::new()));

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(3))
        .await
        .unwrap();

    let mut sub = h.orchestrator.subscribe_progress(job_id).await.unwrap();
    let mut last = 0;
    let mut final_status = None;
    while let Some(event) = sub.recv().await {
        assert_eq!(event.job_id, job_id);
        assert!(event.processed_count >= last);
        last = event.processed_count;
        final_status = Some(event.status);
    }
    assert_eq!(final_status, Some(JobStatus::Completed));
    assert_eq!(last, 30);

    // a late subscriber gets the terminal snapshot right away
    let mut late = h.orchestrator.subscribe_progress(job_id).await.unwrap();
    let snapshot = late.recv().await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.processed_count, 30);
    assert_eq!(snapshot.fraction(), Some(1.0));
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn test_rejected_requests() {
    let h = harness(Arc::new(ScriptedProvider::new(3)), Arc::new(MemoryRecordStore::new()));

    let err = h
        .orchestrator
        .start_import("unknown", Map::new(), "alice", options(1))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnknownDatasetType(_)));

    let err = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "  ", options(1))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidOwner(_)));

    let err = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(1).with_sub_batch_size(0))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidConfig(_)));

    let missing = Uuid::new_v4();
    assert!(matches!(
        h.orchestrator.get_job_status(missing).await,
        Err(IngestError::JobNotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.orchestrator.subscribe_progress(missing).await,
        Err(IngestError::JobNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.cancel_import(missing).await,
        Err(IngestError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_and_purge_jobs() {
    let provider = ScriptedProvider::new(200).with_delay(Duration::from_millis(2));
    let h = harness(Arc::new(provider), Arc::new(MemoryRecordStore::new()));

    let slow = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap();
    let other = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "bob", options(10).with_max_import_size(10))
        .await
        .unwrap();

    let alice_jobs = h.orchestrator.list_jobs("alice").await.unwrap();
    assert_eq!(alice_jobs.len(), 1);
    assert_eq!(alice_jobs[0].id, slow);

    assert!(matches!(
        h.orchestrator.purge_job(slow).await,
        Err(IngestError::JobActive(_))
    ));

    h.orchestrator.wait_for_job(other).await.unwrap();
    let purged = h.orchestrator.purge_job(other).await.unwrap();
    assert_eq!(purged.id, other);
    assert!(h.orchestrator.list_jobs("bob").await.unwrap().is_empty());
    assert!(matches!(
        h.orchestrator.get_job_status(other).await,
        Err(IngestError::JobNotFound(_))
    ));

    h.orchestrator.shutdown().await;
    let stopped = h.orchestrator.get_job_status(slow).await.unwrap();
    assert_eq!(stopped.status, JobStatus::Cancelled);

    let err = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(10))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let durable = Arc::new(MemoryRecordStore::new());
    let h = harness(Arc::new(ScriptedProvider::new(12)), durable.clone());

    let job_id = h
        .orchestrator
        .start_import(
            SCRIPTED,
            Map::new(),
            "alice",
            options(5).with_destinations(DestinationSet::none()),
        )
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 12);
    assert_eq!(job.ephemeral_written + job.durable_written, 0);
    assert_eq!(durable.stats(&key("alice")).await.unwrap().total_records, 0);
    assert_eq!(h.sessions.active_sessions().await, 0);
}

#[tokio::test]
async fn test_import_into_sqlite_and_read_back_after_session_ends() {
    let durable = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let h = harness(Arc::new(ScriptedProvider::new(250)), durable);

    let job_id = h
        .orchestrator
        .start_import(SCRIPTED, Map::new(), "alice", options(100))
        .await
        .unwrap();
    let job = h.orchestrator.wait_for_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let retrieval = h.orchestrator.retrieval();
    let fresh = retrieval
        .get_page("alice", SCRIPTED, 0, 50, SourcePreference::Auto)
        .await
        .unwrap();
    assert_eq!(fresh.source, SourceUsed::Ephemeral);

    assert!(h.sessions.end_session(&OwnerId::new("alice").unwrap()).await);
    let recovered = retrieval
        .get_page("alice", SCRIPTED, 200, 100, SourcePreference::Auto)
        .await
        .unwrap();
    assert_eq!(recovered.source, SourceUsed::Durable);
    assert_eq!(recovered.page.total, 250);
    assert_eq!(recovered.page.records.len(), 50);
    assert!(!recovered.page.has_more());

    // other owners never see alice's records
    let bob = retrieval
        .get_page("bob", SCRIPTED, 0, 10, SourcePreference::Auto)
        .await
        .unwrap();
    assert!(bob.page.records.is_empty());
    assert_eq!(bob.source, SourceUsed::Durable);
}
