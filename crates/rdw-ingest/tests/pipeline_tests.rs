//! Pipeline behavior against the instrumented in-memory store

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::{csv, init_test_tracing, run, vehicles, Vehicle};
use proptest::prelude::*;
use rdw_ingest::row::FieldValue;
use rdw_ingest::store::MemoryStore;
use rdw_ingest::{IngestError, RunOutcome};

const BPM: usize = 6;
const ZITPLAATSEN: usize = 8;

#[tokio::test]
async fn test_two_full_batches_and_a_tail() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let batch_size = 4;

    let report = run(&store, &csv(&vehicles(2 * batch_size + 1)), batch_size, 2).await;

    assert!(report.is_success());
    assert_eq!(report.records_read, 9);
    assert_eq!(report.batches_committed, 3);
    assert_eq!(report.rows_committed, 9);
    assert_eq!(store.transactions_begun(), 3);
    assert_eq!(store.committed_count(), 9);
}

#[tokio::test]
async fn test_rows_keep_source_order_within_a_batch() {
    let store = Arc::new(MemoryStore::new());

    run(&store, &csv(&vehicles(5)), 10, 1).await;

    let records: Vec<u64> = store.committed_rows().iter().map(|row| row.record()).collect();
    assert_eq!(records, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_concurrent_commits_stay_within_slots() {
    let store = Arc::new(MemoryStore::new().with_commit_latency(Duration::from_millis(10)));

    let report = run(&store, &csv(&vehicles(40)), 2, 3).await;

    assert!(report.is_success());
    assert_eq!(report.batches_committed, 20);
    assert!(store.peak_open_transactions() <= 3);
    assert!(store.peak_open_transactions() >= 1);
    assert_eq!(store.open_transactions(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_in_flight_commits_never_exceed_slots(
        slots in 1usize..6,
        batch_size in 1usize..5,
        rows in 0usize..40,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let store = Arc::new(MemoryStore::new().with_commit_latency(Duration::from_millis(1)));
        let report = runtime.block_on(run(&store, &csv(&vehicles(rows)), batch_size, slots));

        prop_assert!(report.is_success());
        prop_assert!(store.peak_open_transactions() <= slots);
        prop_assert_eq!(store.committed_count(), rows as u64);
        prop_assert_eq!(report.batches_committed, rows.div_ceil(batch_size) as u64);
    }
}

#[tokio::test]
async fn test_malformed_numbers_are_zeroed_and_committed() {
    let store = Arc::new(MemoryStore::new());
    let rows = vec![
        Vehicle::new("AA01BB"),
        Vehicle::new("CC02DD").bpm("n.v.t.").zitplaatsen("vijf"),
    ];

    let report = run(&store, &csv(&rows), 10, 1).await;

    assert!(report.is_success());
    assert_eq!(report.rows_committed, 2);
    let committed = store.committed_rows();
    assert_eq!(committed[1].get(BPM), Some(&FieldValue::Decimal(0.0)));
    assert_eq!(committed[1].get(ZITPLAATSEN), Some(&FieldValue::Integer(0)));
}

#[tokio::test]
async fn test_failed_commit_aborts_after_rollback() {
    let store = Arc::new(
        MemoryStore::new()
            .with_commit_latency(Duration::from_millis(5))
            .fail_commits(|row| row.key() == Some("K000005")),
    );

    let report = run(&store, &csv(&vehicles(12)), 2, 2).await;

    match &report.outcome {
        RunOutcome::Aborted(IngestError::Commit { batch, .. }) => assert_eq!(*batch, 3),
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert_eq!(report.batches_failed, 1);
    assert!(report.records_read < 12);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.open_transactions(), 0);
    assert!(store
        .committed_rows()
        .iter()
        .all(|row| row.key() != Some("K000005") && row.key() != Some("K000006")));
}

#[tokio::test]
async fn test_failed_commit_stops_reading_early() {
    let store = Arc::new(MemoryStore::new().fail_commits(|row| row.key() == Some("K000001")));

    let report = run(&store, &csv(&vehicles(2000)), 2, 1).await;

    assert!(matches!(
        report.error(),
        Some(IngestError::Commit { batch: 1, .. })
    ));
    assert!(
        report.records_read < 100,
        "kept reading after the failure: {} records",
        report.records_read
    );
    assert_eq!(report.batches_failed, 1);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn test_end_to_end_abort_keeps_decoded_rows() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let rows = vec![
        Vehicle::new("AA01BB"),
        Vehicle::new("CC02DD").bpm(""),
        Vehicle::new("EE03FF").apk("2025-06-30"),
    ];

    let report = run(&store, &csv(&rows), 2000, 100).await;

    match report.error() {
        Some(IngestError::MalformedDate { record, column, .. }) => {
            assert_eq!(*record, 3);
            assert_eq!(column, "vervaldatum_apk");
        }
        other => panic!("expected malformed date, got {other:?}"),
    }
    assert!(!report.is_success());

    let committed = store.committed_rows();
    let plates: Vec<_> = committed.iter().filter_map(|row| row.key()).collect();
    assert_eq!(plates, vec!["AA01BB", "CC02DD"]);
    assert_eq!(committed[1].get(BPM), Some(&FieldValue::Decimal(0.0)));
    assert_eq!(
        committed[0].get(4),
        Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()))
    );
}

#[tokio::test]
async fn test_short_record_aborts_the_run() {
    let store = Arc::new(MemoryStore::new());
    let mut text = csv(&vehicles(1));
    text.push_str("AB12CD,Personenauto\n");
    text.push_str(&Vehicle::new("ZZ99ZZ").line());
    text.push('\n');

    let report = run(&store, &text, 10, 1).await;

    assert!(matches!(
        report.error(),
        Some(IngestError::ShortRecord {
            record: 2,
            expected: 11,
            actual: 2
        })
    ));
    assert_eq!(report.records_read, 2);
    assert_eq!(store.committed_count(), 1);
}

#[tokio::test]
async fn test_extra_trailing_columns_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    let mut text = csv(&[]);
    text.push_str(&Vehicle::new("AA01BB").line());
    text.push_str(",Nee,2,extra\n");

    let report = run(&store, &text, 10, 1).await;

    assert!(report.is_success());
    assert_eq!(store.committed_rows()[0].values().len(), 11);
}

#[tokio::test]
async fn test_rejected_insert_is_skipped() {
    let store = Arc::new(MemoryStore::new().reject_inserts(|row| row.key() == Some("K000002")));

    let report = run(&store, &csv(&vehicles(3)), 10, 1).await;

    assert!(report.is_success());
    assert_eq!(report.rows_committed, 2);
    assert_eq!(report.rows_skipped, 1);
    assert_eq!(store.committed_count(), 2);
}

#[tokio::test]
async fn test_header_only_file_commits_nothing() {
    let store = Arc::new(MemoryStore::new());

    let report = run(&store, &csv(&[]), 10, 1).await;

    assert!(report.is_success());
    assert_eq!(report.records_read, 0);
    assert_eq!(store.transactions_begun(), 0);
}
