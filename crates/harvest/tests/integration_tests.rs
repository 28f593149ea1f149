//! Integration tests for the harvest crate
//!
//! These tests run the complete scan pipeline against the in-memory remote
//! and both store backends.

use std::sync::Arc;

use chrono::Utc;
use harvest::airtable::api::{BaseDetail, FieldSchema, RemoteRecord, TableSchema, WorkspaceDetail};
use harvest::{
    ApiError, AttachmentDir, Base, ConcurrencyLimits, ExportStore, InMemoryExportStore,
    MockAirtable, MockCall, Record, RecordKey, RetryPolicy, ScanContext, ScanCoordinator,
    ScanId, ScanOptions, ScanReport, ScanSettings, SkipReason, SqliteExportStore,
};
use serde_json::json;
use tempfile::TempDir;

const ADMIN: &str = "usrAdmin";
const ACCOUNT: &str = "entAcc1";

/// Both store backends; the TempDir keeps the SQLite file alive
fn stores() -> Vec<(&'static str, Arc<dyn ExportStore>, TempDir)> {
    let memory_dir = TempDir::new().unwrap();
    let sqlite_dir = TempDir::new().unwrap();
    let sqlite = SqliteExportStore::new(sqlite_dir.path().join("harvest.db")).unwrap();
    vec![
        ("memory", Arc::new(InMemoryExportStore::new()), memory_dir),
        ("sqlite", Arc::new(sqlite), sqlite_dir),
    ]
}

/// A remote with one workspace holding the given bases, each with two
/// tables of three records
fn make_remote(base_ids: &[&str], page_size: usize) -> Arc<MockAirtable> {
    let mock = MockAirtable::new(page_size);
    let mut ws = WorkspaceDetail::new("wsp1", "Operations", Utc::now());
    ws.base_ids = base_ids.iter().map(|s| s.to_string()).collect();
    mock.add_workspace(ACCOUNT, ws);

    for base_id in base_ids {
        mock.add_base(BaseDetail::new(*base_id, format!("Base {base_id}"), Utc::now()));
        for table_id in ["tbl1", "tbl2"] {
            mock.add_table(base_id, TableSchema::new(table_id, table_id, vec![]));
            mock.add_records(
                base_id,
                table_id,
                (0..3)
                    .map(|i| {
                        RemoteRecord::new(
                            format!("rec{i}"),
                            Utc::now(),
                            json!({"Name": format!("{base_id}/{table_id}/{i}")}),
                        )
                    })
                    .collect(),
            );
        }
    }
    Arc::new(mock)
}

fn settings() -> ScanSettings {
    ScanSettings::new(ADMIN).with_retry(RetryPolicy::immediate(3))
}

async fn run_with(
    mock: &Arc<MockAirtable>,
    store: &Arc<dyn ExportStore>,
    settings: ScanSettings,
    options: ScanOptions,
) -> ScanReport {
    let ctx = ScanContext::new(mock.clone(), store.clone(), settings);
    ScanCoordinator::new(ctx, vec![ACCOUNT.to_string()])
        .run(options)
        .await
        .unwrap()
}

async fn run(mock: &Arc<MockAirtable>, store: &Arc<dyn ExportStore>, scan_id: &str) -> ScanReport {
    run_with(
        mock,
        store,
        settings(),
        ScanOptions {
            scan_id: Some(scan_id.to_string()),
            ..Default::default()
        },
    )
    .await
}

/// Seed a base as left behind by an earlier run
fn seed_base(store: &Arc<dyn ExportStore>, base_id: &str, tag: Option<&str>) {
    store
        .upsert_base(Base::discovered(base_id, "wsp1", base_id, Utc::now()))
        .unwrap();
    if let Some(tag) = tag {
        store
            .mark_base_scanned(base_id, &ScanId::new(tag), Utc::now())
            .unwrap();
    }
    store
        .upsert_record(Record::new(
            RecordKey::new(base_id, "tbl1", "recOld"),
            json!({"Name": "old"}),
            Utc::now(),
            ScanId::new(tag.unwrap_or("S_old")),
        ))
        .unwrap();
}

fn snapshot(store: &Arc<dyn ExportStore>) -> (Vec<Base>, Vec<Record>) {
    let bases = store.list_bases().unwrap();
    let mut records = Vec::new();
    for base in &bases {
        records.extend(store.list_records_for_base(&base.id).unwrap());
    }
    records.sort_by(|a, b| a.key.cmp(&b.key));
    (bases, records)
}

#[tokio::test]
async fn test_scanned_bases_and_records_carry_run_tag() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2", "app3"], 2);
        let report = run(&mock, &store, "S").await;

        assert!(report.skipped.is_empty(), "{name}");
        assert_eq!(report.bases_scanned, 3, "{name}");
        assert_eq!(report.records_written, 18, "{name}");

        let (bases, records) = snapshot(&store);
        assert_eq!(bases.len(), 3, "{name}");
        assert!(bases.iter().all(|b| b.is_scanned_in(&ScanId::new("S"))), "{name}");
        assert_eq!(records.len(), 18, "{name}");
        assert!(records.iter().all(|r| r.scan_id.as_str() == "S"), "{name}");

        let record = store
            .get_record(&RecordKey::new("app2", "tbl2", "rec1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.data, json!({"Name": "app2/tbl2/1"}), "{name}");

        let ws = store.get_workspace("wsp1").unwrap().unwrap();
        assert_eq!(ws.name, "Operations", "{name}");

        // Every temporary grant was released
        assert!(mock.active_grants().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_skipped_base_keeps_previous_tag() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2"], 10);
        seed_base(&store, "app2", Some("S_old"));
        mock.fail(
            MockCall::Grant("app2".into()),
            ApiError::Forbidden("not an admin".into()),
            None,
        );

        let report = run(&mock, &store, "S").await;

        assert_eq!(report.skipped.len(), 1, "{name}");
        assert_eq!(report.skipped[0].0, "app2", "{name}");
        assert!(
            matches!(report.skipped[0].1, SkipReason::GrantForbidden(_)),
            "{name}"
        );
        let app2 = store.get_base("app2").unwrap().unwrap();
        assert_eq!(app2.scan_id, Some(ScanId::new("S_old")), "{name}");
        assert!(
            store
                .get_base("app1")
                .unwrap()
                .unwrap()
                .is_scanned_in(&ScanId::new("S")),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_rerun_with_same_id_is_idempotent() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2"], 2);

        run(&mock, &store, "S").await;
        let first = snapshot(&store);

        let report = run(&mock, &store, "S").await;
        let second = snapshot(&store);

        assert_eq!(report.bases_selected, 0, "{name}");
        assert_eq!(first, second, "{name}");
    }
}

#[tokio::test]
async fn test_resumed_run_only_touches_untagged_bases() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2", "app3", "app4"], 2);
        mock.fail(
            MockCall::Grant("app3".into()),
            ApiError::Forbidden("no".into()),
            Some(1),
        );
        mock.fail(
            MockCall::Grant("app4".into()),
            ApiError::Forbidden("no".into()),
            Some(1),
        );

        // Interrupted run: app1 and app2 done, app3 and app4 left over
        let report = run(&mock, &store, "S").await;
        assert_eq!(report.bases_scanned, 2, "{name}");
        mock.clear_calls();

        let report = run_with(
            &mock,
            &store,
            settings(),
            ScanOptions {
                scan_id: Some("S".into()),
                crawl: false,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(report.bases_selected, 2, "{name}");
        assert_eq!(report.bases_scanned, 2, "{name}");
        assert_eq!(mock.calls_for_base("app1"), 0, "{name}");
        assert_eq!(mock.calls_for_base("app2"), 0, "{name}");
        assert!(mock.calls_for_base("app3") > 0, "{name}");
        assert!(
            store
                .list_bases()
                .unwrap()
                .iter()
                .all(|b| b.is_scanned_in(&ScanId::new("S"))),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_resumed_run_with_crawl_does_not_scan_tagged_bases() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2"], 10);
        run(&mock, &store, "S").await;
        mock.clear_calls();

        run(&mock, &store, "S").await;

        let scan_calls: Vec<_> = mock
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    MockCall::Grant(_) | MockCall::Tables(_) | MockCall::Records { .. }
                )
            })
            .collect();
        assert!(scan_calls.is_empty(), "{name}: {scan_calls:?}");
    }
}

#[tokio::test]
async fn test_reconciliation_deletes_stale_bases_with_cascade() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1"], 10);
        // B2 and B3 are no longer upstream
        seed_base(&store, "app2", Some("S_old"));
        seed_base(&store, "app3", None);

        let report = run_with(
            &mock,
            &store,
            settings(),
            ScanOptions {
                scan_id: Some("S".into()),
                delete_stale: true,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(report.bases_gone, 2, "{name}");
        let reconcile = report.reconcile.unwrap();
        assert_eq!(reconcile.bases_deleted, 2, "{name}");

        let ids: Vec<_> = store.list_bases().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["app1"], "{name}");
        assert!(store.list_records_for_base("app2").unwrap().is_empty(), "{name}");
        assert!(store.list_records_for_base("app3").unwrap().is_empty(), "{name}");
        assert_eq!(store.count_records().unwrap(), 6, "{name}");
    }
}

#[tokio::test]
async fn test_reconciliation_deletes_records_removed_upstream() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1"], 10);
        run(&mock, &store, "S1").await;
        mock.remove_record("app1", "tbl1", "rec0");

        let report = run_with(
            &mock,
            &store,
            settings(),
            ScanOptions {
                scan_id: Some("S2".into()),
                delete_stale: true,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(report.reconcile.unwrap().records_deleted, 1, "{name}");
        assert!(
            store
                .get_record(&RecordKey::new("app1", "tbl1", "rec0"))
                .unwrap()
                .is_none(),
            "{name}"
        );
        assert_eq!(store.count_records().unwrap(), 5, "{name}");
    }
}

#[tokio::test]
async fn test_no_deletion_without_request() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1"], 10);
        seed_base(&store, "app2", Some("S_old"));
        seed_base(&store, "app3", None);
        let before = store.count_records().unwrap();

        let report = run(&mock, &store, "S").await;

        assert!(report.reconcile.is_none(), "{name}");
        assert_eq!(store.list_bases().unwrap().len(), 3, "{name}");
        assert_eq!(store.count_records().unwrap(), before + 6, "{name}");
        assert_eq!(
            store.get_base("app2").unwrap().unwrap().scan_id,
            Some(ScanId::new("S_old")),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_skipped_base_is_not_deleted() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2"], 10);
        seed_base(&store, "app2", Some("S_old"));
        mock.fail(
            MockCall::Grant("app2".into()),
            ApiError::Forbidden("no".into()),
            None,
        );

        let report = run_with(
            &mock,
            &store,
            settings(),
            ScanOptions {
                scan_id: Some("S".into()),
                delete_stale: true,
                ..Default::default()
            },
        )
        .await;

        let reconcile = report.reconcile.unwrap();
        assert_eq!(reconcile.bases_deleted, 0, "{name}");
        assert_eq!(reconcile.bases_protected, 1, "{name}");
        assert_eq!(reconcile.records_protected, 1, "{name}");
        assert!(store.get_base("app2").unwrap().is_some(), "{name}");
        assert!(
            store
                .get_record(&RecordKey::new("app2", "tbl1", "recOld"))
                .unwrap()
                .is_some(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_colliding_attachment_names_persist_separately() {
    for (name, store, _dir) in stores() {
        let mock = MockAirtable::new(10);
        let mut ws = WorkspaceDetail::new("wsp1", "Files", Utc::now());
        ws.base_ids = vec!["app1".into()];
        mock.add_workspace(ACCOUNT, ws);
        mock.add_base(BaseDetail::new("app1", "Invoices", Utc::now()));
        mock.add_table(
            "app1",
            TableSchema::new(
                "tbl1",
                "Invoices",
                vec![
                    FieldSchema::new("fld1", "Name", "singleLineText"),
                    FieldSchema::new("fld2", "Scan", "multipleAttachments"),
                ],
            ),
        );
        mock.add_records(
            "app1",
            "tbl1",
            vec![
                RemoteRecord::new(
                    "rec1",
                    Utc::now(),
                    json!({
                        "Name": "March",
                        "Scan": [{"id": "attA", "url": "https://files/a", "filename": "invoice.pdf"}]
                    }),
                ),
                RemoteRecord::new(
                    "rec2",
                    Utc::now(),
                    json!({
                        "Name": "April",
                        "Scan": [{"id": "attB", "url": "https://files/b", "filename": "invoice.pdf"}]
                    }),
                ),
            ],
        );
        mock.add_attachment("https://files/a", b"march".to_vec());
        mock.add_attachment("https://files/b", b"april".to_vec());
        let mock = Arc::new(mock);

        let files = TempDir::new().unwrap();
        let settings = settings().with_attachments(AttachmentDir::new(files.path()).unwrap());
        let report = run_with(&mock, &store, settings, ScanOptions::default()).await;

        assert_eq!(report.attachments_downloaded, 2, "{name}");
        let base_dir = files.path().join("app1");
        assert_eq!(
            std::fs::read(base_dir.join("attA_invoice.pdf")).unwrap(),
            b"march",
            "{name}"
        );
        assert_eq!(
            std::fs::read(base_dir.join("attB_invoice.pdf")).unwrap(),
            b"april",
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_table_failure_after_retries_skips_base() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1", "app2"], 2);
        seed_base(&store, "app1", Some("S_old"));
        // Second page of tbl2 times out on every attempt
        mock.fail(
            MockCall::Records {
                base_id: "app1".into(),
                table_id: "tbl2".into(),
                page: 1,
            },
            ApiError::Timeout("read timed out".into()),
            None,
        );

        // One table at a time so tbl1 completes before tbl2 fails
        let settings = settings().with_limits(ConcurrencyLimits {
            tables: 1,
            ..Default::default()
        });
        let report = run_with(
            &mock,
            &store,
            settings,
            ScanOptions {
                scan_id: Some("S".into()),
                ..Default::default()
            },
        )
        .await;

        // (a) skip list
        assert_eq!(report.skipped.len(), 1, "{name}");
        assert!(
            matches!(
                &report.skipped[0],
                (base_id, SkipReason::TableFailed { table_id, .. })
                    if base_id == "app1" && table_id == "tbl2"
            ),
            "{name}"
        );

        // (b) tag unchanged
        assert_eq!(
            store.get_base("app1").unwrap().unwrap().scan_id,
            Some(ScanId::new("S_old")),
            "{name}"
        );

        // (c) sibling table records stay written with the run's tag
        for i in 0..3 {
            let record = store
                .get_record(&RecordKey::new("app1", "tbl1", format!("rec{i}")))
                .unwrap()
                .unwrap();
            assert_eq!(record.scan_id.as_str(), "S", "{name}");
        }
        // So does the page of the failed table written before the failure
        let partial = store
            .get_record(&RecordKey::new("app1", "tbl2", "rec0"))
            .unwrap()
            .unwrap();
        assert_eq!(partial.scan_id.as_str(), "S", "{name}");

        // Retries were exhausted, not skipped
        let attempts = mock
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(c, MockCall::Records { base_id, table_id, page: 1 }
                    if base_id == "app1" && table_id == "tbl2")
            })
            .count();
        assert_eq!(attempts, 3, "{name}");

        // The other base is unaffected
        assert!(
            store
                .get_base("app2")
                .unwrap()
                .unwrap()
                .is_scanned_in(&ScanId::new("S")),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_transient_failures_recover_within_retry_budget() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1"], 2);
        mock.fail(
            MockCall::Tables("app1".into()),
            ApiError::Timeout("slow".into()),
            Some(2),
        );
        mock.fail(
            MockCall::Records {
                base_id: "app1".into(),
                table_id: "tbl1".into(),
                page: 1,
            },
            ApiError::RateLimited("429".into()),
            Some(1),
        );

        let report = run(&mock, &store, "S").await;

        assert!(report.skipped.is_empty(), "{name}");
        assert_eq!(report.records_written, 6, "{name}");
    }
}

#[tokio::test]
async fn test_upstream_changes_picked_up_by_next_run() {
    for (name, store, _dir) in stores() {
        let mock = make_remote(&["app1"], 10);
        run(&mock, &store, "S1").await;

        mock.update_record(
            "app1",
            "tbl1",
            RemoteRecord::new("rec2", Utc::now(), json!({"Name": "renamed"})),
        );
        run(&mock, &store, "S2").await;

        let record = store
            .get_record(&RecordKey::new("app1", "tbl1", "rec2"))
            .unwrap()
            .unwrap();
        assert_eq!(record.data, json!({"Name": "renamed"}), "{name}");
        assert_eq!(record.scan_id.as_str(), "S2", "{name}");
    }
}
