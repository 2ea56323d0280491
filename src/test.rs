//! # Store and FFI test suite
//!
//! Scenarios that need a real LMDB environment: CRUD semantics, schema
//! upgrades, secondary indexes, connection lifecycle, concurrency, the
//! dashboard repositories working together and the C ABI.
//!
//! Every test opens its own store under a `tempfile` directory, so tests run
//! in parallel without sharing files.
//!
//! ```bash
//! cargo test test_ffi_           # C ABI
//! cargo test test_concurrent_    # threads sharing one store
//! ```

#[cfg(test)]
pub mod tests {
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;
    use std::sync::Arc;
    use std::thread;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::app_response::AppResponse;
    use crate::document::{into_document, Document};
    use crate::error::StoreError;
    use crate::models::{ScanResult, ScanSession};
    use crate::pipeline::{GroupStage, Pipeline};
    use crate::query::{Filter, FindOptions, SortSpec};
    use crate::scan_repo::ScanRepo;
    use crate::schema::Collection;
    use crate::store::Store;
    use crate::StoreConfig;

    fn open_store(name: &str) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::new(name).in_directory(dir.path())).unwrap();
        (dir, store)
    }

    fn doc(value: Value) -> Document {
        into_document(value).unwrap()
    }

    fn session(id: &str, minute: u32, worker: &str, checks: &[(&str, bool)]) -> ScanSession {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 8, minute, 0).unwrap();
        let results: Vec<ScanResult> = checks
            .iter()
            .enumerate()
            .map(|(i, (name, present))| ScanResult {
                id: format!("{id}_r{i}"),
                timestamp,
                equipment_name: name.to_string(),
                is_present: *present,
                confidence: if *present { 90 } else { 20 },
                image_data: None,
                analysis: "checked".to_string(),
                worker_name: Some(worker.to_string()),
            })
            .collect();
        ScanSession {
            id: id.to_string(),
            timestamp,
            worker_name: Some(worker.to_string()),
            overall_passed: results.iter().all(|r| r.is_present),
            results,
            image_data: None,
        }
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d["id"].as_str().unwrap()).collect()
    }

    // ===============================
    // CRUD SEMANTICS
    // ===============================

    #[test]
    fn test_round_trip_preserves_dates() {
        let (_dir, store) = open_store("round_trip");
        let original = session("session_1", 30, "T. Nkosi", &[("Safety Helmet", true), ("Safety Boots", false)]);

        store.insert_record(&original).unwrap();

        let raw = store.find_one(Collection::Scans, &Filter::by_id("session_1")).unwrap().unwrap();
        assert_eq!(raw["timestamp"], json!("2024-05-01T08:30:00.000Z"));
        assert_eq!(raw["results"][0]["timestamp"], json!("2024-05-01T08:30:00.000Z"));

        let loaded: ScanSession = store.find_record(&Filter::by_id("session_1")).unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, store) = open_store("duplicates");
        store.insert_one(Collection::OcrScans, doc(json!({"id": "ocr_1", "filename": "a.jpg"}))).unwrap();

        let err = store
            .insert_one(Collection::OcrScans, doc(json!({"id": "ocr_1", "filename": "b.jpg"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { collection: Collection::OcrScans, ref id } if id == "ocr_1"));

        let stored = store.find(Collection::OcrScans, &Filter::all(), &FindOptions::default()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["filename"], json!("a.jpg"));
    }

    #[test]
    fn test_insert_requires_usable_id() {
        let (_dir, store) = open_store("ids");
        for bad in [json!({"filename": "a.jpg"}), json!({"id": ""}), json!({"id": 7}), json!({"id": "x".repeat(256)})] {
            let err = store.insert_one(Collection::OcrScans, doc(bad)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidDocument(_)), "unexpected error: {err}");
        }
        assert_eq!(store.count_documents(Collection::OcrScans, &Filter::all()).unwrap(), 0);
    }

    #[test]
    fn test_filter_equality() {
        let (_dir, store) = open_store("filters");
        store
            .insert_many(
                Collection::LogbookEntries,
                vec![
                    doc(json!({"id": "l1", "type": "inspection", "operator": "kim", "shift": 1})),
                    doc(json!({"id": "l2", "type": "incident", "operator": "kim", "shift": 2})),
                    doc(json!({"id": "l3", "type": "inspection", "operator": "ade", "shift": 1.0})),
                    doc(json!({"id": "l4", "type": "inspection", "operator": "ade"})),
                ],
            )
            .unwrap();

        let find = |filter: Filter| {
            let docs = store.find(Collection::LogbookEntries, &filter, &FindOptions::default()).unwrap();
            ids(&docs).into_iter().map(str::to_string).collect::<Vec<_>>()
        };

        assert_eq!(find(Filter::all().equals("type", "inspection")), vec!["l1", "l3", "l4"]);
        assert_eq!(find(Filter::all().equals("type", "inspection").equals("operator", "ade")), vec!["l3", "l4"]);
        assert_eq!(find(Filter::all().equals("shift", 1)), vec!["l1", "l3"]);
        assert!(find(Filter::all().equals("type", "audit")).is_empty());
        assert_eq!(find(Filter::all()).len(), 4);
    }

    #[test]
    fn test_sort_and_limit_top_three() {
        let (_dir, store) = open_store("sort_limit");
        for (id, minute) in [("s1", 5), ("s2", 50), ("s3", 20), ("s4", 40), ("s5", 10)] {
            store.insert_record(&session(id, minute, "kim", &[("Safety Helmet", true)])).unwrap();
        }

        let options = FindOptions::sorted(SortSpec::descending("timestamp")).limit(3);
        let docs = store.find(Collection::Scans, &Filter::all(), &options).unwrap();
        assert_eq!(ids(&docs), vec!["s2", "s4", "s3"]);

        let ascending = FindOptions::sorted(SortSpec::ascending("timestamp")).limit(0);
        let docs = store.find(Collection::Scans, &Filter::all(), &ascending).unwrap();
        assert_eq!(ids(&docs), vec!["s1", "s5", "s3", "s4", "s2"]);

        for (id, weight) in [("CB-1", 12.5), ("CB-2", 40.0), ("CB-3", 7.0), ("CB-4", 33.0), ("CB-5", 21.0)] {
            store.insert_one(Collection::CoalBatches, doc(json!({"id": id, "weight": weight}))).unwrap();
        }
        let heaviest = FindOptions::from_json(&json!({"sort": {"weight": -1}, "limit": 3})).unwrap();
        let docs = store.find(Collection::CoalBatches, &Filter::all(), &heaviest).unwrap();
        assert_eq!(ids(&docs), vec!["CB-2", "CB-4", "CB-5"]);
    }

    #[test]
    fn test_update_semantics() {
        let (_dir, store) = open_store("updates");
        store
            .insert_one(
                Collection::OcrScans,
                doc(json!({"id": "ocr_1", "filename": "a.jpg", "extractedText": "belt 3"})),
            )
            .unwrap();

        let patch = doc(json!({"note": "checked"}));
        let result = store.update_one(Collection::OcrScans, &Filter::by_id("ocr_1"), &patch).unwrap();
        assert_eq!((result.matched_count, result.modified_count), (1, 1));

        let stored = store.find_one(Collection::OcrScans, &Filter::by_id("ocr_1")).unwrap().unwrap();
        assert_eq!(stored["note"], json!("checked"));
        assert_eq!(stored["extractedText"], json!("belt 3"));

        let again = store.update_one(Collection::OcrScans, &Filter::by_id("ocr_1"), &patch).unwrap();
        assert_eq!((again.matched_count, again.modified_count), (1, 0));

        let missing = store.update_one(Collection::OcrScans, &Filter::by_id("ocr_9"), &patch).unwrap();
        assert_eq!((missing.matched_count, missing.modified_count), (0, 0));
        assert_eq!(store.count_documents(Collection::OcrScans, &Filter::all()).unwrap(), 1);

        let rename = doc(json!({"id": "ocr_2"}));
        let err = store.update_one(Collection::OcrScans, &Filter::by_id("ocr_1"), &rename).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_update_many_and_delete_many() {
        let (_dir, store) = open_store("many");
        for i in 0..5 {
            let kind = if i % 2 == 0 { "inspection" } else { "incident" };
            store
                .insert_one(Collection::LogbookEntries, doc(json!({"id": format!("l{i}"), "type": kind})))
                .unwrap();
        }

        let inspections = Filter::all().equals("type", "inspection");
        let updated = store
            .update_many(Collection::LogbookEntries, &inspections, &doc(json!({"reviewed": true})))
            .unwrap();
        assert_eq!((updated.matched_count, updated.modified_count), (3, 3));
        assert!(updated.failures.is_empty());

        let reviewed = Filter::all().equals("reviewed", true);
        assert_eq!(store.count_documents(Collection::LogbookEntries, &reviewed).unwrap(), 3);

        let deleted = store.delete_many(Collection::LogbookEntries, &reviewed).unwrap();
        assert_eq!((deleted.matched_count, deleted.deleted_count), (3, 3));
        assert_eq!(store.count_documents(Collection::LogbookEntries, &Filter::all()).unwrap(), 2);
    }

    #[test]
    fn test_delete_idempotent() {
        let (_dir, store) = open_store("deletes");
        store.insert_one(Collection::OcrScans, doc(json!({"id": "ocr_1"}))).unwrap();

        let first = store.delete_one(Collection::OcrScans, &Filter::by_id("ocr_1")).unwrap();
        let second = store.delete_one(Collection::OcrScans, &Filter::by_id("ocr_1")).unwrap();
        assert_eq!(first.deleted_count, 1);
        assert_eq!(second.deleted_count, 0);
        assert!(store.find_one(Collection::OcrScans, &Filter::by_id("ocr_1")).unwrap().is_none());
    }

    #[test]
    fn test_insert_many_reports_partial_failures() {
        let (_dir, store) = open_store("insert_many");
        let result = store
            .insert_many(
                Collection::OcrScans,
                vec![
                    doc(json!({"id": "a"})),
                    doc(json!({"id": "a"})),
                    doc(json!({"filename": "no id"})),
                    doc(json!({"id": "b"})),
                ],
            )
            .unwrap();

        assert_eq!(result.inserted_ids, vec!["a", "b"]);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].index, 1);
        assert_eq!(result.failures[0].id.as_deref(), Some("a"));
        assert!(matches!(result.failures[0].error, StoreError::DuplicateKey { .. }));
        assert_eq!(result.failures[1].index, 2);
        assert!(result.failures[1].id.is_none());
        assert!(matches!(result.failures[1].error, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_clear_collection() {
        let (_dir, store) = open_store("clear");
        for i in 0..4 {
            store
                .insert_one(Collection::LogbookEntries, doc(json!({"id": format!("l{i}"), "operator": "kim"})))
                .unwrap();
        }
        store.insert_one(Collection::OcrScans, doc(json!({"id": "ocr_1"}))).unwrap();

        assert_eq!(store.clear(Collection::LogbookEntries).unwrap(), 4);
        assert_eq!(store.count_documents(Collection::LogbookEntries, &Filter::all()).unwrap(), 0);
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("kim")).unwrap().is_empty());
        assert_eq!(store.count_documents(Collection::OcrScans, &Filter::all()).unwrap(), 1);
        assert_eq!(store.clear(Collection::LogbookEntries).unwrap(), 0);
    }

    // ===============================
    // AGGREGATION
    // ===============================

    #[test]
    fn test_equipment_counts_add_up() {
        let (_dir, store) = open_store("equipment");
        let store = Arc::new(store);
        let repo = ScanRepo::new(Arc::clone(&store));
        repo.save_session(&session("s1", 1, "kim", &[("Safety Helmet", true), ("Safety Boots", true)])).unwrap();
        repo.save_session(&session("s2", 2, "kim", &[("Safety Helmet", false), ("Safety Boots", true)])).unwrap();
        repo.save_session(&session("s3", 3, "ade", &[("Safety Helmet", true), ("Respirator", false)])).unwrap();

        let stats = repo.equipment_stats();
        assert_eq!(stats.len(), 3);
        for (name, counts) in &stats {
            assert_eq!(counts.passed + counts.failed, counts.total, "{name}");
        }
        assert_eq!((stats["Safety Helmet"].passed, stats["Safety Helmet"].failed), (2, 1));
        assert_eq!(stats["Safety Boots"].total, 2);
        assert_eq!(stats["Respirator"].failed, 1);
    }

    #[test]
    fn test_dashboard_scenario() {
        let (_dir, store) = open_store("dashboard");
        let store = Arc::new(store);
        let repo = ScanRepo::new(Arc::clone(&store));
        repo.save_session(&session("s1", 1, "kim", &[("Safety Helmet", true)])).unwrap();
        repo.save_session(&session("s2", 2, "ade", &[("Safety Helmet", false)])).unwrap();
        repo.save_session(&session("s3", 3, "kim", &[("Safety Helmet", true)])).unwrap();

        let passed = store
            .count_documents(Collection::Scans, &Filter::all().equals("overallPassed", true))
            .unwrap();
        assert_eq!(passed, 2);

        let stats = repo.stats();
        assert_eq!((stats.total_scans, stats.passed_scans, stats.failed_scans), (3, 2, 1));
        assert_eq!(stats.success_rate, 66.7);

        let recent: Vec<String> = repo.recent(2).into_iter().map(|s| s.id).collect();
        assert_eq!(recent, vec!["s3", "s2"]);
    }

    #[test]
    fn test_aggregate_pipeline_on_store() {
        let (_dir, store) = open_store("aggregate");
        for (id, worker, passed) in [("s1", "kim", true), ("s2", "ade", true), ("s3", "kim", true), ("s4", "kim", false)] {
            store
                .insert_one(Collection::Scans, doc(json!({"id": id, "workerName": worker, "overallPassed": passed})))
                .unwrap();
        }

        let pipeline = Pipeline::from_json(&json!([
            {"$match": {"overallPassed": true}},
            {"$group": {"_id": "$workerName", "count": {"$sum": 1}}},
            {"$sort": {"count": -1}}
        ]))
        .unwrap();
        let groups = store.aggregate(Collection::Scans, &pipeline).unwrap();
        assert_eq!(
            Value::Array(groups.into_iter().map(Value::Object).collect()),
            json!([{"_id": "kim", "count": 2}, {"_id": "ade", "count": 1}])
        );

        let everyone = Pipeline::new().group(GroupStage::count_by("overallPassed"));
        let groups = store.aggregate(Collection::Scans, &everyone).unwrap();
        assert_eq!(groups.len(), 2);

        assert!(Pipeline::from_json(&json!([{"$unwind": "$results"}])).is_err());
    }

    // ===============================
    // SCHEMA AND INDEXES
    // ===============================

    #[test]
    fn test_schema_upgrade_preserves_data() {
        let dir = TempDir::new().unwrap();
        let v1 = StoreConfig::new("upgrade").in_directory(dir.path()).with_schema_version(1);

        let store = Store::open(v1).unwrap();
        store.insert_record(&session("s1", 1, "kim", &[("Safety Helmet", true)])).unwrap();
        let err = store.insert_one(Collection::CoalBatches, doc(json!({"id": "CB-1-1"}))).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(_)));
        assert_eq!(store.health().schema_version, Some(1));
        store.close().unwrap();
        drop(store);

        let store = Store::open(StoreConfig::new("upgrade").in_directory(dir.path())).unwrap();
        let kept: Option<ScanSession> = store.find_record(&Filter::by_id("s1")).unwrap();
        assert_eq!(kept.map(|s| s.worker_name), Some(Some("kim".to_string())));
        assert_eq!(store.find_by_index(Collection::Scans, "workerName", &json!("kim")).unwrap().len(), 1);

        store
            .insert_one(Collection::CoalBatches, doc(json!({"id": "CB-1-1", "quality": "Premium"})))
            .unwrap();
        let health = store.health();
        assert_eq!(health.schema_version, Some(2));
        assert_eq!(health.total_documents["coal_batches"], 1);
        assert_eq!(health.total_documents["scans"], 1);
    }

    #[test]
    fn test_newer_on_disk_version_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::new("downgrade").in_directory(dir.path())).unwrap();
        store.close().unwrap();
        drop(store);

        let older = StoreConfig::new("downgrade").in_directory(dir.path()).with_schema_version(1);
        match Store::open(older) {
            Err(StoreError::VersionMismatch { stored, requested }) => assert_eq!((stored, requested), (2, 1)),
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_find_by_index() {
        let (_dir, store) = open_store("index_lookup");
        for (id, operator) in [("l1", "kim"), ("l2", "ade"), ("l3", "kim")] {
            store
                .insert_one(Collection::LogbookEntries, doc(json!({"id": id, "operator": operator})))
                .unwrap();
        }

        let kim = store.find_by_index(Collection::LogbookEntries, "operator", &json!("kim")).unwrap();
        assert_eq!(ids(&kim), vec!["l1", "l3"]);
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("nobody")).unwrap().is_empty());
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("zz top")).unwrap().is_empty());
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("aaron")).unwrap().is_empty());

        let err = store.find_by_index(Collection::LogbookEntries, "note", &json!("x")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_fresh_store_has_empty_collections() {
        let (_dir, store) = open_store("fresh");
        let health = store.health();
        assert!(health.is_connected);
        assert_eq!(health.total_documents.len(), Collection::ALL.len());
        assert!(health.total_documents.values().all(|&count| count == 0));

        for collection in Collection::ALL {
            assert!(store.find(collection, &Filter::all(), &FindOptions::default()).unwrap().is_empty());
            assert!(store.find_one(collection, &Filter::all()).unwrap().is_none());
            assert_eq!(store.count_documents(collection, &Filter::all()).unwrap(), 0);
            assert!(store.aggregate(collection, &Pipeline::new().group(GroupStage::count_by("id"))).unwrap().is_empty());
            assert_eq!(store.clear(collection).unwrap(), 0);
        }
        assert!(store.find_by_index(Collection::CoalBatches, "quality", &json!("Premium")).unwrap().is_empty());
        assert_eq!(store.update_one(Collection::Scans, &Filter::all(), &doc(json!({"x": 1}))).unwrap().matched_count, 0);
    }

    #[test]
    fn test_index_follows_updates_and_deletes() {
        let (_dir, store) = open_store("index_maintenance");
        store
            .insert_one(Collection::LogbookEntries, doc(json!({"id": "l1", "operator": "kim"})))
            .unwrap();

        store
            .update_one(Collection::LogbookEntries, &Filter::by_id("l1"), &doc(json!({"operator": "ade"})))
            .unwrap();
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("kim")).unwrap().is_empty());
        assert_eq!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("ade")).unwrap().len(), 1);

        store.delete_one(Collection::LogbookEntries, &Filter::by_id("l1")).unwrap();
        assert!(store.find_by_index(Collection::LogbookEntries, "operator", &json!("ade")).unwrap().is_empty());
    }

    #[test]
    fn test_generated_session_round_trips() {
        use crate::detection::{Detection, REQUIRED_EQUIPMENT};

        let (_dir, store) = open_store("generated_session");
        let repo = ScanRepo::new(Arc::new(store));
        let results = vec![
            ScanResult::from_detection(&REQUIRED_EQUIPMENT[0], Detection::parse("PRESENT: YES\nCONFIDENCE: 91"), None),
            ScanResult::failed(&REQUIRED_EQUIPMENT[1], "camera offline"),
        ];
        let session = ScanSession::from_results(Some("T. Nkosi".to_string()), results, None);
        assert_eq!(session.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);

        repo.save_session(&session).unwrap();
        assert_eq!(repo.by_id(&session.id), Some(session.clone()));
        assert_eq!(repo.recent(1), vec![session]);
    }

    // ===============================
    // CONNECTION LIFECYCLE
    // ===============================

    #[test]
    fn test_close_and_reconnect() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(StoreConfig::new("lifecycle").in_directory(dir.path()));
        assert!(!store.is_connected());
        assert_eq!(store.health(), Default::default());

        store.insert_one(Collection::OcrScans, doc(json!({"id": "ocr_1"}))).unwrap();
        assert!(store.is_connected());

        store.close().unwrap();
        assert!(!store.is_connected());
        store.close().unwrap();

        assert_eq!(store.count_documents(Collection::OcrScans, &Filter::all()).unwrap(), 1);
        assert!(store.is_connected());
        assert!(store.health().is_connected);
    }

    #[test]
    fn test_invalid_config_fails_to_connect() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(StoreConfig::new(" ").in_directory(dir.path()));
        assert!(matches!(store.connect(), Err(StoreError::InvalidConfig(_))));
        assert!(!store.is_connected());
    }

    // ===============================
    // CONCURRENCY
    // ===============================

    #[test]
    fn test_concurrent_updates_keep_every_field() {
        let (_dir, store) = open_store("concurrent_updates");
        let store = Arc::new(store);
        store.insert_one(Collection::OcrScans, doc(json!({"id": "shared"}))).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let patch = doc(json!({ format!("field_{i}"): i }));
                    store.update_one(Collection::OcrScans, &Filter::by_id("shared"), &patch).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().modified_count, 1);
        }

        let shared = store.find_one(Collection::OcrScans, &Filter::by_id("shared")).unwrap().unwrap();
        for i in 0..8 {
            assert_eq!(shared[&format!("field_{i}")], json!(i));
        }
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        let (_dir, store) = open_store("concurrent_rw");
        let store = Arc::new(store);

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..20 {
                    store
                        .insert_one(Collection::LogbookEntries, doc(json!({"id": format!("w{i:02}"), "operator": "kim"})))
                        .unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let count = store.count_documents(Collection::LogbookEntries, &Filter::all()).unwrap();
                        assert!(count <= 20);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.count_documents(Collection::LogbookEntries, &Filter::all()).unwrap(), 20);
    }

    #[test]
    fn test_concurrent_stats_during_inserts() {
        let (_dir, store) = open_store("concurrent_stats");
        let repo = ScanRepo::new(Arc::new(store));

        let writer = {
            let repo = repo.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let check = [("Safety Helmet", i % 4 != 0)];
                    repo.save_session(&session(&format!("s{i:03}"), i % 60, "kim", &check)).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let stats = repo.stats();
            assert!(stats.passed_scans <= stats.total_scans);
            assert_eq!(stats.passed_scans + stats.failed_scans, stats.total_scans);
        }
        writer.join().unwrap();

        let stats = repo.stats();
        assert_eq!((stats.total_scans, stats.passed_scans, stats.failed_scans), (200, 150, 50));
        assert_eq!(stats.success_rate, 75.0);
    }

    // ===============================
    // FFI FUNCTION TESTS
    // ===============================

    fn take_response(ptr: *const c_char) -> AppResponse {
        assert!(!ptr.is_null(), "response pointer should not be null");
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        crate::store_free_string(ptr);
        serde_json::from_str(&text).unwrap()
    }

    fn ok_json(response: AppResponse) -> Value {
        match response {
            AppResponse::Ok(body) => serde_json::from_str(&body).unwrap(),
            other => panic!("expected Ok, got {other}"),
        }
    }

    fn ffi_store(dir: &TempDir) -> *mut Store {
        let config = CString::new(json!({"name": "ffi_test", "directory": dir.path()}).to_string()).unwrap();
        let store = crate::store_open(config.as_ptr());
        assert!(!store.is_null());
        store
    }

    #[test]
    fn test_ffi_open_rejects_bad_input() {
        use crate::store_open;

        assert!(store_open(std::ptr::null()).is_null());

        let invalid_bytes = [0xFF_u8, 0xFE, 0xFD, 0x00];
        assert!(store_open(invalid_bytes.as_ptr() as *const c_char).is_null());

        let not_json = CString::new("mineguard").unwrap();
        assert!(store_open(not_json.as_ptr()).is_null());

        let bad_version = CString::new(r#"{"schemaVersion": 99}"#).unwrap();
        assert!(store_open(bad_version.as_ptr()).is_null());

        crate::store_free(std::ptr::null_mut());
        crate::store_free_string(std::ptr::null());
    }

    #[test]
    fn test_ffi_crud_flow() {
        use crate::*;

        let dir = TempDir::new().unwrap();
        let store = ffi_store(&dir);
        let logbook = CString::new("logbook_entries").unwrap();

        let entry = CString::new(r#"{"id":"log_1","type":"inspection","operator":"kim"}"#).unwrap();
        assert_eq!(
            take_response(store_insert_one(store, logbook.as_ptr(), entry.as_ptr())),
            AppResponse::Ok("log_1".to_string())
        );
        assert!(matches!(
            take_response(store_insert_one(store, logbook.as_ptr(), entry.as_ptr())),
            AppResponse::Conflict(_)
        ));

        let many = CString::new(
            r#"[{"id":"log_2","type":"incident","operator":"ade"},{"type":"inspection"},{"id":"log_3","type":"inspection","operator":"ade"}]"#,
        )
        .unwrap();
        let inserted = ok_json(take_response(store_insert_many(store, logbook.as_ptr(), many.as_ptr())));
        assert_eq!(inserted["insertedIds"], json!(["log_2", "log_3"]));
        assert_eq!(inserted["failures"][0]["index"], json!(1));

        let filter = CString::new(r#"{"type":"inspection"}"#).unwrap();
        let options = CString::new(r#"{"sort":{"id":-1},"limit":1}"#).unwrap();
        let found = ok_json(take_response(store_find(store, logbook.as_ptr(), filter.as_ptr(), options.as_ptr())));
        assert_eq!(found, json!([{"id": "log_3", "type": "inspection", "operator": "ade"}]));

        assert_eq!(
            take_response(store_count_documents(store, logbook.as_ptr(), filter.as_ptr())),
            AppResponse::Ok("2".to_string())
        );

        let by_id = CString::new(r#"{"id":"log_1"}"#).unwrap();
        let patch = CString::new(r#"{"note":"roof bolts"}"#).unwrap();
        let updated = ok_json(take_response(store_update_one(store, logbook.as_ptr(), by_id.as_ptr(), patch.as_ptr())));
        assert_eq!(updated, json!({"matchedCount": 1, "modifiedCount": 1}));
        let one = ok_json(take_response(store_find_one(store, logbook.as_ptr(), by_id.as_ptr())));
        assert_eq!(one["note"], json!("roof bolts"));

        let reviewed = CString::new(r#"{"reviewed":true}"#).unwrap();
        let many_updated =
            ok_json(take_response(store_update_many(store, logbook.as_ptr(), filter.as_ptr(), reviewed.as_ptr())));
        assert_eq!(many_updated["modifiedCount"], json!(2));

        let deleted = ok_json(take_response(store_delete_one(store, logbook.as_ptr(), by_id.as_ptr())));
        assert_eq!(deleted, json!({"deletedCount": 1}));
        assert!(matches!(
            take_response(store_find_one(store, logbook.as_ptr(), by_id.as_ptr())),
            AppResponse::NotFound(_)
        ));

        let incidents = CString::new(r#"{"type":"incident"}"#).unwrap();
        let many_deleted = ok_json(take_response(store_delete_many(store, logbook.as_ptr(), incidents.as_ptr())));
        assert_eq!(many_deleted["deletedCount"], json!(1));

        assert_eq!(
            take_response(store_clear_collection(store, logbook.as_ptr())),
            AppResponse::Ok("1".to_string())
        );

        store_free(store);
    }

    #[test]
    fn test_ffi_aggregate() {
        use crate::*;

        let dir = TempDir::new().unwrap();
        let store = ffi_store(&dir);
        let scans = CString::new("scans").unwrap();
        let docs = CString::new(
            r#"[{"id":"s1","workerName":"kim","overallPassed":true},{"id":"s2","workerName":"ade","overallPassed":false},{"id":"s3","workerName":"kim","overallPassed":true}]"#,
        )
        .unwrap();
        take_response(store_insert_many(store, scans.as_ptr(), docs.as_ptr()));

        let pipeline =
            CString::new(r#"[{"match":{"overallPassed":true}},{"group":{"by":"workerName","count":true}}]"#).unwrap();
        let groups = ok_json(take_response(store_aggregate(store, scans.as_ptr(), pipeline.as_ptr())));
        assert_eq!(groups, json!([{"_id": "kim", "count": 2}]));

        let unsupported = CString::new(r#"[{"$group":{"_id":"$workerName","total":{"$avg":"$confidence"}}}]"#).unwrap();
        assert!(matches!(
            take_response(store_aggregate(store, scans.as_ptr(), unsupported.as_ptr())),
            AppResponse::ValidationError(_)
        ));

        store_free(store);
    }

    #[test]
    fn test_ffi_error_mapping() {
        use crate::*;

        let dir = TempDir::new().unwrap();
        let store = ffi_store(&dir);
        let scans = CString::new("scans").unwrap();
        let all = CString::new("{}").unwrap();

        assert!(matches!(
            take_response(store_find_one(std::ptr::null_mut(), scans.as_ptr(), all.as_ptr())),
            AppResponse::BadRequest(_)
        ));
        assert!(matches!(
            take_response(store_find_one(store, std::ptr::null(), all.as_ptr())),
            AppResponse::BadRequest(_)
        ));
        assert!(matches!(
            take_response(store_find_one(store, scans.as_ptr(), std::ptr::null())),
            AppResponse::BadRequest(_)
        ));

        let broken = CString::new(r#"{"invalid": json structure"#).unwrap();
        assert!(matches!(
            take_response(store_insert_one(store, scans.as_ptr(), broken.as_ptr())),
            AppResponse::SerializationError(_)
        ));

        let operator = CString::new(r#"{"confidence":{"$gt":50}}"#).unwrap();
        assert!(matches!(
            take_response(store_count_documents(store, scans.as_ptr(), operator.as_ptr())),
            AppResponse::ValidationError(_)
        ));

        let not_object = CString::new("[1,2]").unwrap();
        assert!(matches!(
            take_response(store_insert_one(store, scans.as_ptr(), not_object.as_ptr())),
            AppResponse::ValidationError(_)
        ));

        let unknown = CString::new("equipment").unwrap();
        assert!(matches!(
            take_response(store_count_documents(store, unknown.as_ptr(), all.as_ptr())),
            AppResponse::NotFound(_)
        ));

        store_free(store);
    }

    #[test]
    fn test_ffi_connection_state() {
        use crate::*;

        let dir = TempDir::new().unwrap();
        let store = ffi_store(&dir);
        assert!(store_is_connected(store));
        assert!(!store_is_connected(std::ptr::null_mut()));

        assert!(matches!(take_response(store_close(store)), AppResponse::Ok(_)));
        assert!(!store_is_connected(store));
        assert_eq!(ok_json(take_response(store_health(store)))["isConnected"], json!(false));

        let scans = CString::new("scans").unwrap();
        let all = CString::new("null").unwrap();
        assert_eq!(
            take_response(store_count_documents(store, scans.as_ptr(), all.as_ptr())),
            AppResponse::Ok("0".to_string())
        );
        assert!(store_is_connected(store));
        assert!(matches!(take_response(store_close(std::ptr::null_mut())), AppResponse::BadRequest(_)));

        store_free(store);
    }
}
