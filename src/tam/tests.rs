//! End-to-end table access scenarios

use crate::core::config::{EngineConfig, TableOptions};
use crate::core::error::Error;
use crate::core::hash::GroupHash;
use crate::engine::delete::DeleteOutcome;
use crate::engine::{Engine, Txn};
use crate::tam::{LockMode, Table};
use crate::types::row::{RowLocation, TupleSlot};
use crate::types::schema::{ColumnDef, Schema};
use crate::types::value::{ColumnType, Value};
use std::sync::Arc;

fn engine_with_threads(threads: usize) -> Arc<Engine> {
    let mut config = EngineConfig {
        encode_threads: threads,
        ..EngineConfig::default()
    };
    // Keep per-test shared memory small.
    config.content_cache.size_mb = 4;
    config.seq_cache.group_mb = 1;
    config.seq_cache.tid_mb = 1;
    config.seq_cache.seq_tid_mb = 1;
    Engine::new(config).unwrap()
}

fn versioned_table(
    engine: &Arc<Engine>,
    keyframe_every: i64,
    compress_depth: u16,
    group_by: bool,
    enable_entropy: bool,
) -> Table {
    let schema = Schema::new(vec![
        ColumnDef::new("g", ColumnType::Int),
        ColumnDef::new("v", ColumnType::Int),
        ColumnDef::new("payload", ColumnType::Text),
    ]);
    let options = TableOptions {
        group_by: group_by.then(|| "g".to_string()),
        order_by: "v".into(),
        delta_columns: vec!["payload".into()],
        keyframe_every,
        compress_depth,
        enable_entropy,
    };
    Table::create(engine, "versioned", schema, Some(options)).unwrap()
}

fn row(g: i64, v: i64, payload: &str) -> Vec<Value> {
    vec![
        Value::Int(g),
        Value::Int(v),
        Value::Text(payload.into()),
        Value::Null,
    ]
}

/// Collect (g, v, payload, seq, location) of every visible row.
fn scan_all(table: &Table, txn: &Txn) -> Vec<(i64, i64, String, i64, RowLocation)> {
    let mut scan = table.scan(txn);
    let mut slot = TupleSlot::default();
    let mut out = Vec::new();
    while scan.next(&mut slot).unwrap() {
        let g = match slot.value(0) {
            Value::Int(g) => *g,
            other => panic!("unexpected group value {other:?}"),
        };
        let v = match slot.value(1) {
            Value::Int(v) => *v,
            other => panic!("unexpected version value {other:?}"),
        };
        let payload = match slot.value(2) {
            Value::Text(s) => s.clone(),
            other => panic!("unexpected payload value {other:?}"),
        };
        let seq = match slot.value(3) {
            Value::Int(s) => *s,
            other => panic!("unexpected seq value {other:?}"),
        };
        out.push((g, v, payload, seq, slot.location.expect("scan slot keeps its location")));
    }
    out
}

fn payload_of(rows: &[(i64, i64, String, i64, RowLocation)], seq: i64) -> &str {
    &rows.iter().find(|r| r.3 == seq).unwrap().2
}

// E1: keyframe period with K=3, D=1, no group-by, no entropy.
#[test]
fn keyframe_period_tags_and_stats() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 3, 1, false, false);

    let txn = engine.begin();
    for (v, payload) in [(1, "aaaa"), (2, "aaab"), (3, "aabb"), (4, "abbb")] {
        table.insert(&txn, row(0, v, payload)).unwrap();
    }
    let inspected = table.inspect(&txn, None).unwrap();
    let tags: Vec<u16> = inspected.iter().map(|r| r.tag).collect();
    assert_eq!(tags, vec![0, 1, 1, 0]);

    let rows = scan_all(&table, &txn);
    let payloads: Vec<&str> = (1..=4).map(|s| payload_of(&rows, s)).collect();
    assert_eq!(payloads, vec!["aaaa", "aaab", "aabb", "abbb"]);
    engine.commit(txn);

    let stats = table.stats();
    assert_eq!(stats.totals.row_count, 4);
    assert_eq!(stats.totals.keyframe_count, 2);
    assert_eq!(stats.totals.max_seq, 4);
}

// E2: groups version independently.
#[test]
fn cross_group_independence() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 2, true, true);

    let txn = engine.begin();
    table.insert(&txn, row(1, 1, "x")).unwrap();
    table.insert(&txn, row(2, 1, "y")).unwrap();
    table.insert(&txn, row(1, 2, "xa")).unwrap();
    table.insert(&txn, row(2, 2, "ya")).unwrap();
    engine.commit(txn);

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    assert_eq!(rows.len(), 4);
    for g in [1, 2] {
        let seqs: Vec<i64> = rows.iter().filter(|r| r.0 == g).map(|r| r.3).collect();
        assert_eq!(seqs, vec![1, 2], "group {g}");
    }
    assert_eq!(
        rows.iter().find(|r| r.0 == 1 && r.3 == 2).unwrap().2,
        "xa"
    );
    assert_eq!(
        rows.iter().find(|r| r.0 == 2 && r.3 == 2).unwrap().2,
        "ya"
    );
    for g in [1i64, 2] {
        let hash = GroupHash::of(&Value::Int(g));
        assert_eq!(engine.seq_caches.get_max_seq(table.id(), hash), Some(2));
    }
    engine.commit(txn);
}

// E3: a rejected insert rolls its sequence back.
#[test]
fn version_violation_rolls_back_sequence() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 10, 2, true, true);

    let txn = engine.begin();
    for v in 1..=5 {
        table.insert(&txn, row(7, v, &format!("payload-{v}"))).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    let err = table.insert(&txn, row(7, 5, "duplicate version")).unwrap_err();
    assert!(matches!(err, Error::VersionNotIncreasing(_)), "{err}");
    engine.abort(txn);

    let txn = engine.begin();
    let loc = table.insert(&txn, row(7, 6, "payload-6")).unwrap();
    engine.commit(txn);

    let txn = engine.begin();
    let mut slot = TupleSlot::default();
    assert!(table.fetch_row_version(&txn, loc, &mut slot).unwrap());
    assert_eq!(slot.value(3), &Value::Int(6), "sixth insert gets sequence 6, not 7");
    engine.commit(txn);
}

// E4: cascade delete removes the target and everything above it.
#[test]
fn cascade_delete() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let txn = engine.begin();
    for v in 1..=5 {
        table.insert(&txn, row(9, v, &format!("content-{v}"))).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    let target = rows.iter().find(|r| r.3 == 3).unwrap().4;
    let outcome = table.delete(&txn, target).unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted(3));
    engine.commit(txn);

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    let seqs: Vec<i64> = rows.iter().map(|r| r.3).collect();
    assert_eq!(seqs, vec![1, 2]);

    let hash = GroupHash::of(&Value::Int(9));
    assert_eq!(engine.seq_caches.get_max_seq(table.id(), hash), Some(2));

    let loc = table.insert(&txn, row(9, 6, "after delete")).unwrap();
    let mut slot = TupleSlot::default();
    assert!(table.fetch_row_version(&txn, loc, &mut slot).unwrap());
    assert_eq!(slot.value(3), &Value::Int(3), "next insert reuses sequence 3");
    engine.commit(txn);

    let group_stats = engine.stats.group(table.id(), hash).unwrap();
    assert_eq!(group_stats.row_count, 3);
}

// E5: parallel encoding picks the smallest candidate.
#[test]
fn parallel_encoding_selects_smallest_candidate() {
    let engine = engine_with_threads(4);
    let table = versioned_table(&engine, 100, 4, true, true);

    let base_a: String = (0..4096).map(|i| char::from(b'a' + (i % 17) as u8)).collect();
    let very_different: String = (0..4096).map(|i| char::from(b'A' + (i % 23) as u8)).collect();
    let mut almost_a = base_a.clone();
    almost_a.push_str("-tail");

    let txn = engine.begin();
    table.insert(&txn, row(1, 1, &base_a)).unwrap();
    table.insert(&txn, row(1, 2, &very_different)).unwrap();
    table.insert(&txn, row(1, 3, &almost_a)).unwrap();

    let inspected = table.inspect(&txn, Some(&Value::Int(1))).unwrap();
    let third = inspected.iter().find(|r| r.seq == 3).unwrap();
    assert_eq!(third.tag, 2, "the near-identical base two rows back wins");

    let rows = scan_all(&table, &txn);
    assert_eq!(payload_of(&rows, 3), almost_a);

    // The chosen candidate is what was written: far smaller than the raw
    // content, reflected in the stats byte totals.
    engine.commit(txn);
    let stats = table.stats();
    assert!(stats.totals.compressed_bytes < stats.totals.raw_bytes / 2);
}

// E6: concurrent inserts into the same group serialize cleanly.
#[test]
fn concurrent_inserts_same_group() {
    let engine = engine_with_threads(2);
    let table = versioned_table(&engine, 100, 2, true, true);

    let txn = engine.begin();
    for v in 1..=3 {
        table.insert(&txn, row(5, v, &format!("seed-{v}"))).unwrap();
    }
    engine.commit(txn);

    let mut handles = Vec::new();
    for worker in 0..2i64 {
        let engine = Arc::clone(&engine);
        let table = table.clone();
        handles.push(std::thread::spawn(move || {
            // Retry with a later version when the other backend's commit
            // made ours non-increasing; each retry exercises rollback.
            let mut version = 10 + worker;
            loop {
                let txn = engine.begin();
                match table.insert(&txn, row(5, version, &format!("worker-{worker}-{version}"))) {
                    Ok(_) => {
                        engine.commit(txn);
                        return;
                    }
                    Err(Error::VersionNotIncreasing(_)) => {
                        engine.abort(txn);
                        version += 10;
                    }
                    Err(e) => panic!("unexpected insert failure: {e}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    let mut seqs: Vec<i64> = rows.iter().map(|r| r.3).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5], "sequences stay contiguous with no duplicates");
    for seq in 1..=5 {
        assert!(!payload_of(&rows, seq).is_empty());
    }
    engine.commit(txn);
}

// §8.7: contiguity survives a mix of failing and succeeding inserts.
#[test]
fn failed_inserts_leave_no_gaps() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 10, 2, true, true);

    let txn = engine.begin();
    table.insert(&txn, row(1, 100, "first")).unwrap();
    engine.commit(txn);

    for round in 0..6 {
        let txn = engine.begin();
        // Every second attempt reuses version 100 and fails.
        let result = if round % 2 == 0 {
            table.insert(&txn, row(1, 100, "stale"))
        } else {
            table.insert(&txn, row(1, 100 + round, "fresh"))
        };
        if result.is_ok() {
            engine.commit(txn);
        } else {
            engine.abort(txn);
        }
    }

    let txn = engine.begin();
    let seqs: Vec<i64> = scan_all(&table, &txn).iter().map(|r| r.3).collect();
    assert_eq!(seqs, (1..=seqs.len() as i64).collect::<Vec<_>>());
    engine.commit(txn);
}

// Tag at distance exactly D succeeds; D+1 is never produced.
#[test]
fn tags_never_exceed_compress_depth() {
    let engine = engine_with_threads(0);
    let depth = 2u16;
    let table = versioned_table(&engine, 100, depth, true, true);

    let near: String = "x".repeat(2000);
    let far: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let txn = engine.begin();
    table.insert(&txn, row(1, 1, &near)).unwrap();
    table.insert(&txn, row(1, 2, &far)).unwrap();
    let mut near_again = near.clone();
    near_again.push('!');
    table.insert(&txn, row(1, 3, &near_again)).unwrap();
    for v in 4..=8 {
        table.insert(&txn, row(1, v, &format!("{far}{v}"))).unwrap();
    }
    let inspected = table.inspect(&txn, None).unwrap();
    assert!(inspected.iter().all(|r| r.tag <= depth));
    let third = inspected.iter().find(|r| r.seq == 3).unwrap();
    assert_eq!(third.tag, depth, "distance-D base is usable");
    engine.commit(txn);
}

// Reconstruction is invariant under cache warm-up.
#[test]
fn reconstruction_survives_cache_invalidation() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 5, 3, true, true);

    let txn = engine.begin();
    for v in 1..=20 {
        table.insert(&txn, row(3, v, &format!("version {v} of the document body"))).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    let warm = scan_all(&table, &txn);
    engine.content_cache.invalidate_table(table.id());
    engine.seq_caches.invalidate_table(table.id());
    let cold = scan_all(&table, &txn);
    assert_eq!(warm, cold);
    engine.commit(txn);
}

// §8 round-trip law: decode(reconstruct(s - t), blob_at(s)) = reconstruct(s).
#[test]
fn chain_decode_law_holds_on_disk() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 4, 2, true, false);

    let txn = engine.begin();
    for v in 1..=10 {
        table
            .insert(&txn, row(2, v, &format!("{} tail {v}", "shared prefix ".repeat(8))))
            .unwrap();
    }

    let rows = scan_all(&table, &txn);
    let dump = table.physical(&txn, Some(&Value::Int(2)), None).unwrap();
    for entry in dump.iter().filter(|e| e.info.tag > 0) {
        let base = payload_of(&rows, entry.info.seq - i64::from(entry.info.tag));
        let full = payload_of(&rows, entry.info.seq);
        let decoded = crate::codec::decode(base.as_bytes(), &entry.bytes).unwrap();
        assert_eq!(decoded, full.as_bytes());
    }
    engine.commit(txn);
}

// Restore mode: explicit sequences, then normal allocation continues.
#[test]
fn restore_mode_preserves_sequences() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 3, 1, true, true);

    let txn = engine.begin();
    for (seq, v) in [(1i64, 10i64), (2, 20), (3, 30)] {
        table
            .insert(
                &txn,
                vec![
                    Value::Int(4),
                    Value::Int(v),
                    Value::Text(format!("restored-{seq}")),
                    Value::Int(seq),
                ],
            )
            .unwrap();
    }
    let loc = table.insert(&txn, row(4, 40, "appended")).unwrap();
    let mut slot = TupleSlot::default();
    assert!(table.fetch_row_version(&txn, loc, &mut slot).unwrap());
    assert_eq!(slot.value(3), &Value::Int(4));

    let rows = scan_all(&table, &txn);
    assert_eq!(payload_of(&rows, 2), "restored-2");
    engine.commit(txn);
}

// A payload above the TOAST threshold is stored externally and still
// reconstructs.
#[test]
fn toast_round_trip() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, false);

    // Incompressible content well past the threshold.
    let big: String = (0..100_000u32)
        .map(|i| char::from(b'a' + ((i.wrapping_mul(2654435761)) % 26) as u8))
        .collect();
    let txn = engine.begin();
    table.insert(&txn, row(1, 1, &big)).unwrap();
    assert!(!table.data().toast.is_empty(), "large blob went external");

    let rows = scan_all(&table, &txn);
    assert_eq!(payload_of(&rows, 1), big);
    engine.commit(txn);
}

// The pre-reconstruction location must survive into the output slot.
#[test]
fn scan_preserves_row_locations() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 2, 1, true, true);

    let txn = engine.begin();
    for v in 1..=6 {
        table.insert(&txn, row(1, v, &format!("row {v}"))).unwrap();
    }

    let mut scan = table.scan(&txn);
    let mut slot = TupleSlot::default();
    while scan.next(&mut slot).unwrap() {
        let loc = slot.location.expect("reconstruction must not strip the location");
        // The location must resolve back to this very row.
        let mut fetched = TupleSlot::default();
        assert!(table.fetch_row_version(&txn, loc, &mut fetched).unwrap());
        assert_eq!(fetched.values, slot.values);
    }
    engine.commit(txn);
}

#[test]
fn index_fetch_reuses_pinned_page() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let txn = engine.begin();
    let locs: Vec<RowLocation> = (1..=4)
        .map(|v| table.insert(&txn, row(1, v, "small")).unwrap())
        .collect();

    let mut fetch = table.begin_index_fetch(&txn);
    let mut slot = TupleSlot::default();
    for loc in &locs {
        assert!(fetch.fetch(*loc, &mut slot).unwrap());
        assert_eq!(slot.location, Some(*loc));
    }
    // All four rows fit one page, so every fetch after the first reuses
    // the pin.
    assert_eq!(fetch.pin_hits, 3);
    engine.commit(txn);
}

#[test]
fn bitmap_scan_visits_requested_locations() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let txn = engine.begin();
    let locs: Vec<RowLocation> = (1..=5)
        .map(|v| table.insert(&txn, row(1, v, &format!("bm {v}"))).unwrap())
        .collect();

    let wanted = vec![locs[0], locs[2], locs[4]];
    let mut bitmap = table.bitmap_scan(&txn, wanted.clone());
    let mut slot = TupleSlot::default();
    let mut seen = Vec::new();
    while bitmap.next_block().is_some() {
        while bitmap.next_tuple(&mut slot).unwrap() {
            seen.push(slot.location.unwrap());
        }
    }
    assert_eq!(seen, wanted);
    engine.commit(txn);
}

#[test]
fn analyze_scan_sees_reconstructed_values() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 3, 1, true, true);

    let txn = engine.begin();
    for v in 1..=10 {
        table.insert(&txn, row(1, v, &format!("analyze row {v}"))).unwrap();
    }

    let mut analyze = table.analyze_scan(&txn);
    let mut slot = TupleSlot::default();
    let mut sampled = 0;
    let mut block = 0;
    while analyze.next_block(block) {
        while analyze.next_tuple(&mut slot).unwrap() {
            match slot.value(2) {
                Value::Text(s) => assert!(s.starts_with("analyze row ")),
                other => panic!("sample saw unreconstructed value {other:?}"),
            }
            sampled += 1;
        }
        block += 1;
    }
    assert_eq!(sampled, 10);
    engine.commit(txn);
}

#[test]
fn index_build_feeds_reconstructed_rows() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 4, 1, true, true);

    let txn = engine.begin();
    for v in 1..=7 {
        table.insert(&txn, row(1, v, &format!("indexed {v}"))).unwrap();
    }
    let mut entries = Vec::new();
    let count = table
        .index_build_range_scan(&txn, |slot, loc| {
            entries.push((slot.value(1).clone(), loc));
        })
        .unwrap();
    assert_eq!(count, 7);
    assert_eq!(entries.len(), 7);
    engine.commit(txn);
}

#[test]
fn update_and_speculative_insert_are_unsupported() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);
    let txn = engine.begin();
    let loc = table.insert(&txn, row(1, 1, "only")).unwrap();

    assert!(matches!(
        table.update(&txn, loc, row(1, 2, "rewritten")),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        table.insert_speculative(&txn, row(1, 2, "upsert")),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        table.lock_row(&txn, loc, LockMode::Update),
        Err(Error::Unsupported(_))
    ));
    table.lock_row(&txn, loc, LockMode::Share).unwrap();
    engine.commit(txn);
}

#[test]
fn vacuum_reclaims_cascade_victims() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let txn = engine.begin();
    for v in 1..=5 {
        table.insert(&txn, row(1, v, &format!("v{v}"))).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    let target = rows.iter().find(|r| r.3 == 3).unwrap().4;
    table.delete(&txn, target).unwrap();
    engine.commit(txn);

    let stats = table.vacuum().unwrap();
    assert_eq!(stats.removed, 3);
    assert_eq!(stats.remaining, 2);

    let txn = engine.begin();
    let seqs: Vec<i64> = scan_all(&table, &txn).iter().map(|r| r.3).collect();
    assert_eq!(seqs, vec![1, 2]);
    engine.commit(txn);
}

#[test]
fn truncate_clears_rows_caches_and_stats() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let txn = engine.begin();
    for v in 1..=4 {
        table.insert(&txn, row(1, v, "data")).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    table.truncate(&txn).unwrap();
    engine.commit(txn);

    let txn = engine.begin();
    assert!(scan_all(&table, &txn).is_empty());
    assert_eq!(table.stats().totals.row_count, 0);
    // A post-truncate insert starts a fresh chain at sequence 1.
    let loc = table.insert(&txn, row(1, 1, "fresh")).unwrap();
    let mut slot = TupleSlot::default();
    assert!(table.fetch_row_version(&txn, loc, &mut slot).unwrap());
    assert_eq!(slot.value(3), &Value::Int(1));
    engine.commit(txn);
}

#[test]
fn wal_replay_reproduces_visible_state() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 3, 1, true, true);

    let txn = engine.begin();
    for v in 1..=4 {
        table.insert(&txn, row(1, v, &format!("durable {v}"))).unwrap();
    }
    engine.commit(txn);

    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    let target = rows.iter().find(|r| r.3 == 4).unwrap().4;
    table.delete(&txn, target).unwrap();
    engine.commit(txn);

    // A transaction that never commits: recovery must not resurrect it.
    let txn = engine.begin();
    let lost_txid = txn.id;
    table.insert(&txn, row(1, 99, "lost on crash")).unwrap();
    drop(txn);

    let recovered_txns = crate::host::txn::TxnManager::new();
    let heaps = engine.wal.replay(crate::constants::PAGE_SIZE, &recovered_txns);
    let heap = &heaps[&table.id()];

    // Compare row-by-row against the live heap.
    let live = &table.data().heap;
    assert_eq!(heap.num_pages(), live.num_pages());
    for block in 0..live.num_pages() {
        let live_page = live.page(block).unwrap();
        let replayed_page = heap.page(block).unwrap();
        let live_page = live_page.read();
        let replayed_page = replayed_page.read();
        assert_eq!(live_page.max_offset(), replayed_page.max_offset());
        for offset in 0..live_page.max_offset() {
            let a = live_page.row(offset).unwrap();
            let b = replayed_page.row(offset).unwrap();
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.header, b.header);
        }
    }
    // The uncommitted transaction reads as aborted after recovery.
    assert_eq!(
        recovered_txns.status(lost_txid),
        crate::host::txn::TxnStatus::Aborted
    );
}

#[test]
fn auto_detected_config_round_trips() {
    let engine = engine_with_threads(0);
    let schema = Schema::new(vec![
        ColumnDef::new("id", ColumnType::Int),
        ColumnDef::new("body", ColumnType::Text),
    ]);
    let table = Table::create(&engine, "auto", schema, None).unwrap();

    let txn = engine.begin();
    for id in 1..=3 {
        table
            .insert(
                &txn,
                vec![Value::Int(id), Value::Text(format!("body {id}")), Value::Null],
            )
            .unwrap();
    }
    let mut scan = table.scan(&txn);
    let mut slot = TupleSlot::default();
    let mut bodies = Vec::new();
    while scan.next(&mut slot).unwrap() {
        if let Value::Text(s) = slot.value(1) {
            bodies.push(s.clone());
        }
    }
    assert_eq!(bodies, vec!["body 1", "body 2", "body 3"]);
    engine.commit(txn);
}

#[test]
fn refresh_stats_rebuilds_counts() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 2, 1, true, true);

    let txn = engine.begin();
    for g in [1i64, 2] {
        for v in 1..=4 {
            table.insert(&txn, row(g, v, &format!("g{g}v{v}"))).unwrap();
        }
    }
    engine.commit(txn);

    // Damage the stats store, then rebuild.
    engine.stats.remove_table(table.id());
    assert_eq!(table.stats().totals.row_count, 0);

    let txn = engine.begin();
    let (groups, rows) = table.refresh_stats(&txn).unwrap();
    assert_eq!(groups, 2);
    assert_eq!(rows, 8);
    engine.commit(txn);

    let stats = table.stats();
    assert_eq!(stats.totals.row_count, 8);
    assert_eq!(stats.totals.group_count, 2);
    assert_eq!(stats.totals.max_seq, 4);
}

#[test]
fn mvcc_snapshot_hides_concurrent_writes() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 100, 1, true, true);

    let writer = engine.begin();
    table.insert(&writer, row(1, 1, "committed later")).unwrap();

    // Snapshot taken while the writer is still in progress.
    let reader = engine.begin();
    assert!(scan_all(&table, &reader).is_empty());

    engine.commit(writer);
    // Same snapshot: still hidden.
    assert!(scan_all(&table, &reader).is_empty());
    engine.commit(reader);

    // A fresh snapshot sees it.
    let reader = engine.begin();
    assert_eq!(scan_all(&table, &reader).len(), 1);
    engine.commit(reader);
}

#[test]
fn randomized_multi_column_round_trip() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let engine = engine_with_threads(2);
    let schema = Schema::new(vec![
        ColumnDef::new("g", ColumnType::Int),
        ColumnDef::new("v", ColumnType::Int),
        ColumnDef::new("body", ColumnType::Text),
        ColumnDef::new("attachment", ColumnType::Bytes),
    ]);
    let options = TableOptions {
        group_by: Some("g".into()),
        order_by: "v".into(),
        delta_columns: vec!["body".into(), "attachment".into()],
        keyframe_every: 5,
        compress_depth: 3,
        enable_entropy: true,
    };
    let table = Table::create(&engine, "multi", schema, Some(options)).unwrap();

    let mut rng = StdRng::seed_from_u64(0xdecaf);
    let mut body: Vec<u8> = (0..2048).map(|_| rng.random_range(b'a'..=b'z')).collect();
    let mut attachment: Vec<u8> = (0..1024).map(|_| rng.random()).collect();
    let mut expected = Vec::new();

    let txn = engine.begin();
    for v in 1..=15i64 {
        // Random point edits keep successive versions delta-friendly.
        for _ in 0..rng.random_range(1..8) {
            let at = rng.random_range(0..body.len());
            body[at] = rng.random_range(b'a'..=b'z');
        }
        let at = rng.random_range(0..attachment.len());
        attachment[at] = rng.random();

        let body_text = String::from_utf8(body.clone()).unwrap();
        table
            .insert(
                &txn,
                vec![
                    Value::Int(1),
                    Value::Int(v),
                    Value::Text(body_text.clone()),
                    Value::Bytes(attachment.clone()),
                    Value::Null,
                ],
            )
            .unwrap();
        expected.push((v, body_text, attachment.clone()));
    }
    engine.commit(txn);

    // Cold read: every version of both columns must come back intact.
    engine.content_cache.invalidate_table(table.id());
    let txn = engine.begin();
    let mut scan = table.scan(&txn);
    let mut slot = TupleSlot::default();
    let mut seen = 0;
    while scan.next(&mut slot).unwrap() {
        let v = match slot.value(1) {
            Value::Int(v) => *v,
            other => panic!("unexpected version {other:?}"),
        };
        let (_, exp_body, exp_attachment) = &expected[(v - 1) as usize];
        assert_eq!(slot.value(2), &Value::Text(exp_body.clone()));
        assert_eq!(slot.value(3), &Value::Bytes(exp_attachment.clone()));
        seen += 1;
    }
    assert_eq!(seen, 15);
    engine.commit(txn);
}

#[test]
fn deep_chains_reconstruct_through_many_deltas() {
    let engine = engine_with_threads(0);
    let table = versioned_table(&engine, 50, 1, true, true);

    let mut body = String::from("state:");
    let txn = engine.begin();
    for v in 1..=40 {
        body.push_str(&format!(" step{v}"));
        table.insert(&txn, row(1, v, &body)).unwrap();
    }
    engine.commit(txn);

    // Cold read of the chain tip walks 39 deltas back to the keyframe.
    engine.content_cache.invalidate_table(table.id());
    let txn = engine.begin();
    let rows = scan_all(&table, &txn);
    assert_eq!(payload_of(&rows, 40), body);
    engine.commit(txn);
}
