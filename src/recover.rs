//! Crash recovery: snapshot load → WAL replay → window rebuild.
//!
//! The snapshot's `wal_offset` is the byte length of the log as rewritten by
//! the rotation that committed the snapshot. Records below that offset are
//! fully covered by the snapshot's totals; they are replayed into the
//! recent window only. Records at or past it arrived after the snapshot and
//! are applied in full.
//!
//! Within either class, clicks whose timestamp is still inside the recent
//! window are replayed through the ordinary bump path (ring aligned just
//! before the earliest of them, so intermediate expiry runs with normal
//! advance semantics); older clicks never touch the recent side. Ancient
//! WAL residue therefore never inflates the recent window after long
//! downtime.
//!
//! An interrupted rotation is resolved first: a staged `wal.new` whose
//! length matches the snapshot's `wal_offset` was committed and is rolled
//! forward (renamed over the live log); any other staged file predates its
//! commit point and is discarded.

use crate::docs::Document;
use crate::error::EngineResult;
use crate::snapshot::SnapshotStore;
use crate::state::State;
use crate::storage::DataDir;
use crate::wal::{WalReader, WalRecord, WAL_FILE, WAL_NEW_FILE};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of recovery.
pub struct Recovered {
    /// Fully rebuilt state, advanced to boot time.
    pub state: State,
    /// Length of the valid WAL prefix (hand this to `Wal::open` so a torn
    /// tail is repaired before the first append).
    pub wal_offset: u64,
}

/// Rebuild state from the snapshot (if any) plus the retained WAL.
pub fn recover(
    directory: Arc<dyn DataDir>,
    window_seconds: usize,
    now_sec: i64,
) -> EngineResult<Recovered> {
    let snapshot = SnapshotStore::new(directory.clone()).load()?;
    resolve_interrupted_rotation(&directory, snapshot.as_ref().map(|s| s.wal_offset))?;

    let mut state = State::new(window_seconds, now_sec);
    let mut snapshot_docs = 0usize;
    let mut covered_below = 0u64;
    if let Some(snap) = snapshot {
        snapshot_docs = snap.docs.len();
        covered_below = snap.wal_offset;
        for doc in snap.docs {
            state.upsert_doc(doc);
        }
        let counts: HashMap<String, u64> = snap.total_cnt.into_iter().collect();
        state.seed_total_counts(&counts);
    }

    let mut records: Vec<(WalRecord, u64)> = Vec::new();
    let wal_offset =
        WalReader::new(directory).replay(0, |rec, off| records.push((rec, off)))?;

    let threshold = now_sec - window_seconds as i64;

    // Position the ring just before the earliest retained in-window click so
    // replaying through the bump path advances it with ordinary semantics.
    let min_recent_ts = records
        .iter()
        .filter_map(|(r, _)| match r {
            WalRecord::Click { ts, .. } if *ts >= threshold => Some(*ts),
            _ => None,
        })
        .min();
    if let Some(min_ts) = min_recent_ts {
        state.align_window_to(min_ts - 1);
    }

    let mut clicks = 0usize;
    let mut covered_clicks = 0usize;
    let mut stale_clicks = 0usize;
    let mut skipped_clicks = 0usize;
    let total_records = records.len();
    for (record, offset) in records {
        match record {
            WalRecord::DocUpsert {
                doc, title, url, ..
            } => {
                state.upsert_doc(Document {
                    id: doc,
                    title,
                    url,
                });
            }
            WalRecord::DocDelete { doc, .. } => {
                state.delete_doc(&doc);
            }
            WalRecord::Click { ts, doc } => {
                let covered = offset < covered_below;
                if !state.contains_doc(&doc) {
                    // A click that landed after its document's delete in
                    // commit order; the live path would refuse it too.
                    skipped_clicks += 1;
                } else if covered {
                    // Totals already include this click; rebuild recent only.
                    if ts >= threshold {
                        state.apply_recent_click(&doc, ts);
                    }
                    covered_clicks += 1;
                } else if ts >= threshold {
                    state.click(&doc, ts);
                    clicks += 1;
                } else {
                    state.apply_total_click(&doc);
                    stale_clicks += 1;
                }
            }
        }
    }

    // Drain whatever fell out of the window between the retained clicks and
    // boot time.
    state.advance_recent_to(now_sec);

    tracing::info!(
        snapshot_docs,
        wal_records = total_records,
        new_clicks = clicks,
        covered_clicks,
        stale_clicks,
        skipped_clicks,
        wal_offset,
        "recovery complete"
    );
    Ok(Recovered { state, wal_offset })
}

// A crash can leave the rotation's staged log behind. Its commit point is
// the snapshot: a matching length means the snapshot covering it is durable,
// so finish the rename; anything else predates the commit and is discarded.
fn resolve_interrupted_rotation(
    directory: &Arc<dyn DataDir>,
    snapshot_offset: Option<u64>,
) -> EngineResult<()> {
    if !directory.exists(WAL_NEW_FILE) {
        return Ok(());
    }
    match snapshot_offset {
        Some(offset) if offset == directory.len(WAL_NEW_FILE) => {
            directory.remove(WAL_FILE)?;
            directory.promote(WAL_NEW_FILE, WAL_FILE)?;
            tracing::info!("rolled forward interrupted WAL rotation");
        }
        _ => {
            directory.remove(WAL_NEW_FILE)?;
            tracing::info!("discarded uncommitted WAL rotation");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Snapshot, SnapshotStore};
    use crate::storage::MemDataDir;
    use crate::wal::WAL_FILE;
    use std::collections::BTreeMap;
    use std::io::Read;

    const WINDOW: usize = 600;

    fn dir_with(snapshot: Option<Snapshot>, wal_lines: &[String]) -> Arc<dyn DataDir> {
        let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
        if let Some(snap) = snapshot {
            SnapshotStore::new(dir.clone()).save(&snap).unwrap();
        }
        if !wal_lines.is_empty() {
            let mut bytes = Vec::new();
            for line in wal_lines {
                bytes.extend_from_slice(line.as_bytes());
                bytes.push(b'\n');
            }
            dir.replace(WAL_FILE, &bytes).unwrap();
        }
        dir
    }

    fn click_line(doc: &str, ts: i64) -> String {
        format!("{{\"type\":\"click\",\"ts\":{ts},\"doc\":\"{doc}\"}}")
    }

    fn upsert_line(doc: &str, ts: i64) -> String {
        format!("{{\"type\":\"doc_upsert\",\"ts\":{ts},\"doc\":\"{doc}\",\"title\":\"\",\"url\":\"\"}}")
    }

    fn delete_line(doc: &str, ts: i64) -> String {
        format!("{{\"type\":\"doc_delete\",\"ts\":{ts},\"doc\":\"{doc}\"}}")
    }

    #[test]
    fn empty_directory_recovers_empty_state() {
        let dir = dir_with(None, &[]);
        let rec = recover(dir, WINDOW, 1000).unwrap();
        assert_eq!(rec.state.doc_count(), 0);
        assert_eq!(rec.wal_offset, 0);
        assert!(rec.state.top_total(0).is_empty());
    }

    #[test]
    fn snapshot_plus_wal_suffix() {
        let now = 10_000;
        let mut total_cnt = BTreeMap::new();
        total_cnt.insert("a".to_string(), 10u64);
        total_cnt.insert("b".to_string(), 7);
        let snap = Snapshot {
            wal_offset: 0,
            docs: vec![
                Document::new("a", "A", ""),
                Document::new("b", "B", ""),
            ],
            total_cnt,
        };
        let lines = vec![
            click_line("a", now - 300),
            click_line("a", now - 50),
            upsert_line("c", now - 20),
            click_line("c", now - 10),
        ];
        let dir = dir_with(Some(snap), &lines);
        let rec = recover(dir, WINDOW, now).unwrap();
        let st = &rec.state;
        st.debug_validate();

        assert_eq!(st.total_count_of("a"), 12);
        assert_eq!(st.total_count_of("b"), 7);
        assert_eq!(st.total_count_of("c"), 1);
        assert_eq!(st.recent_count_of("a"), 2);
        assert_eq!(st.recent_count_of("c"), 1);

        let recent: Vec<_> = st
            .top_recent(10)
            .into_iter()
            .map(|e| (e.id, e.clicks))
            .collect();
        assert_eq!(
            recent,
            vec![("a".to_string(), 2), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn stale_clicks_count_total_only() {
        let now = 10_000;
        let lines = vec![
            upsert_line("a", 100),
            click_line("a", 200),
            click_line("a", now - 10),
        ];
        let dir = dir_with(None, &lines);
        let rec = recover(dir, WINDOW, now).unwrap();
        rec.state.debug_validate();
        assert_eq!(rec.state.total_count_of("a"), 2);
        assert_eq!(rec.state.recent_count_of("a"), 1);
    }

    #[test]
    fn clicks_for_unknown_ids_are_skipped() {
        let now = 1000;
        let lines = vec![
            upsert_line("a", 100),
            delete_line("a", 200),
            click_line("a", now - 5),
            click_line("ghost", now - 5),
        ];
        let dir = dir_with(None, &lines);
        let rec = recover(dir, WINDOW, now).unwrap();
        rec.state.debug_validate();
        assert_eq!(rec.state.doc_count(), 0);
        assert!(rec.state.top_total(0).is_empty());
        assert!(rec.state.top_recent(0).is_empty());
    }

    #[test]
    fn retained_clicks_expire_on_the_advance_to_now() {
        let now = 10_000;
        // In the window when written, but the window has since moved on far
        // enough that the final advance drains them.
        let lines = vec![
            upsert_line("a", 1),
            click_line("a", now - 599),
            click_line("a", now - 3),
        ];
        let dir = dir_with(None, &lines);
        let rec = recover(dir, WINDOW, now).unwrap();
        rec.state.debug_validate();
        assert_eq!(rec.state.total_count_of("a"), 2);
        // Both are still inside (now - 600, now].
        assert_eq!(rec.state.recent_count_of("a"), 2);

        // A later boot sees the same log but a much later clock.
        let dir2 = dir_with(
            None,
            &[
                upsert_line("a", 1),
                click_line("a", now - 599),
                click_line("a", now - 3),
            ],
        );
        let rec2 = recover(dir2, WINDOW, now + 10_000).unwrap();
        assert_eq!(rec2.state.total_count_of("a"), 2);
        assert_eq!(rec2.state.recent_count_of("a"), 0);
    }

    #[test]
    fn covered_clicks_rebuild_recent_without_touching_totals() {
        let now = 10_000;
        // The whole log predates the snapshot commit: totals already
        // include these clicks.
        let lines = vec![click_line("a", now - 100), click_line("a", now - 50)];
        let dir = dir_with(None, &lines);
        let covered_len = dir.len(WAL_FILE);

        let mut total_cnt = BTreeMap::new();
        total_cnt.insert("a".to_string(), 5u64);
        SnapshotStore::new(dir.clone())
            .save(&Snapshot {
                wal_offset: covered_len,
                docs: vec![Document::new("a", "A", "")],
                total_cnt,
            })
            .unwrap();

        let rec = recover(dir, WINDOW, now).unwrap();
        rec.state.debug_validate();
        assert_eq!(rec.state.total_count_of("a"), 5);
        assert_eq!(rec.state.recent_count_of("a"), 2);
    }

    #[test]
    fn committed_rotation_is_rolled_forward() {
        let now = 1000;
        let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());

        // Pre-rotation log still in place, staged log built and committed
        // (the snapshot records its length), crash before the rename.
        let stale = format!("{}\n{}\n", upsert_line("a", 1), click_line("a", now - 5));
        dir.replace(WAL_FILE, stale.as_bytes()).unwrap();
        let staged = format!("{}\n", click_line("a", now - 5));
        dir.replace("wal.new", staged.as_bytes()).unwrap();

        let mut total_cnt = BTreeMap::new();
        total_cnt.insert("a".to_string(), 1u64);
        SnapshotStore::new(dir.clone())
            .save(&Snapshot {
                wal_offset: staged.len() as u64,
                docs: vec![Document::new("a", "A", "")],
                total_cnt,
            })
            .unwrap();

        let rec = recover(dir.clone(), WINDOW, now).unwrap();
        assert!(!dir.exists("wal.new"));
        assert_eq!(dir.len(WAL_FILE), staged.len() as u64);
        assert_eq!(rec.state.total_count_of("a"), 1);
        assert_eq!(rec.state.recent_count_of("a"), 1);
    }

    #[test]
    fn uncommitted_rotation_is_discarded() {
        let now = 1000;
        let lines = vec![upsert_line("a", 1), click_line("a", now - 5)];
        let dir = dir_with(None, &lines);
        // Staged log with no snapshot recording its length: mid-build crash.
        dir.replace("wal.new", b"{\"type\":\"click\",\"ts\":99")
            .unwrap();

        let rec = recover(dir.clone(), WINDOW, now).unwrap();
        assert!(!dir.exists("wal.new"));
        assert_eq!(rec.state.total_count_of("a"), 1);
        assert_eq!(rec.state.recent_count_of("a"), 1);
    }

    #[test]
    fn torn_tail_stops_replay_and_reports_clean_offset() {
        let now = 1000;
        let lines = vec![upsert_line("a", 1), click_line("a", now - 1)];
        let dir = dir_with(None, &lines);
        let clean_len = dir.len(WAL_FILE);
        let mut bytes = Vec::new();
        dir.reader(WAL_FILE)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(b"{\"type\":\"cli");
        dir.replace(WAL_FILE, &bytes).unwrap();

        let rec = recover(dir, WINDOW, now).unwrap();
        assert_eq!(rec.wal_offset, clean_len);
        assert_eq!(rec.state.total_count_of("a"), 1);
    }

    #[test]
    fn corrupt_snapshot_aborts_recovery() {
        let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
        dir.replace(crate::snapshot::SNAPSHOT_FILE, b"not json")
            .unwrap();
        assert!(recover(dir, WINDOW, 1000).is_err());
    }
}
