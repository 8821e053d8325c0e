//! Shared in-memory state: documents plus the two rankings and the window.
//!
//! `State` is a plain value; the engine wraps it in a reader-writer lock and
//! funnels every mutation through the methods here. The contract callers rely
//! on:
//! - a click requires document membership (unknown ids are a soft no-op);
//! - total counts only grow under clicks and are forgotten on delete;
//! - recent counts always equal the ring sum for live ids (the ring bump
//!   decides whether the recent side is incremented);
//! - expiry tolerates ids that have been deleted since their clicks.

use crate::docs::{Document, DocumentSet};
use crate::rank::{BucketIndex, RankEntry};
use crate::window::RingWindow;
use std::collections::{BTreeMap, HashMap};

/// The tuple (documents, total index, recent index, ring window).
#[derive(Debug)]
pub struct State {
    docs: DocumentSet,
    total_rank: BucketIndex,
    recent_rank: BucketIndex,
    total_cnt: HashMap<String, u64>,
    recent_cnt: HashMap<String, u64>,
    window: RingWindow,
}

impl State {
    /// Create empty state with the window positioned at `now_sec`.
    pub fn new(window_seconds: usize, now_sec: i64) -> Self {
        Self {
            docs: DocumentSet::new(),
            total_rank: BucketIndex::new(),
            recent_rank: BucketIndex::new(),
            total_cnt: HashMap::new(),
            recent_cnt: HashMap::new(),
            window: RingWindow::new(window_seconds, now_sec),
        }
    }

    /// Record one click for `id` at `ts_sec`. Returns the new total, or
    /// `None` (no state change) when the id is not in the document set.
    ///
    /// A timestamp ahead of the ring advances it first, through the same
    /// expiry path the periodic advancer uses; a timestamp that has already
    /// fallen out of the window still counts toward the total but not the
    /// recent ranking.
    pub fn click(&mut self, id: &str, ts_sec: i64) -> Option<u64> {
        if !self.docs.contains(id) {
            return None;
        }

        let total = self.total_cnt.entry(id.to_string()).or_insert(0);
        *total += 1;
        let new_total = *total;
        self.total_rank.inc(id);

        self.bump_recent(id, ts_sec);
        Some(new_total)
    }

    /// Apply a click to the total side only (recovery of retained clicks
    /// older than the window). Returns `false` for unknown ids.
    pub fn apply_total_click(&mut self, id: &str) -> bool {
        if !self.docs.contains(id) {
            return false;
        }
        *self.total_cnt.entry(id.to_string()).or_insert(0) += 1;
        self.total_rank.inc(id);
        true
    }

    /// Apply a click to the recent side only (recovery of retained clicks
    /// whose total is already covered by the snapshot). Returns `false` for
    /// unknown ids or out-of-window timestamps.
    pub fn apply_recent_click(&mut self, id: &str, ts_sec: i64) -> bool {
        if !self.docs.contains(id) {
            return false;
        }
        self.bump_recent(id, ts_sec)
    }

    fn bump_recent(&mut self, id: &str, ts_sec: i64) -> bool {
        if ts_sec > self.window.last_unix_sec() {
            self.advance_window(ts_sec);
        }
        if self.window.bump(id, ts_sec) {
            *self.recent_cnt.entry(id.to_string()).or_insert(0) += 1;
            self.recent_rank.inc(id);
            true
        } else {
            false
        }
    }

    /// Insert or overwrite a document. Newly-introduced ids are added to
    /// both indexes at count 0, accepting any future click. Returns `true`
    /// when the id was newly introduced.
    pub fn upsert_doc(&mut self, doc: Document) -> bool {
        let id = doc.id.clone();
        let newly = self.docs.upsert(doc);
        if newly {
            self.total_rank.add(&id);
            self.recent_rank.add(&id);
        }
        newly
    }

    /// Remove a document and forget its counts entirely, including its ring
    /// deltas (stale deltas would bleed into a later document reusing the
    /// id). Returns whether the document existed.
    pub fn delete_doc(&mut self, id: &str) -> bool {
        if !self.docs.remove(id) {
            return false;
        }
        self.total_rank.remove(id);
        self.recent_rank.remove(id);
        self.total_cnt.remove(id);
        self.recent_cnt.remove(id);
        self.window.purge(id);
        true
    }

    /// Advance the recent window to `now_sec`, decrementing expired ids.
    /// Returns whether anything expired.
    pub fn advance_recent_to(&mut self, now_sec: i64) -> bool {
        self.advance_window(now_sec)
    }

    fn advance_window(&mut self, target_sec: i64) -> bool {
        let Self {
            window,
            recent_cnt,
            recent_rank,
            ..
        } = self;
        window.advance_to(target_sec, |id, delta| {
            // Ids deleted since their clicks have no recent counter; skip.
            let Some(cnt) = recent_cnt.get_mut(id) else {
                return;
            };
            *cnt = cnt.saturating_sub(delta);
            let drained = *cnt == 0;
            recent_rank.adjust(id, -(delta as i64));
            if drained {
                recent_cnt.remove(id);
            }
        })
    }

    /// Top `k` of the all-time ranking (`k == 0` means all).
    pub fn top_total(&self, k: usize) -> Vec<RankEntry> {
        self.total_rank.top_k(k)
    }

    /// Top `k` of the recent ranking (`k == 0` means all).
    pub fn top_recent(&self, k: usize) -> Vec<RankEntry> {
        self.recent_rank.top_k(k)
    }

    /// Documents ordered by id ascending.
    pub fn list_docs(&self) -> Vec<Document> {
        self.docs.list()
    }

    /// Whether `id` is catalogued.
    pub fn contains_doc(&self, id: &str) -> bool {
        self.docs.contains(id)
    }

    /// Number of catalogued documents.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Current total count for `id` (0 when absent).
    pub fn total_count_of(&self, id: &str) -> u64 {
        self.total_cnt.get(id).copied().unwrap_or(0)
    }

    /// Current recent count for `id` (0 when absent).
    pub fn recent_count_of(&self, id: &str) -> u64 {
        self.recent_cnt.get(id).copied().unwrap_or(0)
    }

    /// Sorted copy of the total counts (snapshot export).
    pub fn total_counts(&self) -> BTreeMap<String, u64> {
        self.total_cnt
            .iter()
            .map(|(id, &c)| (id.clone(), c))
            .collect()
    }

    /// Seed total counts from a snapshot and rebuild the total index.
    ///
    /// Counts for ids missing from the document set are dropped (a ranked id
    /// must be catalogued); documents without a count sit at 0.
    pub fn seed_total_counts(&mut self, counts: &HashMap<String, u64>) {
        let Self {
            docs,
            total_cnt,
            total_rank,
            ..
        } = self;
        total_cnt.clear();
        let mut full: HashMap<String, u64> = HashMap::with_capacity(docs.len());
        for id in docs.ids() {
            let c = counts.get(id).copied().unwrap_or(0);
            if c > 0 {
                total_cnt.insert(id.to_string(), c);
            }
            full.insert(id.to_string(), c);
        }
        total_rank.rebuild_from(&full);
    }

    /// Reposition the (empty) ring for recovery replay.
    pub fn align_window_to(&mut self, sec: i64) {
        self.window.align_to(sec);
    }

    /// The second the ring was last advanced to.
    pub fn window_last_sec(&self) -> i64 {
        self.window.last_unix_sec()
    }

    /// Validate cross-structure invariants (test/debug builds).
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate(&self) {
        self.total_rank.debug_validate();
        self.recent_rank.debug_validate();
        for (id, &c) in &self.total_cnt {
            assert_eq!(self.total_rank.count_of(id), c, "total count drift: {id}");
            assert!(self.docs.contains(id), "ranked id not catalogued: {id}");
        }
        for id in self.docs.ids() {
            assert!(self.total_rank.contains(id));
            assert!(self.recent_rank.contains(id));
        }
        for (id, &c) in &self.recent_cnt {
            assert_eq!(self.recent_rank.count_of(id), c, "recent count drift: {id}");
            assert_eq!(self.window.total_for(id), c, "ring sum drift: {id}");
        }
    }
}
