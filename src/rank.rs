//! Bucketed counter index: O(1) increment/decrement/move, O(K) Top-K.
//!
//! Maintains:
//! - `index: HashMap<id, SlotId>` for key lookup
//! - a slot arena of entries (per-id count + intrusive list links)
//! - `buckets: HashMap<count, Bucket>` with a doubly-linked bucket chain
//!   sorted ascending by count
//! - `max_count` pointing at the non-empty bucket of greatest count
//!
//! A permanent zero bucket sits at the chain head and is never unlinked:
//! newly added ids land there, so a future increment is a plain bucket move.
//! Every other bucket is non-empty (emptied buckets are unlinked), which
//! makes the chain tail the maximum and keeps Top-K a prev-walk from
//! `max_count`.
//!
//! Click traffic is almost always a "+1 into the adjacent bucket" move, so
//! the common splice is a single step; a larger count gap (window expiry
//! drains whole per-second aggregates) walks the chain to the true insertion
//! point so bucket order stays count-monotone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A ranked (id, clicks) pair as returned by Top-K queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    /// Document id.
    pub id: String,
    /// Click count at query time.
    pub clicks: u64,
}

type SlotId = u32;

#[derive(Debug)]
struct Entry {
    id: String,
    count: u64,
    /// Count key of the owning bucket (back reference, not ownership).
    bucket: u64,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

#[derive(Debug, Default)]
struct Bucket {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    /// Chain neighbor with the next smaller count.
    prev: Option<u64>,
    /// Chain neighbor with the next larger count.
    next: Option<u64>,
}

/// Multiset of (id → count) optimized for Top-K by count.
#[derive(Debug)]
pub struct BucketIndex {
    entries: Vec<Option<Entry>>,
    free: Vec<SlotId>,
    index: HashMap<String, SlotId>,
    buckets: HashMap<u64, Bucket>,
    max_count: u64,
}

impl Default for BucketIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketIndex {
    /// Create an empty index (just the permanent zero bucket).
    pub fn new() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(0, Bucket::default());
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            buckets,
            max_count: 0,
        }
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no ids are tracked.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Current count for `id` (0 when absent).
    pub fn count_of(&self, id: &str) -> u64 {
        match self.index.get(id) {
            Some(&slot) => self.ent(slot).count,
            None => 0,
        }
    }

    /// Number of distinct bucket nodes currently linked (including the zero
    /// bucket). Structural metric used by tests and benches.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate over all (id, count) pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.entries
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|e| (e.id.as_str(), e.count))
    }

    /// Track `id` at count 0 (insert into the zero bucket). Idempotent;
    /// returns `true` when the id was newly added.
    pub fn add(&mut self, id: &str) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        self.add_slot(id);
        true
    }

    fn add_slot(&mut self, id: &str) -> SlotId {
        let slot = self.alloc(Entry {
            id: id.to_string(),
            count: 0,
            bucket: 0,
            prev: None,
            next: None,
        });
        self.index.insert(id.to_string(), slot);
        self.push_front(0, slot);
        slot
    }

    /// Forget `id` entirely, returning its count. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<u64> {
        let slot = self.index.remove(id)?;
        let key = self.ent(slot).bucket;
        self.unlink_entry(key, slot);

        let emptied = self.bucket_is_empty(key);
        let prev_key = self.buckets.get(&key).and_then(|b| b.prev);
        if emptied && key != 0 {
            self.remove_bucket(key);
        }
        if emptied && key == self.max_count {
            self.max_count = self.first_nonempty_at_or_below(prev_key);
        }

        let entry = self.entries[slot as usize]
            .take()
            .expect("entry slot missing");
        self.free.push(slot);
        Some(entry.count)
    }

    /// Adjust the count of `id` by `delta`, clamping at 0. Returns the new
    /// count. Absent ids: a positive delta tracks the id first; a
    /// non-positive delta is a no-op returning 0.
    pub fn adjust(&mut self, id: &str, delta: i64) -> u64 {
        if delta == 0 {
            return self.count_of(id);
        }
        let slot = match self.index.get(id) {
            Some(&s) => s,
            None => {
                if delta < 0 {
                    return 0;
                }
                self.add_slot(id)
            }
        };

        let old = self.ent(slot).count;
        let new = if delta < 0 {
            old.saturating_sub(delta.unsigned_abs())
        } else {
            old.saturating_add(delta as u64)
        };
        if new == old {
            return new;
        }

        if !self.buckets.contains_key(&new) {
            self.splice_bucket(new, old);
        }

        self.unlink_entry(old, slot);
        {
            let e = self.ent_mut(slot);
            e.count = new;
            e.bucket = new;
        }
        self.push_front(new, slot);

        let old_emptied = self.bucket_is_empty(old);
        let old_prev = self.buckets.get(&old).and_then(|b| b.prev);
        if old_emptied && old != 0 {
            self.remove_bucket(old);
        }

        if new > self.max_count {
            self.max_count = new;
        } else if old == self.max_count && old_emptied {
            // Only reachable on a decrement: the drained max falls back to
            // the larger of the new bucket and the old bucket's predecessor.
            self.max_count = new.max(self.first_nonempty_at_or_below(old_prev));
        }
        new
    }

    /// `adjust(id, +1)`.
    pub fn inc(&mut self, id: &str) -> u64 {
        self.adjust(id, 1)
    }

    /// Top `k` entries by descending count. `k == 0` means all. Entries at
    /// count 0 are never emitted. Ties are unspecified but stable across
    /// calls on a quiescent index.
    pub fn top_k(&self, k: usize) -> Vec<RankEntry> {
        let limit = if k == 0 { usize::MAX } else { k };
        let mut out = Vec::new();
        let mut key = self.max_count;
        while key > 0 {
            let bucket = self.buckets.get(&key).expect("max bucket missing");
            let mut cur = bucket.head;
            while let Some(slot) = cur {
                if out.len() == limit {
                    return out;
                }
                let e = self.ent(slot);
                out.push(RankEntry {
                    id: e.id.clone(),
                    clicks: e.count,
                });
                cur = e.next;
            }
            match bucket.prev {
                Some(p) => key = p,
                None => break,
            }
        }
        out
    }

    /// Discard all structure and rebuild from a count map (recovery only).
    ///
    /// Ids with count 0 land in the zero bucket; distinct positive counts
    /// become chain-linked buckets in ascending order.
    pub fn rebuild_from(&mut self, counts: &HashMap<String, u64>) {
        self.entries.clear();
        self.free.clear();
        self.index.clear();
        self.buckets.clear();
        self.buckets.insert(0, Bucket::default());
        self.max_count = 0;

        let mut distinct: Vec<u64> = counts.values().copied().filter(|&c| c > 0).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let mut prev = 0u64;
        for &c in &distinct {
            self.insert_bucket(c, Some(prev), None);
            prev = c;
        }
        self.max_count = distinct.last().copied().unwrap_or(0);

        for (id, &c) in counts {
            let slot = self.alloc(Entry {
                id: id.clone(),
                count: c,
                bucket: c,
                prev: None,
                next: None,
            });
            self.index.insert(id.clone(), slot);
            self.push_front(c, slot);
        }
    }

    fn alloc(&mut self, entry: Entry) -> SlotId {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                slot
            }
            None => {
                let slot = self.entries.len() as SlotId;
                self.entries.push(Some(entry));
                slot
            }
        }
    }

    fn ent(&self, slot: SlotId) -> &Entry {
        self.entries[slot as usize]
            .as_ref()
            .expect("entry slot missing")
    }

    fn ent_mut(&mut self, slot: SlotId) -> &mut Entry {
        self.entries[slot as usize]
            .as_mut()
            .expect("entry slot missing")
    }

    fn bucket_is_empty(&self, key: u64) -> bool {
        self.buckets
            .get(&key)
            .map(|b| b.head.is_none())
            .unwrap_or(true)
    }

    // Walk prev links from `start` to the first non-empty bucket; only the
    // zero bucket can be empty, so this terminates at 0 at the latest.
    fn first_nonempty_at_or_below(&self, start: Option<u64>) -> u64 {
        let mut key = start;
        while let Some(k) = key {
            if k == 0 || !self.bucket_is_empty(k) {
                return k;
            }
            key = self.buckets.get(&k).and_then(|b| b.prev);
        }
        0
    }

    /// Create the bucket for `new_key` and splice it into the chain at the
    /// position implied by `old_key` (the mover's current bucket). The ±1
    /// case is a single-step splice; larger gaps walk past intervening
    /// buckets so the chain stays sorted.
    fn splice_bucket(&mut self, new_key: u64, old_key: u64) {
        if new_key > old_key {
            let mut left = old_key;
            while let Some(n) = self.buckets.get(&left).and_then(|b| b.next) {
                if n > new_key {
                    break;
                }
                left = n;
            }
            let next = self.buckets.get(&left).and_then(|b| b.next);
            self.insert_bucket(new_key, Some(left), next);
        } else {
            let mut right = old_key;
            while let Some(p) = self.buckets.get(&right).and_then(|b| b.prev) {
                if p < new_key {
                    break;
                }
                right = p;
            }
            let prev = self.buckets.get(&right).and_then(|b| b.prev);
            self.insert_bucket(new_key, prev, Some(right));
        }
    }

    fn insert_bucket(&mut self, key: u64, prev: Option<u64>, next: Option<u64>) {
        self.buckets.insert(
            key,
            Bucket {
                head: None,
                tail: None,
                prev,
                next,
            },
        );
        if let Some(p) = prev {
            if let Some(b) = self.buckets.get_mut(&p) {
                b.next = Some(key);
            }
        }
        if let Some(n) = next {
            if let Some(b) = self.buckets.get_mut(&n) {
                b.prev = Some(key);
            }
        }
    }

    fn remove_bucket(&mut self, key: u64) {
        let (prev, next) = match self.buckets.get(&key) {
            Some(b) => (b.prev, b.next),
            None => return,
        };
        if let Some(p) = prev {
            if let Some(b) = self.buckets.get_mut(&p) {
                b.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(b) = self.buckets.get_mut(&n) {
                b.prev = prev;
            }
        }
        self.buckets.remove(&key);
    }

    fn push_front(&mut self, key: u64, slot: SlotId) {
        let bucket = self.buckets.get_mut(&key).expect("bucket missing");
        let old_head = bucket.head;
        bucket.head = Some(slot);
        if old_head.is_none() {
            bucket.tail = Some(slot);
        }
        {
            let e = self.ent_mut(slot);
            e.prev = None;
            e.next = old_head;
        }
        if let Some(h) = old_head {
            self.ent_mut(h).prev = Some(slot);
        }
    }

    fn unlink_entry(&mut self, key: u64, slot: SlotId) {
        let (prev, next) = {
            let e = self.ent(slot);
            (e.prev, e.next)
        };
        if let Some(p) = prev {
            self.ent_mut(p).next = next;
        } else if let Some(b) = self.buckets.get_mut(&key) {
            b.head = next;
        }
        if let Some(n) = next {
            self.ent_mut(n).prev = prev;
        } else if let Some(b) = self.buckets.get_mut(&key) {
            b.tail = prev;
        }
        let e = self.ent_mut(slot);
        e.prev = None;
        e.next = None;
    }

    /// Validate every structural invariant (test/debug builds).
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate(&self) {
        assert!(self.buckets.contains_key(&0), "zero bucket must exist");

        // Chain walk: strictly ascending keys, mutual prev/next links,
        // every bucket reachable.
        let mut seen = 0usize;
        let mut key = 0u64;
        let mut observed_max = 0u64;
        loop {
            let b = self.buckets.get(&key).expect("chain bucket missing");
            seen += 1;
            assert!(key == 0 || b.head.is_some(), "non-zero bucket is empty");
            if b.head.is_some() && key > observed_max {
                observed_max = key;
            }

            // Entry list consistency.
            let mut cur = b.head;
            let mut last = None;
            while let Some(slot) = cur {
                let e = self.ent(slot);
                assert_eq!(e.count, key);
                assert_eq!(e.bucket, key);
                assert_eq!(e.prev, last);
                assert_eq!(self.index.get(&e.id), Some(&slot));
                last = Some(slot);
                cur = e.next;
            }
            assert_eq!(b.tail, last);

            match b.next {
                Some(n) => {
                    assert!(n > key, "bucket chain is not ascending");
                    assert_eq!(self.buckets.get(&n).and_then(|nb| nb.prev), Some(key));
                    key = n;
                }
                None => break,
            }
        }
        assert_eq!(seen, self.buckets.len(), "unreachable bucket in map");
        assert_eq!(self.max_count, observed_max, "max_count out of date");

        let live = self.entries.iter().filter(|s| s.is_some()).count();
        assert_eq!(live, self.index.len());
    }
}
