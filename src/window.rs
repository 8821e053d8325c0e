//! Per-second ring window over click aggregates.
//!
//! A fixed array of `window_seconds` slot maps; the slot for wall-second `t`
//! is `slots[t mod n]`. Advancing the window drains the slots that fall out
//! of it, handing each (id, delta) to an expiry callback. The window never
//! grows beyond `n` maps regardless of clock jumps.

use std::collections::HashMap;

/// Ring of per-second (id → click delta) aggregates.
#[derive(Debug)]
pub struct RingWindow {
    slots: Vec<HashMap<String, u64>>,
    last_unix_sec: i64,
}

impl RingWindow {
    /// Create a window of `window_seconds` slots positioned at `now_sec`.
    pub fn new(window_seconds: usize, now_sec: i64) -> Self {
        assert!(window_seconds > 0, "window must be at least one second");
        Self {
            slots: vec![HashMap::new(); window_seconds],
            last_unix_sec: now_sec,
        }
    }

    /// Width of the window in seconds.
    pub fn window_seconds(&self) -> usize {
        self.slots.len()
    }

    /// The second the window was last advanced to.
    pub fn last_unix_sec(&self) -> i64 {
        self.last_unix_sec
    }

    fn slot_for(&self, ts_sec: i64) -> usize {
        (ts_sec.rem_euclid(self.slots.len() as i64)) as usize
    }

    /// Record one click for `id` at `ts_sec`.
    ///
    /// Returns `true` when the click landed in the current window
    /// `[last_unix_sec − (n−1), last_unix_sec]`; out-of-window bumps are
    /// discarded silently and return `false` so the caller can keep its
    /// recent counters equal to the ring sum.
    pub fn bump(&mut self, id: &str, ts_sec: i64) -> bool {
        let n = self.slots.len() as i64;
        if ts_sec > self.last_unix_sec || ts_sec <= self.last_unix_sec - n {
            return false;
        }
        let idx = self.slot_for(ts_sec);
        *self.slots[idx].entry(id.to_string()).or_insert(0) += 1;
        true
    }

    /// Advance the window to `target_sec`, expiring slots that fall out.
    ///
    /// `target_sec ≤ last_unix_sec` is a no-op returning `false` (absorbs
    /// small backward clock skews). A jump of more than a full window drains
    /// every slot. Returns whether any expiry callback ran.
    pub fn advance_to(
        &mut self,
        target_sec: i64,
        mut on_expire: impl FnMut(&str, u64),
    ) -> bool {
        if target_sec <= self.last_unix_sec {
            return false;
        }
        let n = self.slots.len() as i64;
        let mut expired = false;

        if target_sec - self.last_unix_sec > n {
            for slot in &mut self.slots {
                for (id, delta) in slot.drain() {
                    if delta > 0 {
                        on_expire(&id, delta);
                        expired = true;
                    }
                }
            }
            self.last_unix_sec = target_sec;
            return expired;
        }

        for s in (self.last_unix_sec + 1)..=target_sec {
            // Second `s` reuses the slot that held second `s − n`.
            let idx = (s.rem_euclid(n)) as usize;
            for (id, delta) in self.slots[idx].drain() {
                if delta > 0 {
                    on_expire(&id, delta);
                    expired = true;
                }
            }
        }
        self.last_unix_sec = target_sec;
        expired
    }

    /// Drop every slot delta for `id` without running expiry.
    ///
    /// Called when a document is deleted: leftover deltas would otherwise
    /// bleed into the counters of a later document reusing the same id.
    pub fn purge(&mut self, id: &str) {
        for slot in &mut self.slots {
            slot.remove(id);
        }
    }

    /// Reposition an empty ring at `sec` (recovery only).
    pub fn align_to(&mut self, sec: i64) {
        debug_assert!(self.slots.iter().all(|s| s.is_empty()));
        self.last_unix_sec = sec;
    }

    /// Sum of ring deltas for `id` across all slots (test support).
    pub fn total_for(&self, id: &str) -> u64 {
        self.slots.iter().filter_map(|s| s.get(id)).sum()
    }
}
