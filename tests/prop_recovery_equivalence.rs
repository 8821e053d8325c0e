//! Property: recovering a crash image equals the acknowledged history.
//!
//! Drives an engine over an in-memory directory with a scripted mix of
//! upserts, clicks, deletes, clock advances, and snapshots, capturing
//! point-in-time disk images along the way (a fork of the backing store is
//! a crash: no orderly shutdown, no terminal snapshot). Recovering each
//! image must reproduce the reference model exactly: totals are all
//! acknowledged clicks, recents are the clicks still inside the window,
//! documents are the surviving upserts.

use docrank::storage::{DataDir, MemDataDir};
use docrank::{Config, Document, Engine, ManualClock};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const WINDOW: i64 = 600;
const DOC_IDS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone)]
enum Op {
    Upsert(usize),
    Click(usize),
    Delete(usize),
    AdvanceClock(i64),
    Snapshot,
    CaptureCrash,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    // Small id space forces collisions: clicks on deleted docs, re-upserts,
    // deletes of missing docs.
    prop::collection::vec(
        prop_oneof![
            3 => (0usize..DOC_IDS.len()).prop_map(Op::Upsert),
            8 => (0usize..DOC_IDS.len()).prop_map(Op::Click),
            1 => (0usize..DOC_IDS.len()).prop_map(Op::Delete),
            2 => (1i64..400).prop_map(Op::AdvanceClock),
            1 => Just(Op::Snapshot),
            2 => Just(Op::CaptureCrash),
        ],
        1..60,
    )
}

#[derive(Debug, Default, Clone)]
struct Model {
    docs: BTreeMap<String, ()>,
    totals: HashMap<String, u64>,
    // Per-id click timestamps since the id's last delete.
    clicks: HashMap<String, Vec<i64>>,
}

impl Model {
    fn upsert(&mut self, id: &str) {
        self.docs.insert(id.to_string(), ());
    }

    fn click(&mut self, id: &str, now: i64) -> bool {
        if !self.docs.contains_key(id) {
            return false;
        }
        *self.totals.entry(id.to_string()).or_insert(0) += 1;
        self.clicks.entry(id.to_string()).or_default().push(now);
        true
    }

    fn delete(&mut self, id: &str) {
        self.docs.remove(id);
        self.totals.remove(id);
        self.clicks.remove(id);
    }

    fn expected_recent(&self, id: &str, now: i64) -> u64 {
        self.clicks
            .get(id)
            .map(|ts| ts.iter().filter(|&&t| t > now - WINDOW).count() as u64)
            .unwrap_or(0)
    }
}

fn check_recovered(image: MemDataDir, model: &Model, now: i64) {
    let cfg = Config {
        wal_group_commit_interval: Duration::from_millis(1),
        snapshot_interval: Duration::from_secs(3600),
        ..Config::default()
    };
    let dir: Arc<dyn DataDir> = Arc::new(image);
    let clock = Arc::new(ManualClock::new(now));
    let engine = Engine::open_with(cfg, dir, clock).unwrap();

    let doc_ids: Vec<String> = engine.list_docs().into_iter().map(|d| d.id).collect();
    let model_ids: Vec<String> = model.docs.keys().cloned().collect();
    assert_eq!(doc_ids, model_ids, "documents diverged");

    let totals: HashMap<String, u64> = engine
        .top_total(0)
        .into_iter()
        .map(|e| (e.id, e.clicks))
        .collect();
    let model_totals: HashMap<String, u64> = model
        .totals
        .iter()
        .filter(|(_, &c)| c > 0)
        .map(|(id, &c)| (id.clone(), c))
        .collect();
    assert_eq!(totals, model_totals, "totals diverged");

    let recents: HashMap<String, u64> = engine
        .top_recent(0)
        .into_iter()
        .map(|e| (e.id, e.clicks))
        .collect();
    let mut model_recents = HashMap::new();
    for id in model.docs.keys() {
        let r = model.expected_recent(id, now);
        if r > 0 {
            model_recents.insert(id.clone(), r);
        }
    }
    assert_eq!(recents, model_recents, "recents diverged");

    engine.shutdown().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn recovered_crash_images_match_reference(ops in arb_ops()) {
        let backing = MemDataDir::new();
        let dir: Arc<dyn DataDir> = Arc::new(backing.clone());
        let start = 100_000i64;
        let clock = Arc::new(ManualClock::new(start));
        let cfg = Config {
            wal_group_commit_interval: Duration::from_millis(1),
            snapshot_interval: Duration::from_secs(3600),
            ..Config::default()
        };
        let engine = Engine::open_with(cfg, dir, clock.clone()).unwrap();

        let mut model = Model::default();
        let mut now = start;
        let mut images: Vec<(MemDataDir, Model, i64)> = Vec::new();

        for op in ops {
            match op {
                Op::Upsert(i) => {
                    let id = DOC_IDS[i];
                    engine.upsert_doc(Document::new(id, "t", "u")).unwrap();
                    model.upsert(id);
                }
                Op::Click(i) => {
                    let id = DOC_IDS[i];
                    let got = engine.click(id).unwrap();
                    let expected = model.click(id, now);
                    prop_assert_eq!(got.is_some(), expected);
                    if let Some(total) = got {
                        prop_assert_eq!(total, model.totals[id]);
                    }
                }
                Op::Delete(i) => {
                    let id = DOC_IDS[i];
                    engine.delete_doc(id).unwrap();
                    model.delete(id);
                }
                Op::AdvanceClock(secs) => {
                    now += secs;
                    clock.set(now);
                }
                Op::Snapshot => {
                    engine.snapshot_now().unwrap();
                }
                Op::CaptureCrash => {
                    images.push((backing.fork().unwrap(), model.clone(), now));
                }
            }
        }
        // Final crash image after the whole script.
        images.push((backing.fork().unwrap(), model.clone(), now));
        engine.shutdown().unwrap();

        for (image, model_at, now_at) in images {
            check_recovered(image, &model_at, now_at);
        }
    }
}
