//! Property: WAL replay after an arbitrary tail tear yields a prefix of the
//! written records, and reopening repairs the tail so appends continue on a
//! cleanly replayable log.

use docrank::storage::{DataDir, FsDataDir};
use docrank::wal::{Wal, WalReader, WalRecord};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn arb_records() -> impl Strategy<Value = Vec<WalRecord>> {
    prop::collection::vec(
        prop_oneof![
            (0i64..5000, "[a-d]{1,3}").prop_map(|(ts, doc)| WalRecord::Click { ts, doc }),
            (0i64..5000, "[a-d]{1,3}", ".{0,8}").prop_map(|(ts, doc, title)| {
                WalRecord::DocUpsert {
                    ts,
                    doc,
                    title,
                    url: String::new(),
                }
            }),
            (0i64..5000, "[a-d]{1,3}").prop_map(|(ts, doc)| WalRecord::DocDelete { ts, doc }),
        ],
        1..80,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn torn_tail_replays_as_prefix_and_repair_allows_append(
        records in arb_records(),
        tear_bytes in 1usize..64,
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let dir: Arc<dyn DataDir> = Arc::new(FsDataDir::open(tmp.path()).unwrap());

        {
            let wal = Wal::open(dir.clone(), Duration::from_millis(1), 16, 0).unwrap();
            for rec in &records {
                wal.append(rec.clone()).unwrap();
            }
            wal.close().unwrap();
        }

        // Tear the file tail, as a crash mid-write would.
        let path = tmp.path().join("wal.log");
        let mut bytes = std::fs::read(&path).unwrap();
        let keep = bytes.len().saturating_sub(tear_bytes);
        bytes.truncate(keep);
        std::fs::write(&path, &bytes).unwrap();

        let mut prefix = Vec::new();
        let offset = WalReader::new(dir.clone())
            .replay(0, |rec, _| prefix.push(rec))
            .unwrap();
        prop_assert!(prefix.len() <= records.len());
        prop_assert_eq!(&records[..prefix.len()], &prefix[..]);
        prop_assert!(offset <= bytes.len() as u64);

        // Reopen at the clean boundary: the torn bytes are truncated away
        // and a fresh append lands on a strictly replayable log.
        let wal = Wal::open(dir.clone(), Duration::from_millis(1), 16, offset).unwrap();
        wal.append(WalRecord::Click { ts: 9999, doc: "z".into() }).unwrap();
        wal.close().unwrap();

        let mut after = Vec::new();
        let final_offset = WalReader::new(dir.clone())
            .replay(0, |rec, _| after.push(rec))
            .unwrap();
        prop_assert_eq!(after.len(), prefix.len() + 1);
        prop_assert_eq!(&after[..prefix.len()], &prefix[..]);
        prop_assert_eq!(after.last().unwrap().doc(), "z");
        prop_assert_eq!(final_offset, dir.len("wal.log"));
    }
}
