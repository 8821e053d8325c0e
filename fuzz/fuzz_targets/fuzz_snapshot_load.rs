#![no_main]

use docrank::snapshot::SnapshotStore;
use docrank::storage::{DataDir, MemDataDir};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

// Snapshot decoding must reject arbitrary bytes with an error, never a
// panic.
fuzz_target!(|data: &[u8]| {
    let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
    if dir.replace("snapshot.json", data).is_err() {
        return;
    }
    let _ = SnapshotStore::new(dir).load();
});
