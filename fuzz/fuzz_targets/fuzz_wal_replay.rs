#![no_main]

use docrank::storage::{DataDir, MemDataDir};
use docrank::wal::WalReader;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

// Replay must never panic on arbitrary log bytes: any undecodable line is a
// torn tail and stops the scan cleanly.
fuzz_target!(|data: &[u8]| {
    let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
    if dir.replace("wal.log", data).is_err() {
        return;
    }
    let _ = WalReader::new(dir).replay(0, |_, _| {});
});
