//! Benchmarks for WAL append and replay.
#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use docrank::storage::{DataDir, MemDataDir};
use docrank::wal::{Wal, WalReader, WalRecord};
use std::sync::Arc;
use std::time::Duration;

// Batch of 1: synchronous appenders would otherwise idle on the commit
// interval between records.
fn filled_dir(records: u64) -> Arc<dyn DataDir> {
    let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
    let wal = Wal::open(dir.clone(), Duration::from_millis(10), 1, 0).unwrap();
    for i in 0..records {
        wal.append(WalRecord::Click {
            ts: i as i64,
            doc: format!("doc-{}", i % 100),
        })
        .unwrap();
    }
    wal.close().unwrap();
    dir
}

fn bench_wal(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal");

    group.bench_function("append_10k_memory_sync_each", |b| {
        b.iter_batched(
            || {
                let dir: Arc<dyn DataDir> = Arc::new(MemDataDir::new());
                let wal = Wal::open(dir.clone(), Duration::from_millis(10), 1, 0).unwrap();
                (dir, wal)
            },
            |(dir, wal)| {
                for i in 0..10_000u64 {
                    wal.append(WalRecord::Click {
                        ts: i as i64,
                        doc: format!("doc-{}", i % 100),
                    })
                    .unwrap();
                }
                wal.close().unwrap();
                drop(dir);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("replay_10k_memory", |b| {
        let dir = filled_dir(10_000);
        b.iter(|| {
            let mut count = 0usize;
            WalReader::new(dir.clone())
                .replay(0, |_, _| count += 1)
                .unwrap();
            std::hint::black_box(count);
        });
    });

    group.bench_function("rotate_10k_retain_half", |b| {
        b.iter_batched(
            || {
                let dir = filled_dir(10_000);
                let wal = Wal::open(dir.clone(), Duration::from_millis(10), 1, 0).unwrap();
                (dir, wal)
            },
            |(dir, wal)| {
                wal.rotate_with(5_000, |_| Ok(())).unwrap();
                wal.close().unwrap();
                drop(dir);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_wal);
criterion_main!(benches);
