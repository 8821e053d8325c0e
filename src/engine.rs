//! Engine: recovery, ingest, queries, background workers, shutdown.
//!
//! Concurrency regime:
//! - one reader-writer lock guards `State`; every mutation takes the writer
//!   side, every query the reader side, and nothing holds the lock across
//!   disk I/O;
//! - writes are WAL-first: the caller blocks on the group-commit ack
//!   *before* acquiring the writer lock, so WAL order is commit order;
//! - the advancer wakes once per wall-second and takes the writer lock only
//!   long enough to expire the window;
//! - the snapshotter drives a WAL rotation whose commit closure copies the
//!   state under the reader lock and writes the snapshot; the flusher thread
//!   serializes rotation against appends, and the State lock is never held
//!   across disk I/O. A failed snapshot is logged and retried at the next
//!   interval without affecting ingest.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::docs::Document;
use crate::error::{EngineError, EngineResult};
use crate::notify::{ChangeAnchor, NotifyHub, Subscription};
use crate::rank::RankEntry;
use crate::recover::recover;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::state::State;
use crate::storage::{DataDir, FsDataDir};
use crate::wal::Wal;
use crossbeam::channel::{bounded, tick, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The click-ranking engine.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct Engine {
    cfg: Config,
    state: Arc<RwLock<State>>,
    wal: Arc<Wal>,
    snapshots: SnapshotStore,
    hub: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    closed: Arc<AtomicBool>,
    // Serializes the periodic snapshotter, manual snapshot_now, and the
    // terminal snapshot.
    snapshot_gate: Arc<Mutex<()>>,
    background: Mutex<Vec<(Sender<()>, JoinHandle<()>)>>,
}

impl Engine {
    /// Open an engine over `cfg.data_dir` with the system clock.
    pub fn open(cfg: Config) -> EngineResult<Self> {
        let directory: Arc<dyn DataDir> = Arc::new(FsDataDir::open(&cfg.data_dir)?);
        Self::open_with(cfg, directory, Arc::new(SystemClock))
    }

    /// Open an engine over an explicit storage backend and clock.
    pub fn open_with(
        cfg: Config,
        directory: Arc<dyn DataDir>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        cfg.validate()?;

        let now = clock.now_sec();
        let recovered = recover(
            directory.clone(),
            cfg.recent_window_seconds as usize,
            now,
        )?;
        let wal = Arc::new(Wal::open(
            directory.clone(),
            cfg.wal_group_commit_interval,
            cfg.effective_wal_batch(),
            recovered.wal_offset,
        )?);

        let engine = Self {
            snapshots: SnapshotStore::new(directory),
            state: Arc::new(RwLock::new(recovered.state)),
            hub: Arc::new(NotifyHub::new()),
            clock,
            closed: Arc::new(AtomicBool::new(false)),
            snapshot_gate: Arc::new(Mutex::new(())),
            background: Mutex::new(Vec::new()),
            wal,
            cfg,
        };
        engine.spawn_advancer();
        engine.spawn_snapshotter();
        Ok(engine)
    }

    fn spawn_advancer(&self) {
        let state = self.state.clone();
        let hub = self.hub.clone();
        let clock = self.clock.clone();
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let ticker = tick(Duration::from_secs(1));
        let handle = std::thread::Builder::new()
            .name("rank-advancer".into())
            .spawn(move || loop {
                crossbeam::channel::select! {
                    recv(quit_rx) -> _ => return,
                    recv(ticker) -> _ => {
                        let now = clock.now_sec();
                        let expired = state.write().advance_recent_to(now);
                        if expired {
                            hub.publish(ChangeAnchor::Ranking);
                        }
                    }
                }
            })
            .expect("spawn advancer");
        self.background.lock().push((quit_tx, handle));
    }

    fn spawn_snapshotter(&self) {
        let state = self.state.clone();
        let wal = self.wal.clone();
        let snapshots = self.snapshots.clone();
        let clock = self.clock.clone();
        let gate = self.snapshot_gate.clone();
        let window = self.cfg.recent_window_seconds as i64;
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let ticker = tick(self.cfg.snapshot_interval);
        let handle = std::thread::Builder::new()
            .name("rank-snapshotter".into())
            .spawn(move || loop {
                crossbeam::channel::select! {
                    recv(quit_rx) -> _ => return,
                    recv(ticker) -> _ => {
                        let _guard = gate.lock();
                        if let Err(e) = snapshot_once(&state, &wal, &snapshots, &*clock, window) {
                            tracing::warn!(error = %e, "snapshot failed; retrying next interval");
                        }
                    }
                }
            })
            .expect("spawn snapshotter");
        self.background.lock().push((quit_tx, handle));
    }

    /// Record one click on `id` at the current wall second.
    ///
    /// Returns `Ok(None)` when the id is not catalogued (soft not-found, no
    /// WAL traffic); `Ok(Some(new_total))` once the click is durable and
    /// applied. A WAL failure surfaces as `durable-io` and leaves the
    /// in-memory state untouched.
    pub fn click(&self, id: &str) -> EngineResult<Option<u64>> {
        self.check_open()?;
        if id.is_empty() {
            return Err(EngineError::BadInput("document id must not be empty".into()));
        }
        if !self.state.read().contains_doc(id) {
            return Ok(None);
        }

        let now = self.clock.now_sec();
        self.wal.append_click(id, now)?;

        let applied = self.state.write().click(id, now);
        if applied.is_some() {
            self.hub.publish(ChangeAnchor::Ranking);
        }
        Ok(applied)
    }

    /// Insert or update a document (WAL-first).
    pub fn upsert_doc(&self, doc: Document) -> EngineResult<()> {
        self.check_open()?;
        if doc.id.is_empty() {
            return Err(EngineError::BadInput("document id must not be empty".into()));
        }
        let now = self.clock.now_sec();
        self.wal.append_doc_upsert(&doc.id, &doc.title, &doc.url, now)?;
        self.state.write().upsert_doc(doc);
        self.hub.publish(ChangeAnchor::Documents);
        Ok(())
    }

    /// Delete a document. Deleting an absent id is a no-op (no WAL traffic).
    pub fn delete_doc(&self, id: &str) -> EngineResult<()> {
        self.check_open()?;
        if id.is_empty() {
            return Err(EngineError::BadInput("document id must not be empty".into()));
        }
        if !self.state.read().contains_doc(id) {
            return Ok(());
        }
        let now = self.clock.now_sec();
        self.wal.append_doc_delete(id, now)?;
        self.state.write().delete_doc(id);
        self.hub.publish(ChangeAnchor::Documents);
        Ok(())
    }

    /// Top `k` of the all-time ranking; `k == 0` uses `topk_default`.
    pub fn top_total(&self, k: usize) -> Vec<RankEntry> {
        let k = if k == 0 { self.cfg.topk_default } else { k };
        self.state.read().top_total(k)
    }

    /// Top `k` of the recent ranking; `k == 0` uses `topk_default`.
    pub fn top_recent(&self, k: usize) -> Vec<RankEntry> {
        let k = if k == 0 { self.cfg.topk_default } else { k };
        self.state.read().top_recent(k)
    }

    /// Documents ordered by id ascending.
    pub fn list_docs(&self) -> Vec<Document> {
        self.state.read().list_docs()
    }

    /// Register for change anchors.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Flush and fsync everything appended so far.
    pub fn sync_now(&self) -> EngineResult<()> {
        self.check_open()?;
        self.wal.sync_now()
    }

    /// Take a snapshot and rotate the WAL immediately.
    pub fn snapshot_now(&self) -> EngineResult<()> {
        self.check_open()?;
        let _guard = self.snapshot_gate.lock();
        snapshot_once(
            &self.state,
            &self.wal,
            &self.snapshots,
            &*self.clock,
            self.cfg.recent_window_seconds as i64,
        )
    }

    /// Stop background workers, sync the WAL, write a terminal snapshot,
    /// and close the log. Idempotent; afterwards every write is rejected
    /// with `Closed`.
    pub fn shutdown(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for (quit, handle) in self.background.lock().drain(..) {
            let _ = quit.send(());
            let _ = handle.join();
        }
        let _ = self.wal.sync_now();
        {
            let _guard = self.snapshot_gate.lock();
            if let Err(e) = snapshot_once(
                &self.state,
                &self.wal,
                &self.snapshots,
                &*self.clock,
                self.cfg.recent_window_seconds as i64,
            ) {
                tracing::warn!(error = %e, "terminal snapshot failed");
            }
        }
        self.hub.shutdown();
        self.wal.close()
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// One snapshot cycle: WAL sync, then a rotation whose commit point is the
/// snapshot itself. The rotation stages the rewritten log (clicks within the
/// window only), hands its length to the commit closure, and only replaces
/// the live log once the snapshot recording that length is durable. The
/// state copy happens inside the commit, in the flusher thread, with appends
/// quiesced, so the snapshot covers every record that precedes the rewritten
/// log's tail.
fn snapshot_once(
    state: &Arc<RwLock<State>>,
    wal: &Wal,
    snapshots: &SnapshotStore,
    clock: &dyn Clock,
    window_seconds: i64,
) -> EngineResult<()> {
    wal.sync_now()?;

    let cutoff = clock.now_sec() - window_seconds;
    let state = state.clone();
    let snapshots = snapshots.clone();
    wal.rotate_with(cutoff, move |rotated_len| {
        let (docs, total_cnt) = {
            let st = state.read();
            (st.list_docs(), st.total_counts())
        };
        snapshots.save(&Snapshot {
            wal_offset: rotated_len,
            docs,
            total_cnt,
        })
    })?;
    tracing::debug!(cutoff, "snapshot written and WAL rotated");
    Ok(())
}
