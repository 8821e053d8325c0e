//! Write-ahead log: JSON lines with group commit.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - The live log is a single file `wal.log` in the data directory; rotation
//!   stages its replacement as `wal.new` and renames it over the live log
//!   once the matching snapshot is durable.
//! - One record per line: a UTF-8 JSON object, newline terminated, tagged by
//!   `"type"` (`click` / `doc_upsert` / `doc_delete`) with `ts` in wall
//!   seconds and `doc` the document id.
//! - Records are appended in commit order; replay order is commit order.
//!
//! ## Recovery posture
//!
//! A line that fails JSON decoding is the torn-tail sentinel: replay stops
//! cleanly at that line's byte offset. The writer repairs a torn tail by
//! truncating back to the valid prefix before its first append, so the next
//! record physically overwrites the tear.
//!
//! ## Group commit
//!
//! Appenders enqueue onto a bounded channel and block on a per-record ack.
//! A single dedicated flusher thread owns the append handle (no lock is
//! taken on the write path) and flushes when the pending batch reaches the
//! configured size, when the commit interval elapses, on an explicit sync,
//! on rotation, and at shutdown. Each flush serializes the batch, writes,
//! flushes, fsyncs, then acks every waiter with the batch result.

use crate::error::{EngineError, EngineResult};
use crate::storage::DataDir;
use crossbeam::channel::{bounded, tick, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// File name of the live WAL within the data directory.
pub const WAL_FILE: &str = "wal.log";
/// Staging name of the rewritten log during rotation.
pub const WAL_NEW_FILE: &str = "wal.new";

/// Capacity of the append command queue; a full queue blocks the caller.
const COMMAND_QUEUE_CAPACITY: usize = 8192;

/// A durable log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalRecord {
    /// One click on `doc` at wall-second `ts`.
    Click {
        /// Wall seconds of the click.
        ts: i64,
        /// Clicked document id.
        doc: String,
    },
    /// Insert-or-update of a document.
    DocUpsert {
        /// Wall seconds of the upsert.
        ts: i64,
        /// Document id.
        doc: String,
        /// Document title.
        #[serde(default)]
        title: String,
        /// Document URL.
        #[serde(default)]
        url: String,
    },
    /// Deletion of a document.
    DocDelete {
        /// Wall seconds of the delete.
        ts: i64,
        /// Document id.
        doc: String,
    },
}

impl WalRecord {
    /// The record's wall-second timestamp.
    pub fn ts(&self) -> i64 {
        match self {
            WalRecord::Click { ts, .. }
            | WalRecord::DocUpsert { ts, .. }
            | WalRecord::DocDelete { ts, .. } => *ts,
        }
    }

    /// The document id the record refers to.
    pub fn doc(&self) -> &str {
        match self {
            WalRecord::Click { doc, .. }
            | WalRecord::DocUpsert { doc, .. }
            | WalRecord::DocDelete { doc, .. } => doc,
        }
    }

    fn encode_line(&self) -> EngineResult<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| EngineError::Encode(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

enum Command {
    Append {
        record: WalRecord,
        ack: Sender<EngineResult<()>>,
    },
    Sync {
        ack: Sender<EngineResult<()>>,
    },
    Rotate {
        cutoff_ts: i64,
        commit: Box<dyn FnOnce(u64) -> EngineResult<()> + Send>,
        ack: Sender<EngineResult<()>>,
    },
    Shutdown {
        ack: Sender<EngineResult<()>>,
    },
}

/// Handle to the group-commit WAL writer.
///
/// Cheap to share; all methods take `&self`. `append` returns only after the
/// record's batch has been flushed and fsynced (exactly one ack per append).
pub struct Wal {
    tx: Sender<Command>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Wal {
    /// Open the WAL and start the flusher thread.
    ///
    /// `valid_prefix_len` is the clean-replay boundary established by
    /// recovery: a longer file is truncated back to it (torn-tail repair)
    /// before the first append.
    pub fn open(
        dir: Arc<dyn DataDir>,
        interval: Duration,
        batch: usize,
        valid_prefix_len: u64,
    ) -> EngineResult<Self> {
        let current = dir.len(WAL_FILE);
        if current > valid_prefix_len {
            let mut bytes = Vec::new();
            dir.reader(WAL_FILE)?.read_to_end(&mut bytes)?;
            bytes.truncate(valid_prefix_len as usize);
            dir.replace(WAL_FILE, &bytes)?;
            tracing::warn!(
                valid = valid_prefix_len,
                torn = current - valid_prefix_len,
                "repaired torn WAL tail by truncation"
            );
        }

        let writer = std::io::BufWriter::new(dir.appender(WAL_FILE)?);
        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let mut flusher = Flusher {
            dir,
            writer: Some(writer),
            pending: Vec::new(),
            batch: batch.max(1),
            rx,
            ticker: tick(interval.max(Duration::from_millis(1))),
        };
        let handle = std::thread::Builder::new()
            .name("wal-flusher".into())
            .spawn(move || flusher.run())?;
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Append a record and wait for its batch to reach stable storage.
    pub fn append(&self, record: WalRecord) -> EngineResult<()> {
        self.request(|ack| Command::Append { record, ack })
    }

    /// Append a click record.
    pub fn append_click(&self, doc: &str, ts: i64) -> EngineResult<()> {
        self.append(WalRecord::Click {
            ts,
            doc: doc.to_string(),
        })
    }

    /// Append a document upsert record.
    pub fn append_doc_upsert(&self, doc: &str, title: &str, url: &str, ts: i64) -> EngineResult<()> {
        self.append(WalRecord::DocUpsert {
            ts,
            doc: doc.to_string(),
            title: title.to_string(),
            url: url.to_string(),
        })
    }

    /// Append a document delete record.
    pub fn append_doc_delete(&self, doc: &str, ts: i64) -> EngineResult<()> {
        self.append(WalRecord::DocDelete {
            ts,
            doc: doc.to_string(),
        })
    }

    /// Flush and fsync everything enqueued so far.
    pub fn sync_now(&self) -> EngineResult<()> {
        self.request(|ack| Command::Sync { ack })
    }

    /// Rewrite the log to retain only clicks with `ts ≥ cutoff_ts`.
    ///
    /// Document records are dropped (they are represented by the snapshot
    /// committed alongside this rotation). Runs inside the flusher thread,
    /// which owns the writer; pending appends are flushed first and no new
    /// append lands until the rotation commits or rolls back.
    ///
    /// `commit` is the rotation's commit point: it receives the rewritten
    /// log's byte length and is expected to make the matching snapshot
    /// durable. Only when it returns `Ok` does the rewritten log replace
    /// `wal.log`; on error the staged file is discarded and the old log
    /// stays in place. A crash between commit and the rename is rolled
    /// forward at recovery (the staged file's length matches the snapshot).
    pub fn rotate_with(
        &self,
        cutoff_ts: i64,
        commit: impl FnOnce(u64) -> EngineResult<()> + Send + 'static,
    ) -> EngineResult<()> {
        self.request(|ack| Command::Rotate {
            cutoff_ts,
            commit: Box::new(commit),
            ack,
        })
    }

    /// Flush, fsync, stop the flusher thread, and close the log.
    ///
    /// Pending appends either complete with their final batch or observe a
    /// closed log. Idempotent.
    pub fn close(&self) -> EngineResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Command::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.recv();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn request(&self, make: impl FnOnce(Sender<EngineResult<()>>) -> Command) -> EngineResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(make(ack_tx))
            .map_err(|_| EngineError::Closed)?;
        ack_rx.recv().map_err(|_| EngineError::Closed)?
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct Flusher {
    dir: Arc<dyn DataDir>,
    writer: Option<std::io::BufWriter<Box<dyn Write + Send>>>,
    pending: Vec<(WalRecord, Sender<EngineResult<()>>)>,
    batch: usize,
    rx: Receiver<Command>,
    ticker: Receiver<std::time::Instant>,
}

impl Flusher {
    fn run(&mut self) {
        let rx = self.rx.clone();
        let ticker = self.ticker.clone();
        loop {
            crossbeam::channel::select! {
                recv(rx) -> msg => match msg {
                    Ok(Command::Append { record, ack }) => {
                        self.pending.push((record, ack));
                        if self.pending.len() >= self.batch {
                            let _ = self.flush();
                        }
                    }
                    Ok(Command::Sync { ack }) => {
                        let _ = ack.send(self.flush());
                    }
                    Ok(Command::Rotate { cutoff_ts, commit, ack }) => {
                        let result = self
                            .flush()
                            .and_then(|()| self.rotate(cutoff_ts, commit));
                        let _ = ack.send(result);
                    }
                    Ok(Command::Shutdown { ack }) => {
                        let _ = ack.send(self.flush());
                        return;
                    }
                    Err(_) => {
                        // All handles dropped: final flush, then stop.
                        let _ = self.flush();
                        return;
                    }
                },
                recv(ticker) -> _ => {
                    // Waiters are individually notified inside flush.
                    let _ = self.flush();
                }
            }
        }
    }

    /// Serialize the pending batch, write, flush, fsync, then ack every
    /// waiter. Any failure fails the whole batch.
    fn flush(&mut self) -> EngineResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let outcome = self.write_batch();
        if let Err(msg) = &outcome {
            tracing::warn!(batch = self.pending.len(), error = %msg, "WAL batch flush failed");
        }
        for (_, ack) in self.pending.drain(..) {
            let _ = ack.send(match &outcome {
                Ok(()) => Ok(()),
                Err(msg) => Err(EngineError::DurableIo(msg.clone())),
            });
        }
        outcome.map_err(EngineError::DurableIo)
    }

    fn write_batch(&mut self) -> Result<(), String> {
        if self.writer.is_none() {
            // Lost the handle on a previous failure; reopen for append.
            self.writer = Some(std::io::BufWriter::new(
                self.dir.appender(WAL_FILE).map_err(|e| e.to_string())?,
            ));
        }
        let writer = self.writer.as_mut().expect("append handle must be open");
        for (record, _) in &self.pending {
            let line = record.encode_line().map_err(|e| e.to_string())?;
            writer.write_all(&line).map_err(|e| e.to_string())?;
        }
        writer.flush().map_err(|e| e.to_string())?;
        self.dir.persist(WAL_FILE).map_err(|e| e.to_string())
    }

    fn rotate(
        &mut self,
        cutoff_ts: i64,
        commit: Box<dyn FnOnce(u64) -> EngineResult<()> + Send>,
    ) -> EngineResult<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        self.dir.remove(WAL_NEW_FILE)?;

        // Stage the rewritten log aside; the live log stays untouched until
        // the commit closure has made the matching snapshot durable.
        let mut staged = self.dir.appender(WAL_NEW_FILE)?;
        let mut kept = 0usize;
        let mut staged_len = 0u64;
        if self.dir.exists(WAL_FILE) {
            let mut reader = std::io::BufReader::new(self.dir.reader(WAL_FILE)?);
            let mut line = Vec::new();
            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                match serde_json::from_slice::<WalRecord>(&line) {
                    Ok(WalRecord::Click { ts, .. }) if ts >= cutoff_ts => {
                        staged.write_all(&line)?;
                        staged_len += line.len() as u64;
                        if !line.ends_with(b"\n") {
                            staged.write_all(b"\n")?;
                            staged_len += 1;
                        }
                        kept += 1;
                    }
                    Ok(_) => {}
                    // Torn tail in the live log: stop copying at the tear.
                    Err(_) => break,
                }
            }
        }
        staged.flush()?;
        drop(staged);
        self.dir.persist(WAL_NEW_FILE)?;

        if let Err(e) = commit(staged_len) {
            let _ = self.dir.remove(WAL_NEW_FILE);
            self.writer = Some(std::io::BufWriter::new(self.dir.appender(WAL_FILE)?));
            return Err(e);
        }

        self.dir.promote(WAL_NEW_FILE, WAL_FILE)?;
        self.writer = Some(std::io::BufWriter::new(self.dir.appender(WAL_FILE)?));
        tracing::debug!(kept, cutoff_ts, staged_len, "rotated WAL");
        Ok(())
    }
}

/// Replays the log from a byte offset.
pub struct WalReader {
    dir: Arc<dyn DataDir>,
}

impl WalReader {
    /// Create a reader over a data directory.
    pub fn new(dir: Arc<dyn DataDir>) -> Self {
        Self { dir }
    }

    /// Replay records starting at `from_offset`, invoking `on_record` with
    /// each decoded record and its starting byte offset, in commit order.
    ///
    /// Returns the offset of the first byte past the last consumed record.
    /// An undecodable line stops replay cleanly at that line's offset (torn
    /// tail); a missing file is an empty log.
    pub fn replay(
        &self,
        from_offset: u64,
        mut on_record: impl FnMut(WalRecord, u64),
    ) -> EngineResult<u64> {
        if !self.dir.exists(WAL_FILE) {
            return Ok(0);
        }
        let file = self.dir.reader(WAL_FILE)?;
        let mut reader = std::io::BufReader::new(file);
        if from_offset > 0 {
            std::io::copy(
                &mut Read::by_ref(&mut reader).take(from_offset),
                &mut std::io::sink(),
            )?;
        }

        let mut offset = from_offset;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                return Ok(offset);
            }
            match serde_json::from_slice::<WalRecord>(&line) {
                Ok(record) => {
                    on_record(record, offset);
                    offset += n as u64;
                }
                Err(_) => return Ok(offset),
            }
        }
    }
}
