//! `docrank`: a crash-consistent click-ranking engine.
//!
//! Scope:
//! - bucketed counter index (`rank`): O(1) count moves, O(K) Top-K
//! - per-second ring window over click aggregates (`window`)
//! - shared state composing documents + total + recent rankings (`state`)
//! - JSON-lines write-ahead log with group commit (`wal`)
//! - atomic snapshots + WAL rotation (`snapshot`)
//! - crash recovery (`recover`)
//! - throttled change-notification fan-out (`notify`)
//! - the composition root with background workers (`engine`)
//!
//! Non-goal: the HTTP/SSE transport. The engine exposes operations, data
//! types, and a change-notification hook; routing, request decoding, and
//! response envelopes belong to an outer layer.
//!
//! ## Contract (what you can rely on)
//!
//! - **WAL-first writes**: a click or document mutation is acknowledged only
//!   after its record's group-commit batch has been flushed and fsynced;
//!   the in-memory state is mutated only after that acknowledgement, and
//!   never on a durability failure.
//! - **Bounded log**: each snapshot rewrites the WAL to retain only clicks
//!   still inside the recent window; the snapshot is the rotation's commit
//!   point, so a crash on either side of it recovers to a consistent state.
//! - **Torn tails are repaired, not fatal**: replay stops at the first
//!   undecodable line and the writer truncates back to that boundary.
//! - **Queries never block ingest for long**: reads take the shared side of
//!   one reader-writer lock and return owned snapshots; no lock is held
//!   across disk I/O anywhere.
//! - **Notifications are anchors, not data**: subscribers get payload-free
//!   change signals on bounded queues (slow consumers lose signals, never
//!   stall producers) and re-query the rankings on receipt.

pub mod clock;
pub mod config;
pub mod docs;
pub mod engine;
pub mod error;
pub mod notify;
pub mod rank;
pub mod recover;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod wal;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use docs::{Document, DocumentSet};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use notify::{ChangeAnchor, NotifyHub, Subscription};
pub use rank::{BucketIndex, RankEntry};
pub use storage::{DataDir, FsDataDir, MemDataDir};
