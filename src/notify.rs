//! Throttled change-notification fan-out.
//!
//! Messages are payload-free *anchors* ("the ranking may have changed"), not
//! data: consumers re-query current top-K on receipt. Each subscriber owns a
//! bounded queue; publishing never blocks: a full queue drops the message
//! for that subscriber, and a disconnected subscriber is unregistered. A
//! per-kind throttle collapses bursts into at most one delivery per window,
//! with a small flusher thread delivering the collapsed anchor in the next
//! slot.

use crossbeam::channel::{bounded, tick, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-subscriber queue capacity.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 32;
/// Default minimum spacing between deliveries of the same anchor kind.
const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// A payload-free change signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAnchor {
    /// A ranking may have changed; re-query top-K.
    Ranking,
    /// The document catalogue may have changed; re-query the listing.
    Documents,
}

impl ChangeAnchor {
    fn slot(self) -> usize {
        match self {
            ChangeAnchor::Ranking => 0,
            ChangeAnchor::Documents => 1,
        }
    }

    const KINDS: [ChangeAnchor; 2] = [ChangeAnchor::Ranking, ChangeAnchor::Documents];
}

struct Inner {
    subscribers: HashMap<u64, Sender<ChangeAnchor>>,
    next_id: u64,
    last_sent: [Option<Instant>; 2],
    pending: [bool; 2],
}

impl Inner {
    fn deliver(&mut self, anchor: ChangeAnchor) {
        let mut dead = Vec::new();
        for (&id, tx) in &self.subscribers {
            match tx.try_send(anchor) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow consumer: drop the message, keep the subscriber.
                    tracing::debug!(subscriber = id, ?anchor, "notify queue full; dropped");
                }
                Err(TrySendError::Disconnected(_)) => dead.push(id),
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
        self.last_sent[anchor.slot()] = Some(Instant::now());
        self.pending[anchor.slot()] = false;
    }

    fn throttled(&self, anchor: ChangeAnchor, throttle: Duration) -> bool {
        match self.last_sent[anchor.slot()] {
            Some(at) => at.elapsed() < throttle,
            None => false,
        }
    }
}

/// Fan-out hub for change anchors.
pub struct NotifyHub {
    inner: Arc<Mutex<Inner>>,
    throttle: Duration,
    quit: Sender<()>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl NotifyHub {
    /// Create a hub with the default 100 ms throttle.
    pub fn new() -> Self {
        Self::with_throttle(DEFAULT_THROTTLE)
    }

    /// Create a hub with an explicit throttle window.
    pub fn with_throttle(throttle: Duration) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            subscribers: HashMap::new(),
            next_id: 0,
            last_sent: [None; 2],
            pending: [false; 2],
        }));
        let (quit, quit_rx) = bounded(1);
        let flusher_inner = inner.clone();
        let ticker = tick(throttle.max(Duration::from_millis(1)));
        let handle = std::thread::Builder::new()
            .name("notify-flusher".into())
            .spawn(move || loop {
                crossbeam::channel::select! {
                    recv(quit_rx) -> _ => return,
                    recv(ticker) -> _ => {
                        let mut inner = flusher_inner.lock();
                        for anchor in ChangeAnchor::KINDS {
                            if inner.pending[anchor.slot()]
                                && !inner.throttled(anchor, throttle)
                            {
                                inner.deliver(anchor);
                            }
                        }
                    }
                }
            })
            .expect("spawn notify flusher");
        Self {
            inner,
            throttle,
            quit,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Register a subscriber with a bounded queue.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Publish an anchor. Non-blocking: within the throttle window the
    /// anchor is marked pending and delivered in the next slot.
    pub fn publish(&self, anchor: ChangeAnchor) {
        let mut inner = self.inner.lock();
        if inner.throttled(anchor, self.throttle) {
            inner.pending[anchor.slot()] = true;
        } else {
            inner.deliver(anchor);
        }
    }

    /// Stop the flusher thread. Subscribers keep whatever is queued.
    pub fn shutdown(&self) {
        let _ = self.quit.send(());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotifyHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A registered subscriber's receiving half.
///
/// Dropping (or `close`-ing) the subscription unregisters it: the hub
/// removes disconnected subscribers on the next delivery.
pub struct Subscription {
    id: u64,
    rx: Receiver<ChangeAnchor>,
    inner: std::sync::Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Block until the next anchor, or `None` once the hub is gone.
    pub fn recv(&self) -> Option<ChangeAnchor> {
        self.rx.recv().ok()
    }

    /// Block with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeAnchor> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll.
    pub fn try_recv(&self) -> Option<ChangeAnchor> {
        match self.rx.try_recv() {
            Ok(anchor) => Some(anchor),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Unregister from the hub immediately.
    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().subscribers.remove(&self.id);
        }
    }
}
