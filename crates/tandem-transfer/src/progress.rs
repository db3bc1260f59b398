use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::protocol::percent;

/// Progress of one visible transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub percent: f64,
    pub complete: bool,
}

/// Copy of the visible transfer set, keyed by file name.
pub type ProgressSnapshot = BTreeMap<String, TransferProgress>;

/// Identifies one registration of a name on the board.
///
/// Re-registering a name hands out a new ticket; updates carrying an older
/// ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// The visible progress set for one direction of transfer.
///
/// Observers read copies through [`ProgressBoard::snapshot`] or wait for
/// changes through [`ProgressBoard::subscribe`].
#[derive(Clone)]
pub struct ProgressBoard {
    inner: Arc<BoardInner>,
}

struct BoardInner {
    tx: watch::Sender<ProgressSnapshot>,
    /// file name -> ticket currently owning the entry
    owners: Mutex<HashMap<String, u64>>,
    next_ticket: AtomicU64,
}

impl ProgressBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::new());
        Self {
            inner: Arc::new(BoardInner {
                tx,
                owners: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.tx.subscribe()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tx.borrow().is_empty()
    }

    /// Add `name` at 0%, replacing any earlier entry with the same name.
    pub fn register(&self, name: &str, total: u64) -> Ticket {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut owners = self.owners();
        owners.insert(name.to_string(), ticket);
        self.inner.tx.send_modify(|set| {
            set.insert(
                name.to_string(),
                TransferProgress {
                    bytes_done: 0,
                    bytes_total: total,
                    percent: 0.0,
                    complete: false,
                },
            );
        });
        Ticket(ticket)
    }

    pub fn update(&self, name: &str, ticket: Ticket, bytes_done: u64) {
        let owners = self.owners();
        if owners.get(name) != Some(&ticket.0) {
            return;
        }
        self.inner.tx.send_modify(|set| {
            if let Some(entry) = set.get_mut(name) {
                entry.bytes_done = bytes_done;
                // 100 is reserved for complete()
                entry.percent = percent(bytes_done, entry.bytes_total).min(99.99);
            }
        });
    }

    /// Mark the entry finished at 100%.
    pub fn complete(&self, name: &str, ticket: Ticket) {
        let owners = self.owners();
        if owners.get(name) != Some(&ticket.0) {
            return;
        }
        self.inner.tx.send_modify(|set| {
            if let Some(entry) = set.get_mut(name) {
                entry.bytes_done = entry.bytes_done.max(entry.bytes_total);
                entry.percent = 100.0;
                entry.complete = true;
            }
        });
    }

    pub fn remove(&self, name: &str, ticket: Ticket) {
        let mut owners = self.owners();
        if owners.get(name) != Some(&ticket.0) {
            return;
        }
        owners.remove(name);
        self.inner.tx.send_modify(|set| {
            set.remove(name);
        });
    }

    /// Remove the entry once `delay` has passed, unless it was re-registered meanwhile.
    pub fn remove_after(&self, name: &str, ticket: Ticket, delay: Duration) {
        let board = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            board.remove(&name, ticket);
        });
    }

    pub fn clear(&self) {
        self.owners().clear();
        self.inner.tx.send_modify(|set| set.clear());
    }

    fn owners(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.inner.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}
