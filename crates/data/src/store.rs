//! Append-only event journal.
//!
//! `record` returns only after the event is durable. Current order state is
//! never stored separately: it is the fold of all order records in sequence
//! order, so replaying the journal reproduces exactly what was acknowledged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use oi_strangle_core::{Order, OrderKey};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::event::{Event, EventRecord};

/// Durable journal the coordinator writes every transition to.
pub trait EventStore: Send + Sync {
    /// Appends `event` and returns its sequence number once durable.
    ///
    /// # Errors
    ///
    /// Returns an error when the record could not be made durable. Callers
    /// must treat that as fatal.
    fn record(&self, event: Event) -> Result<u64, StoreError>;

    /// Every record in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal cannot be read.
    fn records(&self) -> Result<Vec<EventRecord>, StoreError>;

    /// Latest state of one order leg.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal cannot be read.
    fn latest_state(&self, key: &OrderKey) -> Result<Option<Order>, StoreError> {
        Ok(fold_orders(&self.records()?).remove(key))
    }

    /// Latest state of every order leg that has not reached a terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal cannot be read.
    fn snapshot(&self) -> Result<Vec<Order>, StoreError> {
        Ok(fold_orders(&self.records()?)
            .into_values()
            .filter(|order| !order.status.is_terminal())
            .collect())
    }
}

/// Folds order records into the latest state per key.
///
/// Each folded order carries the sequence number of the record it came from.
#[must_use]
pub fn fold_orders(records: &[EventRecord]) -> BTreeMap<OrderKey, Order> {
    let mut sorted: Vec<&EventRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.seq);

    let mut latest = BTreeMap::new();
    for record in sorted {
        if let Event::OrderTransition(order) = &record.event {
            let mut order = order.clone();
            order.sequence_no = record.seq;
            latest.insert(order.key(), order);
        }
    }
    latest
}

// =============================================================================
// In-memory journal
// =============================================================================

#[derive(Debug)]
struct MemoryJournal {
    records: Vec<EventRecord>,
    next_seq: u64,
}

/// Journal held in memory, for tests and backtests.
#[derive(Debug)]
pub struct MemoryStore {
    symbol: String,
    journal: Mutex<MemoryJournal>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            journal: Mutex::new(MemoryJournal {
                records: Vec::new(),
                next_seq: 1,
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Seeds the journal with existing records, e.g. a truncated log.
    #[must_use]
    pub fn with_records(symbol: impl Into<String>, records: Vec<EventRecord>) -> Self {
        let next_seq = records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;
        Self {
            symbol: symbol.into(),
            journal: Mutex::new(MemoryJournal { records, next_seq }),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every later write fail with [`StoreError::Injected`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.journal.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryStore {
    fn record(&self, event: Event) -> Result<u64, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Injected);
        }
        let mut journal = self.journal.lock();
        let seq = journal.next_seq;
        journal.next_seq += 1;
        journal.records.push(EventRecord {
            seq,
            recorded_at: Utc::now(),
            symbol: self.symbol.clone(),
            event,
        });
        Ok(seq)
    }

    fn records(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.journal.lock().records.clone())
    }
}
