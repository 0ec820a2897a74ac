//! Append-only store of captured events.
//!
//! Events are partitioned by `(outcome, type tag)`. Each partition keeps
//! arrival order. Writers and readers only ever hold a lock for one push or one
//! `Arc` clone of the partition, so the bridge consumer and any number of
//! waiters never block each other for longer than that.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{CapturedEvent, Outcome, TypeTag, captured_event::Capture};

pub type PartitionKey = (Outcome, TypeTag);

/// Events of one `(outcome, type tag)` key, in arrival order.
pub type Snapshot = Vec<Arc<CapturedEvent>>;

#[derive(Debug, Default)]
struct Partition {
    events: RwLock<Snapshot>,
}

/// Type-partitioned, time-ordered log of captured events.
///
/// The log is written by the [`Interceptor`](crate::Interceptor) and shared
/// read-only with the [`WaitEngine`](crate::WaitEngine). Entries are never
/// removed while the owning [`Wiretap`](crate::Wiretap) runs.
#[derive(Debug, Default)]
pub struct EventLog {
    partitions: RwLock<HashMap<PartitionKey, Arc<Partition>>>,
    sequence: AtomicU64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, outcome: Outcome, type_tag: &TypeTag) -> Arc<Partition> {
        let key = (outcome, type_tag.clone());
        {
            let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(partition) = partitions.get(&key) {
                return partition.clone();
            }
        }
        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        partitions.entry(key).or_default().clone()
    }

    /// Stamp and append a capture. Never fails.
    ///
    /// The sequence number and timestamp are taken while the partition is
    /// locked, which keeps each partition ordered by both.
    pub(crate) fn append(&self, capture: Capture) -> Arc<CapturedEvent> {
        let partition = self.partition(capture.outcome, &capture.type_tag);
        let mut events = partition
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(capture.stamp(sequence));
        events.push(event.clone());
        event
    }

    /// Returns every event recorded so far for the key, oldest first.
    ///
    /// Anything appended before this call started is included.
    pub fn scan(&self, outcome: Outcome, type_tag: &TypeTag) -> Snapshot {
        let partition = {
            let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
            match partitions.get(&(outcome, type_tag.clone())) {
                Some(partition) => partition.clone(),
                None => return Vec::new(),
            }
        };
        partition
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events recorded for the key.
    pub fn count(&self, outcome: Outcome, type_tag: &TypeTag) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .get(&(outcome, type_tag.clone()))
            .map(|p| p.events.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Total number of events across all partitions.
    pub fn len(&self) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .values()
            .map(|p| p.events.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that have at least one event.
    pub fn keys(&self) -> Vec<PartitionKey> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = partitions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Discard everything. Called when the owning system shuts down.
    pub(crate) fn clear(&self) {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
