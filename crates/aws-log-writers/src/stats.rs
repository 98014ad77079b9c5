// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writer statistics and the registry that exposes them to monitoring.
//!
//! Each writer owns one [`WriterStatistics`]. Counters are updated by the
//! writer task and may be read from any thread at any time. A
//! [`StatisticsRegistry`] is an explicit, shareable index of the statistics of
//! live writers: writers register when they start and unregister when they
//! stop, so monitoring code only ever sees running writers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub message: String,
    pub timestamp: SystemTime,
}

/// Counters describing one writer.
#[derive(Debug, Default)]
pub struct WriterStatistics {
    destination: Mutex<String>,
    messages_sent: AtomicU64,
    messages_requeued: AtomicU64,
    messages_discarded: AtomicU64,
    last_batch_size: AtomicUsize,
    throttle_count: AtomicU64,
    oldest_sent_timestamp: AtomicI64,
    newest_sent_timestamp: AtomicI64,
    last_error: Mutex<Option<LastError>>,
}

impl WriterStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a batch handed to the destination, of which `failed` messages
    /// were returned for another attempt.
    pub fn record_batch_sent(&self, batch: &[Message], failed: usize) {
        let delivered = batch.len().saturating_sub(failed);
        self.messages_sent.fetch_add(delivered as u64, Ordering::Relaxed);
        self.last_batch_size.store(batch.len(), Ordering::Relaxed);
        if let Some(oldest) = batch.iter().map(Message::timestamp).min() {
            self.oldest_sent_timestamp.store(oldest, Ordering::Relaxed);
        }
        if let Some(newest) = batch.iter().map(Message::timestamp).max() {
            self.newest_sent_timestamp.store(newest, Ordering::Relaxed);
        }
    }

    pub fn record_requeued(&self, count: usize) {
        self.messages_requeued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttle_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Mirrors the queue's running discard total.
    pub fn update_messages_discarded(&self, total: u64) {
        self.messages_discarded.store(total, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        *lock(&self.last_error) = Some(LastError {
            message: message.into(),
            timestamp: SystemTime::now(),
        });
    }

    pub fn set_destination(&self, destination: impl Into<String>) {
        *lock(&self.destination) = destination.into();
    }

    pub fn destination(&self) -> String {
        lock(&self.destination).clone()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_requeued(&self) -> u64 {
        self.messages_requeued.load(Ordering::Relaxed)
    }

    pub fn messages_discarded(&self) -> u64 {
        self.messages_discarded.load(Ordering::Relaxed)
    }

    pub fn last_batch_size(&self) -> usize {
        self.last_batch_size.load(Ordering::Relaxed)
    }

    pub fn throttle_count(&self) -> u64 {
        self.throttle_count.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<LastError> {
        lock(&self.last_error).clone()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            destination: self.destination(),
            messages_sent: self.messages_sent(),
            messages_requeued: self.messages_requeued(),
            messages_discarded: self.messages_discarded(),
            last_batch_size: self.last_batch_size(),
            throttle_count: self.throttle_count(),
            oldest_sent_timestamp: self.oldest_sent_timestamp.load(Ordering::Relaxed),
            newest_sent_timestamp: self.newest_sent_timestamp.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }
}

/// Point-in-time copy of [`WriterStatistics`], serializable for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub destination: String,
    pub messages_sent: u64,
    pub messages_requeued: u64,
    pub messages_discarded: u64,
    pub last_batch_size: usize,
    pub throttle_count: u64,
    pub oldest_sent_timestamp: i64,
    pub newest_sent_timestamp: i64,
    pub last_error: Option<LastError>,
}

/// Explicit index of live writer statistics, keyed by appender name.
#[derive(Debug, Default)]
pub struct StatisticsRegistry {
    entries: Mutex<BTreeMap<String, Arc<WriterStatistics>>>,
}

impl StatisticsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any statistics already registered under `name`.
    pub fn register(&self, name: &str, statistics: Arc<WriterStatistics>) {
        lock(&self.entries).insert(name.to_string(), statistics);
    }

    /// Removes `name` only if it still refers to `statistics`, so a writer that
    /// was replaced by a newer one cannot unregister its successor.
    pub fn unregister(&self, name: &str, statistics: &Arc<WriterStatistics>) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get(name) {
            Some(current) if Arc::ptr_eq(current, statistics) => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WriterStatistics>> {
        lock(&self.entries).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, StatisticsSnapshot> {
        lock(&self.entries)
            .iter()
            .map(|(name, statistics)| (name.clone(), statistics.snapshot()))
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    #[allow(clippy::expect_used)]
    mutex.lock().expect("lock poisoned")
}
