// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Multi-producer, single-consumer message queue with a discard policy.
//!
//! Application threads push log messages at the tail without ever blocking;
//! the writer task pops from the head, waiting up to a timeout when the queue
//! is empty. Messages that failed to send are pushed back at the head so they
//! are the next to be retried.
//!
//! # Occupancy
//!
//! The queue keeps an occupancy counter next to the deque so that `size()`
//! can be read without taking the lock. The counter is updated after the
//! deque mutation, so a lock-free reader can observe it one step behind an
//! in-flight mutation. Mutations are serialized by the deque lock, which bounds
//! the divergence to one message.
//!
//! # Discard policy
//!
//! After every enqueue or requeue, while occupancy exceeds the threshold, the
//! configured end of the queue is trimmed:
//!
//! ```text
//!   oldest:  [m1 m2 m3 ... mN]  ->  pop head until size <= threshold
//!   newest:  [m1 m2 m3 ... mN]  ->  pop tail until size <= threshold
//!   none:    never discard
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::error::ConfigError;
use crate::message::Message;

/// Which end of the queue is trimmed once the discard threshold is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardAction {
    None,
    #[default]
    Oldest,
    Newest,
}

impl DiscardAction {
    fn as_u8(self) -> u8 {
        match self {
            DiscardAction::None => 0,
            DiscardAction::Oldest => 1,
            DiscardAction::Newest => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => DiscardAction::Oldest,
            2 => DiscardAction::Newest,
            _ => DiscardAction::None,
        }
    }
}

impl FromStr for DiscardAction {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(DiscardAction::None),
            "oldest" => Ok(DiscardAction::Oldest),
            "newest" => Ok(DiscardAction::Newest),
            _ => Err(ConfigError::InvalidDiscardAction(value.to_string())),
        }
    }
}

impl fmt::Display for DiscardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscardAction::None => "none",
            DiscardAction::Oldest => "oldest",
            DiscardAction::Newest => "newest",
        };
        f.write_str(name)
    }
}

/// Blocking double-ended queue shared by log producers and the writer task.
pub struct MessageQueue {
    /// Pending messages, head is the next to send.
    messages: Mutex<VecDeque<Message>>,
    /// Approximate occupancy, readable without the lock.
    size: AtomicUsize,
    /// Hot-reloadable.
    discard_threshold: AtomicUsize,
    /// Hot-reloadable, stored as [`DiscardAction::as_u8`].
    discard_action: AtomicU8,
    /// Total messages dropped by the discard policy.
    discarded: AtomicU64,
    /// Wakes the consumer when a message is pushed.
    available: Notify,
}

impl MessageQueue {
    #[must_use]
    pub fn new(discard_threshold: usize, discard_action: DiscardAction) -> Self {
        MessageQueue {
            messages: Mutex::new(VecDeque::new()),
            size: AtomicUsize::new(0),
            discard_threshold: AtomicUsize::new(discard_threshold),
            discard_action: AtomicU8::new(discard_action.as_u8()),
            discarded: AtomicU64::new(0),
            available: Notify::new(),
        }
    }

    /// Appends a message at the tail. Never blocks and never fails.
    pub fn enqueue(&self, message: Message) {
        let mut messages = self.lock();
        messages.push_back(message);
        self.size.fetch_add(1, Ordering::AcqRel);
        self.apply_discard_policy(&mut messages);
        drop(messages);
        self.available.notify_one();
    }

    /// Pushes a message back at the head, ahead of everything queued.
    ///
    /// To put back a whole batch without reordering it, requeue it in reverse.
    pub fn requeue(&self, message: Message) {
        let mut messages = self.lock();
        messages.push_front(message);
        self.size.fetch_add(1, Ordering::AcqRel);
        self.apply_discard_policy(&mut messages);
        drop(messages);
        self.available.notify_one();
    }

    /// Pops the head message, waiting up to `timeout` for one to arrive.
    ///
    /// `Duration::ZERO` is a non-blocking poll. Returns `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Message> {
        self.dequeue_until(Instant::now().checked_add(timeout)).await
    }

    /// Pops the head message, waiting until `deadline` (forever when `None`).
    pub async fn dequeue_until(&self, deadline: Option<Instant>) -> Option<Message> {
        loop {
            // Register interest before checking so a push between the check
            // and the wait still wakes us.
            let notified = self.available.notified();
            if let Some(message) = self.try_dequeue() {
                return Some(message);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_dequeue();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pops the head message if there is one.
    pub fn try_dequeue(&self) -> Option<Message> {
        let mut messages = self.lock();
        let message = messages.pop_front()?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(message)
    }

    /// Removes and returns every queued message, head first.
    pub fn drain(&self) -> Vec<Message> {
        let mut messages = self.lock();
        let drained: Vec<Message> = messages.drain(..).collect();
        self.size.fetch_sub(drained.len(), Ordering::AcqRel);
        drained
    }

    /// Point-in-time check; only a heuristic while producers are active.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Approximate number of queued messages.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn discard_threshold(&self) -> usize {
        self.discard_threshold.load(Ordering::Relaxed)
    }

    /// Takes effect on the next enqueue or requeue.
    pub fn set_discard_threshold(&self, threshold: usize) {
        self.discard_threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn discard_action(&self) -> DiscardAction {
        DiscardAction::from_u8(self.discard_action.load(Ordering::Relaxed))
    }

    /// Takes effect on the next enqueue or requeue.
    pub fn set_discard_action(&self, action: DiscardAction) {
        self.discard_action.store(action.as_u8(), Ordering::Relaxed);
    }

    fn apply_discard_policy(&self, messages: &mut VecDeque<Message>) {
        let action = self.discard_action();
        if action == DiscardAction::None {
            return;
        }
        let threshold = self.discard_threshold();
        let mut dropped = 0u64;
        while self.size.load(Ordering::Acquire) > threshold {
            let removed = match action {
                DiscardAction::Oldest => messages.pop_front(),
                DiscardAction::Newest => messages.pop_back(),
                DiscardAction::None => None,
            };
            if removed.is_none() {
                break;
            }
            self.size.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
        if dropped > 0 {
            let total = self.discarded.fetch_add(dropped, Ordering::Relaxed) + dropped;
            // The first discard and every thousandth after it are reported
            if total == dropped || total / 1000 != (total - dropped) / 1000 {
                warn!(
                    "QUEUE | Discarded {dropped} {action} message(s) above {threshold} ({total} so far)"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        #[allow(clippy::expect_used)]
        self.messages.lock().expect("lock poisoned")
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("size", &self.size())
            .field("discard_threshold", &self.discard_threshold())
            .field("discard_action", &self.discard_action())
            .field("discarded", &self.discarded_count())
            .finish()
    }
}
