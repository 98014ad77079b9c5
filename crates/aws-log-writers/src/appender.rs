// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Glue between a logging front end and a [`LogWriter`].
//!
//! An [`Appender`] owns the writer configuration and knows how to build a
//! facade. The writer is created lazily on the first message, so nothing
//! talks to AWS until there is something to send.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::WriterConfig;
use crate::error::ClientError;
use crate::facade::Facade;
use crate::message::{truncate_to_char_boundary, Message};
use crate::queue::DiscardAction;
use crate::stats::{StatisticsRegistry, WriterStatistics};
use crate::writer::{LogWriter, WriterState};

/// Builds the facade for each new writer.
pub trait FacadeBuilder: Send + Sync {
    fn build(&self, stats: Arc<WriterStatistics>) -> Result<Box<dyn Facade>, ClientError>;
}

impl<F> FacadeBuilder for F
where
    F: Fn(Arc<WriterStatistics>) -> Result<Box<dyn Facade>, ClientError> + Send + Sync,
{
    fn build(&self, stats: Arc<WriterStatistics>) -> Result<Box<dyn Facade>, ClientError> {
        self(stats)
    }
}

pub struct Appender {
    name: String,
    /// Remembers hot-reloaded values for the next writer.
    config: RwLock<WriterConfig>,
    builder: Box<dyn FacadeBuilder>,
    runtime: Handle,
    registry: Option<Arc<StatisticsRegistry>>,
    writer: RwLock<Option<Arc<LogWriter>>>,
    closed: AtomicBool,
    build_failed: AtomicBool,
    dropped: AtomicU64,
}

impl Appender {
    pub fn new(
        name: impl Into<String>,
        config: WriterConfig,
        builder: impl FacadeBuilder + 'static,
        runtime: Handle,
    ) -> Self {
        Appender {
            name: name.into(),
            config: RwLock::new(config),
            builder: Box::new(builder),
            runtime,
            registry: None,
            writer: RwLock::new(None),
            closed: AtomicBool::new(false),
            build_failed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers every writer this appender starts under its name.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<StatisticsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a log line. Never blocks on the destination.
    pub fn append(&self, timestamp: i64, text: impl Into<String>) {
        if self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(writer) = self.current_writer() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // A writer that never initialized will never send
        if writer.state() == WriterState::Stopped && !writer.is_initialized() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut text = text.into();
        let max_size = writer.max_message_size();
        if text.len() > max_size {
            if !read(&self.config).truncate_oversize_messages {
                warn!(
                    "APPENDER | Discarding message of {} bytes, limit for {} is {}",
                    text.len(),
                    writer.destination_name(),
                    max_size
                );
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let keep = truncate_to_char_boundary(&text, max_size).len();
            text.truncate(keep);
        }

        writer.add_message(Message::new(timestamp, text));
    }

    /// Waits for the current writer's destination. Starts the writer if no
    /// message has been appended yet.
    pub async fn wait_until_initialized(&self) -> bool {
        let timeout = read(&self.config).initialization_timeout();
        match self.current_writer() {
            Some(writer) => writer.wait_until_initialized(timeout).await,
            None => false,
        }
    }

    /// Stops the writer after a final flush; returns false if it did not
    /// finish within the configured shutdown timeout.
    pub async fn close(&self) -> bool {
        self.closed.store(true, Ordering::Release);
        let Some(writer) = write(&self.writer).take() else {
            return true;
        };
        writer.stop();
        let timeout = read(&self.config).shutdown_timeout();
        let stopped = writer.wait_until_stopped(timeout).await;
        if !stopped {
            warn!(
                "APPENDER | Writer for {} did not stop within {:?}",
                writer.destination_name(),
                timeout
            );
        }
        stopped
    }

    /// Stops the current writer; the next message starts a fresh one.
    pub fn rotate(&self) {
        if let Some(writer) = write(&self.writer).take() {
            debug!("APPENDER | Rotating writer for {}", writer.destination_name());
            writer.stop();
        }
    }

    pub fn set_batch_delay(&self, delay: Duration) {
        write(&self.config).batch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if let Some(writer) = read(&self.writer).as_ref() {
            writer.set_batch_delay(delay);
        }
    }

    pub fn set_discard_threshold(&self, threshold: usize) {
        write(&self.config).discard_threshold = threshold;
        if let Some(writer) = read(&self.writer).as_ref() {
            writer.set_discard_threshold(threshold);
        }
    }

    pub fn set_discard_action(&self, action: DiscardAction) {
        write(&self.config).discard_action = action;
        if let Some(writer) = read(&self.writer).as_ref() {
            writer.set_discard_action(action);
        }
    }

    pub fn config(&self) -> WriterConfig {
        read(&self.config).clone()
    }

    pub fn statistics(&self) -> Option<Arc<WriterStatistics>> {
        read(&self.writer).as_ref().map(|writer| writer.statistics())
    }

    /// Messages refused by the appender itself (oversize, closed, no writer).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn current_writer(&self) -> Option<Arc<LogWriter>> {
        if let Some(writer) = read(&self.writer).as_ref() {
            return Some(Arc::clone(writer));
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        // Built without holding the slot lock
        let writer = self.build_writer()?;

        let mut slot = write(&self.writer);
        if let Some(existing) = slot.as_ref() {
            // Another producer installed one first; ours was never started
            return Some(Arc::clone(existing));
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        writer.start_on(&self.runtime);
        debug!(
            "APPENDER | Started writer for {} ({})",
            self.name,
            writer.destination_name()
        );

        let writer = Arc::new(writer);
        *slot = Some(Arc::clone(&writer));
        Some(writer)
    }

    fn build_writer(&self) -> Option<LogWriter> {
        let stats = Arc::new(WriterStatistics::new());
        let facade = match self.builder.build(Arc::clone(&stats)) {
            Ok(facade) => facade,
            Err(e) => {
                // Only the first failure is worth reporting
                if !self.build_failed.swap(true, Ordering::Relaxed) {
                    error!("APPENDER | Unable to create writer for {}: {}", self.name, e);
                }
                return None;
            }
        };

        let config = read(&self.config).clone();
        let mut writer = LogWriter::new(&config, facade, stats);
        if let Some(registry) = &self.registry {
            writer = writer.with_registry(Arc::clone(registry), self.name.clone());
        }
        Some(writer)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    #[allow(clippy::expect_used)]
    lock.read().expect("lock poisoned")
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    #[allow(clippy::expect_used)]
    lock.write().expect("lock poisoned")
}
