// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous batching log writer.
//!
//! Producers call [`LogWriter::add_message`], which only touches the queue
//! and never blocks. A single background task owns the [`Facade`]: it waits
//! for a first message, takes what else is already queued as long as the
//! destination's limits allow, sends the batch, and puts back whatever the
//! destination did not accept.
//!
//! Lifecycle: `Created -> Initializing -> Running -> Stopping -> Stopped`.
//! Initialization fails closed: if the destination cannot be made available
//! the writer goes straight to `Stopped` without sending anything.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WriterConfig;
use crate::error::FacadeErrorKind;
use crate::facade::Facade;
use crate::message::Message;
use crate::queue::{DiscardAction, MessageQueue};
use crate::retry::{Attempt, RetryManager};
use crate::stats::{StatisticsRegistry, WriterStatistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

struct Registration {
    registry: Arc<StatisticsRegistry>,
    name: String,
}

/// State shared between the writer handle and its background task.
struct Shared {
    queue: MessageQueue,
    stats: Arc<WriterStatistics>,
    /// Hot-reloadable.
    batch_delay_ms: AtomicU64,
    /// Set once by `stop`; the task drains until the queue is empty or this passes.
    shutdown_deadline: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    state: watch::Sender<WriterState>,
    initialized: AtomicBool,
    send_retry: RetryManager,
    send_retry_timeout: Duration,
}

pub struct LogWriter {
    shared: Arc<Shared>,
    /// Moved into the background task by `start`.
    facade: Mutex<Option<Box<dyn Facade>>>,
    registration: Mutex<Option<Registration>>,
    destination: String,
    max_message_size: usize,
}

impl LogWriter {
    pub fn new(
        config: &WriterConfig,
        facade: Box<dyn Facade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(WriterState::Created);
        let destination = facade.destination_name();
        let max_message_size = facade.max_message_size();

        let shared = Shared {
            queue: MessageQueue::new(config.discard_threshold, config.discard_action),
            stats,
            batch_delay_ms: AtomicU64::new(config.batch_delay_ms),
            shutdown_deadline: Mutex::new(None),
            send_retry: RetryManager::new(
                config.send_retry_base_delay(),
                config.send_retry_backoff,
            )
            .with_cancellation(cancel.clone()),
            send_retry_timeout: config.send_retry_timeout(),
            cancel,
            state,
            initialized: AtomicBool::new(false),
        };

        LogWriter {
            shared: Arc::new(shared),
            facade: Mutex::new(Some(facade)),
            registration: Mutex::new(None),
            destination,
            max_message_size,
        }
    }

    /// Publishes this writer's statistics under `name` while it runs.
    #[must_use]
    pub fn with_registry(self, registry: Arc<StatisticsRegistry>, name: impl Into<String>) -> Self {
        *lock(&self.registration) = Some(Registration {
            registry,
            name: name.into(),
        });
        self
    }

    /// Starts the background task on the current tokio runtime.
    pub fn start(&self) {
        match Handle::try_current() {
            Ok(handle) => self.start_on(&handle),
            Err(e) => {
                error!("WRITER | Cannot start writer for {}: {}", self.destination, e);
                self.stop();
            }
        }
    }

    /// Starts the background task on `handle`. Only the first call has any effect.
    pub fn start_on(&self, handle: &Handle) {
        if self.state() != WriterState::Created {
            return;
        }
        let Some(facade) = lock(&self.facade).take() else {
            return;
        };
        let registration = lock(&self.registration).take();
        let shared = Arc::clone(&self.shared);
        handle.spawn(run(shared, facade, registration));
    }

    /// Queues a message for delivery. Never blocks.
    pub fn add_message(&self, message: Message) {
        self.shared.queue.enqueue(message);
        self.shared
            .stats
            .update_messages_discarded(self.shared.queue.discarded_count());
    }

    /// Asks the writer to finish: whatever can be sent within one batch delay
    /// is sent, then the writer stops. An in-flight send is not interrupted.
    pub fn stop(&self) {
        {
            let mut deadline = lock(&self.shared.shutdown_deadline);
            if deadline.is_none() {
                *deadline = Some(deadline_after(self.shared.batch_delay()));
            }
        }

        let mut never_started = false;
        self.shared.state.send_modify(|state| match *state {
            WriterState::Created => {
                *state = WriterState::Stopped;
                never_started = true;
            }
            WriterState::Initializing | WriterState::Running => *state = WriterState::Stopping,
            WriterState::Stopping | WriterState::Stopped => {}
        });
        if never_started {
            lock(&self.facade).take();
            debug!("WRITER | Writer for {} stopped before starting", self.destination);
        }

        self.shared.cancel.cancel();
    }

    /// Waits until the destination is available. Returns false if the writer
    /// failed to initialize or `timeout` elapsed first.
    pub async fn wait_until_initialized(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.subscribe();
        let _ = tokio::time::timeout(
            timeout,
            state.wait_for(|state| {
                *state == WriterState::Stopped || shared.initialized.load(Ordering::Acquire)
            }),
        )
        .await;
        shared.initialized.load(Ordering::Acquire)
    }

    /// Waits for the background task to finish. Returns false on timeout.
    pub async fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.subscribe();
        // Bound first so the borrow of `state` ends before it is dropped
        let stopped = matches!(
            tokio::time::timeout(timeout, state.wait_for(|s| *s == WriterState::Stopped)).await,
            Ok(Ok(_))
        );
        stopped
    }

    /// Takes effect from the next batch.
    pub fn set_batch_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.batch_delay_ms.store(millis, Ordering::Relaxed);
    }

    pub fn set_discard_threshold(&self, threshold: usize) {
        self.shared.queue.set_discard_threshold(threshold);
    }

    pub fn set_discard_action(&self, action: DiscardAction) {
        self.shared.queue.set_discard_action(action);
    }

    pub fn batch_delay(&self) -> Duration {
        self.shared.batch_delay()
    }

    pub fn state(&self) -> WriterState {
        *self.shared.state.borrow()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn statistics(&self) -> Arc<WriterStatistics> {
        Arc::clone(&self.shared.stats)
    }

    /// Approximate number of messages waiting to be sent.
    pub fn queue_size(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn destination_name(&self) -> &str {
        &self.destination
    }

    /// Largest message text the destination accepts.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("destination", &self.destination)
            .field("state", &self.state())
            .field("queue_size", &self.queue_size())
            .finish_non_exhaustive()
    }
}

async fn run(shared: Arc<Shared>, facade: Box<dyn Facade>, registration: Option<Registration>) {
    let facade = facade.as_ref();
    let destination = facade.destination_name();

    let mut initializing = false;
    shared.state.send_if_modified(|state| {
        initializing = *state == WriterState::Created;
        if initializing {
            *state = WriterState::Initializing;
        }
        initializing
    });
    if !initializing {
        facade.shutdown().await;
        return;
    }

    if let Some(registration) = &registration {
        registration
            .registry
            .register(&registration.name, Arc::clone(&shared.stats));
    }

    if facade.ensure_destination_available().await {
        shared.initialized.store(true, Ordering::Release);
        shared.state.send_modify(|state| {
            if *state == WriterState::Initializing {
                *state = WriterState::Running;
            }
        });
        info!("WRITER | Writing to {}", destination);

        while !shared.should_exit() {
            let batch = shared.build_batch(facade).await;
            if !batch.is_empty() {
                shared.send_batch(facade, batch).await;
            }
        }

        let remaining = shared.queue.size();
        if remaining > 0 {
            warn!(
                "WRITER | Stopped with {} unsent messages for {}",
                remaining, destination
            );
        }
    } else {
        error!(
            "WRITER | Destination {} is not available, writer will not start",
            destination
        );
    }

    facade.shutdown().await;
    if let Some(registration) = &registration {
        registration
            .registry
            .unregister(&registration.name, &shared.stats);
    }
    shared
        .stats
        .update_messages_discarded(shared.queue.discarded_count());
    shared.state.send_replace(WriterState::Stopped);
    debug!("WRITER | Writer for {} stopped", destination);
}

impl Shared {
    fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms.load(Ordering::Relaxed))
    }

    fn shutdown_deadline(&self) -> Option<Instant> {
        *lock(&self.shutdown_deadline)
    }

    fn should_exit(&self) -> bool {
        match self.shutdown_deadline() {
            Some(deadline) => self.queue.is_empty() || Instant::now() >= deadline,
            None => false,
        }
    }

    async fn wait_for_first_message(&self) -> Option<Message> {
        loop {
            // Once stopping, only what is already queued gets sent
            if self.shutdown_deadline().is_some() {
                return self.queue.try_dequeue();
            }
            tokio::select! {
                message = self.queue.dequeue_until(None) => return message,
                // stop() sets the deadline before cancelling
                () = self.cancel.cancelled() => {}
            }
        }
    }

    /// Waits for a first message, then keeps taking queued messages until the
    /// queue runs dry or one of the batch limits is hit. The batch delay caps
    /// how long a busy queue can keep one batch open.
    async fn build_batch(&self, facade: &dyn Facade) -> Vec<Message> {
        let mut batch = Vec::new();
        let mut batch_bytes = 0;

        let mut next = self.wait_for_first_message().await;
        let batch_deadline = deadline_after(self.batch_delay());

        while let Some(message) = next {
            let size = facade.effective_size(&message);
            if message.size() > facade.max_message_size() || !facade.within_service_limits(size, 1)
            {
                warn!(
                    "WRITER | Dropping message of {} bytes, too large for {}",
                    size,
                    facade.destination_name()
                );
            } else if facade.within_service_limits(batch_bytes + size, batch.len() + 1) {
                batch_bytes += size;
                batch.push(message);
            } else {
                self.queue.requeue(message);
                break;
            }

            if Instant::now() >= batch_deadline {
                break;
            }
            next = self.queue.try_dequeue();
        }

        batch
    }

    async fn send_batch(&self, facade: &dyn Facade, batch: Vec<Message>) {
        let messages: &[Message] = &batch;
        let shared = self;

        let outcome = self
            .send_retry
            .invoke(self.send_retry_timeout, move || async move {
                match facade.send_batch(messages).await {
                    Ok(failed) => Attempt::Success(failed),
                    Err(e) => match e.kind {
                        FacadeErrorKind::Throttling => {
                            debug!("WRITER | Throttled by {}: {}", facade.destination_name(), e);
                            shared.stats.record_throttle();
                            Attempt::Retry
                        }
                        FacadeErrorKind::MissingDestination => {
                            warn!(
                                "WRITER | Destination {} is missing, recreating: {}",
                                facade.destination_name(),
                                e
                            );
                            if !facade.ensure_destination_available().await {
                                shared.stats.set_last_error(e.to_string());
                            }
                            Attempt::Retry
                        }
                        FacadeErrorKind::InvalidConfiguration | FacadeErrorKind::Other => {
                            error!(
                                "WRITER | Failed to send {} messages to {}: {}",
                                messages.len(),
                                facade.destination_name(),
                                e
                            );
                            shared.stats.set_last_error(e.to_string());
                            Attempt::Retry
                        }
                        FacadeErrorKind::Aborted => Attempt::Fatal(e),
                    },
                }
            })
            .await;

        match outcome {
            Ok(Some(failed)) => {
                self.stats.record_batch_sent(&batch, failed.len());
                if !failed.is_empty() {
                    debug!(
                        "WRITER | Requeueing {} of {} messages",
                        failed.len(),
                        batch.len()
                    );
                    self.requeue_all(failed);
                }
            }
            Ok(None) => {
                if !self.cancel.is_cancelled() {
                    warn!(
                        "WRITER | Unable to send {} messages within {:?}, requeueing",
                        batch.len(),
                        self.send_retry_timeout
                    );
                }
                self.requeue_all(batch);
            }
            Err(e) => {
                debug!("WRITER | Send aborted: {}", e);
                self.requeue_all(batch);
            }
        }

        self.stats
            .update_messages_discarded(self.queue.discarded_count());
    }

    /// Puts messages back at the head of the queue keeping their order.
    fn requeue_all(&self, messages: Vec<Message>) {
        self.stats.record_requeued(messages.len());
        for message in messages.into_iter().rev() {
            self.queue.requeue(message);
        }
    }
}

/// `now + delay`, saturating to a far future instant for unbounded delays.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly 30 years.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    #[allow(clippy::expect_used)]
    mutex.lock().expect("lock poisoned")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::FacadeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tracing_test::traced_test;

    /// Accepts everything unless told otherwise; counts limits by message.
    #[derive(Default)]
    struct StubFacade {
        available: bool,
        max_count: usize,
        max_size: usize,
        sent: Arc<Mutex<Vec<Vec<Message>>>>,
        errors: Arc<Mutex<VecDeque<FacadeErrorKind>>>,
        ensure_calls: Arc<AtomicU64>,
    }

    impl StubFacade {
        fn new() -> Self {
            StubFacade {
                available: true,
                max_count: 100,
                max_size: 1_000,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Facade for StubFacade {
        fn destination_name(&self) -> String {
            "stub".to_string()
        }

        async fn ensure_destination_available(&self) -> bool {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            self.available
        }

        async fn send_batch(&self, batch: &[Message]) -> Result<Vec<Message>, FacadeError> {
            if let Some(kind) = self.errors.lock().unwrap().pop_front() {
                return Err(FacadeError::new(kind, "scripted"));
            }
            self.sent.lock().unwrap().push(batch.to_vec());
            Ok(Vec::new())
        }

        fn effective_size(&self, message: &Message) -> usize {
            message.size()
        }

        fn within_service_limits(&self, bytes: usize, count: usize) -> bool {
            bytes <= self.max_size && count <= self.max_count
        }

        fn max_message_size(&self) -> usize {
            self.max_size
        }
    }

    fn config(batch_delay_ms: u64) -> WriterConfig {
        WriterConfig {
            batch_delay_ms,
            send_retry_base_delay_ms: 5,
            send_retry_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_sends_and_stops() {
        let facade = StubFacade::new();
        let sent = Arc::clone(&facade.sent);
        let writer = LogWriter::new(&config(20), Box::new(facade), Arc::default());
        assert_eq!(writer.state(), WriterState::Created);

        writer.start();
        assert!(writer.wait_until_initialized(WAIT).await);
        assert_eq!(writer.state(), WriterState::Running);

        writer.add_message(Message::new(1, "one"));
        writer.add_message(Message::new(2, "two"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        writer.stop();
        assert!(writer.wait_until_stopped(WAIT).await);

        let sent = sent.lock().unwrap();
        let all: Vec<&str> = sent.iter().flatten().map(Message::text).collect();
        assert_eq!(all, vec!["one", "two"]);
        assert_eq!(writer.statistics().messages_sent(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unavailable_destination_fails_closed() {
        let facade = StubFacade {
            available: false,
            ..StubFacade::new()
        };
        let sent = Arc::clone(&facade.sent);
        let writer = LogWriter::new(&config(20), Box::new(facade), Arc::default());
        writer.add_message(Message::new(1, "never sent"));

        writer.start();

        assert!(!writer.wait_until_initialized(WAIT).await);
        assert!(writer.wait_until_stopped(WAIT).await);
        assert!(sent.lock().unwrap().is_empty());
        assert!(logs_contain("writer will not start"));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let writer = LogWriter::new(&config(20), Box::new(StubFacade::new()), Arc::default());
        writer.stop();
        assert_eq!(writer.state(), WriterState::Stopped);

        writer.start();
        assert_eq!(writer.state(), WriterState::Stopped);
        assert!(!writer.wait_until_initialized(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_until_initialized_times_out() {
        let writer = LogWriter::new(&config(20), Box::new(StubFacade::new()), Arc::default());
        // Never started
        assert!(!writer.wait_until_initialized(Duration::from_millis(20)).await);
        assert!(!writer.wait_until_stopped(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_batches_respect_size_limit_and_drop_oversize() {
        let facade = StubFacade {
            max_size: 10,
            ..StubFacade::new()
        };
        let sent = Arc::clone(&facade.sent);
        let writer = LogWriter::new(&config(50), Box::new(facade), Arc::default());
        for text in ["aaaa", "bbbb", "this one is far too long", "cccc"] {
            writer.add_message(Message::new(0, text));
        }

        writer.start();
        assert!(writer.wait_until_initialized(WAIT).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.stop();
        assert!(writer.wait_until_stopped(WAIT).await);

        let sent = sent.lock().unwrap();
        for batch in sent.iter() {
            assert!(batch.iter().map(Message::size).sum::<usize>() <= 10);
        }
        let all: Vec<&str> = sent.iter().flatten().map(Message::text).collect();
        assert_eq!(all, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[tokio::test]
    async fn test_missing_destination_is_recreated() {
        let facade = StubFacade::new();
        facade
            .errors
            .lock()
            .unwrap()
            .push_back(FacadeErrorKind::MissingDestination);
        let ensure_calls = Arc::clone(&facade.ensure_calls);
        let sent = Arc::clone(&facade.sent);
        let writer = LogWriter::new(&config(10), Box::new(facade), Arc::default());

        writer.start();
        writer.add_message(Message::new(0, "x"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.stop();
        assert!(writer.wait_until_stopped(WAIT).await);

        assert_eq!(ensure_calls.load(Ordering::SeqCst), 2);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_other_errors_record_last_error() {
        let facade = StubFacade::new();
        facade
            .errors
            .lock()
            .unwrap()
            .push_back(FacadeErrorKind::Other);
        let writer = LogWriter::new(&config(10), Box::new(facade), Arc::default());

        writer.start();
        writer.add_message(Message::new(0, "x"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.stop();
        assert!(writer.wait_until_stopped(WAIT).await);

        let stats = writer.statistics();
        assert_eq!(stats.messages_sent(), 1);
        assert!(stats.last_error().unwrap().message.contains("scripted"));
        assert!(logs_contain("Failed to send 1 messages"));
    }

    #[tokio::test]
    async fn test_registry_tracks_running_writer() {
        let registry = Arc::new(StatisticsRegistry::new());
        let writer = LogWriter::new(&config(10), Box::new(StubFacade::new()), Arc::default())
            .with_registry(Arc::clone(&registry), "app");

        writer.start();
        assert!(writer.wait_until_initialized(WAIT).await);
        assert!(registry.get("app").is_some());

        writer.stop();
        assert!(writer.wait_until_stopped(WAIT).await);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unbounded_delay_has_a_deadline() {
        let deadline = deadline_after(Duration::from_millis(u64::MAX));
        assert!(deadline > Instant::now() + Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_hot_reload() {
        let writer = LogWriter::new(&config(10), Box::new(StubFacade::new()), Arc::default());
        writer.set_batch_delay(Duration::from_millis(250));
        writer.set_discard_threshold(2);
        writer.set_discard_action(DiscardAction::Newest);

        for i in 0..5 {
            writer.add_message(Message::new(i, "m"));
        }

        assert_eq!(writer.batch_delay(), Duration::from_millis(250));
        assert_eq!(writer.queue_size(), 2);
        assert_eq!(writer.statistics().messages_discarded(), 3);
    }
}
