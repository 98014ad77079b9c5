// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::CloudWatchConfig;
use crate::error::{FacadeError, FacadeErrorKind, ServiceError};
use crate::facade::{is_retryable_throttle, Facade};
use crate::message::Message;
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;

/// Bytes the service adds to every event when checking request size.
pub const EVENT_OVERHEAD: usize = 26;
pub const MAX_BATCH_BYTES: usize = 1_048_576;
/// Batches must contain strictly fewer events than this.
pub const MAX_BATCH_COUNT: usize = 10_000;
/// A single request may not span more than a day of timestamps.
pub const MAX_BATCH_SPAN_MILLIS: i64 = 24 * 60 * 60 * 1000;

const THROTTLING_CODES: [&str; 1] = ["ThrottlingException"];
const DEFAULT_CREATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CREATION_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLogEvent {
    pub timestamp: i64,
    pub message: String,
}

/// Indices of events the service accepted but did not store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectedLogEventsInfo {
    pub too_new_log_event_start_index: Option<usize>,
    pub too_old_log_event_end_index: Option<usize>,
    pub expired_log_event_end_index: Option<usize>,
}

/// The subset of the CloudWatch Logs API used by the facade.
#[async_trait]
pub trait CloudWatchLogsClient: Send + Sync {
    async fn log_group_exists(&self, log_group: &str) -> Result<bool, ServiceError>;

    async fn create_log_group(&self, log_group: &str) -> Result<(), ServiceError>;

    async fn put_retention_policy(&self, log_group: &str, days: u32) -> Result<(), ServiceError>;

    async fn log_stream_exists(&self, log_group: &str, log_stream: &str)
        -> Result<bool, ServiceError>;

    async fn create_log_stream(&self, log_group: &str, log_stream: &str)
        -> Result<(), ServiceError>;

    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        events: Vec<InputLogEvent>,
    ) -> Result<Option<RejectedLogEventsInfo>, ServiceError>;

    async fn shutdown(&self) {}
}

pub struct CloudWatchFacade {
    config: CloudWatchConfig,
    client: Arc<dyn CloudWatchLogsClient>,
    stats: Arc<WriterStatistics>,
    creation_timeout: Duration,
    retry: RetryManager,
}

impl CloudWatchFacade {
    pub fn new(
        config: CloudWatchConfig,
        client: Arc<dyn CloudWatchLogsClient>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        CloudWatchFacade {
            config,
            client,
            stats,
            creation_timeout: DEFAULT_CREATION_TIMEOUT,
            retry: RetryManager::linear(DEFAULT_CREATION_POLL),
        }
    }

    /// Bounds how long describe/create calls are retried while ensuring the
    /// destination, and how often they poll.
    #[must_use]
    pub fn with_creation_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.creation_timeout = timeout;
        self.retry = RetryManager::linear(poll);
        self
    }

    async fn describe<T, F, Fut>(&self, context: &str, operation: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        let result = self
            .retry
            .invoke_classified(self.creation_timeout, operation, |e| {
                is_retryable_throttle(e, &THROTTLING_CODES)
            })
            .await?;
        result.ok_or_else(|| {
            ServiceError::new(
                "Timeout",
                format!("{context} did not succeed within {:?}", self.creation_timeout),
            )
        })
    }

    async fn ensure_log_group(&self) -> Result<(), ServiceError> {
        let client = &*self.client;
        let group = self.config.log_group.as_str();

        let exists = self
            .describe("DescribeLogGroups", move || async move {
                client.log_group_exists(group).await.map(Some)
            })
            .await?;
        if exists {
            debug!("CLOUDWATCH | Log group {} exists", group);
            return Ok(());
        }

        if !self.config.auto_create {
            return Err(ServiceError::new(
                "ResourceNotFoundException",
                format!("log group {group} does not exist and auto-create is disabled"),
            ));
        }

        info!("CLOUDWATCH | Creating log group {}", group);
        match client.create_log_group(group).await {
            Ok(()) => {}
            Err(e) if e.is("ResourceAlreadyExistsException") => {
                debug!("CLOUDWATCH | Log group {} was created concurrently", group);
            }
            Err(e) => return Err(e),
        }

        self.describe("DescribeLogGroups", move || async move {
            client
                .log_group_exists(group)
                .await
                .map(|exists| exists.then_some(()))
        })
        .await?;

        if let Some(days) = self.config.retention_days {
            debug!("CLOUDWATCH | Setting retention of {} to {} days", group, days);
            client.put_retention_policy(group, days).await?;
        }
        Ok(())
    }

    async fn ensure_log_stream(&self) -> Result<(), ServiceError> {
        let client = &*self.client;
        let group = self.config.log_group.as_str();
        let stream = self.config.log_stream.as_str();

        let exists = self
            .describe("DescribeLogStreams", move || async move {
                client.log_stream_exists(group, stream).await.map(Some)
            })
            .await?;
        if exists {
            return Ok(());
        }

        info!("CLOUDWATCH | Creating log stream {}/{}", group, stream);
        match client.create_log_stream(group, stream).await {
            Ok(()) => {}
            Err(e) if e.is("ResourceAlreadyExistsException") => {}
            Err(e) => return Err(e),
        }

        self.describe("DescribeLogStreams", move || async move {
            client
                .log_stream_exists(group, stream)
                .await
                .map(|exists| exists.then_some(()))
        })
        .await
    }

    fn classify(&self, context: &str, error: ServiceError) -> FacadeError {
        let kind = if error.interrupted {
            FacadeErrorKind::Aborted
        } else if error.is("ThrottlingException") {
            FacadeErrorKind::Throttling
        } else if error.is("ResourceNotFoundException") {
            FacadeErrorKind::MissingDestination
        } else if error.is("InvalidParameterException") {
            FacadeErrorKind::InvalidConfiguration
        } else {
            FacadeErrorKind::Other
        };
        FacadeError::from_service(kind, context, error)
    }
}

#[async_trait]
impl Facade for CloudWatchFacade {
    fn destination_name(&self) -> String {
        format!("{}/{}", self.config.log_group, self.config.log_stream)
    }

    async fn ensure_destination_available(&self) -> bool {
        if let Err(e) = self.config.validate() {
            error!("CLOUDWATCH | Invalid configuration: {}", e);
            self.stats.set_last_error(e.to_string());
            return false;
        }

        let result = match self.ensure_log_group().await {
            Ok(()) => self.ensure_log_stream().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.stats.set_destination(self.destination_name());
                info!("CLOUDWATCH | Writing to {}", self.destination_name());
                true
            }
            Err(e) => {
                error!(
                    "CLOUDWATCH | Unable to configure {}: {}",
                    self.destination_name(),
                    e
                );
                self.stats.set_last_error(e.to_string());
                false
            }
        }
    }

    async fn send_batch(&self, batch: &[Message]) -> Result<Vec<Message>, FacadeError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted = batch.to_vec();
        sorted.sort_by_key(Message::timestamp);

        let first = sorted[0].timestamp();
        let in_window =
            sorted.partition_point(|m| m.timestamp().saturating_sub(first) < MAX_BATCH_SPAN_MILLIS);
        let deferred = sorted.split_off(in_window);
        if !deferred.is_empty() {
            debug!(
                "CLOUDWATCH | Deferring {} events outside the 24 hour batch window",
                deferred.len()
            );
        }

        let events = sorted
            .into_iter()
            .map(|m| InputLogEvent {
                timestamp: m.timestamp(),
                message: m.text().to_string(),
            })
            .collect();

        match self
            .client
            .put_log_events(&self.config.log_group, &self.config.log_stream, events)
            .await
        {
            Ok(Some(rejected)) if rejected != RejectedLogEventsInfo::default() => {
                warn!(
                    "CLOUDWATCH | {} rejected events: too new from {:?}, too old to {:?}, expired to {:?}",
                    self.destination_name(),
                    rejected.too_new_log_event_start_index,
                    rejected.too_old_log_event_end_index,
                    rejected.expired_log_event_end_index
                );
                Ok(deferred)
            }
            Ok(_) => Ok(deferred),
            Err(e) => Err(self.classify("PutLogEvents", e)),
        }
    }

    fn effective_size(&self, message: &Message) -> usize {
        message.size() + EVENT_OVERHEAD
    }

    fn within_service_limits(&self, bytes: usize, count: usize) -> bool {
        bytes <= MAX_BATCH_BYTES && count < MAX_BATCH_COUNT
    }

    fn max_message_size(&self) -> usize {
        MAX_BATCH_BYTES - EVENT_OVERHEAD
    }

    async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}
