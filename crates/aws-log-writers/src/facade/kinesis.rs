// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::KinesisConfig;
use crate::error::{FacadeError, FacadeErrorKind, ServiceError};
use crate::facade::{is_retryable_throttle, Facade};
use crate::message::Message;
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;

pub const MAX_RECORD_BYTES: usize = 1_048_576;
pub const MAX_REQUEST_BYTES: usize = 5 * 1_048_576;
pub const MAX_REQUEST_RECORDS: usize = 500;
/// Streams keep records for a day unless told otherwise.
const DEFAULT_RETENTION_HOURS: u32 = 24;
const RANDOM_KEY_LENGTH: usize = 8;

const THROTTLING_CODES: [&str; 2] = [
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
];
const DEFAULT_CREATION_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CREATION_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

impl StreamStatus {
    /// Records can be written while the stream is active or being updated.
    pub fn is_writable(self) -> bool {
        matches!(self, StreamStatus::Active | StreamStatus::Updating)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordsEntry {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Per-record outcome, in request order. `error_code` is set for failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutRecordResult {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// The subset of the Kinesis Data Streams API used by the facade.
#[async_trait]
pub trait KinesisClient: Send + Sync {
    /// `None` when the stream does not exist.
    async fn describe_stream_status(&self, stream: &str)
        -> Result<Option<StreamStatus>, ServiceError>;

    async fn create_stream(&self, stream: &str, shard_count: u32) -> Result<(), ServiceError>;

    async fn increase_retention(&self, stream: &str, hours: u32) -> Result<(), ServiceError>;

    async fn put_records(
        &self,
        stream: &str,
        records: Vec<PutRecordsEntry>,
    ) -> Result<Vec<PutRecordResult>, ServiceError>;

    async fn shutdown(&self) {}
}

pub struct KinesisFacade {
    config: KinesisConfig,
    client: Arc<dyn KinesisClient>,
    stats: Arc<WriterStatistics>,
    creation_timeout: Duration,
    retry: RetryManager,
}

impl KinesisFacade {
    pub fn new(
        config: KinesisConfig,
        client: Arc<dyn KinesisClient>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        KinesisFacade {
            config,
            client,
            stats,
            creation_timeout: DEFAULT_CREATION_TIMEOUT,
            retry: RetryManager::linear(DEFAULT_CREATION_POLL),
        }
    }

    #[must_use]
    pub fn with_creation_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.creation_timeout = timeout;
        self.retry = RetryManager::linear(poll);
        self
    }

    fn partition_key(&self) -> String {
        if self.config.uses_random_partition_key() {
            rand::thread_rng()
                .gen_range(10_000_000..100_000_000_u32)
                .to_string()
        } else {
            self.config.partition_key.clone()
        }
    }

    fn partition_key_len(&self) -> usize {
        if self.config.uses_random_partition_key() {
            RANDOM_KEY_LENGTH
        } else {
            self.config.partition_key.len()
        }
    }

    /// Polls the stream until `accept` is satisfied or the creation timeout
    /// passes. `Ok(None)` means the stream does not exist.
    async fn wait_for_status(
        &self,
        accept: fn(Option<StreamStatus>) -> bool,
    ) -> Result<Option<StreamStatus>, ServiceError> {
        let client = &*self.client;
        let stream = self.config.stream_name.as_str();

        let status = self
            .retry
            .invoke_classified(
                self.creation_timeout,
                move || async move {
                    client
                        .describe_stream_status(stream)
                        .await
                        .map(|status| accept(status).then_some(status))
                },
                |e| is_retryable_throttle(e, &THROTTLING_CODES),
            )
            .await?;

        status.ok_or_else(|| {
            ServiceError::new(
                "Timeout",
                format!(
                    "stream {stream} did not become available within {:?}",
                    self.creation_timeout
                ),
            )
        })
    }

    async fn ensure_stream(&self) -> Result<(), ServiceError> {
        let stream = self.config.stream_name.as_str();

        // Anything but a stream in transition is a final answer
        let status = self
            .wait_for_status(|status| status != Some(StreamStatus::Creating))
            .await?;

        match status {
            Some(status) if status.is_writable() => {
                debug!("KINESIS | Stream {} is {:?}", stream, status);
                return Ok(());
            }
            Some(status) => {
                return Err(ServiceError::new(
                    "ResourceInUseException",
                    format!("stream {stream} is {status:?}"),
                ));
            }
            None if !self.config.auto_create => {
                return Err(ServiceError::new(
                    "ResourceNotFoundException",
                    format!("stream {stream} does not exist and auto-create is disabled"),
                ));
            }
            None => {}
        }

        info!(
            "KINESIS | Creating stream {} with {} shard(s)",
            stream, self.config.shard_count
        );
        match self
            .client
            .create_stream(stream, self.config.shard_count)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is("ResourceInUseException") => {
                debug!("KINESIS | Stream {} was created concurrently", stream);
            }
            Err(e) => return Err(e),
        }

        self.wait_for_status(|status| status.is_some_and(StreamStatus::is_writable))
            .await?;

        if let Some(hours) = self.config.retention_hours {
            if hours > DEFAULT_RETENTION_HOURS {
                debug!("KINESIS | Setting retention of {} to {} hours", stream, hours);
                self.client.increase_retention(stream, hours).await?;
                self.wait_for_status(|status| status.is_some_and(StreamStatus::is_writable))
                    .await?;
            }
        }
        Ok(())
    }

    fn classify(&self, context: &str, error: ServiceError) -> FacadeError {
        let kind = if error.interrupted {
            FacadeErrorKind::Aborted
        } else if is_retryable_throttle(&error, &THROTTLING_CODES) {
            FacadeErrorKind::Throttling
        } else if error.is("ResourceNotFoundException") {
            FacadeErrorKind::MissingDestination
        } else if error.is("InvalidArgumentException") {
            FacadeErrorKind::InvalidConfiguration
        } else {
            FacadeErrorKind::Other
        };
        FacadeError::from_service(kind, context, error)
    }
}

#[async_trait]
impl Facade for KinesisFacade {
    fn destination_name(&self) -> String {
        self.config.stream_name.clone()
    }

    async fn ensure_destination_available(&self) -> bool {
        if let Err(e) = self.config.validate() {
            error!("KINESIS | Invalid configuration: {}", e);
            self.stats.set_last_error(e.to_string());
            return false;
        }

        match self.ensure_stream().await {
            Ok(()) => {
                self.stats.set_destination(self.destination_name());
                info!("KINESIS | Writing to stream {}", self.config.stream_name);
                true
            }
            Err(e) => {
                error!(
                    "KINESIS | Unable to configure stream {}: {}",
                    self.config.stream_name, e
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

        let records = batch
            .iter()
            .map(|m| PutRecordsEntry {
                partition_key: self.partition_key(),
                data: m.payload().to_vec(),
            })
            .collect();

        let results = self
            .client
            .put_records(&self.config.stream_name, records)
            .await
            .map_err(|e| self.classify("PutRecords", e))?;

        if results.len() != batch.len() {
            return Err(FacadeError::new(
                FacadeErrorKind::Other,
                format!(
                    "PutRecords returned {} results for {} records",
                    results.len(),
                    batch.len()
                ),
            ));
        }

        let mut throttled = false;
        let mut failed = Vec::new();
        for (message, result) in batch.iter().zip(&results) {
            if let Some(code) = &result.error_code {
                throttled |= code == "ProvisionedThroughputExceededException";
                failed.push(message.clone());
            }
        }

        if !failed.is_empty() {
            // Partial throttling still counts once per request
            if throttled {
                self.stats.record_throttle();
            }
            warn!(
                "KINESIS | {} of {} records were not accepted by {}",
                failed.len(),
                batch.len(),
                self.config.stream_name
            );
        }
        Ok(failed)
    }

    fn effective_size(&self, message: &Message) -> usize {
        message.size() + self.partition_key_len()
    }

    fn within_service_limits(&self, bytes: usize, count: usize) -> bool {
        bytes <= MAX_REQUEST_BYTES && count <= MAX_REQUEST_RECORDS
    }

    fn max_message_size(&self) -> usize {
        MAX_RECORD_BYTES - self.partition_key_len()
    }

    async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}
