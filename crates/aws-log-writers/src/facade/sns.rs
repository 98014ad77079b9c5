// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::SnsConfig;
use crate::error::{FacadeError, FacadeErrorKind, ServiceError};
use crate::facade::{is_retryable_throttle, Facade};
use crate::message::Message;
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;

pub const MAX_MESSAGE_BYTES: usize = 262_144;

const THROTTLING_CODES: [&str; 2] = ["ThrottledException", "Throttling"];
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LOOKUP_POLL: Duration = Duration::from_millis(500);

/// The subset of the SNS API used by the facade.
#[async_trait]
pub trait SnsClient: Send + Sync {
    /// ARNs of every topic visible to the caller.
    async fn list_topics(&self) -> Result<Vec<String>, ServiceError>;

    /// Creates `name` (idempotent) and returns its ARN.
    async fn create_topic(&self, name: &str) -> Result<String, ServiceError>;

    async fn publish(
        &self,
        topic_arn: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ServiceError>;

    async fn shutdown(&self) {}
}

pub struct SnsFacade {
    config: SnsConfig,
    client: Arc<dyn SnsClient>,
    stats: Arc<WriterStatistics>,
    /// Resolved once the destination has been ensured.
    topic_arn: RwLock<Option<String>>,
    lookup_timeout: Duration,
    retry: RetryManager,
}

impl SnsFacade {
    pub fn new(
        config: SnsConfig,
        client: Arc<dyn SnsClient>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        SnsFacade {
            config,
            client,
            stats,
            topic_arn: RwLock::new(None),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            retry: RetryManager::linear(DEFAULT_LOOKUP_POLL),
        }
    }

    #[must_use]
    pub fn with_creation_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.lookup_timeout = timeout;
        self.retry = RetryManager::linear(poll);
        self
    }

    pub fn topic_arn(&self) -> Option<String> {
        #[allow(clippy::expect_used)]
        self.topic_arn.read().expect("lock poisoned").clone()
    }

    fn set_topic_arn(&self, arn: String) {
        #[allow(clippy::expect_used)]
        let mut topic_arn = self.topic_arn.write().expect("lock poisoned");
        *topic_arn = Some(arn);
    }

    async fn list_topics(&self) -> Result<Vec<String>, ServiceError> {
        let client = &*self.client;
        let topics = self
            .retry
            .invoke_classified(
                self.lookup_timeout,
                move || async move { client.list_topics().await.map(Some) },
                |e| is_retryable_throttle(e, &THROTTLING_CODES),
            )
            .await?;
        topics.ok_or_else(|| {
            ServiceError::new(
                "Timeout",
                format!("ListTopics did not succeed within {:?}", self.lookup_timeout),
            )
        })
    }

    async fn resolve_topic(&self) -> Result<String, ServiceError> {
        let topics = self.list_topics().await?;

        if let Some(arn) = &self.config.topic_arn {
            return if topics.contains(arn) {
                Ok(arn.clone())
            } else {
                Err(ServiceError::new(
                    "NotFound",
                    format!("topic {arn} does not exist"),
                ))
            };
        }

        let name = self.config.topic_name.as_deref().unwrap_or_default();
        if let Some(arn) = topics.iter().find(|arn| topic_name_of(arn) == name) {
            debug!("SNS | Found topic {}", arn);
            return Ok(arn.clone());
        }

        if !self.config.auto_create {
            return Err(ServiceError::new(
                "NotFound",
                format!("topic {name} does not exist and auto-create is disabled"),
            ));
        }

        info!("SNS | Creating topic {}", name);
        self.client.create_topic(name).await
    }

    fn classify(&self, context: &str, error: ServiceError) -> FacadeError {
        let kind = if error.interrupted {
            FacadeErrorKind::Aborted
        } else if is_retryable_throttle(&error, &THROTTLING_CODES) {
            FacadeErrorKind::Throttling
        } else if error.is("NotFound") {
            FacadeErrorKind::MissingDestination
        } else if error.is("InvalidParameter") {
            FacadeErrorKind::InvalidConfiguration
        } else {
            FacadeErrorKind::Other
        };
        FacadeError::from_service(kind, context, error)
    }
}

fn topic_name_of(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

#[async_trait]
impl Facade for SnsFacade {
    fn destination_name(&self) -> String {
        self.topic_arn()
            .or_else(|| self.config.topic_name.clone())
            .or_else(|| self.config.topic_arn.clone())
            .unwrap_or_default()
    }

    async fn ensure_destination_available(&self) -> bool {
        if let Err(e) = self.config.validate() {
            error!("SNS | Invalid configuration: {}", e);
            self.stats.set_last_error(e.to_string());
            return false;
        }

        match self.resolve_topic().await {
            Ok(arn) => {
                info!("SNS | Publishing to {}", arn);
                self.set_topic_arn(arn);
                self.stats.set_destination(self.destination_name());
                true
            }
            Err(e) => {
                error!(
                    "SNS | Unable to configure topic {}: {}",
                    self.destination_name(),
                    e
                );
                self.stats.set_last_error(e.to_string());
                false
            }
        }
    }

    async fn send_batch(&self, batch: &[Message]) -> Result<Vec<Message>, FacadeError> {
        let Some(arn) = self.topic_arn() else {
            return Err(FacadeError::new(
                FacadeErrorKind::MissingDestination,
                "topic has not been resolved",
            ));
        };

        // Batches hold a single message; anything after a failure goes back
        for (index, message) in batch.iter().enumerate() {
            if let Err(e) = self
                .client
                .publish(&arn, self.config.subject.as_deref(), message.text())
                .await
            {
                if index == 0 {
                    return Err(self.classify("Publish", e));
                }
                return Ok(batch[index..].to_vec());
            }
        }
        Ok(Vec::new())
    }

    fn effective_size(&self, message: &Message) -> usize {
        message.size()
    }

    fn within_service_limits(&self, bytes: usize, count: usize) -> bool {
        bytes <= MAX_MESSAGE_BYTES && count <= 1
    }

    fn max_message_size(&self) -> usize {
        MAX_MESSAGE_BYTES
    }

    async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}
