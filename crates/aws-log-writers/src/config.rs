// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::queue::DiscardAction;
use crate::retry::Backoff;

const DEFAULT_BATCH_DELAY_MS: u64 = 2_000;
const DEFAULT_DISCARD_THRESHOLD: usize = 10_000;
const DEFAULT_SEND_RETRY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SEND_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_INITIALIZATION_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

/// CloudWatch only accepts these retention periods (days).
pub const VALID_RETENTION_PERIODS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Settings shared by every log writer, whatever the destination.
///
/// `batch_delay_ms`, `discard_threshold` and `discard_action` can be changed on
/// a running writer; everything else takes effect on the next writer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// How long to keep accumulating a batch after its first message
    pub batch_delay_ms: u64,
    /// Queue occupancy above which the discard policy kicks in
    pub discard_threshold: usize,
    pub discard_action: DiscardAction,
    /// Budget for retrying a single batch before leaving it for the next cycle
    pub send_retry_timeout_ms: u64,
    pub send_retry_base_delay_ms: u64,
    pub send_retry_backoff: Backoff,
    /// How long an appender waits for the destination to become available
    pub initialization_timeout_ms: u64,
    /// How long closing an appender waits for the final batch
    pub shutdown_timeout_ms: u64,
    /// Truncate messages too large for the destination instead of dropping them
    pub truncate_oversize_messages: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            discard_threshold: DEFAULT_DISCARD_THRESHOLD,
            discard_action: DiscardAction::Oldest,
            send_retry_timeout_ms: DEFAULT_SEND_RETRY_TIMEOUT_MS,
            send_retry_base_delay_ms: DEFAULT_SEND_RETRY_BASE_DELAY_MS,
            send_retry_backoff: Backoff::Exponential,
            initialization_timeout_ms: DEFAULT_INITIALIZATION_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            truncate_oversize_messages: true,
        }
    }
}

impl WriterConfig {
    /// Create configuration from `AWS_LOG_WRITER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            batch_delay_ms: env_number("AWS_LOG_WRITER_BATCH_DELAY_MS", defaults.batch_delay_ms)?,
            discard_threshold: env_number(
                "AWS_LOG_WRITER_DISCARD_THRESHOLD",
                defaults.discard_threshold,
            )?,
            discard_action: match env::var("AWS_LOG_WRITER_DISCARD_ACTION") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.discard_action,
            },
            send_retry_timeout_ms: env_number(
                "AWS_LOG_WRITER_SEND_RETRY_TIMEOUT_MS",
                defaults.send_retry_timeout_ms,
            )?,
            send_retry_base_delay_ms: env_number(
                "AWS_LOG_WRITER_SEND_RETRY_BASE_DELAY_MS",
                defaults.send_retry_base_delay_ms,
            )?,
            send_retry_backoff: defaults.send_retry_backoff,
            initialization_timeout_ms: env_number(
                "AWS_LOG_WRITER_INITIALIZATION_TIMEOUT_MS",
                defaults.initialization_timeout_ms,
            )?,
            shutdown_timeout_ms: env_number(
                "AWS_LOG_WRITER_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout_ms,
            )?,
            truncate_oversize_messages: env::var("AWS_LOG_WRITER_TRUNCATE_OVERSIZE_MESSAGES")
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(defaults.truncate_oversize_messages),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "batch_delay_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.send_retry_base_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "send_retry_base_delay_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.send_retry_base_delay_ms > self.send_retry_timeout_ms {
            return Err(ConfigError::InvalidValue {
                name: "send_retry_base_delay_ms",
                reason: format!(
                    "{} exceeds send_retry_timeout_ms ({})",
                    self.send_retry_base_delay_ms, self.send_retry_timeout_ms
                ),
            });
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn send_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.send_retry_timeout_ms)
    }

    pub fn send_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_base_delay_ms)
    }

    pub fn initialization_timeout(&self) -> Duration {
        Duration::from_millis(self.initialization_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn env_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            reason: format!("{value:?} is not a number"),
        }),
        Err(_) => Ok(default),
    }
}

/// Destination settings for CloudWatch Logs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CloudWatchConfig {
    pub log_group: String,
    pub log_stream: String,
    /// Applied when the log group is created
    pub retention_days: Option<u32>,
    /// Create the log group if it does not exist (streams are always created)
    pub auto_create: bool,
}

impl Default for CloudWatchConfig {
    fn default() -> Self {
        Self {
            log_group: String::new(),
            log_stream: String::new(),
            retention_days: None,
            auto_create: true,
        }
    }
}

impl CloudWatchConfig {
    pub fn new(log_group: impl Into<String>, log_stream: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            log_stream: log_stream.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let group_valid = (1..=512).contains(&self.log_group.len())
            && self
                .log_group
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || "_/.#-".contains(ch));
        if !group_valid {
            return Err(ConfigError::InvalidLogGroupName(self.log_group.clone()));
        }

        let stream_valid = (1..=512).contains(&self.log_stream.chars().count())
            && !self.log_stream.contains([':', '*']);
        if !stream_valid {
            return Err(ConfigError::InvalidLogStreamName(self.log_stream.clone()));
        }

        if let Some(days) = self.retention_days {
            if !VALID_RETENTION_PERIODS.contains(&days) {
                return Err(ConfigError::InvalidRetentionPeriod(days));
            }
        }
        Ok(())
    }
}

/// Partition key value that asks for a random key per record.
pub const RANDOM_PARTITION_KEY: &str = "{random}";

/// Destination settings for Kinesis Data Streams.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KinesisConfig {
    pub stream_name: String,
    pub partition_key: String,
    pub auto_create: bool,
    /// Used only when the stream is created
    pub shard_count: u32,
    /// Used only when the stream is created
    pub retention_hours: Option<u32>,
}

impl Default for KinesisConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            partition_key: RANDOM_PARTITION_KEY.to_string(),
            auto_create: false,
            shard_count: 1,
            retention_hours: None,
        }
    }
}

impl KinesisConfig {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name_valid = (1..=128).contains(&self.stream_name.len())
            && self
                .stream_name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || "_.-".contains(ch));
        if !name_valid {
            return Err(ConfigError::InvalidStreamName(self.stream_name.clone()));
        }

        let key_length = self.partition_key.chars().count();
        if !(1..=256).contains(&key_length) {
            return Err(ConfigError::InvalidPartitionKey(key_length));
        }

        if self.shard_count == 0 {
            return Err(ConfigError::InvalidShardCount(self.shard_count));
        }

        if let Some(hours) = self.retention_hours {
            if !(24..=8760).contains(&hours) {
                return Err(ConfigError::InvalidRetentionHours(hours));
            }
        }
        Ok(())
    }

    pub fn uses_random_partition_key(&self) -> bool {
        self.partition_key == RANDOM_PARTITION_KEY
    }
}

/// Destination settings for SNS. Exactly one of `topic_name` and `topic_arn`
/// must be set; auto-create only applies to names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnsConfig {
    pub topic_name: Option<String>,
    pub topic_arn: Option<String>,
    pub subject: Option<String>,
    pub auto_create: bool,
}

impl SnsConfig {
    pub fn with_topic_name(name: impl Into<String>) -> Self {
        Self {
            topic_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_topic_arn(arn: impl Into<String>) -> Self {
        Self {
            topic_arn: Some(arn.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.topic_name, &self.topic_arn) {
            (Some(name), None) => {
                if !is_valid_topic_name(name) {
                    return Err(ConfigError::InvalidTopicName(name.clone()));
                }
            }
            (None, Some(arn)) => {
                // arn:partition:sns:region:account:name
                let parts: Vec<&str> = arn.split(':').collect();
                if parts.len() != 6
                    || parts[0] != "arn"
                    || parts[2] != "sns"
                    || !is_valid_topic_name(parts[5])
                {
                    return Err(ConfigError::InvalidTopicArn(arn.clone()));
                }
            }
            _ => return Err(ConfigError::TopicSelection),
        }

        if let Some(subject) = &self.subject {
            let subject_valid = !subject.is_empty()
                && subject.len() < 100
                && !subject.starts_with(' ')
                && subject.chars().all(|ch| ch.is_ascii() && !ch.is_ascii_control());
            if !subject_valid {
                return Err(ConfigError::InvalidSubject(subject.clone()));
            }
        }
        Ok(())
    }
}

fn is_valid_topic_name(name: &str) -> bool {
    (1..=256).contains(&name.len())
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}
