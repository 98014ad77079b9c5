// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors raised while validating writer or destination configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log group name: {0:?}")]
    InvalidLogGroupName(String),

    #[error("Invalid log stream name: {0:?}")]
    InvalidLogStreamName(String),

    #[error("Invalid retention period: {0} days")]
    InvalidRetentionPeriod(u32),

    #[error("Invalid Kinesis stream name: {0:?}")]
    InvalidStreamName(String),

    #[error("Invalid partition key length: {0} (must be 1-256 characters)")]
    InvalidPartitionKey(usize),

    #[error("Invalid shard count: {0}")]
    InvalidShardCount(u32),

    #[error("Invalid stream retention period: {0} hours (must be 24-8760)")]
    InvalidRetentionHours(u32),

    #[error("Invalid SNS topic name: {0:?}")]
    InvalidTopicName(String),

    #[error("Invalid SNS topic ARN: {0:?}")]
    InvalidTopicArn(String),

    #[error("Exactly one of topic name or topic ARN must be configured")]
    TopicSelection,

    #[error("Invalid SNS subject: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid discard action: {0:?} (expected none, oldest or newest)")]
    InvalidDiscardAction(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Error returned by a service client call.
///
/// `code` carries the service's error code (for example
/// `ThrottlingException`); facades map codes onto [`FacadeErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    pub interrupted: bool,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError {
            code: code.into(),
            message: message.into(),
            interrupted: false,
        }
    }

    /// The call was abandoned because the calling task was asked to stop.
    pub fn interrupted(message: impl Into<String>) -> Self {
        ServiceError {
            code: "Interrupted".to_string(),
            message: message.into(),
            interrupted: true,
        }
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

/// Failure classes shared by all destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacadeErrorKind {
    /// Rate limited; retry the same batch.
    Throttling,
    /// Interrupted by shutdown; keep the batch, do not report.
    Aborted,
    /// Destination disappeared; recreate then retry.
    MissingDestination,
    /// The service rejected the configured destination.
    InvalidConfiguration,
    Other,
}

impl fmt::Display for FacadeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FacadeErrorKind::Throttling => "throttling",
            FacadeErrorKind::Aborted => "aborted",
            FacadeErrorKind::MissingDestination => "missing destination",
            FacadeErrorKind::InvalidConfiguration => "invalid configuration",
            FacadeErrorKind::Other => "unexpected error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FacadeError {
    pub kind: FacadeErrorKind,
    pub message: String,
    #[source]
    pub source: Option<ServiceError>,
}

impl FacadeError {
    pub fn new(kind: FacadeErrorKind, message: impl Into<String>) -> Self {
        FacadeError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn from_service(kind: FacadeErrorKind, context: &str, source: ServiceError) -> Self {
        FacadeError {
            kind,
            message: format!("{context}: {source}"),
            source: Some(source),
        }
    }
}

/// Errors raised while constructing a service client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Client strategy {strategy} failed: {reason}")]
    Strategy { strategy: String, reason: String },

    #[error("No client strategy was able to build a {0} client")]
    Exhausted(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
