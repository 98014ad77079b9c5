// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination facades.
//!
//! A facade hides one AWS service behind the small contract the writer needs:
//! make sure the destination exists, send a batch, and describe the service's
//! size limits. Facades classify service errors into [`FacadeErrorKind`]; the
//! writer decides what to do about them.

use async_trait::async_trait;

use crate::error::{FacadeError, ServiceError};
use crate::message::Message;

pub mod cloudwatch;
pub mod kinesis;
pub mod sns;

pub use cloudwatch::{CloudWatchFacade, CloudWatchLogsClient};
pub use kinesis::{KinesisClient, KinesisFacade};
pub use sns::{SnsClient, SnsFacade};

#[async_trait]
pub trait Facade: Send + Sync {
    /// Human readable destination, used in logs and statistics.
    fn destination_name(&self) -> String;

    /// Validates configuration, checks that the destination exists and
    /// creates it when allowed. Returns false (after logging why) when the
    /// destination cannot be used.
    async fn ensure_destination_available(&self) -> bool;

    /// Sends `batch` and returns the messages that were not accepted, in their
    /// original order. An empty vector means complete success.
    ///
    /// Errors mean nothing was accepted; the whole batch should be retried.
    async fn send_batch(&self, batch: &[Message]) -> Result<Vec<Message>, FacadeError>;

    /// Size of `message` as counted against the service limits.
    fn effective_size(&self, message: &Message) -> usize;

    /// Whether a batch of `count` messages totalling `bytes` effective bytes
    /// may be sent in a single request.
    fn within_service_limits(&self, bytes: usize, count: usize) -> bool;

    /// Largest message text (in bytes) the service accepts.
    fn max_message_size(&self) -> usize;

    /// Releases client resources. Never fails.
    async fn shutdown(&self) {}
}

/// Throttling during describe/create calls is worth waiting out.
pub(crate) fn is_retryable_throttle(error: &ServiceError, codes: &[&str]) -> bool {
    codes.iter().any(|code| error.is(code))
}
