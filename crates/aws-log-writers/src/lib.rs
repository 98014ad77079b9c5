// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching log writers for AWS destinations.
//!
//! Log lines are queued by producers and shipped in batches by a background
//! task to CloudWatch Logs, a Kinesis data stream or an SNS topic. The
//! destination-specific work lives behind the [`facade::Facade`] trait; the
//! queueing, batching, retry and shutdown logic is shared by all of them in
//! [`writer::LogWriter`].
//!
//! Service access goes through small client traits
//! ([`facade::CloudWatchLogsClient`], [`facade::KinesisClient`],
//! [`facade::SnsClient`]) so applications can plug in whichever AWS SDK they
//! use.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod layer;
pub mod message;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod writer;

pub use appender::{Appender, FacadeBuilder};
pub use config::{CloudWatchConfig, KinesisConfig, SnsConfig, WriterConfig};
pub use error::{ClientError, ConfigError, FacadeError, FacadeErrorKind, ServiceError};
pub use layer::AwsLogLayer;
pub use message::Message;
pub use queue::{DiscardAction, MessageQueue};
pub use retry::{Attempt, Backoff, RetryManager};
pub use stats::{StatisticsRegistry, StatisticsSnapshot, WriterStatistics};
pub use writer::{LogWriter, WriterState};
