// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory doubles for facades and AWS service clients

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_log_writers::facade::cloudwatch::{InputLogEvent, RejectedLogEventsInfo};
use aws_log_writers::facade::kinesis::{PutRecordResult, PutRecordsEntry, StreamStatus};
use aws_log_writers::facade::{CloudWatchLogsClient, Facade, KinesisClient, SnsClient};
use aws_log_writers::{FacadeError, FacadeErrorKind, Message, ServiceError, WriterStatistics};

/// What the recording facade does with the next send attempt
#[derive(Debug, Clone)]
pub enum Scripted {
    Fail(FacadeErrorKind),
    /// Reject the messages at these batch positions
    Reject(Vec<usize>),
}

/// Observable side of a [`RecordingFacade`]
#[derive(Clone, Default)]
pub struct FacadeProbe {
    pub batches: Arc<Mutex<Vec<Vec<Message>>>>,
    pub script: Arc<Mutex<VecDeque<Scripted>>>,
    /// `messages_sent` as seen at the start of every send attempt
    pub sent_at_attempt: Arc<Mutex<Vec<u64>>>,
    pub ensure_calls: Arc<Mutex<usize>>,
}

impl FacadeProbe {
    pub fn script(&self, step: Scripted) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn batches(&self) -> Vec<Vec<Message>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flatten()
            .map(|m| m.text().to_string())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.sent_at_attempt.lock().unwrap().len()
    }
}

/// Facade with count/byte limits that records every accepted batch
pub struct RecordingFacade {
    pub available: bool,
    pub max_count: usize,
    pub max_bytes: usize,
    pub overhead: usize,
    pub stats: Arc<WriterStatistics>,
    pub probe: FacadeProbe,
}

impl RecordingFacade {
    pub fn new(stats: Arc<WriterStatistics>) -> (Self, FacadeProbe) {
        let probe = FacadeProbe::default();
        let facade = RecordingFacade {
            available: true,
            max_count: 1_000,
            max_bytes: 1_000_000,
            overhead: 0,
            stats,
            probe: probe.clone(),
        };
        (facade, probe)
    }
}

#[async_trait]
impl Facade for RecordingFacade {
    fn destination_name(&self) -> String {
        "recording".to_string()
    }

    async fn ensure_destination_available(&self) -> bool {
        *self.probe.ensure_calls.lock().unwrap() += 1;
        self.available
    }

    async fn send_batch(&self, batch: &[Message]) -> Result<Vec<Message>, FacadeError> {
        self.probe
            .sent_at_attempt
            .lock()
            .unwrap()
            .push(self.stats.messages_sent());

        let step = self.probe.script.lock().unwrap().pop_front();
        match step {
            Some(Scripted::Fail(kind)) => Err(FacadeError::new(kind, "scripted failure")),
            Some(Scripted::Reject(positions)) => {
                let (failed, accepted): (Vec<_>, Vec<_>) = batch
                    .iter()
                    .cloned()
                    .enumerate()
                    .partition(|(i, _)| positions.contains(i));
                self.probe
                    .batches
                    .lock()
                    .unwrap()
                    .push(accepted.into_iter().map(|(_, m)| m).collect());
                Ok(failed.into_iter().map(|(_, m)| m).collect())
            }
            None => {
                self.probe.batches.lock().unwrap().push(batch.to_vec());
                Ok(Vec::new())
            }
        }
    }

    fn effective_size(&self, message: &Message) -> usize {
        message.size() + self.overhead
    }

    fn within_service_limits(&self, bytes: usize, count: usize) -> bool {
        bytes <= self.max_bytes && count <= self.max_count
    }

    fn max_message_size(&self) -> usize {
        self.max_bytes - self.overhead
    }
}

/// CloudWatch Logs backed by hash maps
#[derive(Default)]
pub struct InMemoryCloudWatch {
    pub groups: Mutex<HashMap<String, Option<u32>>>,
    pub streams: Mutex<HashSet<(String, String)>>,
    pub events: Mutex<Vec<InputLogEvent>>,
    pub put_calls: Mutex<usize>,
    pub put_errors: Mutex<VecDeque<ServiceError>>,
}

impl InMemoryCloudWatch {
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn delete_stream(&self, group: &str, stream: &str) {
        self.streams
            .lock()
            .unwrap()
            .remove(&(group.to_string(), stream.to_string()));
    }
}

#[async_trait]
impl CloudWatchLogsClient for InMemoryCloudWatch {
    async fn log_group_exists(&self, log_group: &str) -> Result<bool, ServiceError> {
        Ok(self.groups.lock().unwrap().contains_key(log_group))
    }

    async fn create_log_group(&self, log_group: &str) -> Result<(), ServiceError> {
        let mut groups = self.groups.lock().unwrap();
        if groups.contains_key(log_group) {
            return Err(ServiceError::new(
                "ResourceAlreadyExistsException",
                "group exists",
            ));
        }
        groups.insert(log_group.to_string(), None);
        Ok(())
    }

    async fn put_retention_policy(&self, log_group: &str, days: u32) -> Result<(), ServiceError> {
        self.groups
            .lock()
            .unwrap()
            .insert(log_group.to_string(), Some(days));
        Ok(())
    }

    async fn log_stream_exists(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .contains(&(log_group.to_string(), log_stream.to_string())))
    }

    async fn create_log_stream(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<(), ServiceError> {
        if !self.groups.lock().unwrap().contains_key(log_group) {
            return Err(ServiceError::new(
                "ResourceNotFoundException",
                "group does not exist",
            ));
        }
        self.streams
            .lock()
            .unwrap()
            .insert((log_group.to_string(), log_stream.to_string()));
        Ok(())
    }

    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        events: Vec<InputLogEvent>,
    ) -> Result<Option<RejectedLogEventsInfo>, ServiceError> {
        *self.put_calls.lock().unwrap() += 1;
        if let Some(e) = self.put_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        if !self
            .streams
            .lock()
            .unwrap()
            .contains(&(log_group.to_string(), log_stream.to_string()))
        {
            return Err(ServiceError::new(
                "ResourceNotFoundException",
                "stream does not exist",
            ));
        }
        self.events.lock().unwrap().extend(events);
        Ok(None)
    }
}

/// Kinesis stream that becomes active after a number of describe calls
#[derive(Default)]
pub struct InMemoryKinesis {
    pub status: Mutex<Option<StreamStatus>>,
    pub describes_until_active: Mutex<usize>,
    pub shard_count: Mutex<Option<u32>>,
    pub records: Mutex<Vec<PutRecordsEntry>>,
    /// Record positions to reject with throughput errors, per request
    pub throttled_positions: Mutex<VecDeque<Vec<usize>>>,
}

impl InMemoryKinesis {
    pub fn active() -> Self {
        let kinesis = InMemoryKinesis::default();
        *kinesis.status.lock().unwrap() = Some(StreamStatus::Active);
        kinesis
    }

    pub fn payloads(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| String::from_utf8_lossy(&r.data).into_owned())
            .collect()
    }
}

#[async_trait]
impl KinesisClient for InMemoryKinesis {
    async fn describe_stream_status(
        &self,
        _stream: &str,
    ) -> Result<Option<StreamStatus>, ServiceError> {
        let mut status = self.status.lock().unwrap();
        if *status == Some(StreamStatus::Creating) {
            let mut remaining = self.describes_until_active.lock().unwrap();
            if *remaining == 0 {
                *status = Some(StreamStatus::Active);
            } else {
                *remaining -= 1;
            }
        }
        Ok(*status)
    }

    async fn create_stream(&self, _stream: &str, shard_count: u32) -> Result<(), ServiceError> {
        *self.status.lock().unwrap() = Some(StreamStatus::Creating);
        *self.shard_count.lock().unwrap() = Some(shard_count);
        Ok(())
    }

    async fn increase_retention(&self, _stream: &str, _hours: u32) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn put_records(
        &self,
        _stream: &str,
        records: Vec<PutRecordsEntry>,
    ) -> Result<Vec<PutRecordResult>, ServiceError> {
        let throttled = self
            .throttled_positions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(records.len());
        let mut stored = self.records.lock().unwrap();
        for (i, record) in records.into_iter().enumerate() {
            if throttled.contains(&i) {
                results.push(PutRecordResult {
                    error_code: Some("ProvisionedThroughputExceededException".to_string()),
                    error_message: Some("Rate exceeded for shard".to_string()),
                });
            } else {
                stored.push(record);
                results.push(PutRecordResult::default());
            }
        }
        Ok(results)
    }
}

/// SNS with topic ARNs in a fixed account
#[derive(Default)]
pub struct InMemorySns {
    pub topics: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, Option<String>, String)>>,
}

pub const SNS_ARN_PREFIX: &str = "arn:aws:sns:us-east-1:123456789012:";

#[async_trait]
impl SnsClient for InMemorySns {
    async fn list_topics(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.topics.lock().unwrap().clone())
    }

    async fn create_topic(&self, name: &str) -> Result<String, ServiceError> {
        let arn = format!("{SNS_ARN_PREFIX}{name}");
        let mut topics = self.topics.lock().unwrap();
        if !topics.contains(&arn) {
            topics.push(arn.clone());
        }
        Ok(arn)
    }

    async fn publish(
        &self,
        topic_arn: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ServiceError> {
        if !self.topics.lock().unwrap().iter().any(|t| t == topic_arn) {
            return Err(ServiceError::new("NotFound", "topic does not exist"));
        }
        self.published.lock().unwrap().push((
            topic_arn.to_string(),
            subject.map(str::to_string),
            message.to_string(),
        ));
        Ok(())
    }
}
