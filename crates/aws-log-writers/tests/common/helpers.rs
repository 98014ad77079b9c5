// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

#![allow(dead_code)]

use std::time::Duration;

use aws_log_writers::{Message, WriterConfig};
use tokio::time::{sleep, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Writer configuration with short delays suitable for tests
pub fn writer_config(batch_delay_ms: u64) -> WriterConfig {
    WriterConfig {
        batch_delay_ms,
        send_retry_base_delay_ms: 10,
        send_retry_timeout_ms: 2_000,
        initialization_timeout_ms: 2_000,
        shutdown_timeout_ms: 5_000,
        ..Default::default()
    }
}

/// Messages `m0`, `m1`, ... with increasing timestamps
pub fn numbered_messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message::new(1_000 + i as i64, format!("m{i}")))
        .collect()
}

/// Polls `condition` every 5ms until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
