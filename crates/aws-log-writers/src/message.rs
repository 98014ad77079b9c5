// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single encoded log event waiting to be shipped.
///
/// Messages are immutable once built. `size` is the UTF-8 byte length of the
/// text; destination-specific per-record overhead is added by the facade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    timestamp: i64,
    text: String,
}

impl Message {
    pub fn new(timestamp: i64, text: impl Into<String>) -> Self {
        Message {
            timestamp,
            text: text.into(),
        }
    }

    /// Builds a message stamped with the current wall-clock time.
    pub fn now(text: impl Into<String>) -> Self {
        Self::new(current_time_millis(), text)
    }

    /// Epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn payload(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn size(&self) -> usize {
        self.text.len()
    }
}

// Timestamp first; the text only breaks ties so that `Ord` agrees with `Eq`.
// Batches that must be time-ordered use a stable sort on the timestamp alone.
impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Cuts `text` down to at most `max_bytes` without splitting a UTF-8 character.
pub fn truncate_to_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
