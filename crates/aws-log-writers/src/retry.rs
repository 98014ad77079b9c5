// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deadline-bounded retry loop with linear or exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay between every attempt.
    Linear,
    /// Delay doubles after every attempt.
    #[default]
    Exponential,
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Success(T),
    /// Transient failure; try again after the backoff delay.
    Retry,
    /// Stop retrying and hand the error to the caller.
    Fatal(E),
}

#[derive(Debug, Clone)]
pub struct RetryManager {
    base_delay: Duration,
    backoff: Backoff,
    cancel: Option<CancellationToken>,
}

impl RetryManager {
    #[must_use]
    pub fn new(base_delay: Duration, backoff: Backoff) -> Self {
        RetryManager {
            base_delay,
            backoff,
            cancel: None,
        }
    }

    #[must_use]
    pub fn linear(delay: Duration) -> Self {
        Self::new(delay, Backoff::Linear)
    }

    #[must_use]
    pub fn exponential(base_delay: Duration) -> Self {
        Self::new(base_delay, Backoff::Exponential)
    }

    /// Backoff sleeps end early (and the loop gives up) once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Calls `operation` until it succeeds, fails fatally, or `timeout` elapses.
    ///
    /// At least one attempt is always made. Returns `Ok(None)` when the deadline
    /// passes or the backoff sleep is interrupted; callers treat that as "give up
    /// for now", not as an error.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        timeout: Duration,
        mut operation: F,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut delay = self.base_delay;

        loop {
            match operation().await {
                Attempt::Success(value) => return Ok(Some(value)),
                Attempt::Fatal(error) => return Err(error),
                Attempt::Retry => {}
            }

            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    delay.min(remaining)
                }
                None => delay,
            };

            if !self.pause(pause).await {
                return Ok(None);
            }

            if self.backoff == Backoff::Exponential {
                delay = delay.saturating_mul(2);
            }
        }
    }

    /// Variant of [`RetryManager::invoke`] for operations returning a plain
    /// `Result`: `Ok(None)` means "retry", and errors for which `is_retryable`
    /// returns true are retried instead of propagated.
    pub async fn invoke_classified<T, E, F, Fut, C>(
        &self,
        timeout: Duration,
        mut operation: F,
        is_retryable: C,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        C: Fn(&E) -> bool,
    {
        let is_retryable = &is_retryable;
        self.invoke(timeout, move || {
            let attempt = operation();
            async move {
                match attempt.await {
                    Ok(Some(value)) => Attempt::Success(value),
                    Ok(None) => Attempt::Retry,
                    Err(error) if is_retryable(&error) => Attempt::Retry,
                    Err(error) => Attempt::Fatal(error),
                }
            }
        })
        .await
    }

    /// Sleeps for `duration`; false if interrupted by cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                () = sleep(duration) => true,
                () = token.cancelled() => false,
            },
            None => {
                sleep(duration).await;
                true
            }
        }
    }
}
