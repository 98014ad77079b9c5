// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered fallback chain for building service clients.
//!
//! Applications usually know several ways to obtain a client (an explicitly
//! configured one, one built from the environment, a default). Each way is a
//! [`ClientStrategy`]; [`ClientFactory`] tries them in order and keeps the
//! first client produced. A strategy that fails is logged and skipped, so a
//! misconfigured option falls back to the next one instead of aborting.

use tracing::{debug, error};

use crate::error::ClientError;

pub trait ClientStrategy<C>: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// `Ok(None)` when the strategy does not apply (for example its
    /// configuration is absent); `Err` when it applies but failed.
    fn build(&self) -> Result<Option<C>, ClientError>;
}

/// Adapts a closure into a [`ClientStrategy`].
pub struct FnStrategy<F> {
    name: String,
    build: F,
}

impl<F> FnStrategy<F> {
    pub fn new(name: impl Into<String>, build: F) -> Self {
        FnStrategy {
            name: name.into(),
            build,
        }
    }
}

impl<C, F> ClientStrategy<C> for FnStrategy<F>
where
    F: Fn() -> Result<Option<C>, ClientError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Option<C>, ClientError> {
        (self.build)()
    }
}

pub struct ClientFactory<C> {
    service: &'static str,
    strategies: Vec<Box<dyn ClientStrategy<C>>>,
}

impl<C> ClientFactory<C> {
    #[must_use]
    pub fn new(service: &'static str) -> Self {
        ClientFactory {
            service,
            strategies: Vec::new(),
        }
    }

    /// Appends a strategy; strategies are tried in insertion order.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ClientStrategy<C> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    #[must_use]
    pub fn with_fn<F>(self, name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Option<C>, ClientError> + Send + Sync + 'static,
        C: 'static,
    {
        self.with_strategy(FnStrategy::new(name, build))
    }

    pub fn build(&self) -> Result<C, ClientError> {
        for strategy in &self.strategies {
            match strategy.build() {
                Ok(Some(client)) => {
                    debug!(
                        "CLIENT | Built {} client using {}",
                        self.service,
                        strategy.name()
                    );
                    return Ok(client);
                }
                Ok(None) => {
                    debug!(
                        "CLIENT | Strategy {} does not apply to {}, trying next",
                        strategy.name(),
                        self.service
                    );
                }
                Err(e) => {
                    error!(
                        "CLIENT | Strategy {} failed to build {} client: {}",
                        strategy.name(),
                        self.service,
                        e
                    );
                }
            }
        }
        Err(ClientError::Exhausted(self.service))
    }
}
