// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` layer that ships events through an [`Appender`].
//!
//! Each event becomes one line:
//!
//! ```text
//! INFO my_app::handler - request served status=200 path="/health"
//! ```
//!
//! Events emitted by this crate are ignored so the writer never feeds its own
//! diagnostics back into the queue it is draining.

use std::fmt::{self, Write};
use std::sync::Arc;

use tracing_core::field::{Field, Visit};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::appender::Appender;
use crate::message::current_time_millis;

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

pub struct AwsLogLayer {
    appender: Arc<Appender>,
}

impl AwsLogLayer {
    pub fn new(appender: Arc<Appender>) -> Self {
        AwsLogLayer { appender }
    }

    pub fn appender(&self) -> &Arc<Appender> {
        &self.appender
    }
}

impl<S> Layer<S> for AwsLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{} {} - {}", metadata.level(), metadata.target(), visitor.message);
        line.push_str(&visitor.fields);
        self.appender.append(current_time_millis(), line);
    }
}

/// Collects the `message` field and renders the rest as ` key=value` pairs.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_target_is_crate_name() {
        assert_eq!(OWN_TARGET, "aws_log_writers");
    }

    #[test]
    fn test_visitor_separates_message_and_fields() {
        use tracing_subscriber::layer::SubscriberExt;

        struct Capture(Arc<std::sync::Mutex<Vec<String>>>);

        impl<S: Subscriber> Layer<S> for Capture {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut visitor = LineVisitor::default();
                event.record(&mut visitor);
                #[allow(clippy::unwrap_used)]
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("{}|{}", visitor.message, visitor.fields));
            }
        }

        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Capture(Arc::clone(&lines)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(status = 200, path = "/health", "request served");
        });

        #[allow(clippy::unwrap_used)]
        let lines = lines.lock().unwrap();
        assert_eq!(lines.as_slice(), &["request served| status=200 path=\"/health\""]);
    }
}
