//! Event relay: publishing, subscription and dispatch.
//!
//! Producers hand events to an [`EventBus`]. Consumers implement
//! [`EventHandler`] and are registered on a [`Relay`], which fans each
//! event out to every handler subscribed to its topic. Delivery is
//! at-least-once, so handlers must tolerate seeing an event twice.
//!
//! Two transports exist: [`MemoryBus`] for tests and local runs, drained
//! with [`Relay::drain`], and [`PgmqBus`] with the [`Dispatcher`] loop
//! for the Postgres deployment.

pub mod dispatcher;
pub mod handlers;
pub mod memory;
pub mod pgmq;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use handlers::{AssignmentHandler, NotificationHandler, RoutingHandler, WorkloadHandler};
pub use memory::MemoryBus;
pub use pgmq::PgmqBus;

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, Topic};
use crate::telemetry::metrics;

/// Where domain events are sent.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<()>;
}

/// Wrap `kind` in an envelope and publish it.
///
/// Failures are logged and come back as [`Error::Publish`]. Whatever the
/// caller committed before publishing stays committed.
pub async fn publish_event(bus: &dyn EventBus, kind: EventKind) -> Result<()> {
    let event = Event::new(kind);
    let topic = event.topic();

    match bus.publish(&event).await {
        Ok(()) => {
            metrics::events_published().add(
                1,
                &[
                    KeyValue::new("topic", topic.as_str()),
                    KeyValue::new("result", "ok"),
                ],
            );
            debug!(%topic, event_id = %event.event_id, "event published");
            Ok(())
        }
        Err(e) => {
            metrics::events_published().add(
                1,
                &[
                    KeyValue::new("topic", topic.as_str()),
                    KeyValue::new("result", "error"),
                ],
            );
            error!(%topic, event_id = %event.event_id, error = %e, "event publish failed");
            Err(match e {
                Error::Publish(_) => e,
                other => Error::Publish(format!("{topic}: {other}")),
            })
        }
    }
}

/// A consumer of domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Topics this handler wants.
    fn topics(&self) -> &'static [Topic];

    /// Process one event. An error asks for redelivery.
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Registry of handlers and the fan-out logic shared by both transports.
#[derive(Clone, Default)]
pub struct Relay {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        info!(handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    pub fn with(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handlers_for(&self, topic: Topic) -> impl Iterator<Item = &Arc<dyn EventHandler>> {
        self.handlers
            .iter()
            .filter(move |h| h.topics().contains(&topic))
    }

    /// Run every handler subscribed to the event's topic.
    ///
    /// All handlers run even if one fails; the first error is returned.
    /// Unknown events are acknowledged without effect.
    pub async fn dispatch(&self, event: &Event) -> Result<()> {
        let topic = event.topic();
        if let EventKind::Unknown { raw } = &event.kind {
            warn!(event_id = %event.event_id, payload = %raw, "ignoring unrecognized event");
            metrics::events_consumed().add(
                1,
                &[
                    KeyValue::new("topic", topic.as_str()),
                    KeyValue::new("result", "unknown"),
                ],
            );
            return Ok(());
        }

        let mut first_error = None;
        for handler in self.handlers_for(topic) {
            let result = handler.handle(event).await;
            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics::events_consumed().add(
                1,
                &[
                    KeyValue::new("topic", topic.as_str()),
                    KeyValue::new("handler", handler.name()),
                    KeyValue::new("result", outcome),
                ],
            );
            if let Err(e) = result {
                error!(handler = handler.name(), %topic, event_id = %event.event_id, error = %e, "handler failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Dispatch everything queued on `bus`, including events the handlers
    /// publish along the way. Returns the number of events dispatched.
    ///
    /// On a handler error the event goes back to the head of the queue and
    /// the error is returned.
    pub async fn drain(&self, bus: &MemoryBus) -> Result<usize> {
        let mut dispatched = 0;
        while let Some(event) = bus.next_pending().await {
            if let Err(e) = self.dispatch(&event).await {
                bus.requeue(event).await;
                return Err(e);
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }
}
