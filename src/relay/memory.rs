//! In-process event bus.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::EventBus;
use crate::error::{Error, Result};
use crate::event::{Event, Topic};

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Event>,
    /// Every event ever accepted, in publish order.
    published: Vec<Event>,
    failing: bool,
}

/// Queues events in memory until a [`super::Relay`] drains them.
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until switched back. For exercising
    /// publish-failure paths.
    pub async fn set_failing(&self, failing: bool) {
        self.inner.lock().await.failing = failing;
    }

    pub async fn published(&self) -> Vec<Event> {
        self.inner.lock().await.published.clone()
    }

    pub async fn published_on(&self, topic: Topic) -> Vec<Event> {
        let inner = self.inner.lock().await;
        inner
            .published
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub(crate) async fn next_pending(&self) -> Option<Event> {
        self.inner.lock().await.pending.pop_front()
    }

    pub(crate) async fn requeue(&self, event: Event) {
        self.inner.lock().await.pending.push_front(event);
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &Event) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.failing {
            return Err(Error::Publish(format!("bus unavailable ({})", event.topic())));
        }
        inner.pending.push_back(event.clone());
        inner.published.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::model::{ComplaintId, Status};

    fn resolved() -> Event {
        Event::new(EventKind::ComplaintResolved {
            complaint_id: ComplaintId::new(),
            department_id: None,
            status: Status::Resolved,
        })
    }

    #[tokio::test]
    async fn publish_queues_and_records() {
        let bus = MemoryBus::new();
        bus.publish(&resolved()).await.unwrap();
        assert_eq!(bus.pending_len().await, 1);
        assert_eq!(bus.published_on(Topic::ComplaintResolved).await.len(), 1);
        assert!(bus.published_on(Topic::ComplaintCreated).await.is_empty());
    }

    #[tokio::test]
    async fn failing_bus_rejects_and_keeps_nothing() {
        let bus = MemoryBus::new();
        bus.set_failing(true).await;
        let err = bus.publish(&resolved()).await.unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert_eq!(bus.pending_len().await, 0);
        assert!(bus.published().await.is_empty());
    }
}
