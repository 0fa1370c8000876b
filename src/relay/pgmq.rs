//! Event bus backed by pgmq, one queue per topic.

use std::sync::Arc;

use async_trait::async_trait;

use super::EventBus;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::event::{Event, Topic};

/// NOTIFY channel the dispatcher listens on.
pub const EVENTS_CHANNEL: &str = "cityfix_events";

pub struct PgmqBus {
    db: Arc<Db>,
}

impl PgmqBus {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create the topic queues. Safe to call repeatedly.
    pub async fn ensure_queues(&self) -> Result<()> {
        for topic in Topic::ALL {
            self.db.create_queue(&topic.queue_name()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for PgmqBus {
    async fn publish(&self, event: &Event) -> Result<()> {
        let topic = event.topic();
        if topic == Topic::Unknown {
            return Err(Error::Publish("refusing to publish an unknown event".into()));
        }
        let payload = serde_json::to_value(event)?;
        self.db
            .send_and_notify(&topic.queue_name(), &payload, EVENTS_CHANNEL)
            .await
            .map_err(|e| Error::Publish(format!("{topic}: {e}")))?;
        Ok(())
    }
}
