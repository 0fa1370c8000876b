//! Dispatcher: drains the pgmq topic queues into the relay.
//!
//! Wakes on `NOTIFY cityfix_events` or on a poll interval, reads each topic
//! queue under a visibility timeout and archives a message once every
//! handler has accepted it. A rejected message stays in its queue and
//! reappears when the visibility timeout lapses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use super::Relay;
use super::pgmq::EVENTS_CHANNEL;
use crate::db::Db;
use crate::error::Result;
use crate::event::{Event, Topic};

/// Configuration for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Visibility timeout (seconds) for pgmq reads.
    pub visibility_timeout: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Deliveries after which a message is archived unprocessed.
    pub max_deliveries: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            poll_interval: Duration::from_secs(5),
            max_deliveries: 10,
        }
    }
}

/// What became of one message read from a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Archived, either handled or given up on.
    Acked,
    /// A handler failed; invisible until the visibility timeout lapses.
    Deferred,
}

/// Pull messages through `next` until it reports an empty queue. Deferred
/// messages do not stop the pass. Returns how many were acknowledged.
async fn drain_topic<F, Fut>(mut next: F) -> Result<usize>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Delivery>>>,
{
    let mut acked = 0;
    while let Some(delivery) = next().await? {
        if delivery == Delivery::Acked {
            acked += 1;
        }
    }
    Ok(acked)
}

/// Long-running consumer loop. Clones share the shutdown signal.
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Db>,
    relay: Arc<Relay>,
    config: DispatcherConfig,
    shutdown: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(db: Arc<Db>, relay: Arc<Relay>, config: DispatcherConfig) -> Self {
        Self {
            db,
            relay,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until [`Dispatcher::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(EVENTS_CHANNEL).await?;

        info!("dispatcher started, listening for events");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => info!(queue = n.payload(), "notified of new event"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain_queues().await {
                error!("drain_queues error: {e}");
            }
        }
    }

    /// One pass over every topic queue. Returns how many messages were
    /// acknowledged.
    ///
    /// Each queue is read until it comes back empty. A message a handler
    /// rejected stays invisible for the visibility timeout, so the pass
    /// moves past it to the messages behind it and still terminates.
    pub async fn drain_queues(&self) -> Result<usize> {
        let mut acked = 0;
        for topic in Topic::ALL {
            acked += drain_topic(|| self.process_one(topic)).await?;
        }
        Ok(acked)
    }

    /// Handle the next message on `topic`. `None` when the queue is empty.
    async fn process_one(&self, topic: Topic) -> Result<Option<Delivery>> {
        let queue = topic.queue_name();
        let Some(msg) = self
            .db
            .read_from_queue(&queue, self.config.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        let event = Event::decode(&msg.message);
        let span = tracing::info_span!(
            "relay.dispatch",
            topic = topic.as_str(),
            msg_id = msg.msg_id,
            event_id = %event.event_id,
            read_ct = msg.read_ct,
        );

        async {
            if msg.read_ct > self.config.max_deliveries {
                error!(
                    enqueued_at = %msg.enqueued_at,
                    "giving up on event after {} deliveries",
                    msg.read_ct
                );
                self.db.archive_message(&queue, msg.msg_id).await?;
                return Ok(Some(Delivery::Acked));
            }

            match self.relay.dispatch(&event).await {
                Ok(()) => {
                    self.db.archive_message(&queue, msg.msg_id).await?;
                    Ok(Some(Delivery::Acked))
                }
                Err(e) => {
                    // Visibility timeout makes it reappear.
                    warn!(error = %e, visible_at = %msg.vt, "event left for redelivery");
                    Ok(Some(Delivery::Deferred))
                }
            }
        }
        .instrument(span)
        .await
    }
}
