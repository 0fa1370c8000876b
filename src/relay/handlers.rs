//! Event handlers wiring routing, assignment, workload and notifications
//! together.
//!
//! Every handler is safe to run twice on the same event. Events about
//! complaints or departments that no longer exist are acknowledged with a
//! warning, since redelivering them cannot help.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::{EventBus, EventHandler, publish_event};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, Topic};
use crate::lifecycle::ComplaintService;
use crate::model::*;
use crate::routing::RoutingEngine;
use crate::store::{ComplaintStore, NotificationStore, WorkloadLedger};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Routes newly filed complaints and announces the chosen department.
pub struct RoutingHandler {
    complaints: Arc<dyn ComplaintStore>,
    engine: Arc<RoutingEngine>,
    bus: Arc<dyn EventBus>,
}

impl RoutingHandler {
    pub fn new(
        complaints: Arc<dyn ComplaintStore>,
        engine: Arc<RoutingEngine>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            complaints,
            engine,
            bus,
        }
    }
}

#[async_trait]
impl EventHandler for RoutingHandler {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::ComplaintCreated]
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventKind::ComplaintCreated {
            complaint_id,
            category,
            location,
            ..
        } = &event.kind
        else {
            return Ok(());
        };

        // A redelivered event must not charge a second department.
        match self.complaints.get_complaint(*complaint_id).await {
            Ok(c) if c.status != Status::Open => {
                info!(complaint_id = %complaint_id, status = %c.status, "already routed, skipping");
                return Ok(());
            }
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                warn!(complaint_id = %complaint_id, "complaint vanished before routing");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let mut query = RoutingQuery::new(*category);
        if location.has_coordinates() {
            query = query.location(location.clone());
        }

        match self.engine.route(&query).await.department() {
            Some(department) => {
                publish_event(
                    self.bus.as_ref(),
                    EventKind::ComplaintAssigned {
                        complaint_id: *complaint_id,
                        department_id: department.department_id,
                        department_name: department.name.clone(),
                    },
                )
                .await
            }
            None => {
                warn!(complaint_id = %complaint_id, category = %category, "no department available, complaint stays open");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Moves routed complaints to `Assigned`.
pub struct AssignmentHandler {
    service: Arc<ComplaintService>,
}

impl AssignmentHandler {
    pub fn new(service: Arc<ComplaintService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for AssignmentHandler {
    fn name(&self) -> &'static str {
        "assignment"
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::ComplaintAssigned]
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventKind::ComplaintAssigned {
            complaint_id,
            department_id,
            ..
        } = &event.kind
        else {
            return Ok(());
        };

        match self
            .service
            .apply_assignment(*complaint_id, *department_id, UserId::SYSTEM)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::NotFound(what)) => {
                warn!(complaint_id = %complaint_id, %what, "assignment target missing");
                Ok(())
            }
            Err(Error::InvalidTransition { from, .. }) => {
                // Someone else moved the complaint first.
                warn!(complaint_id = %complaint_id, %from, "complaint no longer open, assignment dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

/// Releases a department's workload when its complaint is resolved.
pub struct WorkloadHandler {
    ledger: Arc<dyn WorkloadLedger>,
}

impl WorkloadHandler {
    pub fn new(ledger: Arc<dyn WorkloadLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventHandler for WorkloadHandler {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::ComplaintResolved]
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventKind::ComplaintResolved {
            complaint_id,
            department_id: Some(department_id),
            ..
        } = &event.kind
        else {
            return Ok(());
        };

        // Keyed on the event so a redelivered message releases only once.
        match self.ledger.decrement(*department_id, event.event_id).await {
            Ok(workload) => {
                metrics::workload_updates().add(1, &[KeyValue::new("direction", "decrement")]);
                info!(complaint_id = %complaint_id, department_id = %department_id, workload, "workload released");
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                warn!(department_id = %department_id, "resolved complaint's department no longer exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Tells the reporter about every step of their complaint, by email and
/// in-app.
pub struct NotificationHandler {
    complaints: Arc<dyn ComplaintStore>,
    notifications: Arc<dyn NotificationStore>,
}

impl NotificationHandler {
    pub fn new(
        complaints: Arc<dyn ComplaintStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            complaints,
            notifications,
        }
    }
}

/// Kind, title and message for an event, or `None` if it warrants no
/// notification.
fn compose(kind: &EventKind, complaint: &Complaint) -> Option<(NotificationKind, String, String)> {
    let title = &complaint.title;
    match kind {
        EventKind::ComplaintCreated { .. } => Some((
            NotificationKind::ComplaintCreated,
            "Complaint received".to_string(),
            format!("Your complaint \"{title}\" has been received and will be routed shortly."),
        )),
        EventKind::ComplaintAssigned {
            department_name, ..
        } => Some((
            NotificationKind::ComplaintAssigned,
            "Complaint assigned".to_string(),
            format!("Your complaint \"{title}\" has been assigned to {department_name}."),
        )),
        EventKind::ComplaintStatusUpdated {
            new_status: Status::Closed,
            ..
        } => Some((
            NotificationKind::ComplaintClosed,
            "Complaint closed".to_string(),
            format!("Your complaint \"{title}\" has been closed."),
        )),
        EventKind::ComplaintStatusUpdated {
            old_status,
            new_status,
            ..
        } => Some((
            NotificationKind::ComplaintStatusUpdated,
            "Complaint updated".to_string(),
            format!("Your complaint \"{title}\" moved from {old_status} to {new_status}."),
        )),
        EventKind::ComplaintResolved { .. } => Some((
            NotificationKind::ComplaintResolved,
            "Complaint resolved".to_string(),
            format!("Your complaint \"{title}\" has been resolved."),
        )),
        EventKind::Unknown { .. } => None,
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn topics(&self) -> &'static [Topic] {
        &Topic::ALL
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let Some(complaint_id) = event.kind.complaint_id() else {
            return Ok(());
        };

        // The recipient is whoever filed the complaint, never an id
        // taken from the event.
        let complaint = match self.complaints.get_complaint(complaint_id).await {
            Ok(c) => c,
            Err(Error::NotFound(_)) => {
                warn!(complaint_id = %complaint_id, "complaint vanished, notification skipped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some((kind, title, message)) = compose(&event.kind, &complaint) else {
            return Ok(());
        };

        for channel in [Channel::Email, Channel::InApp] {
            let notification =
                Notification::new(complaint.reported_by, kind, channel, &title, &message)
                    .reference(complaint.id);
            self.notifications.insert_notification(&notification).await?;
        }
        info!(complaint_id = %complaint_id, user_id = %complaint.reported_by, kind = kind.as_str(), "reporter notified");
        Ok(())
    }
}
