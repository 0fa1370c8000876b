//! Complaint status lifecycle.
//!
//! The free functions are the state machine: they validate a change
//! against the transition table and return the updated complaint with one
//! more history entry, leaving the input untouched. [`ComplaintService`]
//! persists those changes through a [`ComplaintStore`] and publishes the
//! matching event once the change has committed.
//!
//! ```text
//!  Open ──assign──▶ Assigned ──▶ InProgress ──▶ Resolved ──▶ Closed
//!   ▲                 │  ▲           │             │
//!   └─────────────────┘  └───────────┘◀────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::relay::{EventBus, publish_event};
use crate::retry::RetryPolicy;
use crate::store::{ComplaintStore, DepartmentDirectory, StatusChange};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_state_transition, start_complaint_span};

const CREATED_NOTE: &str = "Complaint created";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Materialize a freshly filed complaint in `Open` with its creation entry.
pub fn file(new: NewComplaint, now: DateTime<Utc>) -> Result<Complaint> {
    if new.title.trim().is_empty() {
        return Err(Error::Validation("complaint title must not be empty".into()));
    }
    let mut complaint = Complaint {
        id: ComplaintId::new(),
        title: new.title,
        description: new.description,
        category: new.category,
        priority: new.priority,
        status: Status::Open,
        location: new.location,
        reported_by: new.reported_by,
        assigned_to: None,
        created_at: now,
        updated_at: now,
        history: Vec::new(),
    };
    append_entry(
        &mut complaint,
        None,
        Status::Open,
        new.reported_by,
        Some(CREATED_NOTE),
        now,
    );
    Ok(complaint)
}

/// Move `complaint` to `to` if the transition table allows it.
///
/// Going back to `Open` drops the assignee. `Open` to `Assigned` needs a
/// department and is a `Validation` error here; use [`assign`] for it.
pub fn transition(
    complaint: &Complaint,
    to: Status,
    actor: UserId,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Complaint> {
    let from = complaint.status;
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition { from, to });
    }
    if from == Status::Open && to == Status::Assigned {
        return Err(Error::Validation(format!(
            "complaint {} has no assignee; assign it to a department instead",
            complaint.id
        )));
    }

    let mut next = complaint.clone();
    next.status = to;
    if to == Status::Open {
        next.assigned_to = None;
    }
    append_entry(&mut next, Some(from), to, actor, note, now);
    Ok(next)
}

/// Hand an `Open` complaint to a department.
pub fn assign(
    complaint: &Complaint,
    department_id: DepartmentId,
    actor: UserId,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Complaint> {
    if complaint.status != Status::Open {
        return Err(Error::InvalidTransition {
            from: complaint.status,
            to: Status::Assigned,
        });
    }

    let mut next = complaint.clone();
    next.status = Status::Assigned;
    next.assigned_to = Some(department_id);
    append_entry(
        &mut next,
        Some(Status::Open),
        Status::Assigned,
        actor,
        note,
        now,
    );
    Ok(next)
}

fn append_entry(
    complaint: &mut Complaint,
    old_status: Option<Status>,
    new_status: Status,
    actor: UserId,
    note: Option<&str>,
    now: DateTime<Utc>,
) {
    // History stays ordered even if the caller's clock steps backwards.
    let timestamp = complaint
        .last_change()
        .map_or(now, |last| now.max(last.timestamp));
    complaint.history.push(StatusHistoryEntry {
        id: Uuid::new_v4(),
        old_status,
        new_status,
        changed_by: actor,
        note: note.map(str::to_owned),
        timestamp,
    });
    complaint.updated_at = timestamp;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Persists lifecycle changes and announces them on the event bus.
///
/// Storage calls run under the configured [`RetryPolicy`]. A change is
/// committed with an optimistic guard on the previous status, so a
/// concurrent writer surfaces as `InvalidTransition` rather than being
/// overwritten. A failed publish is reported as `Error::Publish`; the
/// committed change stays.
pub struct ComplaintService {
    store: Arc<dyn ComplaintStore>,
    directory: Arc<dyn DepartmentDirectory>,
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl ComplaintService {
    pub fn new(
        store: Arc<dyn ComplaintStore>,
        directory: Arc<dyn DepartmentDirectory>,
        bus: Arc<dyn EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            bus,
            retry,
        }
    }

    /// File a new complaint and publish `complaint.created`.
    pub async fn file(&self, new: NewComplaint) -> Result<Complaint> {
        let complaint = file(new, Utc::now())?;
        let span = start_complaint_span("file", complaint.id);

        async {
            self.retry
                .run("complaint.insert", || self.store.insert_complaint(&complaint))
                .await?;
            metrics::complaints_filed().add(
                1,
                &[KeyValue::new("category", complaint.category.as_str())],
            );
            info!(category = %complaint.category, reporter = %complaint.reported_by, "complaint filed");

            publish_event(
                self.bus.as_ref(),
                EventKind::ComplaintCreated {
                    complaint_id: complaint.id,
                    category: complaint.category,
                    location: complaint.location.clone(),
                    reported_by: complaint.reported_by,
                },
            )
            .await?;
            Ok(complaint)
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, id: ComplaintId) -> Result<Complaint> {
        self.retry
            .run("complaint.get", || self.store.get_complaint(id))
            .await
    }

    /// Newest first. Page and size default to 0 and 10.
    pub async fn search(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>> {
        self.retry
            .run("complaint.search", || self.store.search_complaints(filter))
            .await
    }

    /// Admin removal of a complaint and its history.
    pub async fn delete(&self, id: ComplaintId) -> Result<()> {
        self.retry
            .run("complaint.delete", || self.store.delete_complaint(id))
            .await?;
        info!(complaint_id = %id, "complaint deleted");
        Ok(())
    }

    /// Manually assign an `Open` complaint and publish `complaint.assigned`.
    pub async fn assign(
        &self,
        id: ComplaintId,
        department_id: DepartmentId,
        actor: UserId,
        note: Option<&str>,
    ) -> Result<Complaint> {
        let span = start_complaint_span("assign", id);

        async {
            let department = self
                .retry
                .run("department.find", || self.directory.find_by_id(department_id))
                .await?
                .ok_or_else(|| Error::NotFound(format!("department {department_id}")))?;

            let before = self.get(id).await?;
            let after = assign(&before, department.id, actor, note, Utc::now())?;
            self.commit(&before, &after).await?;

            publish_event(
                self.bus.as_ref(),
                EventKind::ComplaintAssigned {
                    complaint_id: id,
                    department_id: department.id,
                    department_name: department.name,
                },
            )
            .await?;
            Ok(after)
        }
        .instrument(span)
        .await
    }

    /// Apply an assignment the routing pipeline already announced.
    ///
    /// Does not publish. A complaint already assigned to the same
    /// department is returned unchanged, so redelivered events are harmless.
    pub async fn apply_assignment(
        &self,
        id: ComplaintId,
        department_id: DepartmentId,
        actor: UserId,
    ) -> Result<Complaint> {
        let span = start_complaint_span("apply_assignment", id);

        async {
            let before = self.get(id).await?;
            if before.status != Status::Open && before.assigned_to == Some(department_id) {
                info!(department_id = %department_id, "assignment already applied");
                return Ok(before);
            }
            let after = assign(
                &before,
                department_id,
                actor,
                Some("Routed automatically"),
                Utc::now(),
            )?;
            self.commit(&before, &after).await?;
            Ok(after)
        }
        .instrument(span)
        .await
    }

    /// Change the status of a complaint.
    ///
    /// Publishes `complaint.resolved` when entering `Resolved` and
    /// `complaint.status_updated` for every other status.
    pub async fn transition(
        &self,
        id: ComplaintId,
        to: Status,
        actor: UserId,
        note: Option<&str>,
    ) -> Result<Complaint> {
        let span = start_complaint_span("transition", id);

        async {
            let before = self.get(id).await?;
            let after = transition(&before, to, actor, note, Utc::now())?;
            self.commit(&before, &after).await?;

            let kind = if to == Status::Resolved {
                EventKind::ComplaintResolved {
                    complaint_id: id,
                    department_id: after.assigned_to,
                    status: to,
                }
            } else {
                EventKind::ComplaintStatusUpdated {
                    complaint_id: id,
                    old_status: before.status,
                    new_status: to,
                }
            };
            publish_event(self.bus.as_ref(), kind).await?;
            Ok(after)
        }
        .instrument(span)
        .await
    }

    async fn commit(&self, before: &Complaint, after: &Complaint) -> Result<()> {
        let change = StatusChange::between(before, after)
            .ok_or_else(|| Error::Other(format!("complaint {} has no pending change", after.id)))?;

        // Retries resend the same history entry, which the store treats as
        // already applied.
        let started = Instant::now();
        let committed = self
            .retry
            .run("complaint.commit", || self.store.commit_change(&change))
            .await;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", "commit"),
                KeyValue::new("ok", committed.is_ok()),
            ],
        );
        committed?;

        let (from, to) = (before.status.as_str(), after.status.as_str());
        record_state_transition(&tracing::Span::current(), from, to);
        metrics::complaint_transitions()
            .add(1, &[KeyValue::new("from", from), KeyValue::new("to", to)]);
        info!(complaint_id = %after.id, from, to, "status changed");
        Ok(())
    }
}
