//! Integration tests for the complaint status lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cityfix::error::Error;
use cityfix::event::{EventKind, Topic};
use cityfix::lifecycle::{self, ComplaintService};
use cityfix::model::*;
use cityfix::relay::MemoryBus;
use cityfix::retry::RetryPolicy;
use cityfix::store::memory::MemoryStore;
use cityfix::store::{ComplaintStore, DepartmentDirectory, StatusChange};

const ALLOWED: [(Status, Status); 7] = [
    (Status::Open, Status::Assigned),
    (Status::Assigned, Status::InProgress),
    (Status::Assigned, Status::Open),
    (Status::InProgress, Status::Resolved),
    (Status::InProgress, Status::Assigned),
    (Status::Resolved, Status::Closed),
    (Status::Resolved, Status::InProgress),
];

/// A complaint sitting in `status`, assigned unless it is open.
fn complaint_in(status: Status) -> Complaint {
    let mut c = lifecycle::file(
        NewComplaint::new("Overflowing bin", Category::Garbage, UserId::new()),
        Utc::now(),
    )
    .unwrap();
    c.status = status;
    if status != Status::Open {
        c.assigned_to = Some(DepartmentId::new());
    }
    c
}

// ---------------------------------------------------------------------------
// Pure state machine
// ---------------------------------------------------------------------------

#[test]
fn transition_table_matches_status_rules() {
    for from in Status::ALL {
        for to in Status::ALL {
            assert_eq!(
                from.can_transition_to(to),
                ALLOWED.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn every_allowed_transition_appends_one_matching_entry() {
    let actor = UserId::new();
    for (from, to) in ALLOWED {
        let before = complaint_in(from);
        let after = if (from, to) == (Status::Open, Status::Assigned) {
            lifecycle::assign(&before, DepartmentId::new(), actor, Some("note"), Utc::now())
        } else {
            lifecycle::transition(&before, to, actor, Some("note"), Utc::now())
        }
        .unwrap();

        assert_eq!(after.status, to);
        assert_eq!(after.history.len(), before.history.len() + 1);
        let entry = after.last_change().unwrap();
        assert_eq!(entry.old_status, Some(from));
        assert_eq!(entry.new_status, to);
        assert_eq!(entry.changed_by, actor);
        assert_eq!(entry.note.as_deref(), Some("note"));
    }
}

#[test]
fn every_disallowed_transition_fails_and_leaves_complaint_unchanged() {
    for from in Status::ALL {
        for to in Status::ALL {
            if ALLOWED.contains(&(from, to)) {
                continue;
            }
            let before = complaint_in(from);
            let snapshot = before.clone();
            let err = lifecycle::transition(&before, to, UserId::new(), None, Utc::now())
                .unwrap_err();
            assert!(
                matches!(err, Error::InvalidTransition { from: f, to: t } if f == from && t == to),
                "{from} -> {to}: {err:?}"
            );
            assert_eq!(before, snapshot);
        }
    }
}

#[test]
fn plain_transition_cannot_leave_open_without_an_assignee() {
    let before = complaint_in(Status::Open);
    let err = lifecycle::transition(&before, Status::Assigned, UserId::new(), None, Utc::now())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[test]
fn closed_is_terminal() {
    assert!(Status::Closed.is_terminal());
    for to in Status::ALL {
        assert!(!Status::Closed.can_transition_to(to));
    }
}

#[test]
fn assign_only_from_open() {
    let dept = DepartmentId::new();
    let open = complaint_in(Status::Open);
    let assigned = lifecycle::assign(&open, dept, UserId::SYSTEM, None, Utc::now()).unwrap();

    assert_eq!(assigned.status, Status::Assigned);
    assert_eq!(assigned.assigned_to, Some(dept));
    assert_eq!(assigned.history.len(), open.history.len() + 1);
    let entry = assigned.last_change().unwrap();
    assert_eq!(entry.old_status, Some(Status::Open));
    assert_eq!(entry.new_status, Status::Assigned);

    for status in [
        Status::Assigned,
        Status::InProgress,
        Status::Resolved,
        Status::Closed,
    ] {
        let c = complaint_in(status);
        let err = lifecycle::assign(&c, dept, UserId::SYSTEM, None, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }), "{status}");
    }
}

// ---------------------------------------------------------------------------
// Persisted lifecycle
// ---------------------------------------------------------------------------

struct Harness {
    store: MemoryStore,
    bus: MemoryBus,
    service: ComplaintService,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let service = ComplaintService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        RetryPolicy::default(),
    );
    Harness {
        store,
        bus,
        service,
    }
}

async fn department(store: &MemoryStore) -> Department {
    store
        .create_department(NewDepartment::new("Sanitation", "bins@city.test").category(Category::Garbage))
        .await
        .unwrap()
}

#[tokio::test]
async fn filing_persists_and_publishes_created() {
    let h = harness();
    let reporter = UserId::new();
    let filed = h
        .service
        .file(
            NewComplaint::new("Overflowing bin", Category::Garbage, reporter)
                .location(Location::point(52.52, 13.405).address("Alexanderplatz")),
        )
        .await
        .unwrap();

    let stored = h.store.get_complaint(filed.id).await.unwrap();
    assert_eq!(stored, filed);
    assert_eq!(stored.history[0].note.as_deref(), Some("Complaint created"));

    let created = h.bus.published_on(Topic::ComplaintCreated).await;
    assert_eq!(created.len(), 1);
    match &created[0].kind {
        EventKind::ComplaintCreated {
            complaint_id,
            reported_by,
            ..
        } => {
            assert_eq!(*complaint_id, filed.id);
            assert_eq!(*reported_by, reporter);
        }
        other => panic!("expected ComplaintCreated, got {other:?}"),
    }
}

#[tokio::test]
async fn full_lifecycle_publishes_matching_events() {
    let h = harness();
    let dept = department(&h.store).await;
    let staff = UserId::new();
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    h.service.assign(c.id, dept.id, staff, None).await.unwrap();
    h.service
        .transition(c.id, Status::InProgress, staff, Some("crew dispatched"))
        .await
        .unwrap();
    h.service
        .transition(c.id, Status::Resolved, staff, None)
        .await
        .unwrap();
    let closed = h
        .service
        .transition(c.id, Status::Closed, staff, None)
        .await
        .unwrap();

    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.history.len(), 5);
    assert_eq!(h.store.get_complaint(c.id).await.unwrap(), closed);

    let topics: Vec<Topic> = h.bus.published().await.iter().map(|e| e.topic()).collect();
    assert_eq!(
        topics,
        [
            Topic::ComplaintCreated,
            Topic::ComplaintAssigned,
            Topic::ComplaintStatusUpdated,
            Topic::ComplaintResolved,
            Topic::ComplaintStatusUpdated,
        ]
    );
    match &h.bus.published_on(Topic::ComplaintResolved).await[0].kind {
        EventKind::ComplaintResolved { department_id, .. } => {
            assert_eq!(*department_id, Some(dept.id))
        }
        other => panic!("expected ComplaintResolved, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_transition_is_surfaced_and_nothing_is_written() {
    let h = harness();
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    let err = h
        .service
        .transition(c.id, Status::Resolved, UserId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(h.store.get_complaint(c.id).await.unwrap(), c);
    assert_eq!(h.bus.published().await.len(), 1);
}

#[tokio::test]
async fn opening_edge_to_assigned_requires_an_assignee() {
    let h = harness();
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();
    let err = h
        .service
        .transition(c.id, Status::Assigned, UserId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn assign_to_unknown_department_is_not_found() {
    let h = harness();
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();
    let err = h
        .service
        .assign(c.id, DepartmentId::new(), UserId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn unknown_complaint_is_not_found() {
    let h = harness();
    let err = h.service.get(ComplaintId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = h.service.delete(ComplaintId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn stale_writer_loses_with_invalid_transition() {
    let h = harness();
    let dept = department(&h.store).await;
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    // Two writers read the same OPEN complaint.
    let first = lifecycle::assign(&c, dept.id, UserId::new(), None, Utc::now()).unwrap();
    let second = lifecycle::assign(&c, DepartmentId::new(), UserId::new(), None, Utc::now()).unwrap();

    let change = StatusChange::between(&c, &first).unwrap();
    h.store.commit_change(&change).await.unwrap();

    let change = StatusChange::between(&c, &second).unwrap();
    let err = h.store.commit_change(&change).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: Status::Assigned,
            to: Status::Assigned
        }
    ));

    let stored = h.store.get_complaint(c.id).await.unwrap();
    assert_eq!(stored.assigned_to, Some(dept.id));
    assert_eq!(stored.history.len(), 2);
}

#[tokio::test]
async fn publish_failure_keeps_committed_change() {
    let h = harness();
    let dept = department(&h.store).await;
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    h.bus.set_failing(true).await;
    let err = h
        .service
        .assign(c.id, dept.id, UserId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Publish(_)));

    let stored = h.store.get_complaint(c.id).await.unwrap();
    assert_eq!(stored.status, Status::Assigned);
    assert_eq!(stored.assigned_to, Some(dept.id));
}

#[tokio::test]
async fn apply_assignment_is_idempotent() {
    let h = harness();
    let dept = department(&h.store).await;
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    let once = h
        .service
        .apply_assignment(c.id, dept.id, UserId::SYSTEM)
        .await
        .unwrap();
    let twice = h
        .service
        .apply_assignment(c.id, dept.id, UserId::SYSTEM)
        .await
        .unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.history.len(), 2);
    assert!(twice.history[1].changed_by.is_system());

    // No event: the routing side already announced this assignment.
    assert!(h.bus.published_on(Topic::ComplaintAssigned).await.is_empty());
}

#[tokio::test]
async fn search_filters_and_pages_newest_first() {
    let h = harness();
    let reporter = UserId::new();
    let mut filed = Vec::new();
    for i in 0..5 {
        let category = if i % 2 == 0 {
            Category::Garbage
        } else {
            Category::Noise
        };
        filed.push(
            h.service
                .file(NewComplaint::new(format!("c{i}"), category, reporter))
                .await
                .unwrap(),
        );
    }

    let garbage = h
        .service
        .search(&ComplaintFilter {
            category: Some(Category::Garbage),
            ..ComplaintFilter::default()
        })
        .await
        .unwrap();
    let titles: Vec<&str> = garbage.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, ["c4", "c2", "c0"]);

    let second_page = h
        .service
        .search(&ComplaintFilter {
            reported_by: Some(reporter),
            page: Some(1),
            size: Some(2),
            ..ComplaintFilter::default()
        })
        .await
        .unwrap();
    let titles: Vec<&str> = second_page.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, ["c2", "c1"]);

    h.service.delete(filed[0].id).await.unwrap();
    let all = h
        .service
        .search(&ComplaintFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

/// Commits through the inner store, then stalls past the retry timeout on
/// the first commit, as a database that applied the write but whose reply
/// was lost would.
struct StallAfterCommit {
    inner: MemoryStore,
    stalled: AtomicBool,
    commits: AtomicU32,
}

#[async_trait]
impl ComplaintStore for StallAfterCommit {
    async fn insert_complaint(&self, complaint: &Complaint) -> cityfix::error::Result<()> {
        self.inner.insert_complaint(complaint).await
    }

    async fn get_complaint(&self, id: ComplaintId) -> cityfix::error::Result<Complaint> {
        self.inner.get_complaint(id).await
    }

    async fn commit_change(&self, change: &StatusChange) -> cityfix::error::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit_change(change).await?;
        if !self.stalled.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    async fn search_complaints(
        &self,
        filter: &ComplaintFilter,
    ) -> cityfix::error::Result<Vec<Complaint>> {
        self.inner.search_complaints(filter).await
    }

    async fn delete_complaint(&self, id: ComplaintId) -> cityfix::error::Result<()> {
        self.inner.delete_complaint(id).await
    }
}

#[tokio::test]
async fn commit_that_landed_before_timeout_is_not_reported_as_conflict() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let dept = department(&store).await;
    let staff = UserId::new();

    // Walk the complaint to InProgress before the stalling store is in play.
    let plain = ComplaintService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        RetryPolicy::default(),
    );
    let c = plain
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();
    plain.assign(c.id, dept.id, staff, None).await.unwrap();
    plain
        .transition(c.id, Status::InProgress, staff, None)
        .await
        .unwrap();

    let stalling = Arc::new(StallAfterCommit {
        inner: store.clone(),
        stalled: AtomicBool::new(false),
        commits: AtomicU32::new(0),
    });
    let service = ComplaintService::new(
        stalling.clone(),
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            timeout: Duration::from_millis(50),
        },
    );

    let resolved = service
        .transition(c.id, Status::Resolved, staff, None)
        .await
        .unwrap();
    assert_eq!(resolved.status, Status::Resolved);
    assert_eq!(stalling.commits.load(Ordering::SeqCst), 2);

    let stored = store.get_complaint(c.id).await.unwrap();
    assert_eq!(stored.status, Status::Resolved);
    assert_eq!(stored.history.len(), 4);
    let ids: std::collections::HashSet<_> = stored.history.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), stored.history.len());

    let resolved_events = bus.published_on(Topic::ComplaintResolved).await;
    assert_eq!(resolved_events.len(), 1);
    match &resolved_events[0].kind {
        EventKind::ComplaintResolved { department_id, .. } => {
            assert_eq!(*department_id, Some(dept.id))
        }
        other => panic!("expected ComplaintResolved, got {other:?}"),
    }
}

#[tokio::test]
async fn recommitting_a_recorded_change_is_a_no_op() {
    let h = harness();
    let dept = department(&h.store).await;
    let c = h
        .service
        .file(NewComplaint::new("Bin", Category::Garbage, UserId::new()))
        .await
        .unwrap();

    let assigned = lifecycle::assign(&c, dept.id, UserId::new(), None, Utc::now()).unwrap();
    let change = StatusChange::between(&c, &assigned).unwrap();
    h.store.commit_change(&change).await.unwrap();
    h.store.commit_change(&change).await.unwrap();

    let stored = h.store.get_complaint(c.id).await.unwrap();
    assert_eq!(stored, assigned);
}
