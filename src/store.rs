//! Storage seams.
//!
//! The routing engine, the lifecycle service and the event handlers only
//! talk to these traits. [`crate::db::Db`] implements them on Postgres,
//! [`memory::MemoryStore`] in process.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

/// Read-mostly view of the departments. Results are snapshots.
#[async_trait]
pub trait DepartmentDirectory: Send + Sync {
    /// Register a department. Names are unique.
    async fn create_department(&self, new: NewDepartment) -> Result<Department>;

    async fn find_by_id(&self, id: DepartmentId) -> Result<Option<Department>>;

    /// Exact, case-sensitive name match.
    async fn find_by_name(&self, name: &str) -> Result<Option<Department>>;

    /// Departments handling `category`, oldest registration first.
    async fn find_by_category(&self, category: Category) -> Result<Vec<Department>>;

    async fn find_by_category_and_zone(
        &self,
        category: Category,
        zone: &str,
    ) -> Result<Vec<Department>>;

    async fn list_departments(&self) -> Result<Vec<Department>>;

    /// Replace the descriptive fields of a department.
    ///
    /// The workload counter is untouched. Renaming onto another
    /// department's name is a `Validation` error; unknown ids are `NotFound`.
    async fn update_department(
        &self,
        id: DepartmentId,
        update: NewDepartment,
    ) -> Result<Department>;

    /// `NotFound` for unknown ids. Complaints keep their stale assignee.
    async fn delete_department(&self, id: DepartmentId) -> Result<()>;
}

/// Per-department workload counter.
///
/// Each call is one atomic read-modify-write. Concurrent increments on the
/// same department never lose an update.
///
/// Every call carries a charge key. A key is applied at most once: repeating
/// a call with a key the ledger has already seen changes nothing and returns
/// the current workload. Callers retrying after an ambiguous failure must
/// reuse the key of the first attempt.
#[async_trait]
pub trait WorkloadLedger: Send + Sync {
    /// Add one. Unset counts as zero. Returns the new workload.
    async fn increment(&self, id: DepartmentId, charge: Uuid) -> Result<i32>;

    /// Subtract one, floored at zero. Returns the new workload.
    async fn decrement(&self, id: DepartmentId, charge: Uuid) -> Result<i32>;
}

/// Complaint persistence.
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Insert a freshly filed complaint together with its history.
    async fn insert_complaint(&self, complaint: &Complaint) -> Result<()>;

    /// Load a complaint with its full history. `NotFound` if absent.
    async fn get_complaint(&self, id: ComplaintId) -> Result<Complaint>;

    /// Apply a status change and its history entry as one unit.
    ///
    /// Fails with `InvalidTransition` when the stored status no longer
    /// equals `change.expected`, and with `NotFound` for unknown ids.
    /// Committing a change whose history entry is already recorded is a
    /// no-op that succeeds.
    async fn commit_change(&self, change: &StatusChange) -> Result<()>;

    /// Newest first, paged per the filter.
    async fn search_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>>;

    async fn delete_complaint(&self, id: ComplaintId) -> Result<()>;
}

/// Notification persistence.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    /// Newest first. `read` restricts to read or unread notifications.
    async fn notifications_for_user(
        &self,
        user_id: UserId,
        read: Option<bool>,
    ) -> Result<Vec<Notification>>;

    /// `NotFound` for unknown ids. Marking twice is harmless.
    async fn mark_read(&self, id: Uuid) -> Result<Notification>;

    /// Returns how many notifications changed.
    async fn mark_all_read(&self, user_id: UserId) -> Result<u64>;

    async fn count_unread(&self, user_id: UserId) -> Result<u64>;
}

/// Everything a store must write for one status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub complaint_id: ComplaintId,
    /// Optimistic concurrency guard.
    pub expected: Status,
    pub new_status: Status,
    pub assigned_to: Option<DepartmentId>,
    pub entry: StatusHistoryEntry,
    pub updated_at: DateTime<Utc>,
}

impl StatusChange {
    /// Derive the write set from a complaint before and after a change.
    ///
    /// `after` must carry exactly one more history entry than `before`.
    pub fn between(before: &Complaint, after: &Complaint) -> Option<Self> {
        if after.history.len() != before.history.len() + 1 {
            return None;
        }
        let entry = after.last_change()?.clone();
        Some(Self {
            complaint_id: after.id,
            expected: before.status,
            new_status: after.status,
            assigned_to: after.assigned_to,
            entry,
            updated_at: after.updated_at,
        })
    }
}
