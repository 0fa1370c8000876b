//! Complaint records and their status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Category, ComplaintId, DepartmentId, Location, Priority, Status, UserId};

/// A citizen complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: Status,
    pub location: Location,
    pub reported_by: UserId,
    /// Owning department. Set iff status is not `Open`.
    pub assigned_to: Option<DepartmentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only, oldest first.
    pub history: Vec<StatusHistoryEntry>,
}

impl Complaint {
    /// The most recent history entry.
    pub fn last_change(&self) -> Option<&StatusHistoryEntry> {
        self.history.last()
    }
}

/// One recorded status change. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    /// `None` only for the creation entry.
    pub old_status: Option<Status>,
    pub new_status: Status,
    pub changed_by: UserId,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for filing a complaint.
#[derive(Debug, Clone)]
pub struct NewComplaint {
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) category: Category,
    pub(crate) priority: Priority,
    pub(crate) location: Location,
    pub(crate) reported_by: UserId,
}

impl NewComplaint {
    pub fn new(title: impl Into<String>, category: Category, reported_by: UserId) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category,
            priority: Priority::Medium,
            location: Location::default(),
            reported_by,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Filters for listing complaints. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ComplaintFilter {
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub reported_by: Option<UserId>,
    pub assigned_to: Option<DepartmentId>,
    /// Zero-based page. Defaults to 0.
    pub page: Option<u32>,
    /// Page size. Defaults to 10.
    pub size: Option<u32>,
}

impl ComplaintFilter {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(0)
    }

    pub fn size(&self) -> u32 {
        self.size.unwrap_or(Self::DEFAULT_PAGE_SIZE).max(1)
    }

    pub fn offset(&self) -> u64 {
        self.page() as u64 * self.size() as u64
    }

    pub fn matches(&self, c: &Complaint) -> bool {
        self.status.is_none_or(|s| c.status == s)
            && self.category.is_none_or(|cat| c.category == cat)
            && self.reported_by.is_none_or(|r| c.reported_by == r)
            && self.assigned_to.is_none_or(|a| c.assigned_to == Some(a))
    }
}
