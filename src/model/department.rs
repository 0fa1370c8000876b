//! Departments and routing request/response types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, DepartmentId, Location};
use crate::error::{Error, Result};

/// A municipal department that can receive complaints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    /// Unique across departments.
    pub name: String,
    /// Never empty.
    pub categories: BTreeSet<Category>,
    pub zone: Option<String>,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub endpoint: Option<String>,
    pub location: Option<Location>,
    /// Informational only. Routing does not enforce it.
    pub capacity: Option<i32>,
    /// `None` is treated as zero. Only the workload ledger writes this.
    pub current_workload: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Department {
    pub fn handles(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    pub fn workload(&self) -> i32 {
        self.current_workload.unwrap_or(0)
    }

    pub fn in_zone(&self, zone: &str) -> bool {
        self.zone.as_deref() == Some(zone)
    }
}

/// Builder for registering a department.
#[derive(Debug, Clone)]
pub struct NewDepartment {
    pub(crate) name: String,
    pub(crate) categories: BTreeSet<Category>,
    pub(crate) zone: Option<String>,
    pub(crate) contact_email: String,
    pub(crate) contact_phone: Option<String>,
    pub(crate) endpoint: Option<String>,
    pub(crate) location: Option<Location>,
    pub(crate) capacity: Option<i32>,
    pub(crate) initial_workload: i32,
}

impl NewDepartment {
    pub fn new(name: impl Into<String>, contact_email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            categories: BTreeSet::new(),
            zone: None,
            contact_email: contact_email.into(),
            contact_phone: None,
            endpoint: None,
            location: None,
            capacity: None,
            initial_workload: 0,
        }
    }

    pub fn category(mut self, category: Category) -> Self {
        self.categories.insert(category);
        self
    }

    pub fn categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn contact_phone(mut self, phone: impl Into<String>) -> Self {
        self.contact_phone = Some(phone.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn capacity(mut self, capacity: i32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Seed the workload counter, e.g. when migrating existing assignments.
    pub fn initial_workload(mut self, workload: i32) -> Self {
        self.initial_workload = workload.max(0);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("department name must not be empty".into()));
        }
        if self.categories.is_empty() {
            return Err(Error::Validation(format!(
                "department {} must handle at least one category",
                self.name
            )));
        }
        Ok(())
    }

    /// Check invariants and materialize the department.
    pub(crate) fn build(self, now: DateTime<Utc>) -> Result<Department> {
        self.validate()?;
        Ok(Department {
            id: DepartmentId::new(),
            name: self.name,
            categories: self.categories,
            zone: self.zone,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            endpoint: self.endpoint,
            location: self.location,
            capacity: self.capacity,
            current_workload: Some(self.initial_workload),
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite the descriptive fields of `existing`.
    ///
    /// Identity, workload and creation time are kept. The location is only
    /// replaced when one was given. The initial workload is ignored.
    pub(crate) fn apply(self, existing: &Department, now: DateTime<Utc>) -> Result<Department> {
        self.validate()?;
        Ok(Department {
            id: existing.id,
            name: self.name,
            categories: self.categories,
            zone: self.zone,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            endpoint: self.endpoint,
            location: self.location.or_else(|| existing.location.clone()),
            capacity: self.capacity,
            current_workload: existing.current_workload,
            created_at: existing.created_at,
            updated_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// What the routing engine is asked. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingQuery {
    pub category: Category,
    pub location: Option<Location>,
    pub zone: Option<String>,
}

impl RoutingQuery {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            location: None,
            zone: None,
        }
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

/// The department a complaint was sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedDepartment {
    pub department_id: DepartmentId,
    pub name: String,
    pub endpoint: Option<String>,
    pub contact_email: String,
    pub zone: Option<String>,
}

impl From<&Department> for RoutedDepartment {
    fn from(d: &Department) -> Self {
        Self {
            department_id: d.id,
            name: d.name.clone(),
            endpoint: d.endpoint.clone(),
            contact_email: d.contact_email.clone(),
            zone: d.zone.clone(),
        }
    }
}

/// Outcome of a routing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// An eligible department was selected.
    Routed(RoutedDepartment),
    /// Nothing matched; the configured catch-all department took it.
    Fallback(RoutedDepartment),
    /// Nobody can take it. Needs escalation, not a fault.
    Unassigned,
}

impl RoutingDecision {
    pub fn department(&self) -> Option<&RoutedDepartment> {
        match self {
            RoutingDecision::Routed(d) | RoutingDecision::Fallback(d) => Some(d),
            RoutingDecision::Unassigned => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            RoutingDecision::Routed(_) => "routed",
            RoutingDecision::Fallback(_) => "fallback",
            RoutingDecision::Unassigned => "unassigned",
        }
    }
}
