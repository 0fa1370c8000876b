//! In-process store for tests and local runs.
//!
//! One `RwLock` guards all state, so every trait method is atomic with
//! respect to every other: a status change and its history entry land
//! together, and workload updates never interleave.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ComplaintStore, DepartmentDirectory, NotificationStore, StatusChange, WorkloadLedger};
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Debug, Default)]
struct Inner {
    /// Registration order.
    departments: Vec<Department>,
    /// Filing order.
    complaints: Vec<Complaint>,
    notifications: Vec<Notification>,
    /// Ledger charge keys already applied.
    charges: HashSet<Uuid>,
}

impl Inner {
    fn department_mut(&mut self, id: DepartmentId) -> Result<&mut Department> {
        self.departments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::NotFound(format!("department {id}")))
    }

    /// Apply `step` to a department's workload unless `charge` was seen.
    fn charge(&mut self, id: DepartmentId, charge: Uuid, step: fn(i32) -> i32) -> Result<i32> {
        let fresh = !self.charges.contains(&charge);
        let department = self.department_mut(id)?;
        if !fresh {
            return Ok(department.workload());
        }
        let next = step(department.workload());
        department.current_workload = Some(next);
        department.updated_at = Utc::now();
        self.charges.insert(charge);
        Ok(next)
    }
}

/// Shared in-memory state. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current workload of a department, for inspection.
    pub async fn workload(&self, id: DepartmentId) -> Option<i32> {
        let inner = self.inner.read().await;
        inner
            .departments
            .iter()
            .find(|d| d.id == id)
            .map(Department::workload)
    }
}

#[async_trait]
impl DepartmentDirectory for MemoryStore {
    async fn create_department(&self, new: NewDepartment) -> Result<Department> {
        let department = new.build(Utc::now())?;
        let mut inner = self.inner.write().await;
        if inner.departments.iter().any(|d| d.name == department.name) {
            return Err(Error::Validation(format!(
                "department with name {} already exists",
                department.name
            )));
        }
        inner.departments.push(department.clone());
        Ok(department)
    }

    async fn find_by_id(&self, id: DepartmentId) -> Result<Option<Department>> {
        let inner = self.inner.read().await;
        Ok(inner.departments.iter().find(|d| d.id == id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Department>> {
        let inner = self.inner.read().await;
        Ok(inner.departments.iter().find(|d| d.name == name).cloned())
    }

    async fn find_by_category(&self, category: Category) -> Result<Vec<Department>> {
        let inner = self.inner.read().await;
        Ok(inner
            .departments
            .iter()
            .filter(|d| d.handles(category))
            .cloned()
            .collect())
    }

    async fn find_by_category_and_zone(
        &self,
        category: Category,
        zone: &str,
    ) -> Result<Vec<Department>> {
        let inner = self.inner.read().await;
        Ok(inner
            .departments
            .iter()
            .filter(|d| d.handles(category) && d.in_zone(zone))
            .cloned()
            .collect())
    }

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let inner = self.inner.read().await;
        let mut all = inner.departments.clone();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn update_department(
        &self,
        id: DepartmentId,
        update: NewDepartment,
    ) -> Result<Department> {
        let mut inner = self.inner.write().await;
        if !inner.departments.iter().any(|d| d.id == id) {
            return Err(Error::NotFound(format!("department {id}")));
        }
        if inner
            .departments
            .iter()
            .any(|d| d.id != id && d.name == update.name)
        {
            return Err(Error::Validation(format!(
                "department with name {} already exists",
                update.name
            )));
        }
        let department = inner.department_mut(id)?;
        *department = update.apply(department, Utc::now())?;
        Ok(department.clone())
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.departments.len();
        inner.departments.retain(|d| d.id != id);
        if inner.departments.len() == before {
            return Err(Error::NotFound(format!("department {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadLedger for MemoryStore {
    async fn increment(&self, id: DepartmentId, charge: Uuid) -> Result<i32> {
        let mut inner = self.inner.write().await;
        inner.charge(id, charge, |w| w.saturating_add(1))
    }

    async fn decrement(&self, id: DepartmentId, charge: Uuid) -> Result<i32> {
        let mut inner = self.inner.write().await;
        inner.charge(id, charge, |w| (w - 1).max(0))
    }
}

#[async_trait]
impl ComplaintStore for MemoryStore {
    async fn insert_complaint(&self, complaint: &Complaint) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.complaints.iter().any(|c| c.id == complaint.id) {
            return Err(Error::Validation(format!(
                "complaint {} already exists",
                complaint.id
            )));
        }
        inner.complaints.push(complaint.clone());
        Ok(())
    }

    async fn get_complaint(&self, id: ComplaintId) -> Result<Complaint> {
        let inner = self.inner.read().await;
        inner
            .complaints
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("complaint {id}")))
    }

    async fn commit_change(&self, change: &StatusChange) -> Result<()> {
        let mut inner = self.inner.write().await;
        let complaint = inner
            .complaints
            .iter_mut()
            .find(|c| c.id == change.complaint_id)
            .ok_or_else(|| Error::NotFound(format!("complaint {}", change.complaint_id)))?;

        if complaint.history.iter().any(|e| e.id == change.entry.id) {
            return Ok(());
        }
        if complaint.status != change.expected {
            return Err(Error::InvalidTransition {
                from: complaint.status,
                to: change.new_status,
            });
        }

        complaint.status = change.new_status;
        complaint.assigned_to = change.assigned_to;
        complaint.updated_at = change.updated_at;
        complaint.history.push(change.entry.clone());
        Ok(())
    }

    async fn search_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>> {
        let inner = self.inner.read().await;
        // Filing order reversed gives newest first with a stable tie-break.
        Ok(inner
            .complaints
            .iter()
            .rev()
            .filter(|c| filter.matches(c))
            .skip(filter.offset() as usize)
            .take(filter.size() as usize)
            .cloned()
            .collect())
    }

    async fn delete_complaint(&self, id: ComplaintId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.complaints.len();
        inner.complaints.retain(|c| c.id != id);
        if inner.complaints.len() == before {
            return Err(Error::NotFound(format!("complaint {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.notifications.push(notification.clone());
        Ok(())
    }

    async fn notifications_for_user(
        &self,
        user_id: UserId,
        read: Option<bool>,
    ) -> Result<Vec<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && read.is_none_or(|r| n.read == r))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid) -> Result<Notification> {
        let mut inner = self.inner.write().await;
        let notification = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::NotFound(format!("notification {id}")))?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for n in inner
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.read)
        {
            n.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn count_unread(&self, user_id: UserId) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roads() -> NewDepartment {
        NewDepartment::new("Roads", "roads@city.example").category(Category::Pothole)
    }

    #[tokio::test]
    async fn duplicate_department_name_is_rejected() {
        let store = MemoryStore::new();
        store.create_department(roads()).await.unwrap();
        let err = store.create_department(roads()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn department_without_categories_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .create_department(NewDepartment::new("Empty", "e@city.example"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_department_workload_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .increment(DepartmentId::new(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store
            .decrement(DepartmentId::new(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn repeated_charge_key_is_applied_once() {
        let store = MemoryStore::new();
        let d = store.create_department(roads()).await.unwrap();
        let key = Uuid::new_v4();
        assert_eq!(store.increment(d.id, key).await.unwrap(), 1);
        assert_eq!(store.increment(d.id, key).await.unwrap(), 1);
        assert_eq!(store.increment(d.id, Uuid::new_v4()).await.unwrap(), 2);
        assert_eq!(store.workload(d.id).await, Some(2));
    }

    #[tokio::test]
    async fn rename_onto_existing_name_is_rejected() {
        let store = MemoryStore::new();
        store.create_department(roads()).await.unwrap();
        let parks = store
            .create_department(
                NewDepartment::new("Parks", "parks@city.example").category(Category::Graffiti),
            )
            .await
            .unwrap();
        let err = store
            .update_department(
                parks.id,
                NewDepartment::new("Roads", "parks@city.example").category(Category::Graffiti),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");

        // Keeping its own name is fine.
        let same = store
            .update_department(
                parks.id,
                NewDepartment::new("Parks", "green@city.example").category(Category::Graffiti),
            )
            .await
            .unwrap();
        assert_eq!(same.contact_email, "green@city.example");
    }
}
