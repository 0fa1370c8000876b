//! Complaint persistence with status history.
//!
//! A status change and its history row are written in one transaction,
//! guarded by the previous status, so no reader ever sees one without the
//! other and concurrent writers cannot overwrite each other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Db, location_from_columns};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{ComplaintStore, StatusChange};

const SELECT_COMPLAINT: &str = "SELECT id, title, description, category, priority, status, latitude, longitude, address, reported_by, assigned_to, created_at, updated_at FROM complaints";

impl Db {
    async fn history_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<StatusHistoryEntry>>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT complaint_id, id, old_status, new_status, changed_by, note, changed_at
             FROM status_history WHERE complaint_id = ANY($1) ORDER BY seq",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_complaint: HashMap<Uuid, Vec<StatusHistoryEntry>> = HashMap::new();
        for row in rows {
            let complaint_id = row.complaint_id;
            by_complaint
                .entry(complaint_id)
                .or_default()
                .push(row.try_into_entry()?);
        }
        Ok(by_complaint)
    }
}

async fn insert_history(
    conn: &mut sqlx::PgConnection,
    complaint_id: ComplaintId,
    entry: &StatusHistoryEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO status_history (id, complaint_id, old_status, new_status, changed_by, note, changed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(complaint_id.0)
    .bind(entry.old_status.map(Status::as_str))
    .bind(entry.new_status.as_str())
    .bind(entry.changed_by.0)
    .bind(&entry.note)
    .bind(entry.timestamp)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ComplaintStore for Db {
    async fn insert_complaint(&self, complaint: &Complaint) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO complaints (id, title, description, category, priority, status, latitude, longitude, address, reported_by, assigned_to, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(complaint.id.0)
        .bind(&complaint.title)
        .bind(&complaint.description)
        .bind(complaint.category.as_str())
        .bind(complaint.priority.as_str())
        .bind(complaint.status.as_str())
        .bind(complaint.location.latitude)
        .bind(complaint.location.longitude)
        .bind(&complaint.location.address)
        .bind(complaint.reported_by.0)
        .bind(complaint.assigned_to.map(|d| d.0))
        .bind(complaint.created_at)
        .bind(complaint.updated_at)
        .execute(&mut *tx)
        .await?;

        for entry in &complaint.history {
            insert_history(&mut tx, complaint.id, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_complaint(&self, id: ComplaintId) -> Result<Complaint> {
        let row: Option<ComplaintRow> =
            sqlx::query_as(&format!("{SELECT_COMPLAINT} WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or_else(|| Error::NotFound(format!("complaint {id}")))?;

        let mut history = self.history_for(&[id.0]).await?;
        row.try_into_complaint(history.remove(&id.0).unwrap_or_default())
    }

    async fn commit_change(&self, change: &StatusChange) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A retry of a change that already landed.
        let recorded: Option<(i64,)> =
            sqlx::query_as("SELECT seq FROM status_history WHERE id = $1")
                .bind(change.entry.id)
                .fetch_optional(&mut *tx)
                .await?;
        if recorded.is_some() {
            return Ok(());
        }

        let rows_affected = sqlx::query(
            "UPDATE complaints SET status = $1, assigned_to = $2, updated_at = $3
             WHERE id = $4 AND status = $5",
        )
        .bind(change.new_status.as_str())
        .bind(change.assigned_to.map(|d| d.0))
        .bind(change.updated_at)
        .bind(change.complaint_id.0)
        .bind(change.expected.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Lost the race, or the complaint is gone. Dropping tx rolls back.
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM complaints WHERE id = $1")
                    .bind(change.complaint_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match current {
                None => Err(Error::NotFound(format!("complaint {}", change.complaint_id))),
                Some((status,)) => Err(Error::InvalidTransition {
                    from: status.parse()?,
                    to: change.new_status,
                }),
            };
        }

        insert_history(&mut tx, change.complaint_id, &change.entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn search_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>> {
        let rows: Vec<ComplaintRow> = sqlx::query_as(&format!(
            "{SELECT_COMPLAINT}
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR category = $2)
               AND ($3::uuid IS NULL OR reported_by = $3)
               AND ($4::uuid IS NULL OR assigned_to = $4)
             ORDER BY created_at DESC, id DESC
             LIMIT $5 OFFSET $6"
        ))
        .bind(filter.status.map(Status::as_str))
        .bind(filter.category.map(Category::as_str))
        .bind(filter.reported_by.map(|u| u.0))
        .bind(filter.assigned_to.map(|d| d.0))
        .bind(filter.size() as i64)
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut history = self.history_for(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let entries = history.remove(&row.id).unwrap_or_default();
                row.try_into_complaint(entries)
            })
            .collect()
    }

    async fn delete_complaint(&self, id: ComplaintId) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM complaints WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("complaint {id}")));
        }
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ComplaintRow {
    id: Uuid,
    title: String,
    description: String,
    category: String,
    priority: String,
    status: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
    reported_by: Uuid,
    assigned_to: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ComplaintRow {
    fn try_into_complaint(self, history: Vec<StatusHistoryEntry>) -> Result<Complaint> {
        Ok(Complaint {
            id: ComplaintId(self.id),
            title: self.title,
            description: self.description,
            category: self.category.parse()?,
            priority: self.priority.parse()?,
            status: self.status.parse()?,
            location: location_from_columns(self.latitude, self.longitude, self.address)
                .unwrap_or_default(),
            reported_by: UserId(self.reported_by),
            assigned_to: self.assigned_to.map(DepartmentId),
            created_at: self.created_at,
            updated_at: self.updated_at,
            history,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    complaint_id: Uuid,
    id: Uuid,
    old_status: Option<String>,
    new_status: String,
    changed_by: Uuid,
    note: Option<String>,
    changed_at: DateTime<Utc>,
}

impl HistoryRow {
    fn try_into_entry(self) -> Result<StatusHistoryEntry> {
        Ok(StatusHistoryEntry {
            id: self.id,
            old_status: self.old_status.map(|s| s.parse()).transpose()?,
            new_status: self.new_status.parse()?,
            changed_by: UserId(self.changed_by),
            note: self.note,
            timestamp: self.changed_at,
        })
    }
}
