//! Department directory and workload ledger on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Db, location_from_columns};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{DepartmentDirectory, WorkloadLedger};

const SELECT_DEPARTMENT: &str = "SELECT id, name, categories, zone, contact_email, contact_phone, endpoint, latitude, longitude, address, capacity, current_workload, created_at, updated_at FROM departments";

#[async_trait]
impl DepartmentDirectory for Db {
    async fn create_department(&self, new: NewDepartment) -> Result<Department> {
        let department = new.build(Utc::now())?;
        let categories: Vec<&str> = department.categories.iter().map(|c| c.as_str()).collect();
        let location = department.location.clone().unwrap_or_default();

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO departments (id, name, categories, zone, contact_email, contact_phone, endpoint, latitude, longitude, address, capacity, current_workload, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
             ON CONFLICT (name) DO NOTHING
             RETURNING id",
        )
        .bind(department.id.0)
        .bind(&department.name)
        .bind(&categories)
        .bind(&department.zone)
        .bind(&department.contact_email)
        .bind(&department.contact_phone)
        .bind(&department.endpoint)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.address)
        .bind(department.capacity)
        .bind(department.current_workload)
        .bind(department.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            return Err(Error::Validation(format!(
                "department with name {} already exists",
                department.name
            )));
        }
        Ok(department)
    }

    async fn find_by_id(&self, id: DepartmentId) -> Result<Option<Department>> {
        let row: Option<DepartmentRow> =
            sqlx::query_as(&format!("{SELECT_DEPARTMENT} WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(DepartmentRow::try_into_department).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Department>> {
        let row: Option<DepartmentRow> =
            sqlx::query_as(&format!("{SELECT_DEPARTMENT} WHERE name = $1"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(DepartmentRow::try_into_department).transpose()
    }

    async fn find_by_category(&self, category: Category) -> Result<Vec<Department>> {
        let rows: Vec<DepartmentRow> = sqlx::query_as(&format!(
            "{SELECT_DEPARTMENT} WHERE $1 = ANY(categories) ORDER BY created_at, id"
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(DepartmentRow::try_into_department)
            .collect()
    }

    async fn find_by_category_and_zone(
        &self,
        category: Category,
        zone: &str,
    ) -> Result<Vec<Department>> {
        let rows: Vec<DepartmentRow> = sqlx::query_as(&format!(
            "{SELECT_DEPARTMENT} WHERE $1 = ANY(categories) AND zone = $2 ORDER BY created_at, id"
        ))
        .bind(category.as_str())
        .bind(zone)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(DepartmentRow::try_into_department)
            .collect()
    }

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let rows: Vec<DepartmentRow> =
            sqlx::query_as(&format!("{SELECT_DEPARTMENT} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(DepartmentRow::try_into_department)
            .collect()
    }

    async fn update_department(
        &self,
        id: DepartmentId,
        update: NewDepartment,
    ) -> Result<Department> {
        let mut tx = self.pool.begin().await?;

        let row: Option<DepartmentRow> =
            sqlx::query_as(&format!("{SELECT_DEPARTMENT} WHERE id = $1 FOR UPDATE"))
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let existing = row
            .ok_or_else(|| Error::NotFound(format!("department {id}")))?
            .try_into_department()?;

        if existing.name != update.name {
            let taken: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM departments WHERE name = $1")
                    .bind(&update.name)
                    .fetch_optional(&mut *tx)
                    .await?;
            if taken.is_some() {
                return Err(Error::Validation(format!(
                    "department with name {} already exists",
                    update.name
                )));
            }
        }

        let department = update.apply(&existing, Utc::now())?;
        let categories: Vec<&str> = department.categories.iter().map(|c| c.as_str()).collect();
        let location = department.location.clone().unwrap_or_default();

        // The workload column is left alone; the ledger owns it.
        sqlx::query(
            "UPDATE departments SET name = $2, categories = $3, zone = $4, contact_email = $5, contact_phone = $6, endpoint = $7, latitude = $8, longitude = $9, address = $10, capacity = $11, updated_at = $12
             WHERE id = $1",
        )
        .bind(id.0)
        .bind(&department.name)
        .bind(&categories)
        .bind(&department.zone)
        .bind(&department.contact_email)
        .bind(&department.contact_phone)
        .bind(&department.endpoint)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.address)
        .bind(department.capacity)
        .bind(department.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            // A concurrent rename took the name after our check.
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Validation(format!(
                "department with name {} already exists",
                department.name
            )),
            other => other.into(),
        })?;

        tx.commit().await?;
        Ok(department)
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM departments WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("department {id}")));
        }
        Ok(())
    }
}

/// The charge key is recorded in the same transaction as the counter
/// update, so a key is applied at most once. The counter update itself is a
/// single statement, and the row lock Postgres takes for it makes the
/// read-modify-write atomic.
#[async_trait]
impl WorkloadLedger for Db {
    async fn increment(&self, id: DepartmentId, charge: Uuid) -> Result<i32> {
        self.apply_charge(
            id,
            charge,
            1,
            "UPDATE departments SET current_workload = COALESCE(current_workload, 0) + 1, updated_at = now()
             WHERE id = $1
             RETURNING current_workload",
        )
        .await
    }

    async fn decrement(&self, id: DepartmentId, charge: Uuid) -> Result<i32> {
        self.apply_charge(
            id,
            charge,
            -1,
            "UPDATE departments SET current_workload = GREATEST(COALESCE(current_workload, 0) - 1, 0), updated_at = now()
             WHERE id = $1
             RETURNING current_workload",
        )
        .await
    }
}

impl Db {
    async fn apply_charge(
        &self,
        id: DepartmentId,
        charge: Uuid,
        delta: i16,
        update: &'static str,
    ) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM departments WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("department {id}")));
        }

        let fresh: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO workload_charges (key, department_id, delta) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO NOTHING
             RETURNING key",
        )
        .bind(charge)
        .bind(id.0)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let row: Option<(Option<i32>,)> = if fresh.is_some() {
            sqlx::query_as(update)
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?
        } else {
            sqlx::query_as("SELECT current_workload FROM departments WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?
        };
        // Dropping tx on the error path rolls back the recorded key.
        let (workload,) = row.ok_or_else(|| Error::NotFound(format!("department {id}")))?;

        tx.commit().await?;
        Ok(workload.unwrap_or(0))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DepartmentRow {
    id: Uuid,
    name: String,
    categories: Vec<String>,
    zone: Option<String>,
    contact_email: String,
    contact_phone: Option<String>,
    endpoint: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
    capacity: Option<i32>,
    current_workload: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepartmentRow {
    fn try_into_department(self) -> Result<Department> {
        Ok(Department {
            id: DepartmentId(self.id),
            name: self.name,
            categories: self
                .categories
                .iter()
                .map(|c| c.parse())
                .collect::<Result<_>>()?,
            zone: self.zone,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            endpoint: self.endpoint,
            location: location_from_columns(self.latitude, self.longitude, self.address),
            capacity: self.capacity,
            current_workload: self.current_workload,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
