use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};

use clearance_core::domain::department::DepartmentId;
use clearance_core::domain::identity::UserId;
use clearance_core::domain::request::{
    ApprovalEntry, ClearanceRequest, EntryStatus, OverallStatus, RequestFilter, RequestId,
};
use clearance_core::store::{RequestStore, StoreError};

use super::{
    decode_column, format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str =
    "id, student_id, overall_status, final_approval_at, created_at, updated_at, version";

/// Requests and their approval entries, written in one transaction per call.
pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_request(&self, request: &ClearanceRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO clearance_request
                 (id, student_id, overall_status, final_approval_at, created_at, updated_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.student_id.0)
        .bind(request.overall_status.as_str())
        .bind(request.final_approval_at.map(format_timestamp))
        .bind(format_timestamp(request.created_at))
        .bind(format_timestamp(request.updated_at))
        .bind(i64::from(request.version))
        .execute(&mut *tx)
        .await?;

        for (position, entry) in request.entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO approval_entry
                     (request_id, position, department_id, status, comment, approved_by, decided_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&request.id.0)
            .bind(position as i64)
            .bind(&entry.department_id.0)
            .bind(entry.status.as_str())
            .bind(&entry.comment)
            .bind(entry.approved_by.as_ref().map(|id| id.0.as_str()))
            .bind(entry.decided_at.map(format_timestamp))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_request(&self, request: &ClearanceRequest) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let updated = sqlx::query(
            "UPDATE clearance_request
             SET overall_status = ?, final_approval_at = ?, updated_at = ?, version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(request.overall_status.as_str())
        .bind(request.final_approval_at.map(format_timestamp))
        .bind(format_timestamp(request.updated_at))
        .bind(&request.id.0)
        .bind(i64::from(request.version))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM clearance_request WHERE id = ?")
                    .bind(&request.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(RepositoryError::from)?;
            return Err(match current {
                Some(actual) => StoreError::VersionConflict {
                    request_id: request.id.clone(),
                    expected: request.version,
                    actual: decode_version(actual)?,
                },
                None => StoreError::NotFound(format!("request `{}`", request.id)),
            });
        }

        for entry in &request.entries {
            sqlx::query(
                "UPDATE approval_entry
                 SET status = ?, comment = ?, approved_by = ?, decided_at = ?
                 WHERE request_id = ? AND department_id = ?",
            )
            .bind(entry.status.as_str())
            .bind(&entry.comment)
            .bind(entry.approved_by.as_ref().map(|id| id.0.as_str()))
            .bind(entry.decided_at.map(format_timestamp))
            .bind(&request.id.0)
            .bind(&entry.department_id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(request.version + 1)
    }

    /// Attaches entries, in creation order, to each fetched request row.
    async fn hydrate(
        &self,
        rows: Vec<sqlx::sqlite::SqliteRow>,
    ) -> Result<Vec<ClearanceRequest>, RepositoryError> {
        let mut requests = rows.iter().map(row_to_request).collect::<Result<Vec<_>, _>>()?;
        if requests.is_empty() {
            return Ok(requests);
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT request_id, department_id, status, comment, approved_by, decided_at
             FROM approval_entry WHERE request_id IN (",
        );
        let mut ids = builder.separated(", ");
        for request in &requests {
            ids.push_bind(request.id.0.clone());
        }
        ids.push_unseparated(") ORDER BY request_id ASC, position ASC");

        let entry_rows = builder.build().fetch_all(&self.pool).await?;
        let mut entries: HashMap<String, Vec<ApprovalEntry>> = HashMap::new();
        for row in &entry_rows {
            let request_id: String = row.try_get("request_id").map_err(decode_column)?;
            entries.entry(request_id).or_default().push(row_to_entry(row)?);
        }

        for request in &mut requests {
            request.entries = entries.remove(&request.id.0).unwrap_or_default();
        }
        Ok(requests)
    }

    async fn fetch_hydrated(
        &self,
        mut builder: QueryBuilder<'_, Sqlite>,
    ) -> Result<Vec<ClearanceRequest>, RepositoryError> {
        let rows = builder.build().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }
}

fn decode_version(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Decode(format!("invalid version {raw}")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ClearanceRequest, RepositoryError> {
    let status: String = row.try_get("overall_status").map_err(decode_column)?;
    let final_approval_at: Option<String> =
        row.try_get("final_approval_at").map_err(decode_column)?;
    let created_at: String = row.try_get("created_at").map_err(decode_column)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_column)?;
    let version: i64 = row.try_get("version").map_err(decode_column)?;

    Ok(ClearanceRequest {
        id: RequestId(row.try_get("id").map_err(decode_column)?),
        student_id: UserId(row.try_get("student_id").map_err(decode_column)?),
        entries: Vec::new(),
        overall_status: OverallStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown overall status `{status}`"))
        })?,
        final_approval_at: parse_optional_timestamp(final_approval_at)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("invalid version {version}")))?,
    })
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalEntry, RepositoryError> {
    let status: String = row.try_get("status").map_err(decode_column)?;
    let approved_by: Option<String> = row.try_get("approved_by").map_err(decode_column)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(decode_column)?;

    Ok(ApprovalEntry {
        department_id: DepartmentId(row.try_get("department_id").map_err(decode_column)?),
        status: EntryStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown entry status `{status}`")))?,
        comment: row.try_get("comment").map_err(decode_column)?,
        approved_by: approved_by.map(UserId),
        decided_at: parse_optional_timestamp(decided_at)?,
    })
}

const ACTIVE_REQUEST_INDEX: &str = "idx_clearance_request_active_student";

/// SQLite names the indexed column rather than the index in its message.
fn violates_active_request_index(error: &RepositoryError) -> bool {
    match error {
        RepositoryError::Database(sqlx::Error::Database(db_error))
            if db_error.is_unique_violation() =>
        {
            db_error.constraint() == Some(ACTIVE_REQUEST_INDEX)
                || db_error.message().contains("clearance_request.student_id")
        }
        _ => false,
    }
}

fn select_requests() -> QueryBuilder<'static, Sqlite> {
    QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM clearance_request WHERE 1 = 1"))
}

#[async_trait]
impl RequestStore for SqlRequestStore {
    async fn insert(&self, request: &ClearanceRequest) -> Result<(), StoreError> {
        self.insert_request(request).await.map_err(|error| {
            if violates_active_request_index(&error) {
                StoreError::Duplicate(format!(
                    "student `{}` already has an active clearance request",
                    request.student_id
                ))
            } else {
                StoreError::from(error)
            }
        })
    }

    async fn load(&self, id: &RequestId) -> Result<Option<ClearanceRequest>, StoreError> {
        let mut builder = select_requests();
        builder.push(" AND id = ").push_bind(id.0.clone());
        let mut found = self.fetch_hydrated(builder).await?;
        Ok(found.pop())
    }

    async fn save(&self, request: &ClearanceRequest) -> Result<u32, StoreError> {
        self.save_request(request).await
    }

    async fn list_for_student(
        &self,
        student_id: &UserId,
    ) -> Result<Vec<ClearanceRequest>, StoreError> {
        let mut builder = select_requests();
        builder
            .push(" AND student_id = ")
            .push_bind(student_id.0.clone())
            .push(" ORDER BY created_at DESC, id DESC");
        Ok(self.fetch_hydrated(builder).await?)
    }

    async fn list_for_department(
        &self,
        department_id: &DepartmentId,
    ) -> Result<Vec<ClearanceRequest>, StoreError> {
        let mut builder = select_requests();
        builder
            .push(" AND overall_status IN ('pending', 'in-progress')")
            .push(
                " AND EXISTS (SELECT 1 FROM approval_entry \
                 WHERE approval_entry.request_id = clearance_request.id \
                 AND approval_entry.status = 'pending' AND approval_entry.department_id = ",
            )
            .push_bind(department_id.0.clone())
            .push(") ORDER BY created_at ASC, id ASC");
        Ok(self.fetch_hydrated(builder).await?)
    }

    async fn query(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, StoreError> {
        let mut builder = select_requests();
        if let Some(status) = filter.overall_status {
            builder.push(" AND overall_status = ").push_bind(status.as_str());
        }
        if let Some(student_ids) = &filter.student_ids {
            if student_ids.is_empty() {
                return Ok(Vec::new());
            }
            builder.push(" AND student_id IN (");
            let mut ids = builder.separated(", ");
            for student_id in student_ids {
                ids.push_bind(student_id.0.clone());
            }
            ids.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC");
        Ok(self.fetch_hydrated(builder).await?)
    }
}
