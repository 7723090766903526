use async_trait::async_trait;
use sqlx::Row;

use clearance_core::domain::department::{Department, DepartmentId};
use clearance_core::domain::identity::UserId;
use clearance_core::store::{DepartmentStore, StoreError};

use super::{decode_column, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlDepartmentStore {
    pool: DbPool,
}

impl SqlDepartmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<Department>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT id, name, created_by, created_at FROM department WHERE {clause} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_department).transpose()
    }
}

fn row_to_department(row: &sqlx::sqlite::SqliteRow) -> Result<Department, RepositoryError> {
    let created_at: String = row.try_get("created_at").map_err(decode_column)?;
    Ok(Department {
        id: DepartmentId(row.try_get("id").map_err(decode_column)?),
        name: row.try_get("name").map_err(decode_column)?,
        created_by: UserId(row.try_get("created_by").map_err(decode_column)?),
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl DepartmentStore for SqlDepartmentStore {
    async fn list_all(&self) -> Result<Vec<Department>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, created_by, created_at FROM department ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_department).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_by_id(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError> {
        Ok(self.fetch_where("id", &id.0).await?)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Department>, StoreError> {
        Ok(self.fetch_where("name", name).await?)
    }

    async fn create(&self, department: &Department) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO department (id, name, created_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&department.id.0)
        .bind(&department.name)
        .bind(&department.created_by.0)
        .bind(format_timestamp(department.created_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clearance_core::domain::department::DepartmentId;
    use clearance_core::store::{DepartmentStore, StoreError};

    use super::SqlDepartmentStore;
    use crate::repositories::test_support::{department, migrated_pool};

    #[tokio::test]
    async fn departments_are_listed_by_name() {
        let store = SqlDepartmentStore::new(migrated_pool().await);
        for (id, name) in [("d-3", "Sports"), ("d-1", "Accounts"), ("d-2", "Library")] {
            store.create(&department(id, name)).await.expect("create");
        }

        let names: Vec<String> =
            store.list_all().await.expect("list").into_iter().map(|d| d.name).collect();

        assert_eq!(names, vec!["Accounts", "Library", "Sports"]);
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let store = SqlDepartmentStore::new(migrated_pool().await);
        store.create(&department("d-1", "Library")).await.expect("create");

        let error = store.create(&department("d-2", "Library")).await.expect_err("duplicate");

        assert!(matches!(error, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn lookup_by_id_and_name() {
        let store = SqlDepartmentStore::new(migrated_pool().await);
        let created = department("d-1", "Hostel");
        store.create(&created).await.expect("create");

        let by_id = store.find_by_id(&DepartmentId("d-1".to_string())).await.expect("by id");
        let by_name = store.find_by_name("Hostel").await.expect("by name");
        let missing = store.find_by_name("hostel").await.expect("case-sensitive miss");

        assert_eq!(by_id.as_ref().map(|d| d.name.as_str()), Some("Hostel"));
        assert_eq!(by_name.map(|d| d.id), Some(created.id));
        assert!(missing.is_none());
    }
}
