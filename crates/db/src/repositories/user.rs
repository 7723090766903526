use async_trait::async_trait;
use sqlx::Row;

use clearance_core::domain::department::DepartmentId;
use clearance_core::domain::identity::{Role, User, UserId};
use clearance_core::store::{StoreError, UserStore};

use super::{decode_column, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, department_id, created_at";

pub struct SqlUserStore {
    pool: DbPool,
}

impl SqlUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, column: &str, value: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE {column} = ?"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }
}

fn role_columns(role: &Role) -> (&'static str, Option<&str>) {
    (role.kind().as_str(), role.department_id().map(|id| id.0.as_str()))
}

fn decode_role(kind: &str, department_id: Option<String>) -> Result<Role, RepositoryError> {
    match (kind, department_id) {
        ("student", None) => Ok(Role::Student),
        ("admin", None) => Ok(Role::Admin),
        ("staff", Some(id)) => Ok(Role::Staff { department_id: DepartmentId(id) }),
        (other, department) => Err(RepositoryError::Decode(format!(
            "inconsistent role `{other}` with department {department:?}"
        ))),
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let role: String = row.try_get("role").map_err(decode_column)?;
    let department_id: Option<String> = row.try_get("department_id").map_err(decode_column)?;
    let created_at: String = row.try_get("created_at").map_err(decode_column)?;

    Ok(User {
        id: UserId(row.try_get("id").map_err(decode_column)?),
        name: row.try_get("name").map_err(decode_column)?,
        email: row.try_get("email").map_err(decode_column)?,
        password_hash: row.try_get("password_hash").map_err(decode_column)?,
        role: decode_role(&role, department_id)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl UserStore for SqlUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let (role, department_id) = role_columns(&user.role);
        sqlx::query(
            "INSERT INTO app_user (id, name, email, password_hash, role, department_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role)
        .bind(department_id)
        .bind(format_timestamp(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.fetch_where("id", &id.0).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.fetch_where("email", email).await?)
    }

    async fn find_students_by_name(&self, fragment: &str) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE role = 'student' AND instr(lower(name), lower(?)) > 0
             ORDER BY name ASC, id ASC"
        ))
        .bind(fragment)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_user).collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use clearance_core::auth::password::verify_password;
    use clearance_core::domain::department::DepartmentId;
    use clearance_core::domain::identity::{Role, UserId};
    use clearance_core::store::{DepartmentStore, StoreError, UserStore};

    use super::SqlUserStore;
    use crate::repositories::test_support::{department, migrated_pool, user};
    use crate::repositories::SqlDepartmentStore;

    #[tokio::test]
    async fn staff_round_trip_keeps_department_and_hash() {
        let pool = migrated_pool().await;
        SqlDepartmentStore::new(pool.clone())
            .create(&department("lib", "Library"))
            .await
            .expect("department");
        let store = SqlUserStore::new(pool);
        let staff = user(
            "staff-1",
            "R. Iyer",
            Role::Staff { department_id: DepartmentId("lib".to_string()) },
        );
        store.create(&staff).await.expect("create");

        let loaded = store
            .find_by_email("staff-1@college.edu")
            .await
            .expect("query")
            .expect("user exists");

        assert_eq!(loaded.role, staff.role);
        assert!(verify_password("Passw0rd!", &loaded.password_hash));
        assert_eq!(
            store.find_by_id(&UserId("staff-1".to_string())).await.expect("query"),
            Some(loaded)
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_refused() {
        let store = SqlUserStore::new(migrated_pool().await);
        store.create(&user("stu-1", "Asha Verma", Role::Student)).await.expect("create");

        let mut clash = user("stu-2", "Other", Role::Student);
        clash.email = "stu-1@college.edu".to_string();
        let error = store.create(&clash).await.expect_err("duplicate email");

        assert!(matches!(error, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn student_search_ignores_case_and_other_roles() {
        let store = SqlUserStore::new(migrated_pool().await);
        store.create(&user("stu-1", "Asha Verma", Role::Student)).await.expect("create");
        store.create(&user("stu-2", "Vermeer Ash", Role::Student)).await.expect("create");
        store.create(&user("stu-3", "Bilal Khan", Role::Student)).await.expect("create");
        store.create(&user("admin-1", "Ashok Admin", Role::Admin)).await.expect("create");

        let names: Vec<String> = store
            .find_students_by_name("ASH")
            .await
            .expect("search")
            .into_iter()
            .map(|student| student.name)
            .collect();

        assert_eq!(names, vec!["Asha Verma", "Vermeer Ash"]);
    }
}
