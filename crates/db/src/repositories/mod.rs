use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use clearance_core::store::StoreError;

pub mod department;
pub mod request;
pub mod user;

pub use department::SqlDepartmentStore;
pub use request::SqlRequestStore;
pub use user::SqlUserStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(sqlx::Error::Database(db_error))
                if db_error.is_unique_violation() =>
            {
                StoreError::Duplicate(db_error.message().to_string())
            }
            RepositoryError::Database(sqlx::Error::ColumnDecode { index, source }) => {
                StoreError::Decode(format!("column {index}: {source}"))
            }
            RepositoryError::Database(other) => StoreError::Backend(other.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// Fixed-width UTC timestamps so text ordering in SQL matches time ordering.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn decode_column(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use clearance_core::auth::password::hash_password;
    use clearance_core::domain::department::{Department, DepartmentId};
    use clearance_core::domain::identity::{Role, User, UserId};

    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn department(id: &str, name: &str) -> Department {
        Department {
            id: DepartmentId(id.to_string()),
            name: name.to_string(),
            created_by: UserId("admin-1".to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn user(id: &str, name: &str, role: Role) -> User {
        User {
            id: UserId(id.to_string()),
            name: name.to_string(),
            email: format!("{id}@college.edu"),
            password_hash: hash_password("Passw0rd!").expect("hash"),
            role,
            created_at: Utc::now(),
        }
    }
}
