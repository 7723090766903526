use async_trait::async_trait;
use thiserror::Error;

use crate::domain::department::{Department, DepartmentId};
use crate::domain::identity::{User, UserId};
use crate::domain::request::{ClearanceRequest, RequestFilter, RequestId};

pub mod memory;

pub use memory::{InMemoryDepartmentStore, InMemoryRequestStore, InMemoryUserStore};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("request `{request_id}` changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict { request_id: RequestId, expected: u32, actual: u32 },
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Persistence for clearance requests and their entries. A request and its
/// entries are always written together.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Stores a new request. Fails with `Duplicate` when the student already
    /// holds a pending or in-progress request.
    async fn insert(&self, request: &ClearanceRequest) -> Result<(), StoreError>;

    async fn load(&self, id: &RequestId) -> Result<Option<ClearanceRequest>, StoreError>;

    /// Writes `request` only if the stored version still equals
    /// `request.version`, and returns the new version.
    async fn save(&self, request: &ClearanceRequest) -> Result<u32, StoreError>;

    /// Newest first.
    async fn list_for_student(&self, student_id: &UserId)
        -> Result<Vec<ClearanceRequest>, StoreError>;

    /// The department's backlog: active requests whose entry for it is still
    /// pending, oldest first.
    async fn list_for_department(
        &self,
        department_id: &DepartmentId,
    ) -> Result<Vec<ClearanceRequest>, StoreError>;

    /// Newest first.
    async fn query(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, StoreError>;
}

#[async_trait]
pub trait DepartmentStore: Send + Sync {
    /// Sorted by name.
    async fn list_all(&self) -> Result<Vec<Department>, StoreError>;
    async fn find_by_id(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Department>, StoreError>;
    async fn create(&self, department: &Department) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Duplicate` when the email is already registered.
    async fn create(&self, user: &User) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Students whose name contains `fragment`, ignoring case.
    async fn find_students_by_name(&self, fragment: &str) -> Result<Vec<User>, StoreError>;
}
