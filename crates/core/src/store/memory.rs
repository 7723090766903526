use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::department::{Department, DepartmentId};
use crate::domain::identity::{RoleKind, User, UserId};
use crate::domain::request::{ClearanceRequest, EntryStatus, RequestFilter, RequestId};

use super::{DepartmentStore, RequestStore, StoreError, UserStore};

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, ClearanceRequest>>,
}

fn newest_first(requests: &mut [ClearanceRequest]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
}

#[async_trait::async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: &ClearanceRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(StoreError::Duplicate(format!("request `{}`", request.id)));
        }
        let has_active = requests.values().any(|existing| {
            existing.student_id == request.student_id && existing.overall_status.is_active()
        });
        if request.overall_status.is_active() && has_active {
            return Err(StoreError::Duplicate(format!(
                "student `{}` already has an active clearance request",
                request.student_id
            )));
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn load(&self, id: &RequestId) -> Result<Option<ClearanceRequest>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, request: &ClearanceRequest) -> Result<u32, StoreError> {
        let mut requests = self.requests.write().await;
        let stored = requests
            .get_mut(&request.id.0)
            .ok_or_else(|| StoreError::NotFound(format!("request `{}`", request.id)))?;
        if stored.version != request.version {
            return Err(StoreError::VersionConflict {
                request_id: request.id.clone(),
                expected: request.version,
                actual: stored.version,
            });
        }
        let next_version = request.version + 1;
        *stored = ClearanceRequest { version: next_version, ..request.clone() };
        Ok(next_version)
    }

    async fn list_for_student(
        &self,
        student_id: &UserId,
    ) -> Result<Vec<ClearanceRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ClearanceRequest> =
            requests.values().filter(|request| &request.student_id == student_id).cloned().collect();
        newest_first(&mut matching);
        Ok(matching)
    }

    async fn list_for_department(
        &self,
        department_id: &DepartmentId,
    ) -> Result<Vec<ClearanceRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ClearanceRequest> = requests
            .values()
            .filter(|request| {
                request.overall_status.is_active()
                    && request
                        .entry_for(department_id)
                        .is_some_and(|entry| entry.status == EntryStatus::Pending)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }

    async fn query(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ClearanceRequest> = requests
            .values()
            .filter(|request| {
                filter.overall_status.map_or(true, |status| request.overall_status == status)
            })
            .filter(|request| {
                filter.student_ids.as_ref().map_or(true, |ids| ids.contains(&request.student_id))
            })
            .cloned()
            .collect();
        newest_first(&mut matching);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryDepartmentStore {
    departments: RwLock<HashMap<String, Department>>,
}

#[async_trait::async_trait]
impl DepartmentStore for InMemoryDepartmentStore {
    async fn list_all(&self) -> Result<Vec<Department>, StoreError> {
        let departments = self.departments.read().await;
        let mut all: Vec<Department> = departments.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn find_by_id(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError> {
        let departments = self.departments.read().await;
        Ok(departments.get(&id.0).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Department>, StoreError> {
        let departments = self.departments.read().await;
        Ok(departments.values().find(|department| department.name == name).cloned())
    }

    async fn create(&self, department: &Department) -> Result<(), StoreError> {
        let mut departments = self.departments.write().await;
        if departments.values().any(|existing| existing.name == department.name) {
            return Err(StoreError::Duplicate(format!("department `{}`", department.name)));
        }
        departments.insert(department.id.0.clone(), department.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Duplicate(format!("user with email `{}`", user.email)));
        }
        users.insert(user.id.0.clone(), user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_students_by_name(&self, fragment: &str) -> Result<Vec<User>, StoreError> {
        let needle = fragment.to_lowercase();
        let users = self.users.read().await;
        let mut students: Vec<User> = users
            .values()
            .filter(|user| user.role.kind() == RoleKind::Student)
            .filter(|user| user.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }
}
