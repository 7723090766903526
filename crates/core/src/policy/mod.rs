//! Role and ownership rules evaluated before every workflow operation.
//!
//! Per-request checks go through [`can_access`]; collection-level operations that
//! have no single target request go through [`can_perform`].

use crate::domain::identity::{Identity, Role};
use crate::domain::request::{ClearanceRequest, OverallStatus};
use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOperation {
    Read,
    Decide,
    DownloadCertificate,
}

impl RequestOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Decide => "decide",
            Self::DownloadCertificate => "download_certificate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionOperation {
    CreateRequest,
    ListMine,
    ListDepartmentQueue,
    ListAll,
    CreateDepartment,
    ListDepartments,
}

impl CollectionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateRequest => "create_request",
            Self::ListMine => "list_mine",
            Self::ListDepartmentQueue => "list_department_queue",
            Self::ListAll => "list_all",
            Self::CreateDepartment => "create_department",
            Self::ListDepartments => "list_departments",
        }
    }
}

/// Whether `caller` may perform `operation` on `request`.
pub fn can_access(
    caller: &Identity,
    request: &ClearanceRequest,
    operation: RequestOperation,
) -> bool {
    let is_owner = request.student_id == caller.user_id;
    match (&caller.role, operation) {
        (Role::Admin, RequestOperation::Read | RequestOperation::DownloadCertificate) => true,
        (Role::Admin, RequestOperation::Decide) => false,
        (Role::Student, RequestOperation::Read) => is_owner,
        (Role::Student, RequestOperation::DownloadCertificate) => {
            is_owner && request.overall_status == OverallStatus::Approved
        }
        (Role::Student, RequestOperation::Decide) => false,
        (Role::Staff { department_id }, RequestOperation::Read | RequestOperation::Decide) => {
            request.involves_department(department_id)
        }
        (Role::Staff { .. }, RequestOperation::DownloadCertificate) => false,
    }
}

pub fn can_perform(caller: &Identity, operation: CollectionOperation) -> bool {
    match operation {
        CollectionOperation::CreateRequest | CollectionOperation::ListMine => {
            matches!(caller.role, Role::Student)
        }
        CollectionOperation::ListDepartmentQueue => matches!(caller.role, Role::Staff { .. }),
        CollectionOperation::ListAll | CollectionOperation::CreateDepartment => {
            matches!(caller.role, Role::Admin)
        }
        CollectionOperation::ListDepartments => true,
    }
}

pub fn ensure_can_perform(
    caller: &Identity,
    operation: CollectionOperation,
) -> Result<(), ApplicationError> {
    if can_perform(caller, operation) {
        Ok(())
    } else {
        Err(ApplicationError::Forbidden(format!(
            "role `{}` may not {}",
            caller.role.kind().as_str(),
            operation.as_str()
        )))
    }
}

pub fn ensure_can_access(
    caller: &Identity,
    request: &ClearanceRequest,
    operation: RequestOperation,
) -> Result<(), ApplicationError> {
    if can_access(caller, request, operation) {
        Ok(())
    } else {
        Err(ApplicationError::Forbidden(format!(
            "user `{}` may not {} request `{}`",
            caller.user_id,
            operation.as_str(),
            request.id
        )))
    }
}

/// Certificate gate. Callers who could never download it get `Forbidden`; an
/// owner or admin asking before approval gets `InvalidState`.
pub fn ensure_certificate_available(
    caller: &Identity,
    request: &ClearanceRequest,
) -> Result<(), ApplicationError> {
    let is_owner = request.student_id == caller.user_id;
    let eligible = match caller.role {
        Role::Admin => true,
        Role::Student => is_owner,
        Role::Staff { .. } => false,
    };
    if !eligible {
        return Err(ApplicationError::Forbidden(format!(
            "user `{}` may not download the certificate for request `{}`",
            caller.user_id, request.id
        )));
    }
    if request.overall_status != OverallStatus::Approved {
        return Err(ApplicationError::InvalidState(format!(
            "certificate is only available for approved requests; request `{}` is `{}`",
            request.id, request.overall_status
        )));
    }
    Ok(())
}
