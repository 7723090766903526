use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::department::DepartmentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller role. Staff carry their department, so a department reference exists
/// exactly when the role is staff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    Student,
    Staff { department_id: DepartmentId },
    Admin,
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Self::Student => RoleKind::Student,
            Self::Staff { .. } => RoleKind::Staff,
            Self::Admin => RoleKind::Admin,
        }
    }

    pub fn department_id(&self) -> Option<&DepartmentId> {
        match self {
            Self::Staff { department_id } => Some(department_id),
            Self::Student | Self::Admin => None,
        }
    }
}

/// Role discriminant without the staff payload, used for registration input
/// and persistence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Student,
    Staff,
    Admin,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for RoleKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unsupported role `{other}` (expected student|staff|admin)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity { user_id: self.id.clone(), role: self.role.clone() }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary { id: self.id.clone(), name: self.name.clone(), email: self.email.clone() }
    }
}

/// The authenticated caller, passed explicitly into every workflow operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn student(user_id: UserId) -> Self {
        Self { user_id, role: Role::Student }
    }

    pub fn staff(user_id: UserId, department_id: DepartmentId) -> Self {
        Self { user_id, role: Role::Staff { department_id } }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self { user_id, role: Role::Admin }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
}
