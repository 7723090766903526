use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::department::DepartmentId;
use crate::domain::identity::{UserId, UserSummary};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pending" => Some(Self::Pending),
            "in-progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Approved and rejected requests accept no further decisions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One department's decision slot within a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEntry {
    pub department_id: DepartmentId,
    pub status: EntryStatus,
    pub comment: String,
    pub approved_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalEntry {
    pub fn pending(department_id: DepartmentId) -> Self {
        Self {
            department_id,
            status: EntryStatus::Pending,
            comment: String::new(),
            approved_by: None,
            decided_at: None,
        }
    }
}

/// A student's clearance workflow across every department that existed when it
/// was opened. `overall_status` is derived from `entries` and never set directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceRequest {
    pub id: RequestId,
    pub student_id: UserId,
    pub entries: Vec<ApprovalEntry>,
    pub overall_status: OverallStatus,
    pub final_approval_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every successful save.
    pub version: u32,
}

impl ClearanceRequest {
    pub fn entry_for(&self, department_id: &DepartmentId) -> Option<&ApprovalEntry> {
        self.entries.iter().find(|entry| &entry.department_id == department_id)
    }

    pub fn involves_department(&self, department_id: &DepartmentId) -> bool {
        self.entry_for(department_id).is_some()
    }
}

/// Filter accepted by the admin listing. `student_ids` is resolved from a name
/// fragment by the workflow before the store is queried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub overall_status: Option<OverallStatus>,
    pub student_ids: Option<Vec<UserId>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    pub department_id: DepartmentId,
    pub department_name: String,
    pub status: EntryStatus,
    pub comment: String,
    pub approved_by: Option<UserSummary>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Request with student, department and approver references resolved for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestView {
    pub id: RequestId,
    pub student: UserSummary,
    pub entries: Vec<EntryView>,
    pub overall_status: OverallStatus,
    pub final_approval_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
