use chrono::Utc;
use tracing::info;

use clearance_core::auth::password::hash_password;
use clearance_core::domain::department::Department;
use clearance_core::domain::identity::{Role, User, UserId};
use clearance_core::store::{DepartmentStore, StoreError, UserStore};

use crate::connection::DbPool;
use crate::repositories::{SqlDepartmentStore, SqlUserStore};

pub const DEMO_DEPARTMENTS: &[&str] = &[
    "Computer Science",
    "Electronics & Communication",
    "Mechanical Engineering",
    "Civil Engineering",
    "Electrical Engineering",
    "Information Technology",
    "Library",
    "Accounts",
    "Hostel",
    "Sports",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemoRole {
    Admin,
    /// Staff of the first demo department.
    Staff,
    Student,
}

#[derive(Debug)]
pub struct DemoAccount {
    pub id: &'static str,
    pub name: &'static str,
    pub email: &'static str,
    pub password: &'static str,
    pub role: DemoRole,
}

pub const DEMO_ACCOUNTS: &[DemoAccount] = &[
    DemoAccount {
        id: "demo-admin",
        name: "System Administrator",
        email: "admin@demo.edu",
        password: "DemoAdmin1",
        role: DemoRole::Admin,
    },
    DemoAccount {
        id: "demo-staff",
        name: "Staff Member",
        email: "staff@demo.edu",
        password: "DemoStaff1",
        role: DemoRole::Staff,
    },
    DemoAccount {
        id: "demo-student",
        name: "Student User",
        email: "student@demo.edu",
        password: "DemoStudent1",
        role: DemoRole::Student,
    },
];

/// Demo registry and accounts for local runs. Loading is idempotent: records
/// that already exist by name or email are left untouched.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, StoreError> {
        let departments = SqlDepartmentStore::new(pool.clone());
        let users = SqlUserStore::new(pool.clone());
        let admin_id = UserId(DEMO_ACCOUNTS[0].id.to_string());
        let mut result = SeedResult::default();

        for name in DEMO_DEPARTMENTS {
            if departments.find_by_name(name).await?.is_none() {
                departments.create(&Department::new(*name, admin_id.clone(), Utc::now())).await?;
                result.departments_created += 1;
            }
        }

        let staff_department = departments
            .find_by_name(DEMO_DEPARTMENTS[0])
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("department `{}`", DEMO_DEPARTMENTS[0])))?;

        for account in DEMO_ACCOUNTS {
            if users.find_by_email(account.email).await?.is_some() {
                continue;
            }
            let role = match account.role {
                DemoRole::Admin => Role::Admin,
                DemoRole::Staff => Role::Staff { department_id: staff_department.id.clone() },
                DemoRole::Student => Role::Student,
            };
            users
                .create(&User {
                    id: UserId(account.id.to_string()),
                    name: account.name.to_string(),
                    email: account.email.to_string(),
                    password_hash: hash_password(account.password)
                        .map_err(|error| StoreError::Backend(error.to_string()))?,
                    role,
                    created_at: Utc::now(),
                })
                .await?;
            result.users_created += 1;
        }

        info!(
            event_name = "db.seed.demo_loaded",
            departments_created = result.departments_created,
            users_created = result.users_created,
            "demo data seeded"
        );
        Ok(result)
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, StoreError> {
        let departments = SqlDepartmentStore::new(pool.clone());
        let users = SqlUserStore::new(pool.clone());
        let mut checks = Vec::new();

        for name in DEMO_DEPARTMENTS {
            checks.push((*name, departments.find_by_name(name).await?.is_some()));
        }

        let staff_department = departments.find_by_name(DEMO_DEPARTMENTS[0]).await?;
        for account in DEMO_ACCOUNTS {
            let user = users.find_by_email(account.email).await?;
            let role_matches = match (account.role, user.as_ref().map(|user| &user.role)) {
                (DemoRole::Admin, Some(Role::Admin)) | (DemoRole::Student, Some(Role::Student)) => {
                    true
                }
                (DemoRole::Staff, Some(Role::Staff { department_id })) => {
                    staff_department.as_ref().is_some_and(|department| &department.id == department_id)
                }
                _ => false,
            };
            checks.push((account.email, role_matches));
        }

        Ok(VerificationResult { checks })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub departments_created: usize,
    pub users_created: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|(_, passed)| *passed)
    }

    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, passed)| !passed).map(|(name, _)| *name).collect()
    }
}
