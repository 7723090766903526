//! Identity provider: registration, login and bearer-token authentication.

pub mod password;
pub mod token;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::department::DepartmentSummary;
use crate::domain::identity::{Identity, Role, RoleKind, User, UserId};
use crate::errors::{ApplicationError, DomainError};
use crate::store::{DepartmentStore, StoreError, UserStore};

pub use password::{hash_password, verify_password};
pub use token::{TokenClaims, TokenError, TokenSigner};

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 50;
const PASSWORD_MIN_CHARS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub department_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: RoleKind,
    pub department: Option<DepartmentSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug)]
struct ValidRegistration {
    name: String,
    email: String,
    role: RoleKind,
    department_name: Option<String>,
}

pub struct IdentityProvider {
    users: Arc<dyn UserStore>,
    departments: Arc<dyn DepartmentStore>,
    tokens: TokenSigner,
    audit: Arc<dyn AuditSink>,
}

impl IdentityProvider {
    pub fn new(
        users: Arc<dyn UserStore>,
        departments: Arc<dyn DepartmentStore>,
        tokens: TokenSigner,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { users, departments, tokens, audit }
    }

    pub async fn register(
        &self,
        input: RegistrationInput,
        correlation_id: &str,
    ) -> Result<AuthSession, ApplicationError> {
        let valid = validate_registration(&input)?;

        if self.users.find_by_email(&valid.email).await?.is_some() {
            return Err(ApplicationError::Conflict(format!(
                "a user with email `{}` already exists",
                valid.email
            )));
        }

        let role = match valid.role {
            RoleKind::Student => Role::Student,
            RoleKind::Admin => Role::Admin,
            RoleKind::Staff => {
                let name = valid.department_name.as_deref().unwrap_or_default();
                let department =
                    self.departments.find_by_name(name).await?.ok_or_else(|| {
                        ApplicationError::InvalidArgument(format!(
                            "department `{name}` not found; staff cannot be registered without a valid department"
                        ))
                    })?;
                Role::Staff { department_id: department.id }
            }
        };

        let user = User {
            id: UserId::generate(),
            name: valid.name,
            email: valid.email,
            password_hash: hash_password(&input.password)
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?,
            role,
            created_at: Utc::now(),
        };
        self.users.create(&user).await.map_err(|error| match error {
            StoreError::Duplicate(_) => ApplicationError::Conflict(format!(
                "a user with email `{}` already exists",
                user.email
            )),
            other => other.into(),
        })?;

        info!(
            event_name = "auth.user.registered",
            correlation_id = %correlation_id,
            user_id = %user.id,
            role = user.role.kind().as_str(),
            "user registered"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                correlation_id,
                "auth.user_registered",
                AuditCategory::Identity,
                user.id.to_string(),
                AuditOutcome::Success,
            )
            .with_metadata("role", user.role.kind().as_str()),
        );

        self.session_for(&user).await
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        correlation_id: &str,
    ) -> Result<AuthSession, ApplicationError> {
        let email = email.trim().to_lowercase();
        let user = self.users.find_by_email(&email).await?;
        let user = match user {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id,
                        "auth.login_failed",
                        AuditCategory::Identity,
                        email,
                        AuditOutcome::Rejected,
                    ),
                );
                return Err(ApplicationError::Unauthorized("invalid credentials".to_string()));
            }
        };

        info!(
            event_name = "auth.user.login",
            correlation_id = %correlation_id,
            user_id = %user.id,
            "user logged in"
        );
        self.session_for(&user).await
    }

    /// Resolves a bearer token to the caller's current identity. The user is
    /// re-loaded, so deleted accounts and changed roles take effect immediately.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, ApplicationError> {
        let claims = self
            .tokens
            .verify(token)
            .map_err(|error| ApplicationError::Unauthorized(error.to_string()))?;
        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ApplicationError::Unauthorized("user not found".to_string()))?;
        Ok(user.identity())
    }

    pub async fn me(&self, caller: &Identity) -> Result<UserProfile, ApplicationError> {
        let user = self
            .users
            .find_by_id(&caller.user_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("user `{}`", caller.user_id)))?;
        self.profile_for(&user).await
    }

    async fn session_for(&self, user: &User) -> Result<AuthSession, ApplicationError> {
        let token = self
            .tokens
            .issue(user, Utc::now())
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(AuthSession { token, user: self.profile_for(user).await? })
    }

    async fn profile_for(&self, user: &User) -> Result<UserProfile, ApplicationError> {
        let department = match user.role.department_id() {
            Some(department_id) => self
                .departments
                .find_by_id(department_id)
                .await?
                .as_ref()
                .map(DepartmentSummary::from),
            None => None,
        };
        Ok(UserProfile {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.kind(),
            department,
        })
    }
}

fn validate_registration(input: &RegistrationInput) -> Result<ValidRegistration, DomainError> {
    let name = input.name.trim();
    let name_chars = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&name_chars) {
        return Err(DomainError::InvalidRegistration(format!(
            "name must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters"
        )));
    }

    let email = input.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(DomainError::InvalidRegistration(
            "please provide a valid email address".to_string(),
        ));
    }

    validate_password(&input.password)?;

    let role: RoleKind = input.role.parse().map_err(DomainError::InvalidRegistration)?;

    let department_name = match role {
        RoleKind::Staff => {
            let department_name =
                input.department_name.as_deref().map(str::trim).unwrap_or_default();
            if department_name.is_empty() {
                return Err(DomainError::InvalidRegistration(
                    "department name is required for staff".to_string(),
                ));
            }
            Some(department_name.to_owned())
        }
        RoleKind::Student | RoleKind::Admin => None,
    };

    Ok(ValidRegistration { name: name.to_owned(), email, role, department_name })
}

fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(DomainError::InvalidRegistration(format!(
            "password must be at least {PASSWORD_MIN_CHARS} characters long"
        )));
    }
    let has_lower = password.chars().any(|ch| ch.is_ascii_lowercase());
    let has_upper = password.chars().any(|ch| ch.is_ascii_uppercase());
    let has_digit = password.chars().any(|ch| ch.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(DomainError::InvalidRegistration(
            "password must contain at least one uppercase letter, one lowercase letter, and one number"
                .to_string(),
        ));
    }
    Ok(())
}

// local@domain.tld, no whitespace, exactly one `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain.char_indices().any(|(index, ch)| ch == '.' && index > 0 && index + 1 < domain.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    use super::{is_valid_email, validate_password, IdentityProvider, RegistrationInput, TokenSigner};
    use crate::audit::InMemoryAuditSink;
    use crate::domain::department::Department;
    use crate::domain::identity::{Role, RoleKind, UserId};
    use crate::errors::ErrorKind;
    use crate::store::{DepartmentStore, InMemoryDepartmentStore, InMemoryUserStore, UserStore};

    struct Harness {
        provider: IdentityProvider,
        users: Arc<InMemoryUserStore>,
        audit: InMemoryAuditSink,
    }

    async fn harness() -> Harness {
        let users = Arc::new(InMemoryUserStore::default());
        let departments = Arc::new(InMemoryDepartmentStore::default());
        departments
            .create(&Department::new("Library", UserId("admin-0".to_string()), Utc::now()))
            .await
            .expect("seed department");
        let audit = InMemoryAuditSink::default();
        let provider =
            IdentityProvider::new(users.clone(), departments, signer(), Arc::new(audit.clone()));
        Harness { provider, users, audit }
    }

    fn signer() -> TokenSigner {
        TokenSigner::new(
            SecretString::from("identity-provider-test-secret-0123456789".to_string()),
            Duration::hours(5),
        )
    }

    fn registration(role: &str, department_name: Option<&str>) -> RegistrationInput {
        RegistrationInput {
            name: "  Asha Verma ".to_string(),
            email: "Asha.Verma@College.EDU".to_string(),
            password: "Clearance1".to_string(),
            role: role.to_string(),
            department_name: department_name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn register_normalizes_and_returns_usable_token() {
        let harness = harness().await;

        let session =
            harness.provider.register(registration("student", None), "corr-1").await.expect("register");

        assert_eq!(session.user.name, "Asha Verma");
        assert_eq!(session.user.email, "asha.verma@college.edu");
        assert_eq!(session.user.role, RoleKind::Student);
        assert!(session.user.department.is_none());

        let identity = harness.provider.authenticate(&session.token).await.expect("authenticate");
        assert_eq!(identity.user_id, session.user.id);
        assert_eq!(identity.role, Role::Student);
        assert_eq!(harness.audit.events_of_type("auth.user_registered").len(), 1);
    }

    #[tokio::test]
    async fn staff_registration_resolves_department() {
        let harness = harness().await;

        let session = harness
            .provider
            .register(registration("staff", Some("Library")), "corr-2")
            .await
            .expect("register staff");

        let department = session.user.department.expect("staff department");
        assert_eq!(department.name, "Library");
        let identity = harness.provider.authenticate(&session.token).await.expect("authenticate");
        assert_eq!(identity.role.department_id(), Some(&department.id));
    }

    #[tokio::test]
    async fn staff_registration_requires_known_department() {
        let harness = harness().await;

        let missing = harness
            .provider
            .register(registration("staff", None), "corr-3")
            .await
            .expect_err("missing department");
        assert_eq!(missing.kind(), ErrorKind::InvalidArgument);

        let unknown = harness
            .provider
            .register(registration("staff", Some("Astronomy")), "corr-3")
            .await
            .expect_err("unknown department");
        assert_eq!(unknown.kind(), ErrorKind::InvalidArgument);
        assert!(unknown.message().contains("Astronomy"));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let harness = harness().await;
        harness.provider.register(registration("student", None), "corr-4").await.expect("first");

        let error = harness
            .provider
            .register(registration("admin", None), "corr-4")
            .await
            .expect_err("duplicate email");

        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn login_checks_password_with_generic_failure() {
        let harness = harness().await;
        harness.provider.register(registration("student", None), "corr-5").await.expect("register");

        let session = harness
            .provider
            .login(" ASHA.VERMA@college.edu ", "Clearance1", "corr-5")
            .await
            .expect("login");
        assert_eq!(session.user.email, "asha.verma@college.edu");

        let wrong = harness
            .provider
            .login("asha.verma@college.edu", "Clearance2", "corr-5")
            .await
            .expect_err("wrong password");
        let unknown = harness
            .provider
            .login("nobody@college.edu", "Clearance1", "corr-5")
            .await
            .expect_err("unknown user");
        assert_eq!(wrong.kind(), ErrorKind::Unauthorized);
        assert_eq!(wrong.message(), unknown.message());
        assert_eq!(harness.audit.events_of_type("auth.login_failed").len(), 2);
    }

    #[tokio::test]
    async fn token_for_missing_user_is_unauthorized() {
        let harness = harness().await;
        let session =
            harness.provider.register(registration("student", None), "corr-6").await.expect("register");
        let empty_users = Arc::new(InMemoryUserStore::default());
        let other_provider = IdentityProvider::new(
            empty_users,
            Arc::new(InMemoryDepartmentStore::default()),
            signer(),
            Arc::new(InMemoryAuditSink::default()),
        );

        let error = other_provider.authenticate(&session.token).await.expect_err("missing user");
        assert_eq!(error.kind(), ErrorKind::Unauthorized);
        assert!(error.message().contains("user not found"));

        let garbage = harness.provider.authenticate("deadbeef.cafe").await.expect_err("garbage");
        assert_eq!(garbage.kind(), ErrorKind::Unauthorized);
        assert!(harness.users.find_by_id(&session.user.id).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn expired_token_is_refused_with_expiry_message() {
        let harness = harness().await;
        let session =
            harness.provider.register(registration("student", None), "corr-8").await.expect("register");
        let user = harness.users.find_by_id(&session.user.id).await.expect("lookup").expect("user");
        let stale = signer().issue(&user, Utc::now() - Duration::hours(6)).expect("sign");

        let error = harness.provider.authenticate(&stale).await.expect_err("expired");

        assert_eq!(error.kind(), ErrorKind::Unauthorized);
        assert!(error.message().contains("expired"), "{}", error.message());
        assert!(harness.provider.authenticate(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn me_returns_profile_for_caller() {
        let harness = harness().await;
        let session =
            harness.provider.register(registration("admin", None), "corr-7").await.expect("register");
        let identity = harness.provider.authenticate(&session.token).await.expect("authenticate");

        let profile = harness.provider.me(&identity).await.expect("me");

        assert_eq!(profile, session.user);
    }

    #[tokio::test]
    async fn registration_rejects_invalid_fields() {
        let harness = harness().await;
        let cases = [
            RegistrationInput { name: "A".to_string(), ..registration("student", None) },
            RegistrationInput { email: "not-an-email".to_string(), ..registration("student", None) },
            RegistrationInput { password: "short1A".to_string(), ..registration("student", None) },
            RegistrationInput { password: "alllowercase1".to_string(), ..registration("student", None) },
            registration("janitor", None),
        ];

        for input in cases {
            let error = harness.provider.register(input, "corr-8").await.expect_err("invalid input");
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn email_shape_checks() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@b."));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("Abcdefg1").is_ok());
        assert!(validate_password("Abcdef1").is_err());
        assert!(validate_password("ABCDEFG1").is_err());
        assert!(validate_password("Abcdefgh").is_err());
    }
}
