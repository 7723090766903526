//! Role-gated clearance operations: each call authorizes the caller, runs the
//! approval state machine against one loaded request and persists the result
//! with an optimistic version check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::approvals::{Decision, DecisionOutcome};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::certificate::{CertificateSnapshot, Document, DocumentRenderer};
use crate::domain::department::{Department, DepartmentId};
use crate::domain::identity::{Identity, Role, UserId, UserSummary};
use crate::domain::request::{
    ClearanceRequest, EntryView, OverallStatus, RequestFilter, RequestId, RequestView,
};
use crate::errors::ApplicationError;
use crate::policy::{self, CollectionOperation, RequestOperation};
use crate::store::{DepartmentStore, RequestStore, StoreError, UserStore};

pub const DEFAULT_DECISION_ATTEMPTS: u32 = 3;

/// The authenticated caller plus the correlation id used for logs and audit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub identity: Identity,
    pub correlation_id: String,
}

impl CallContext {
    pub fn new(identity: Identity, correlation_id: impl Into<String>) -> Self {
        Self { identity, correlation_id: correlation_id.into() }
    }

    fn actor(&self) -> String {
        self.identity.user_id.to_string()
    }
}

/// Admin listing filter as received from callers. `student_name` matches any
/// student whose name contains it, ignoring case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<String>,
    pub student_name: Option<String>,
}

pub struct ClearanceWorkflow {
    requests: Arc<dyn RequestStore>,
    departments: Arc<dyn DepartmentStore>,
    users: Arc<dyn UserStore>,
    renderer: Arc<dyn DocumentRenderer>,
    audit: Arc<dyn AuditSink>,
    decision_attempts: u32,
    institution_name: String,
}

impl ClearanceWorkflow {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        departments: Arc<dyn DepartmentStore>,
        users: Arc<dyn UserStore>,
        renderer: Arc<dyn DocumentRenderer>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            requests,
            departments,
            users,
            renderer,
            audit,
            decision_attempts: DEFAULT_DECISION_ATTEMPTS,
            institution_name: "University Clearance Office".to_string(),
        }
    }

    pub fn with_decision_attempts(mut self, attempts: u32) -> Self {
        self.decision_attempts = attempts.max(1);
        self
    }

    pub fn with_institution_name(mut self, name: impl Into<String>) -> Self {
        self.institution_name = name.into();
        self
    }

    pub async fn create_request(&self, ctx: &CallContext) -> Result<RequestView, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::CreateRequest)?;
        let student_id = ctx.identity.user_id.clone();

        let existing = self.requests.list_for_student(&student_id).await?;
        if let Some(active) = existing.iter().find(|request| request.overall_status.is_active()) {
            return Err(active_request_conflict(&active.id));
        }

        let departments = self.departments.list_all().await?;
        let request = ClearanceRequest::open(student_id, &departments, Utc::now())?;
        self.requests.insert(&request).await.map_err(|error| match error {
            StoreError::Duplicate(message) => ApplicationError::Conflict(message),
            other => other.into(),
        })?;

        info!(
            event_name = "clearance.request.created",
            correlation_id = %ctx.correlation_id,
            request_id = %request.id,
            departments = request.entries.len(),
            "clearance request created"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                ctx.correlation_id.clone(),
                "request.created",
                AuditCategory::Request,
                ctx.actor(),
                AuditOutcome::Success,
            )
            .with_metadata("departments", request.entries.len().to_string()),
        );

        ViewResolver::load(self).await?.resolve(&request).await
    }

    pub async fn get_request(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let request = self.load(request_id).await?;
        policy::ensure_can_access(&ctx.identity, &request, RequestOperation::Read)?;
        ViewResolver::load(self).await?.resolve(&request).await
    }

    pub async fn list_mine(&self, ctx: &CallContext) -> Result<Vec<RequestView>, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::ListMine)?;
        let requests = self.requests.list_for_student(&ctx.identity.user_id).await?;
        self.resolve_all(&requests).await
    }

    pub async fn list_for_my_department(
        &self,
        ctx: &CallContext,
    ) -> Result<Vec<RequestView>, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::ListDepartmentQueue)?;
        let department_id = staff_department(&ctx.identity)?;
        let requests = self.requests.list_for_department(department_id).await?;
        self.resolve_all(&requests).await
    }

    pub async fn list_all(
        &self,
        ctx: &CallContext,
        filter: &ListFilter,
    ) -> Result<Vec<RequestView>, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::ListAll)?;

        let overall_status = match filter.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(OverallStatus::parse(raw).ok_or_else(|| {
                ApplicationError::InvalidArgument(format!(
                    "unknown status `{raw}` (expected pending|in-progress|approved|rejected)"
                ))
            })?),
        };

        let student_ids = match filter.student_name.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(fragment) => {
                let students = self.users.find_students_by_name(fragment).await?;
                if students.is_empty() {
                    return Ok(Vec::new());
                }
                Some(students.into_iter().map(|student| student.id).collect())
            }
        };

        let requests =
            self.requests.query(&RequestFilter { overall_status, student_ids }).await?;
        self.resolve_all(&requests).await
    }

    /// Records the caller's department decision. The caller's role and the
    /// decision input are checked before anything is loaded. A lost optimistic
    /// write is retried from a fresh load, so every state-machine check runs again.
    pub async fn decide(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
        status: &str,
        comment: Option<&str>,
    ) -> Result<RequestView, ApplicationError> {
        let department_id = staff_department(&ctx.identity)?.clone();
        let decision = Decision::parse(status, comment)?;

        let mut attempt = 1;
        let (request, outcome) = loop {
            let mut request = self.load(request_id).await?;
            // A finalized request reports Conflict before department membership.
            if !request.overall_status.is_terminal() {
                if let Err(error) =
                    policy::ensure_can_access(&ctx.identity, &request, RequestOperation::Decide)
                {
                    self.emit_decision_refused(ctx, request_id, &error);
                    return Err(error);
                }
            }
            let outcome = match request.record_decision(
                &department_id,
                &ctx.identity.user_id,
                &decision,
                Utc::now(),
            ) {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.emit_decision_refused(ctx, request_id, &error);
                    return Err(error.into());
                }
            };

            match self.requests.save(&request).await {
                Ok(version) => {
                    request.version = version;
                    break (request, outcome);
                }
                Err(StoreError::VersionConflict { expected, actual, .. })
                    if attempt < self.decision_attempts =>
                {
                    debug!(
                        event_name = "clearance.decision.retry",
                        correlation_id = %ctx.correlation_id,
                        request_id = %request_id,
                        attempt,
                        expected,
                        actual,
                        "request changed concurrently; re-applying decision"
                    );
                    attempt += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "clearance.decision.save_failed",
                        correlation_id = %ctx.correlation_id,
                        request_id = %request_id,
                        error = %error,
                        "decision could not be persisted"
                    );
                    return Err(error.into());
                }
            }
        };

        self.emit_decision_recorded(ctx, &request, &outcome);
        ViewResolver::load(self).await?.resolve(&request).await
    }

    pub async fn certificate_snapshot(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<CertificateSnapshot, ApplicationError> {
        let request = self.load(request_id).await?;
        policy::ensure_certificate_available(&ctx.identity, &request)?;
        let view = ViewResolver::load(self).await?.resolve(&request).await?;
        Ok(CertificateSnapshot::from_view(&view, self.institution_name.clone(), Utc::now()))
    }

    pub async fn issue_certificate(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<Document, ApplicationError> {
        let snapshot = self.certificate_snapshot(ctx, request_id).await?;
        let document = self.renderer.render(&snapshot).await.map_err(|error| {
            ApplicationError::Persistence(format!("certificate rendering failed: {error}"))
        })?;

        info!(
            event_name = "clearance.certificate.issued",
            correlation_id = %ctx.correlation_id,
            request_id = %request_id,
            file_name = %document.file_name,
            "certificate issued"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request_id.clone()),
                ctx.correlation_id.clone(),
                "certificate.issued",
                AuditCategory::Certificate,
                ctx.actor(),
                AuditOutcome::Success,
            )
            .with_metadata("content_type", document.content_type.clone()),
        );
        Ok(document)
    }

    pub async fn list_departments(
        &self,
        ctx: &CallContext,
    ) -> Result<Vec<Department>, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::ListDepartments)?;
        Ok(self.departments.list_all().await?)
    }

    pub async fn create_department(
        &self,
        ctx: &CallContext,
        name: &str,
    ) -> Result<Department, ApplicationError> {
        policy::ensure_can_perform(&ctx.identity, CollectionOperation::CreateDepartment)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ApplicationError::InvalidArgument(
                "department name is required".to_string(),
            ));
        }
        if self.departments.find_by_name(name).await?.is_some() {
            return Err(duplicate_department(name));
        }

        let department = Department::new(name, ctx.identity.user_id.clone(), Utc::now());
        self.departments.create(&department).await.map_err(|error| match error {
            StoreError::Duplicate(_) => duplicate_department(name),
            other => other.into(),
        })?;

        info!(
            event_name = "clearance.department.created",
            correlation_id = %ctx.correlation_id,
            department_id = %department.id,
            "department created"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                ctx.correlation_id.clone(),
                "department.created",
                AuditCategory::Registry,
                ctx.actor(),
                AuditOutcome::Success,
            )
            .with_metadata("name", department.name.clone()),
        );
        Ok(department)
    }

    async fn load(&self, request_id: &RequestId) -> Result<ClearanceRequest, ApplicationError> {
        self.requests.load(request_id).await?.ok_or_else(|| {
            ApplicationError::NotFound(format!("clearance request `{request_id}`"))
        })
    }

    async fn resolve_all(
        &self,
        requests: &[ClearanceRequest],
    ) -> Result<Vec<RequestView>, ApplicationError> {
        let mut resolver = ViewResolver::load(self).await?;
        let mut views = Vec::with_capacity(requests.len());
        for request in requests {
            views.push(resolver.resolve(request).await?);
        }
        Ok(views)
    }

    fn emit_decision_recorded(
        &self,
        ctx: &CallContext,
        request: &ClearanceRequest,
        outcome: &DecisionOutcome,
    ) {
        info!(
            event_name = "clearance.decision.recorded",
            correlation_id = %ctx.correlation_id,
            request_id = %request.id,
            department_id = %outcome.department_id,
            decision = outcome.entry_status.as_str(),
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                ctx.correlation_id.clone(),
                "request.decision_recorded",
                AuditCategory::Decision,
                ctx.actor(),
                AuditOutcome::Success,
            )
            .with_metadata("department_id", outcome.department_id.to_string())
            .with_metadata("decision", outcome.entry_status.as_str())
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str()),
        );
    }

    fn emit_decision_refused(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
        error: &impl std::fmt::Display,
    ) {
        info!(
            event_name = "clearance.decision.refused",
            correlation_id = %ctx.correlation_id,
            request_id = %request_id,
            reason = %error,
            "decision refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request_id.clone()),
                ctx.correlation_id.clone(),
                "request.decision_refused",
                AuditCategory::Decision,
                ctx.actor(),
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        );
    }
}

fn staff_department(identity: &Identity) -> Result<&DepartmentId, ApplicationError> {
    match &identity.role {
        Role::Staff { department_id } => Ok(department_id),
        Role::Student | Role::Admin => Err(ApplicationError::Forbidden(
            "only department staff may act on clearance entries".to_string(),
        )),
    }
}

fn active_request_conflict(active_id: &RequestId) -> ApplicationError {
    ApplicationError::Conflict(format!(
        "you already have an active clearance request (`{active_id}`)"
    ))
}

fn duplicate_department(name: &str) -> ApplicationError {
    ApplicationError::Conflict(format!("department `{name}` already exists"))
}

/// Resolves student, department and approver references for a batch of
/// requests, loading each referenced user at most once.
struct ViewResolver<'a> {
    users: &'a dyn UserStore,
    departments: HashMap<DepartmentId, String>,
    summaries: HashMap<UserId, UserSummary>,
}

impl<'a> ViewResolver<'a> {
    async fn load(workflow: &'a ClearanceWorkflow) -> Result<ViewResolver<'a>, ApplicationError> {
        let departments = workflow
            .departments
            .list_all()
            .await?
            .into_iter()
            .map(|department| (department.id, department.name))
            .collect();
        Ok(Self { users: workflow.users.as_ref(), departments, summaries: HashMap::new() })
    }

    async fn summary(&mut self, user_id: &UserId) -> Result<UserSummary, ApplicationError> {
        if let Some(summary) = self.summaries.get(user_id) {
            return Ok(summary.clone());
        }
        let summary = match self.users.find_by_id(user_id).await? {
            Some(user) => user.summary(),
            None => UserSummary {
                id: user_id.clone(),
                name: "Unknown user".to_string(),
                email: String::new(),
            },
        };
        self.summaries.insert(user_id.clone(), summary.clone());
        Ok(summary)
    }

    async fn resolve(&mut self, request: &ClearanceRequest) -> Result<RequestView, ApplicationError> {
        let student = self.summary(&request.student_id).await?;
        let mut entries = Vec::with_capacity(request.entries.len());
        for entry in &request.entries {
            let approved_by = match &entry.approved_by {
                Some(user_id) => Some(self.summary(user_id).await?),
                None => None,
            };
            entries.push(EntryView {
                department_id: entry.department_id.clone(),
                department_name: self
                    .departments
                    .get(&entry.department_id)
                    .cloned()
                    .unwrap_or_else(|| entry.department_id.to_string()),
                status: entry.status,
                comment: entry.comment.clone(),
                approved_by,
                decided_at: entry.decided_at,
            });
        }

        Ok(RequestView {
            id: request.id.clone(),
            student,
            entries,
            overall_status: request.overall_status,
            final_approval_at: request.final_approval_at,
            created_at: request.created_at,
            updated_at: request.updated_at,
        })
    }
}
