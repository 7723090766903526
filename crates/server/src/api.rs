//! JSON API routes. Every route except register and login requires
//! `Authorization: Bearer <token>`.
//!
//! - `POST /api/auth/register`                 : create an account and sign in
//! - `POST /api/auth/login`                    : exchange credentials for a token
//! - `GET  /api/auth/me`                       : caller profile
//! - `GET  /api/departments`                   : department registry
//! - `POST /api/departments`                   : add a department (admin)
//! - `POST /api/requests`                      : open a clearance request (student)
//! - `GET  /api/requests/my`                   : caller's requests (student)
//! - `GET  /api/requests`                      : department queue (staff)
//! - `GET  /api/requests/all`                  : filtered listing (admin)
//! - `GET  /api/requests/{id}`                 : single request
//! - `PUT  /api/requests/{id}/action`          : approve or reject (staff)
//! - `GET  /api/requests/{id}/certificate`     : certificate download

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use clearance_core::{
    ApplicationError, AuthSession, CallContext, ClearanceWorkflow, Department, IdentityProvider,
    InterfaceError, ListFilter, RegistrationInput, RequestId, RequestView, UserProfile,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    workflow: Arc<ClearanceWorkflow>,
    identity: Arc<IdentityProvider>,
}

impl ApiState {
    pub fn new(workflow: Arc<ClearanceWorkflow>, identity: Arc<IdentityProvider>) -> Self {
        Self { workflow, identity }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/departments", get(list_departments).post(create_department))
        .route("/api/requests", get(list_for_my_department).post(create_request))
        .route("/api/requests/my", get(list_mine))
        .route("/api/requests/all", get(list_all))
        .route("/api/requests/{id}", get(get_request))
        .route("/api/requests/{id}/action", put(decide))
        .route("/api/requests/{id}/certificate", get(download_certificate))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DepartmentBody {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub status: String,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAllQuery {
    pub status: Option<String>,
    pub student_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub detail: Option<String>,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Extractors and error mapping
// ---------------------------------------------------------------------------

/// Correlation id taken from `x-correlation-id` or freshly generated.
pub struct Correlation(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Correlation {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(correlation_id(&parts.headers)))
    }
}

/// The authenticated caller, resolved from the bearer token on every request.
pub struct Caller(pub CallContext);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::new(
                ApplicationError::Unauthorized("missing bearer token".to_string()),
                &correlation_id,
            )
        })?;
        let identity = state
            .identity
            .authenticate(token)
            .await
            .map_err(|error| ApiError::new(error, &correlation_id))?;
        Ok(Self(CallContext::new(identity, correlation_id)))
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn new(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

pub fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let correlation_id = self.0.correlation_id().to_string();

        // Backend failure details stay in the logs.
        let detail = if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
            None
        } else {
            info!(
                event_name = "api.request.refused",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request refused"
            );
            Some(self.0.message().to_string())
        };

        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            detail,
            correlation_id: correlation_id.clone(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn fail(ctx: &CallContext) -> impl FnOnce(ApplicationError) -> ApiError + '_ {
    move |error| ApiError::new(error, &ctx.correlation_id)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<ApiState>,
    Correlation(correlation_id): Correlation,
    Json(input): Json<RegistrationInput>,
) -> ApiResult<(StatusCode, Json<AuthSession>)> {
    let session = state
        .identity
        .register(input, &correlation_id)
        .await
        .map_err(|error| ApiError::new(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<ApiState>,
    Correlation(correlation_id): Correlation,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<AuthSession>> {
    let session = state
        .identity
        .login(&body.email, &body.password, &correlation_id)
        .await
        .map_err(|error| ApiError::new(error, &correlation_id))?;
    Ok(Json(session))
}

async fn me(State(state): State<ApiState>, Caller(ctx): Caller) -> ApiResult<Json<UserProfile>> {
    let profile = state.identity.me(&ctx.identity).await.map_err(fail(&ctx))?;
    Ok(Json(profile))
}

async fn list_departments(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<Department>>> {
    let departments = state.workflow.list_departments(&ctx).await.map_err(fail(&ctx))?;
    Ok(Json(departments))
}

async fn create_department(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<DepartmentBody>,
) -> ApiResult<(StatusCode, Json<Department>)> {
    let department =
        state.workflow.create_department(&ctx, &body.name).await.map_err(fail(&ctx))?;
    Ok((StatusCode::CREATED, Json(department)))
}

async fn create_request(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> ApiResult<(StatusCode, Json<RequestView>)> {
    let view = state.workflow.create_request(&ctx).await.map_err(fail(&ctx))?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_mine(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<RequestView>>> {
    Ok(Json(state.workflow.list_mine(&ctx).await.map_err(fail(&ctx))?))
}

async fn list_for_my_department(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<RequestView>>> {
    Ok(Json(state.workflow.list_for_my_department(&ctx).await.map_err(fail(&ctx))?))
}

async fn list_all(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Query(query): Query<ListAllQuery>,
) -> ApiResult<Json<Vec<RequestView>>> {
    let filter = ListFilter { status: query.status, student_name: query.student_name };
    Ok(Json(state.workflow.list_all(&ctx, &filter).await.map_err(fail(&ctx))?))
}

async fn get_request(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestView>> {
    let view = state.workflow.get_request(&ctx, &RequestId(id)).await.map_err(fail(&ctx))?;
    Ok(Json(view))
}

async fn decide(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<RequestView>> {
    let view = state
        .workflow
        .decide(&ctx, &RequestId(id), &body.status, body.comment.as_deref())
        .await
        .map_err(fail(&ctx))?;
    Ok(Json(view))
}

async fn download_certificate(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let document =
        state.workflow.issue_certificate(&ctx, &RequestId(id)).await.map_err(fail(&ctx))?;
    let disposition = format!("attachment; filename=\"{}\"", document.file_name);
    Ok((
        [(header::CONTENT_TYPE, document.content_type), (header::CONTENT_DISPOSITION, disposition)],
        document.bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use chrono::{Duration, Utc};
    use clearance_core::audit::InMemoryAuditSink;
    use clearance_core::store::{InMemoryDepartmentStore, InMemoryRequestStore, InMemoryUserStore};
    use clearance_core::{
        ClearanceWorkflow, Department, DepartmentStore, IdentityProvider, TokenSigner, UserId,
    };
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState, ErrorBody, CORRELATION_HEADER};
    use crate::certificate::TeraCertificateRenderer;

    const PASSWORD: &str = "Clearance9";

    struct TestApp {
        router: Router,
        audit: InMemoryAuditSink,
    }

    async fn test_app(department_names: &[&str]) -> TestApp {
        let departments = Arc::new(InMemoryDepartmentStore::default());
        for name in department_names {
            departments
                .create(&Department::new(*name, UserId("admin-seed".to_string()), Utc::now()))
                .await
                .expect("seed department");
        }
        let users = Arc::new(InMemoryUserStore::default());
        let audit = InMemoryAuditSink::default();

        let workflow = ClearanceWorkflow::new(
            Arc::new(InMemoryRequestStore::default()),
            departments.clone(),
            users.clone(),
            Arc::new(TeraCertificateRenderer::html_only().expect("renderer")),
            Arc::new(audit.clone()),
        )
        .with_institution_name("Northfield Institute");
        let identity = IdentityProvider::new(
            users,
            departments,
            TokenSigner::new(
                SecretString::from("router-test-secret-with-enough-bytes".to_string()),
                Duration::hours(5),
            ),
            Arc::new(audit.clone()),
        );

        TestApp { router: router(ApiState::new(Arc::new(workflow), Arc::new(identity))), audit }
    }

    async fn send(
        app: &TestApp,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        app.router.clone().oneshot(request).await.expect("response")
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn register(app: &TestApp, name: &str, role: &str, department: Option<&str>) -> String {
        let email = format!("{}@college.edu", name.to_lowercase().replace(' ', "."));
        let response = send(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "name": name,
                "email": email,
                "password": PASSWORD,
                "role": role,
                "departmentName": department,
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED, "register {name}");
        let session: Value = body_json(response).await;
        session["token"].as_str().expect("token").to_string()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized_and_echoes_correlation_id() {
        let app = test_app(&["Library"]).await;
        let request = Request::builder()
            .uri("/api/requests/my")
            .header(CORRELATION_HEADER, "corr-abc")
            .body(Body::empty())
            .expect("request");

        let response = app.router.clone().oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()),
            Some("corr-abc")
        );
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.correlation_id, "corr-abc");
        assert_eq!(body.detail.as_deref(), Some("missing bearer token"));
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let app = test_app(&["Library"]).await;

        let response = send(&app, "GET", "/api/auth/me", Some("not-a-token"), None).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_round_trip_and_me() {
        let app = test_app(&["Library"]).await;
        register(&app, "Asha Verma", "student", None).await;

        let bad = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "asha.verma@college.edu", "password": "wrong"})),
        )
        .await;
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

        let good = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ASHA.VERMA@college.edu", "password": PASSWORD})),
        )
        .await;
        assert_eq!(good.status(), StatusCode::OK);
        let session: Value = body_json(good).await;
        let token = session["token"].as_str().expect("token");

        let profile: Value = body_json(send(&app, "GET", "/api/auth/me", Some(token), None).await).await;
        assert_eq!(profile["name"], "Asha Verma");
        assert_eq!(profile["role"], "student");
        assert_eq!(app.audit.events_of_type("auth.login_failed").len(), 1);
    }

    #[tokio::test]
    async fn full_clearance_flow_ends_with_certificate_download() {
        let app = test_app(&["Library", "Accounts"]).await;
        let student = register(&app, "Asha Verma", "student", None).await;
        let librarian = register(&app, "Lib Clerk", "staff", Some("Library")).await;
        let accountant = register(&app, "Acc Clerk", "staff", Some("Accounts")).await;

        let created = send(&app, "POST", "/api/requests", Some(&student), None).await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let created: Value = body_json(created).await;
        let id = created["id"].as_str().expect("id").to_string();
        assert_eq!(created["overall_status"], "pending");

        let queue: Value =
            body_json(send(&app, "GET", "/api/requests", Some(&librarian), None).await).await;
        assert_eq!(queue.as_array().map(Vec::len), Some(1));

        let early = send(&app, "GET", &format!("/api/requests/{id}/certificate"), Some(&student), None).await;
        assert_eq!(early.status(), StatusCode::UNPROCESSABLE_ENTITY);

        for token in [&librarian, &accountant] {
            let response = send(
                &app,
                "PUT",
                &format!("/api/requests/{id}/action"),
                Some(token),
                Some(json!({"status": "approved", "comment": "clear"})),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let certificate =
            send(&app, "GET", &format!("/api/requests/{id}/certificate"), Some(&student), None)
                .await;
        assert_eq!(certificate.status(), StatusCode::OK);
        assert_eq!(
            certificate.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        let disposition = certificate
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(disposition.contains(&format!("clearance_certificate_asha_verma_{id}.html")));
        let bytes = to_bytes(certificate.into_body(), usize::MAX).await.expect("body");
        let html = String::from_utf8(bytes.to_vec()).expect("utf-8");
        assert!(html.contains("Northfield Institute"));
        assert!(html.contains("Lib Clerk"));
    }

    #[tokio::test]
    async fn decision_errors_map_to_statuses() {
        let app = test_app(&["Library", "Accounts"]).await;
        let student = register(&app, "Asha Verma", "student", None).await;
        let librarian = register(&app, "Lib Clerk", "staff", Some("Library")).await;
        let created: Value =
            body_json(send(&app, "POST", "/api/requests", Some(&student), None).await).await;
        let action = format!("/api/requests/{}/action", created["id"].as_str().expect("id"));

        let by_student = send(
            &app,
            "PUT",
            &action,
            Some(&student),
            Some(json!({"status": "approved"})),
        )
        .await;
        assert_eq!(by_student.status(), StatusCode::FORBIDDEN);
        let malformed_by_student =
            send(&app, "PUT", &action, Some(&student), Some(json!({"status": "maybe"}))).await;
        assert_eq!(malformed_by_student.status(), StatusCode::FORBIDDEN);

        let no_comment =
            send(&app, "PUT", &action, Some(&librarian), Some(json!({"status": "rejected"}))).await;
        assert_eq!(no_comment.status(), StatusCode::BAD_REQUEST);

        let rejected = send(
            &app,
            "PUT",
            &action,
            Some(&librarian),
            Some(json!({"status": "rejected", "comment": "fine unpaid"})),
        )
        .await;
        assert_eq!(rejected.status(), StatusCode::OK);
        let rejected: Value = body_json(rejected).await;
        assert_eq!(rejected["overall_status"], "rejected");

        let again = send(
            &app,
            "PUT",
            &action,
            Some(&librarian),
            Some(json!({"status": "approved"})),
        )
        .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let unknown = send(
            &app,
            "PUT",
            "/api/requests/no-such-request/action",
            Some(&librarian),
            Some(json!({"status": "approved"})),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_are_gated_and_filtered() {
        let app = test_app(&["Library"]).await;
        let student = register(&app, "Asha Verma", "student", None).await;
        let admin = register(&app, "Registrar Office", "admin", None).await;
        send(&app, "POST", "/api/requests", Some(&student), None).await;

        let forbidden = send(&app, "GET", "/api/requests/all", Some(&student), None).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let by_name: Value = body_json(
            send(&app, "GET", "/api/requests/all?studentName=asha", Some(&admin), None).await,
        )
        .await;
        assert_eq!(by_name.as_array().map(Vec::len), Some(1));

        let approved: Value = body_json(
            send(&app, "GET", "/api/requests/all?status=approved", Some(&admin), None).await,
        )
        .await;
        assert_eq!(approved.as_array().map(Vec::len), Some(0));

        let bad_status =
            send(&app, "GET", "/api/requests/all?status=archived", Some(&admin), None).await;
        assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);

        let created = send(
            &app,
            "POST",
            "/api/departments",
            Some(&admin),
            Some(json!({"name": "  Hostel "})),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let duplicate = send(
            &app,
            "POST",
            "/api/departments",
            Some(&admin),
            Some(json!({"name": "Hostel"})),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let listed: Value =
            body_json(send(&app, "GET", "/api/departments", Some(&student), None).await).await;
        let names: Vec<&str> = listed
            .as_array()
            .map(|items| items.iter().filter_map(|d| d["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(names, vec!["Hostel", "Library"]);
    }

    #[tokio::test]
    async fn staff_registration_requires_known_department() {
        let app = test_app(&["Library"]).await;

        let response = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "name": "Ghost Clerk",
                "email": "ghost@college.edu",
                "password": PASSWORD,
                "role": "staff",
                "departmentName": "Observatory",
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
