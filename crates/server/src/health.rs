use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use clearance_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

const REQUIRED_TABLES: &[&str] = &["department", "app_user", "clearance_request", "approval_entry"];

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ready: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub checks: Vec<HealthCheck>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Serves `/health` on its own port so probes keep working when the API
/// listener is saturated.
pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let connectivity = connectivity_check(&state.db_pool).await;
    let schema = if connectivity.ready {
        schema_check(&state.db_pool).await
    } else {
        HealthCheck { name: "schema", ready: false, detail: "skipped: database unreachable".into() }
    };
    let checks = vec![connectivity, schema];
    let ready = checks.iter().all(|check| check.ready);

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: "clearance-server",
        checks,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn connectivity_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { name: "database", ready: true, detail: "query succeeded".into() },
        Err(error) => HealthCheck {
            name: "database",
            ready: false,
            detail: format!("query failed: {error}"),
        },
    }
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    let placeholders = vec!["?"; REQUIRED_TABLES.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({placeholders})"
    );
    let query = REQUIRED_TABLES
        .iter()
        .fold(sqlx::query_scalar::<_, i64>(&sql), |query, table| query.bind(*table));

    match query.fetch_one(pool).await {
        Ok(count) if count == REQUIRED_TABLES.len() as i64 => {
            HealthCheck { name: "schema", ready: true, detail: "migrations applied".into() }
        }
        Ok(count) => HealthCheck {
            name: "schema",
            ready: false,
            detail: format!("{count} of {} tables present", REQUIRED_TABLES.len()),
        },
        Err(error) => HealthCheck {
            name: "schema",
            ready: false,
            detail: format!("schema query failed: {error}"),
        },
    }
}
