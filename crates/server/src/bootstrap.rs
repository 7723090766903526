use std::sync::Arc;

use clearance_core::audit::AuditSink;
use clearance_core::certificate::RenderError;
use clearance_core::config::AppConfig;
use clearance_core::store::StoreError;
use clearance_core::{ClearanceWorkflow, IdentityProvider, TokenSigner};
use clearance_db::{
    connect_with_settings, migrations, DbPool, DemoSeedDataset, SqlDepartmentStore,
    SqlRequestStore, SqlUserStore,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::audit::TracingAuditSink;
use crate::certificate::TeraCertificateRenderer;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo data seeding failed: {0}")]
    Seed(#[source] StoreError),
    #[error("certificate renderer unavailable: {0}")]
    Renderer(#[source] RenderError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    if config.database.seed_demo_data {
        DemoSeedDataset::load(&db_pool).await.map_err(BootstrapError::Seed)?;
    }

    let renderer = TeraCertificateRenderer::new(config.certificate.template_dir.as_deref())
        .map_err(BootstrapError::Renderer)?;
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let departments = Arc::new(SqlDepartmentStore::new(db_pool.clone()));
    let users = Arc::new(SqlUserStore::new(db_pool.clone()));

    let workflow = ClearanceWorkflow::new(
        Arc::new(SqlRequestStore::new(db_pool.clone())),
        departments.clone(),
        users.clone(),
        Arc::new(renderer),
        audit.clone(),
    )
    .with_decision_attempts(config.workflow.decision_attempts)
    .with_institution_name(config.certificate.institution_name.clone());

    let identity = IdentityProvider::new(
        users,
        departments,
        TokenSigner::new(config.auth.token_secret.clone(), config.auth.token_ttl()),
        audit,
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        seed_demo_data = config.database.seed_demo_data,
        "application services wired"
    );

    Ok(Application {
        api: ApiState::new(Arc::new(workflow), Arc::new(identity)),
        config,
        db_pool,
    })
}
