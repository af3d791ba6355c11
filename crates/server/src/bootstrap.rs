use axum::Router;
use thiserror::Error;
use tower_http::services::ServeDir;
use tracing::info;

use quotar_core::config::{AppConfig, ConfigError, LoadOptions};
use quotar_db::{connect_with_settings, migrations, DbPool};

use crate::pdf::PdfRenderer;
use crate::state::AppState;
use crate::{dashboard, quotations};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let renderer = PdfRenderer::new(&config.documents, config.company.clone());
    let state = AppState::new(
        db_pool.clone(),
        renderer,
        config.company.clone(),
        config.auth.gateway_secret.clone(),
    );

    Ok(Application { config, db_pool, state })
}

/// Assemble the API router: quotation routes, dashboard, and the static
/// artifact directory the generated PDFs are served from.
pub fn api_router(app: &Application) -> Router {
    Router::new()
        .merge(quotations::router(app.state.clone()))
        .merge(dashboard::router(app.state.clone()))
        .nest_service(
            "/public/pdfs",
            ServeDir::new(&app.config.documents.output_dir),
        )
}
