use std::sync::Arc;

use salesdesk_agent::{AgentRuntime, LlmError};
use salesdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use salesdesk_db::{
    connect_with_settings, migrations, DbPool, FileSessionStore, RetailRepositories, SessionStore,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("language model client setup failed: {0}")]
    Llm(#[from] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
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

    let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::from_config(&config.session));
    let agent_runtime =
        AgentRuntime::from_config(&config, RetailRepositories::sql(db_pool.clone()), sessions)?;

    Ok(Application { config, db_pool, agent_runtime: Arc::new(agent_runtime) })
}

#[cfg(test)]
mod tests {
    use salesdesk_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(provider: LlmProvider, dir: &std::path::Path) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(format!("sqlite://{}?mode=rwc", dir.join("salesdesk.db").display())),
                llm_provider: Some(provider),
                sessions_dir: Some(dir.join("sessions")),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_hosted_model_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap(options(LlmProvider::OpenAi, dir.path())).await;

        let error = result.err().expect("missing key must fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_schema_for_local_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(LlmProvider::Ollama, dir.path()))
            .await
            .expect("bootstrap should succeed with a local model");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'products', 'inventory', 'orders')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("retail tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        let user = app.agent_runtime.find_user("user_001").await.expect("query");
        assert!(user.is_none(), "bootstrap does not seed demo data");

        app.db_pool.close().await;
    }
}
