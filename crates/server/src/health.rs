use std::path::{Path, PathBuf};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use salesdesk_agent::HttpLlmClient;
use salesdesk_core::config::{AppConfig, LlmConfig, TraceConfig, TraceSinkKind};
use salesdesk_db::{ping, DbPool};
use serde::Serialize;
use tracing::warn;

/// Everything a chat request touches before it can answer: the catalog
/// database, the session and personalization stores, the model client and
/// the trace store.
#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    session_dirs: Vec<PathBuf>,
    llm: LlmConfig,
    trace: TraceConfig,
}

impl HealthState {
    pub fn from_config(db_pool: DbPool, config: &AppConfig) -> Self {
        Self {
            db_pool,
            session_dirs: vec![
                config.session.sessions_dir.clone(),
                config.session.personalization_dir.clone(),
            ],
            llm: config.llm.clone(),
            trace: config.trace.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentReadiness {
    pub component: &'static str,
    pub ready: bool,
    /// A failing required component makes the whole service unavailable;
    /// an optional one only degrades it.
    pub required: bool,
    pub detail: String,
}

impl ComponentReadiness {
    fn check(component: &'static str, required: bool, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self { component, ready: true, required, detail },
            Err(detail) => Self { component, ready: false, required, detail },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub components: Vec<ComponentReadiness>,
    pub checked_at: String,
}

#[cfg(test)]
impl HealthReport {
    fn component(&self, name: &str) -> Option<&ComponentReadiness> {
        self.components.iter().find(|component| component.component == name)
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let components = vec![
        ComponentReadiness::check("database", true, database_ready(&state.db_pool).await),
        ComponentReadiness::check("session_store", true, session_dirs_ready(&state.session_dirs).await),
        ComponentReadiness::check("llm_client", true, llm_client_ready(&state.llm)),
        ComponentReadiness::check("trace_store", false, trace_store_ready(&state.trace).await),
    ];

    let required_down = components.iter().any(|component| component.required && !component.ready);
    let any_down = components.iter().any(|component| !component.ready);
    let (status, status_code) = if required_down {
        ("unavailable", StatusCode::SERVICE_UNAVAILABLE)
    } else if any_down {
        ("degraded", StatusCode::OK)
    } else {
        ("ready", StatusCode::OK)
    };

    for component in components.iter().filter(|component| !component.ready) {
        warn!(
            event_name = "system.health.component_unready",
            correlation_id = "health",
            component = component.component,
            required = component.required,
            detail = %component.detail,
            "health check found an unready component"
        );
    }

    let report = HealthReport { status, components, checked_at: Utc::now().to_rfc3339() };
    (status_code, Json(report))
}

async fn database_ready(pool: &DbPool) -> Result<String, String> {
    ping(pool)
        .await
        .map(|()| "catalog query succeeded".to_string())
        .map_err(|error| format!("catalog query failed: {error}"))
}

async fn session_dirs_ready(dirs: &[PathBuf]) -> Result<String, String> {
    for dir in dirs {
        writable_dir(dir).await?;
    }
    Ok(format!("{} store directories writable", dirs.len()))
}

fn llm_client_ready(config: &LlmConfig) -> Result<String, String> {
    HttpLlmClient::from_config(config)
        .map(|client| format!("{} client configured for model `{}`", client.provider().as_str(), config.model))
        .map_err(|error| error.to_string())
}

async fn trace_store_ready(config: &TraceConfig) -> Result<String, String> {
    match config.sink {
        TraceSinkKind::Tracing => Ok("traces go to the log stream".to_string()),
        TraceSinkKind::File | TraceSinkKind::Both => {
            writable_dir(&config.dir).await?;
            Ok(format!("trace directory `{}` writable", config.dir.display()))
        }
    }
}

async fn writable_dir(dir: &Path) -> Result<(), String> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|error| format!("cannot create `{}`: {error}", dir.display()))?;
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|error| format!("cannot stat `{}`: {error}", dir.display()))?;
    if metadata.permissions().readonly() {
        return Err(format!("`{}` is read-only", dir.display()));
    }
    Ok(())
}
