//! JSON routes in front of the agent runtime.
//!
//! - `POST   /sales-agent`                        run one message through the pipeline
//! - `GET    /session/{user_id}/{session_id}`     read the stored session record
//! - `DELETE /session/{user_id}/{session_id}`     forget one session

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use salesdesk_agent::AgentRuntime;
use salesdesk_core::errors::{ApplicationError, InterfaceError};
use salesdesk_core::trace::ExecutionTrace;
use salesdesk_db::{SessionRecord, SessionStore, SessionStoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const UNKNOWN_USER_MESSAGE: &str =
    "I couldn't find your account. Please check your user id or sign up to start shopping with us.";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

impl ApiState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[derive(Debug, Deserialize)]
pub struct SalesAgentRequest {
    pub session_id: String,
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SalesAgentResponse {
    pub response: String,
    pub execution_trace: ExecutionTrace,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub response: String,
    pub error_code: String,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub session_id: String,
    pub session: SessionRecord,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: bool,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/sales-agent", post(sales_agent))
        .route("/session/{user_id}/{session_id}", get(get_session).delete(clear_session))
        .with_state(ApiState::new(runtime))
}

pub async fn sales_agent(
    State(state): State<ApiState>,
    Json(request): Json<SalesAgentRequest>,
) -> ApiResult<SalesAgentResponse> {
    let correlation_id = Uuid::new_v4().to_string();
    let user_id = request.user_id.trim();
    let session_id = request.session_id.trim();
    let message = request.message.trim();

    if user_id.is_empty() || session_id.is_empty() || message.is_empty() {
        return Err(reject(
            ApplicationError::InvalidRequest(
                "user_id, session_id and message are required".to_string(),
            ),
            &correlation_id,
        ));
    }

    match state.runtime.find_user(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            info!(
                event_name = "api.sales_agent.unknown_user",
                correlation_id = %correlation_id,
                user_id,
                "rejecting request for unknown user"
            );
            let mut rejected =
                reject(ApplicationError::NotFound(format!("user `{user_id}`")), &correlation_id);
            rejected.1.response = UNKNOWN_USER_MESSAGE.to_string();
            return Err(rejected);
        }
        Err(error) => {
            return Err(reject(ApplicationError::Persistence(error.to_string()), &correlation_id))
        }
    }

    match state.runtime.run_correlated(&correlation_id, user_id, session_id, message).await {
        Ok(reply) => Ok(Json(SalesAgentResponse {
            response: reply.response,
            execution_trace: reply.execution_trace,
        })),
        Err(pipeline_error) => {
            let apology = pipeline_error.user_message().to_string();
            let mut rejected = reject(ApplicationError::Pipeline(pipeline_error), &correlation_id);
            rejected.1.response = apology;
            Err(rejected)
        }
    }
}

pub async fn get_session(
    Path((user_id, session_id)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> ApiResult<SessionResponse> {
    let session = state
        .runtime
        .sessions()
        .get(&user_id, &session_id)
        .await
        .map_err(|error| reject(session_error(error), &Uuid::new_v4().to_string()))?;
    Ok(Json(SessionResponse { user_id, session_id, session }))
}

pub async fn clear_session(
    Path((user_id, session_id)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> ApiResult<ClearedResponse> {
    let cleared = state
        .runtime
        .sessions()
        .clear_session(&user_id, &session_id)
        .await
        .map_err(|error| reject(session_error(error), &Uuid::new_v4().to_string()))?;
    info!(
        event_name = "api.session.cleared",
        user_id = %user_id,
        session_id = %session_id,
        cleared,
        "session clear requested"
    );
    Ok(Json(ClearedResponse { cleared }))
}

fn session_error(error: SessionStoreError) -> ApplicationError {
    match error {
        SessionStoreError::InvalidKey(key) => {
            ApplicationError::InvalidRequest(format!("`{key}` is not a valid identifier"))
        }
        other => ApplicationError::Persistence(other.to_string()),
    }
}

fn reject(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let status = status_for(&interface);
    if status.is_server_error() {
        warn!(
            event_name = "api.request.failed",
            correlation_id,
            error_code = interface.error_code(),
            error = %interface,
            "request failed"
        );
    }
    (
        status,
        Json(ApiError {
            response: interface.user_message().to_string(),
            error_code: interface.error_code().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::{Path, State},
        http::{Request, StatusCode},
        Json,
    };
    use salesdesk_agent::prompts::PLANNER_ROLE;
    use salesdesk_agent::{
        AgentRuntime, BoundedCall, LlmClient, LlmError, LlmRequest, RuntimeSettings,
    };
    use salesdesk_core::governance::Guardrails;
    use salesdesk_core::trace::InMemoryTraceSink;
    use salesdesk_db::{DemoDataset, InMemorySessionStore, RetailRepositories, SessionStore};
    use tower::ServiceExt;

    use super::{clear_session, get_session, sales_agent, ApiState, SalesAgentRequest};

    /// Plans a stock check; every other call fails so replies take the fallback path.
    struct StockCheckModel;

    #[async_trait]
    impl LlmClient for StockCheckModel {
        async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
            if request.system.starts_with(PLANNER_ROLE) {
                Ok(r#"{"intent": "check stock", "steps": [{"action": "check_inventory", "params": {"sku": "SKU-001", "size": "M"}}]}"#.to_string())
            } else {
                Err(LlmError::Http("offline".to_string()))
            }
        }
    }

    /// Plans an uncatalogued action and echoes it back from the repair call.
    struct TeleportModel;

    #[async_trait]
    impl LlmClient for TeleportModel {
        async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
            Ok(r#"{"intent": "move item", "steps": [{"action": "teleport_item", "params": {}}]}"#.to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl LlmClient for Down {
        async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
            Err(LlmError::Http("connection refused".to_string()))
        }
    }

    async fn runtime(llm: Arc<dyn LlmClient>) -> (Arc<AgentRuntime>, Arc<InMemorySessionStore>) {
        let repositories = RetailRepositories::in_memory();
        DemoDataset::load(&repositories).await.expect("seed");
        let sessions = Arc::new(InMemorySessionStore::default());
        let runtime = AgentRuntime::new(
            llm,
            repositories,
            sessions.clone(),
            Arc::new(InMemoryTraceSink::default()),
            RuntimeSettings {
                bounded: BoundedCall::new(Duration::from_millis(100), 1),
                guardrails: Guardrails::default(),
            },
        );
        (Arc::new(runtime), sessions)
    }

    fn request(user_id: &str, message: &str) -> Json<SalesAgentRequest> {
        Json(SalesAgentRequest {
            session_id: "web".to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn sales_agent_returns_reply_and_trace() {
        let (runtime, sessions) = runtime(Arc::new(StockCheckModel)).await;

        let Json(reply) = sales_agent(State(ApiState::new(runtime)), request("user_001", "Is SKU-001 in M?"))
            .await
            .expect("reply");

        assert_eq!(reply.execution_trace.execution_steps.len(), 1);
        assert!(reply.response.contains("in stock"));
        let session = sessions.get("user_001", "web").await.expect("session");
        assert_eq!(session.message_history.len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (runtime, _) = runtime(Arc::new(StockCheckModel)).await;

        let (status, Json(error)) =
            sales_agent(State(ApiState::new(runtime)), request("user_999", "hello"))
                .await
                .expect_err("unknown user");

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.error_code, "not_found");
        assert!(error.response.contains("couldn't find your account"));
    }

    #[tokio::test]
    async fn exhausted_planning_is_bad_gateway_with_code() {
        let (runtime, _) = runtime(Arc::new(Down)).await;

        let (status, Json(error)) =
            sales_agent(State(ApiState::new(runtime)), request("user_001", "Is SKU-001 in stock?"))
                .await
                .expect_err("planning failed");

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.error_code, "upstream_call_failed");
        assert!(!error.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn unrepairable_plan_is_bad_request_with_code() {
        let (runtime, sessions) = runtime(Arc::new(TeleportModel)).await;

        let (status, Json(error)) =
            sales_agent(State(ApiState::new(runtime)), request("user_001", "teleport SKU-001"))
                .await
                .expect_err("unrepairable");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.error_code, "unrepairable_plan");
        assert!(sessions.get("user_001", "web").await.expect("session").is_empty());
    }

    #[tokio::test]
    async fn blank_message_is_bad_request() {
        let (runtime, _) = runtime(Arc::new(Down)).await;

        let (status, _) = sales_agent(State(ApiState::new(runtime)), request("user_001", "   "))
            .await
            .expect_err("blank");

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_can_be_read_and_cleared() {
        let (runtime, _) = runtime(Arc::new(StockCheckModel)).await;
        let state = ApiState::new(runtime.clone());
        sales_agent(State(state.clone()), request("user_001", "Is SKU-001 in M?")).await.expect("reply");

        let path = || Path(("user_001".to_string(), "web".to_string()));
        let Json(read) = get_session(path(), State(state.clone())).await.expect("read");
        assert_eq!(read.session.last_intent.as_deref(), Some("check stock"));

        let Json(cleared) = clear_session(path(), State(state.clone())).await.expect("clear");
        assert!(cleared.cleared);
        let Json(again) = get_session(path(), State(state)).await.expect("read again");
        assert!(again.session.is_empty());
    }

    #[tokio::test]
    async fn router_serves_sales_agent_route() {
        let (runtime, _) = runtime(Arc::new(StockCheckModel)).await;
        let body = r#"{"session_id": "web", "user_id": "user_001", "message": "Is SKU-001 in M?"}"#;

        let response = super::router(runtime)
            .oneshot(
                Request::post("/sales-agent")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
