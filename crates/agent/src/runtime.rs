use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use salesdesk_core::catalog::ToolCatalog;
use salesdesk_core::config::{AppConfig, TraceConfig, TraceSinkKind};
use salesdesk_core::domain::customer::{UserId, UserProfile};
use salesdesk_core::errors::PipelineError;
use salesdesk_core::execution::{PlanRunner, RequestIdentity};
use salesdesk_core::governance::{GovernanceOutcome, Guardrails};
use salesdesk_core::plan::Plan;
use salesdesk_core::trace::{
    record_best_effort, ExecutionTrace, FanoutTraceSink, FileTraceSink, TraceAssembler, TraceSink,
    TracingTraceSink,
};
use salesdesk_core::validator::{PlanValidator, ValidationResult};
use salesdesk_db::repositories::{RepositoryError, RetailRepositories};
use salesdesk_db::session::{SessionStore, SessionTurn, StepSummary};

use crate::governance::GovernanceInvoker;
use crate::llm::{BoundedCall, HttpLlmClient, LlmClient, LlmError};
use crate::planner::Planner;
use crate::prompts::PlanningContext;
use crate::responder::Responder;
use crate::tools::ToolRegistry;

#[derive(Clone, Debug, Serialize)]
pub struct AgentReply {
    pub response: String,
    pub execution_trace: ExecutionTrace,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug)]
pub struct RuntimeSettings {
    pub bounded: BoundedCall,
    pub guardrails: Guardrails,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bounded: BoundedCall::from_config(&config.llm),
            guardrails: Guardrails::new(config.governance.intent_similarity_threshold),
        }
    }
}

/// Drives one request through plan → validate → (repair) → execute → respond.
/// Holds no per-request state; concurrent calls share only the collaborators.
pub struct AgentRuntime {
    planner: Planner,
    validator: PlanValidator,
    governance: GovernanceInvoker,
    runner: PlanRunner,
    responder: Responder,
    repositories: RetailRepositories,
    sessions: Arc<dyn SessionStore>,
    traces: Arc<dyn TraceSink>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        repositories: RetailRepositories,
        sessions: Arc<dyn SessionStore>,
        traces: Arc<dyn TraceSink>,
        settings: RuntimeSettings,
    ) -> Self {
        let catalog = ToolCatalog::shared();
        let tools = ToolRegistry::retail(repositories.clone(), sessions.clone());

        Self {
            planner: Planner::new(llm.clone(), settings.bounded, &catalog),
            validator: PlanValidator::new(catalog.clone()),
            governance: GovernanceInvoker::new(llm.clone(), settings.bounded, settings.guardrails),
            runner: PlanRunner::new(catalog, Arc::new(tools)),
            responder: Responder::new(llm, settings.bounded),
            repositories,
            sessions,
            traces,
        }
    }

    /// Wires the configured HTTP model client and trace sink.
    pub fn from_config(
        config: &AppConfig,
        repositories: RetailRepositories,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, LlmError> {
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::from_config(&config.llm)?);
        Ok(Self::new(
            llm,
            repositories,
            sessions,
            trace_sink_from_config(&config.trace),
            RuntimeSettings::from_config(config),
        ))
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError> {
        self.repositories.users.find_by_id(&UserId(user_id.to_string())).await
    }

    /// Business failures stay inside the trace; only upstream exhaustion and
    /// unrepairable plans come back as `Err`.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<AgentReply, PipelineError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.run_correlated(&correlation_id, user_id, session_id, message).await
    }

    /// Same as [`AgentRuntime::run`] under a caller-chosen correlation id.
    pub async fn run_correlated(
        &self,
        correlation_id: &str,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<AgentReply, PipelineError> {
        info!(
            event_name = "pipeline.request.received",
            correlation_id,
            user_id,
            session_id,
            "processing sales agent request"
        );

        match self.run_pipeline(correlation_id, user_id, session_id, message).await {
            Ok(reply) => Ok(reply),
            Err(pipeline_error) => {
                error!(
                    event_name = "pipeline.request.failed",
                    correlation_id,
                    user_id,
                    session_id,
                    error_code = pipeline_error.error_code(),
                    error = %pipeline_error,
                    "request terminated"
                );
                Err(pipeline_error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        correlation_id: &str,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<AgentReply, PipelineError> {
        let identity = RequestIdentity::new(user_id, session_id);
        let context = self.planning_context(correlation_id, &identity).await;

        let candidate = self.planner.plan(correlation_id, message, &context).await?;
        let validation = self.validator.validate(&candidate);
        let (plan, governance) = self.settle_plan(correlation_id, candidate, &validation).await?;

        let outcome = self.runner.run(&plan, &identity).await;
        let trace = TraceAssembler::assemble(
            correlation_id,
            &identity,
            plan,
            &validation,
            governance,
            outcome,
        );
        record_best_effort(self.traces.as_ref(), &trace).await;
        info!(
            event_name = "pipeline.plan.executed",
            correlation_id,
            trace_id = %trace.trace_id,
            steps = trace.execution_steps.len(),
            any_ok = trace.any_step_ok(),
            "plan executed"
        );

        let response = self.responder.respond(message, &trace, &context.session).await;
        self.remember_turn(correlation_id, &identity, message, &response, &trace).await;

        Ok(AgentReply {
            response,
            execution_trace: trace,
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Picks the plan to execute. Governance runs at most once; a repaired plan
    /// that still fails validation ends the request.
    async fn settle_plan(
        &self,
        correlation_id: &str,
        candidate: Plan,
        validation: &ValidationResult,
    ) -> Result<(Plan, Option<GovernanceOutcome>), PipelineError> {
        if validation.valid {
            if let Some(corrected) = &validation.corrected_plan {
                info!(
                    event_name = "pipeline.plan.auto_corrected",
                    correlation_id,
                    step_count = corrected.steps.len(),
                    "validator appended a recommendation step"
                );
            }
            let plan = validation.corrected_plan.clone().unwrap_or(candidate);
            return Ok((plan, None));
        }

        warn!(
            event_name = "pipeline.plan.invalid",
            correlation_id,
            errors = %validation.errors.join("; "),
            "candidate plan failed validation, invoking governance"
        );
        let outcome = self.governance.repair(correlation_id, &candidate, &validation.errors).await?;

        let Some(repaired) = outcome.plan.clone().filter(|_| outcome.accepted) else {
            let reason = outcome
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "governance rejected the repair".to_string());
            return Err(PipelineError::UnrepairablePlan { reasons: vec![reason] });
        };

        let revalidation = self.validator.validate(&repaired);
        if !revalidation.valid {
            return Err(PipelineError::UnrepairablePlan { reasons: revalidation.errors });
        }
        let plan = revalidation.corrected_plan.unwrap_or(repaired);
        Ok((plan, Some(outcome)))
    }

    /// Store failures degrade to an empty context rather than failing the request.
    async fn planning_context(&self, correlation_id: &str, identity: &RequestIdentity) -> PlanningContext {
        let profile = match self.find_user(&identity.user_id).await {
            Ok(profile) => profile,
            Err(load_error) => {
                warn!(
                    event_name = "pipeline.context.profile_unavailable",
                    correlation_id,
                    error = %load_error,
                    "could not load user profile"
                );
                None
            }
        };

        let personalization = self
            .sessions
            .personalization(&identity.user_id)
            .await
            .unwrap_or_else(|load_error| {
                warn!(
                    event_name = "pipeline.context.personalization_unavailable",
                    correlation_id,
                    error = %load_error,
                    "could not load personalization"
                );
                Default::default()
            });

        let session = self
            .sessions
            .get(&identity.user_id, &identity.session_id)
            .await
            .unwrap_or_else(|load_error| {
                warn!(
                    event_name = "pipeline.context.session_unavailable",
                    correlation_id,
                    error = %load_error,
                    "could not load session"
                );
                Default::default()
            });

        PlanningContext {
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            profile,
            personalization,
            session,
        }
    }

    async fn remember_turn(
        &self,
        correlation_id: &str,
        identity: &RequestIdentity,
        message: &str,
        response: &str,
        trace: &ExecutionTrace,
    ) {
        let turn = SessionTurn {
            message: message.to_string(),
            intent: trace.plan.intent.clone(),
            response: response.to_string(),
            steps: trace
                .execution_steps
                .iter()
                .map(|step| StepSummary { action: step.action.to_string(), status: step.status })
                .collect(),
        };
        if let Err(store_error) =
            self.sessions.append(&identity.user_id, &identity.session_id, turn).await
        {
            warn!(
                event_name = "pipeline.session.append_failed",
                correlation_id,
                error = %store_error,
                "could not persist conversation turn"
            );
        }
    }
}

pub fn trace_sink_from_config(config: &TraceConfig) -> Arc<dyn TraceSink> {
    match config.sink {
        TraceSinkKind::Tracing => Arc::new(TracingTraceSink),
        TraceSinkKind::File => Arc::new(FileTraceSink::new(config.dir.clone())),
        TraceSinkKind::Both => Arc::new(FanoutTraceSink::new(vec![
            Arc::new(TracingTraceSink),
            Arc::new(FileTraceSink::new(config.dir.clone())),
        ])),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use salesdesk_core::config::{TraceConfig, TraceSinkKind};
    use salesdesk_core::trace::TraceSink;

    use super::trace_sink_from_config;

    #[tokio::test]
    async fn file_sink_writes_into_configured_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = trace_sink_from_config(&TraceConfig {
            sink: TraceSinkKind::Both,
            dir: PathBuf::from(dir.path()),
        });
        let trace = salesdesk_core::trace::ExecutionTrace {
            trace_id: "0f0e0d0c-0000-0000-0000-000000000000".to_string(),
            correlation_id: "corr".to_string(),
            user_id: "user_001".to_string(),
            session_id: "web".to_string(),
            plan: salesdesk_core::plan::Plan::unanswerable(),
            validation_passed: true,
            validation_errors: Vec::new(),
            auto_corrected: false,
            governance: None,
            execution_steps: Vec::new(),
            final_result: salesdesk_core::execution::FinalResult::from_steps(&[]),
            context_keys: Vec::new(),
            recorded_at: chrono::Utc::now(),
        };

        sink.record(&trace).await.expect("recorded");
        let written = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(written, 1);
    }
}
