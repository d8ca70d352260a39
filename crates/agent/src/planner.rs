use std::sync::Arc;

use tracing::info;

use salesdesk_core::catalog::ToolCatalog;
use salesdesk_core::errors::{PipelineError, UpstreamStage};
use salesdesk_core::plan::{parse_plan, Plan};

use crate::llm::{BoundedCall, LlmClient, LlmRequest};
use crate::prompts::{planner_system_prompt, planner_user_prompt, PlanningContext};

/// Turns a user message into a candidate plan. The plan is untrusted until the
/// validator has seen it.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    bounded: BoundedCall,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, bounded: BoundedCall, catalog: &ToolCatalog) -> Self {
        Self { llm, bounded, system_prompt: planner_system_prompt(catalog) }
    }

    pub async fn plan(
        &self,
        correlation_id: &str,
        message: &str,
        context: &PlanningContext,
    ) -> Result<Plan, PipelineError> {
        let request = LlmRequest::new(&self.system_prompt, planner_user_prompt(message, context));
        let plan = self
            .bounded
            .complete_with(self.llm.as_ref(), UpstreamStage::Planning, &request, |text| {
                parse_plan(text).map_err(|error| error.to_string())
            })
            .await?;

        info!(
            event_name = "pipeline.plan.generated",
            correlation_id,
            intent = %plan.intent,
            step_count = plan.steps.len(),
            "planner produced candidate plan"
        );
        Ok(plan)
    }
}
