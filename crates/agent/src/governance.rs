use std::sync::Arc;

use tracing::{info, warn};

use salesdesk_core::errors::{PipelineError, UpstreamStage};
use salesdesk_core::governance::{GovernanceOutcome, Guardrails};
use salesdesk_core::plan::{parse_plan, Plan};

use crate::llm::{BoundedCall, LlmClient, LlmRequest};
use crate::prompts::{governance_system_prompt, governance_user_prompt};

/// One constrained repair pass over a structurally invalid plan. The model may
/// only reformat; the guardrails reject anything that changes the step count,
/// the ordered actions, or drifts from the original intent.
pub struct GovernanceInvoker {
    llm: Arc<dyn LlmClient>,
    bounded: BoundedCall,
    guardrails: Guardrails,
}

impl GovernanceInvoker {
    pub fn new(llm: Arc<dyn LlmClient>, bounded: BoundedCall, guardrails: Guardrails) -> Self {
        Self { llm, bounded, guardrails }
    }

    /// Upstream exhaustion is an `Err`; a guardrail violation is a rejected outcome.
    pub async fn repair(
        &self,
        correlation_id: &str,
        plan: &Plan,
        errors: &[String],
    ) -> Result<GovernanceOutcome, PipelineError> {
        let request = LlmRequest::new(governance_system_prompt(), governance_user_prompt(plan, errors));
        let repaired = self
            .bounded
            .complete_with(self.llm.as_ref(), UpstreamStage::Governance, &request, |text| {
                parse_plan(text).map_err(|error| error.to_string())
            })
            .await?;

        let outcome = self.guardrails.evaluate(plan, repaired);
        if outcome.accepted {
            info!(
                event_name = "pipeline.governance.accepted",
                correlation_id,
                step_count = plan.steps.len(),
                "governance repair accepted"
            );
        } else {
            warn!(
                event_name = "pipeline.governance.rejected",
                correlation_id,
                reason = outcome.rejection_reason.as_deref().unwrap_or_default(),
                "governance repair violated a guardrail"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use salesdesk_core::governance::Guardrails;
    use salesdesk_core::plan::{Plan, Step};

    use super::GovernanceInvoker;
    use crate::llm::{BoundedCall, LlmClient, LlmError, LlmRequest};

    struct Fixed(&'static str);

    #[async_trait]
    impl LlmClient for Fixed {
        async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    fn invoker(reply: &'static str) -> GovernanceInvoker {
        GovernanceInvoker::new(
            Arc::new(Fixed(reply)),
            BoundedCall::new(Duration::from_secs(1), 1),
            Guardrails::default(),
        )
    }

    fn broken_plan() -> Plan {
        Plan::new("check inventory for sku", vec![Step::new("check_inventory").with_param("size", "M")])
    }

    #[tokio::test]
    async fn faithful_repair_is_accepted() {
        let reply = r#"{"intent": "check inventory for sku", "steps": [{"action": "check_inventory", "params": {"sku": "SKU-001", "size": "M"}}]}"#;
        let outcome = invoker(reply)
            .repair("corr", &broken_plan(), &["missing sku".to_string()])
            .await
            .expect("governance responds");
        assert!(outcome.accepted);
        let repaired = outcome.plan.expect("accepted plan");
        assert_eq!(repaired.steps[0].parameters["sku"], "SKU-001");
    }

    #[tokio::test]
    async fn renamed_action_is_rejected() {
        let reply = r#"{"intent": "check inventory for sku", "steps": [{"action": "recommend_products", "params": {"category": "tops"}}]}"#;
        let outcome = invoker(reply)
            .repair("corr", &broken_plan(), &["missing sku".to_string()])
            .await
            .expect("governance responds");
        assert!(!outcome.accepted);
        assert!(outcome.plan.is_none());
        assert!(outcome.rejection_reason.is_some());
    }
}
