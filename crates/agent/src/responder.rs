use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use salesdesk_core::catalog::actions;
use salesdesk_core::errors::UpstreamStage;
use salesdesk_core::execution::StepStatus;
use salesdesk_core::trace::ExecutionTrace;
use salesdesk_db::session::SessionRecord;

use crate::llm::{BoundedCall, LlmClient, LlmRequest};
use crate::prompts::{
    mentions_catalog_ids, responder_system_prompt, responder_user_prompt, small_talk_user_prompt,
    SMALL_TALK_ROLE,
};

pub const CAPABILITY_MESSAGE: &str = "I might not be able to do exactly that yet, but I can help you check whether items are in stock, suggest products, look up your loyalty benefits, estimate order totals, and explore delivery or pickup options.";
pub const APOLOGY_MESSAGE: &str = "I tried to process your request but ran into an unexpected issue. Please try again or rephrase your question.";
pub const SMALL_TALK_FALLBACK: &str =
    "I'm doing well, thanks for asking! How can I help you with your shopping today?";

const SMALL_TALK_PHRASES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "how are you",
    "how's your day",
    "what's up",
    "good morning",
    "good evening",
    "thank you",
    "thanks",
];

/// Phrases the final reply from the trace. Never fails: every upstream problem
/// degrades to a deterministic message.
pub struct Responder {
    llm: Arc<dyn LlmClient>,
    bounded: BoundedCall,
}

impl Responder {
    pub fn new(llm: Arc<dyn LlmClient>, bounded: BoundedCall) -> Self {
        Self { llm, bounded }
    }

    pub async fn respond(
        &self,
        message: &str,
        trace: &ExecutionTrace,
        session: &SessionRecord,
    ) -> String {
        // greetings only take the chat path when no tool produced anything to report
        let nothing_to_report = trace.execution_steps.is_empty() || trace.plan.is_unanswerable();
        if nothing_to_report && is_small_talk(message) {
            let request = LlmRequest::new(SMALL_TALK_ROLE, small_talk_user_prompt(message, session));
            return self
                .phrase(&trace.correlation_id, &request)
                .await
                .unwrap_or_else(|| SMALL_TALK_FALLBACK.to_string());
        }

        if trace.plan.is_unanswerable() {
            return CAPABILITY_MESSAGE.to_string();
        }

        if !trace.any_step_ok() {
            return APOLOGY_MESSAGE.to_string();
        }

        let request =
            LlmRequest::new(responder_system_prompt(), responder_user_prompt(message, trace, session));
        match self.phrase(&trace.correlation_id, &request).await {
            Some(reply) => reply,
            None => fallback_summary(trace),
        }
    }

    async fn phrase(&self, correlation_id: &str, request: &LlmRequest) -> Option<String> {
        // the responder reuses the planning bound; its failures are never terminal
        match self.bounded.complete(self.llm.as_ref(), UpstreamStage::Responder, request).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(error) => {
                warn!(
                    event_name = "pipeline.responder.degraded",
                    correlation_id,
                    error = %error,
                    "responder call failed, using deterministic reply"
                );
                None
            }
        }
    }
}

/// Greetings and thanks, unless the message names a catalog id.
pub fn is_small_talk(message: &str) -> bool {
    if mentions_catalog_ids(message) {
        return false;
    }
    let lowered = message.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|word| !word.is_empty())
        .collect();

    SMALL_TALK_PHRASES.iter().any(|phrase| {
        let phrase_words: Vec<&str> = phrase.split(' ').collect();
        words.windows(phrase_words.len()).any(|window| window == phrase_words.as_slice())
    })
}

/// Reply assembled from the trace alone, used when the model is unavailable.
pub fn fallback_summary(trace: &ExecutionTrace) -> String {
    let inventory = trace
        .execution_steps
        .iter()
        .rev()
        .find(|step| step.status == StepStatus::Ok && step.action.as_str() == actions::CHECK_INVENTORY);

    if let Some(step) = inventory {
        let output = &step.output;
        let item = output
            .get("product_name")
            .and_then(Value::as_str)
            .or_else(|| output.get("sku").and_then(Value::as_str))
            .unwrap_or("that item");
        let size = output.get("size").and_then(Value::as_str).unwrap_or_default();
        let quantity = output.get("quantity").and_then(Value::as_i64).unwrap_or_default();
        let available = output.get("available").and_then(Value::as_bool).unwrap_or(false);
        let sized = if size.is_empty() { String::new() } else { format!(" in size {size}") };

        return if available {
            format!("Good news: {item}{sized} is in stock, with {quantity} available.")
        } else {
            format!("Sorry, {item}{sized} is currently out of stock.")
        };
    }

    let completed = trace.count(StepStatus::Ok);
    let total = trace.execution_steps.len();
    format!(
        "I completed {completed} of {total} steps for your request, but couldn't put together a detailed reply right now. Please ask again if you need more detail."
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};

    use salesdesk_core::execution::{FinalResult, StepResult, StepStatus};
    use salesdesk_core::plan::{ActionName, Plan, Step};
    use salesdesk_core::trace::ExecutionTrace;
    use salesdesk_db::session::SessionRecord;

    use super::{
        fallback_summary, is_small_talk, Responder, APOLOGY_MESSAGE, CAPABILITY_MESSAGE,
        SMALL_TALK_FALLBACK,
    };
    use crate::llm::{BoundedCall, LlmClient, LlmError, LlmRequest};

    struct Down;

    #[async_trait]
    impl LlmClient for Down {
        async fn complete(&self, _request: LlmRequest) -> Result<String, LlmError> {
            Err(LlmError::Http("connection refused".to_string()))
        }
    }

    fn step(action: &str, status: StepStatus, output: Value) -> StepResult {
        StepResult {
            index: 0,
            action: ActionName::new(action),
            parameters: BTreeMap::new(),
            output,
            status,
            error: None,
        }
    }

    fn trace(plan: Plan, steps: Vec<StepResult>) -> ExecutionTrace {
        let final_result = FinalResult::from_steps(&steps);
        ExecutionTrace {
            trace_id: "trace-1".to_string(),
            correlation_id: "corr-1".to_string(),
            user_id: "user_001".to_string(),
            session_id: "web".to_string(),
            plan,
            validation_passed: true,
            validation_errors: Vec::new(),
            auto_corrected: false,
            governance: None,
            execution_steps: steps,
            final_result,
            context_keys: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    fn responder() -> Responder {
        Responder::new(Arc::new(Down), BoundedCall::new(Duration::from_millis(50), 0))
    }

    #[test]
    fn greetings_are_small_talk_but_ids_are_not() {
        assert!(is_small_talk("Hey there!"));
        assert!(is_small_talk("thanks a lot"));
        assert!(!is_small_talk("hi, is SKU-001 in stock?"));
        assert!(!is_small_talk("show me shirts"));
    }

    #[tokio::test]
    async fn unanswerable_plan_gets_capability_message() {
        let reply = responder()
            .respond("book me a flight", &trace(Plan::unanswerable(), Vec::new()), &SessionRecord::default())
            .await;
        assert_eq!(reply, CAPABILITY_MESSAGE);
    }

    #[tokio::test]
    async fn no_successful_step_gets_apology() {
        let plan = Plan::new("check stock", vec![Step::new("check_inventory")]);
        let steps = vec![step("check_inventory", StepStatus::Failed, Value::Null)];
        let reply = responder()
            .respond("is it in stock", &trace(plan, steps), &SessionRecord::default())
            .await;
        assert_eq!(reply, APOLOGY_MESSAGE);
    }

    #[tokio::test]
    async fn small_talk_falls_back_when_model_is_down() {
        let reply = responder()
            .respond("hello!", &trace(Plan::unanswerable(), Vec::new()), &SessionRecord::default())
            .await;
        assert_eq!(reply, SMALL_TALK_FALLBACK);
    }

    #[tokio::test]
    async fn greeting_with_executed_steps_is_answered_from_the_trace() {
        let plan = Plan::new("check stock", vec![Step::new("check_inventory")]);
        let output = json!({
            "available": true, "quantity": 10, "sku": "SKU-001", "size": "M",
            "product_name": "Female Branded Top"
        });
        let reply = responder()
            .respond(
                "hey, is the blue top available in medium?",
                &trace(plan, vec![step("check_inventory", StepStatus::Ok, output)]),
                &SessionRecord::default(),
            )
            .await;
        assert_eq!(reply, "Good news: Female Branded Top in size M is in stock, with 10 available.");
    }

    #[tokio::test]
    async fn model_failure_uses_inventory_summary() {
        let plan = Plan::new("check stock", vec![Step::new("check_inventory")]);
        let output = json!({
            "available": true, "quantity": 10, "sku": "SKU-001", "size": "M",
            "product_name": "Female Branded Top"
        });
        let reply = responder()
            .respond(
                "is the top in stock",
                &trace(plan, vec![step("check_inventory", StepStatus::Ok, output)]),
                &SessionRecord::default(),
            )
            .await;
        assert_eq!(reply, "Good news: Female Branded Top in size M is in stock, with 10 available.");
    }

    #[test]
    fn generic_summary_counts_steps() {
        let plan = Plan::new("orders", vec![Step::new("get_orders"), Step::new("get_user_profile")]);
        let steps = vec![
            step("get_orders", StepStatus::Ok, json!([])),
            step("get_user_profile", StepStatus::Failed, Value::Null),
        ];
        assert!(fallback_summary(&trace(plan, steps)).starts_with("I completed 1 of 2 steps"));
    }
}
