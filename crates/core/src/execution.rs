//! Sequential plan runner.
//!
//! Steps run strictly in declared order. Each `ok` output is written to a
//! request-scoped [`ExecutionContext`] under `step_N`, and later steps read it
//! through `{{step_N}}` / `{{step_N.path}}` references. A failing tool never
//! aborts the plan: steps that reference a failed or skipped step are skipped,
//! independent steps still run. Tool calls are never retried here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::ToolCatalog;
use crate::plan::{ActionName, Plan, Step};

pub const CONTEXT_MARKER: &str = "extracted_from_context";

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ToolExecutionError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        action: &ActionName,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Value, ToolExecutionError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub action: ActionName,
    pub parameters: BTreeMap<String, Value>,
    pub output: Value,
    pub status: StepStatus,
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalResult {
    Value { step: usize, action: ActionName, output: Value },
    NoUsableResult { reason: String },
}

impl FinalResult {
    pub fn from_steps(steps: &[StepResult]) -> Self {
        match steps.iter().rev().find(|step| step.is_ok()) {
            Some(step) => Self::Value {
                step: step.index,
                action: step.action.clone(),
                output: step.output.clone(),
            },
            None if steps.is_empty() => {
                Self::NoUsableResult { reason: "plan contained no steps".to_string() }
            }
            None => Self::NoUsableResult { reason: "no step completed successfully".to_string() },
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Value { output, .. } => Some(output),
            Self::NoUsableResult { .. } => None,
        }
    }
}

/// Identity of the request a plan runs for; fills `{{user_id}}` and `{{session_id}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub user_id: String,
    pub session_id: String,
}

impl RequestIdentity {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), session_id: session_id.into() }
    }
}

/// Step outputs of one in-flight run. Grows monotonically; owned by a single
/// [`PlanRunner::run`] call and dropped afterwards.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    outputs: BTreeMap<usize, Value>,
    statuses: Vec<StepStatus>,
}

impl ExecutionContext {
    pub fn key(index: usize) -> String {
        format!("step_{index}")
    }

    fn record(&mut self, result: &StepResult) {
        if result.is_ok() {
            self.outputs.insert(result.index, result.output.clone());
        }
        self.statuses.push(result.status);
    }

    pub fn status(&self, index: usize) -> Option<StepStatus> {
        self.statuses.get(index).copied()
    }

    pub fn output(&self, index: usize) -> Option<&Value> {
        self.outputs.get(&index)
    }

    pub fn keys(&self) -> Vec<String> {
        self.outputs.keys().map(|index| Self::key(*index)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StepReference {
    step: usize,
    path: Vec<String>,
    raw: String,
}

fn parse_reference(value: &str) -> Option<StepReference> {
    let inner = value.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let mut segments = inner.split('.');
    let step = segments.next()?.strip_prefix("step_")?.parse::<usize>().ok()?;
    let path = segments.map(str::to_string).collect::<Vec<_>>();
    if path.iter().any(String::is_empty) {
        return None;
    }
    Some(StepReference { step, path, raw: inner.to_string() })
}

fn collect_references(value: &Value, found: &mut Vec<StepReference>) {
    match value {
        Value::String(text) => found.extend(parse_reference(text)),
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_references(item, found)),
        _ => {}
    }
}

fn lookup_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

enum Resolution {
    Ready(BTreeMap<String, Value>),
    Skip(String),
    Incomplete(String),
}

pub struct PlanRunner {
    catalog: Arc<ToolCatalog>,
    invoker: Arc<dyn ToolInvoker>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutcome {
    pub steps: Vec<StepResult>,
    pub final_result: FinalResult,
    pub context_keys: Vec<String>,
}

impl PlanRunner {
    pub fn new(catalog: Arc<ToolCatalog>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { catalog, invoker }
    }

    pub async fn run(&self, plan: &Plan, identity: &RequestIdentity) -> ExecutionOutcome {
        let mut context = ExecutionContext::default();
        let mut steps = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            debug!(
                event_name = "pipeline.step.running",
                step_index = index,
                action = %step.action,
                "running plan step"
            );
            let result = self.run_step(index, step, identity, &context).await;
            if result.status != StepStatus::Ok {
                warn!(
                    event_name = "pipeline.step.not_ok",
                    step_index = index,
                    action = %result.action,
                    status = result.status.as_str(),
                    error = result.error.as_deref().unwrap_or(""),
                    "plan step did not complete"
                );
            }
            context.record(&result);
            steps.push(result);
        }

        let final_result = FinalResult::from_steps(&steps);
        ExecutionOutcome { steps, final_result, context_keys: context.keys() }
    }

    async fn run_step(
        &self,
        index: usize,
        step: &Step,
        identity: &RequestIdentity,
        context: &ExecutionContext,
    ) -> StepResult {
        let declared = step.parameters.clone();
        let not_ok = |status: StepStatus, parameters: BTreeMap<String, Value>, error: String| {
            StepResult {
                index,
                action: step.action.clone(),
                parameters,
                output: Value::Null,
                status,
                error: Some(error),
            }
        };

        let spec = match self.catalog.lookup(step.action.as_str()) {
            Ok(spec) => spec,
            Err(_) => {
                return not_ok(
                    StepStatus::Failed,
                    declared,
                    format!("action '{}' is not in the tool catalog", step.action),
                )
            }
        };

        let resolved = match resolve_parameters(index, step, identity, context) {
            Resolution::Ready(resolved) => resolved,
            Resolution::Skip(reason) => return not_ok(StepStatus::Skipped, declared, reason),
            Resolution::Incomplete(reason) => return not_ok(StepStatus::Failed, declared, reason),
        };

        let missing = spec
            .required
            .iter()
            .filter(|name| resolved.get(name.as_str()).map_or(true, Value::is_null))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return not_ok(
                StepStatus::Failed,
                resolved,
                format!("incomplete parameters after substitution: {}", missing.join(", ")),
            );
        }

        match self.invoker.invoke(&step.action, &resolved).await {
            Ok(output) => StepResult {
                index,
                action: step.action.clone(),
                parameters: resolved,
                output,
                status: StepStatus::Ok,
                error: None,
            },
            Err(error) => not_ok(StepStatus::Failed, resolved, error.to_string()),
        }
    }
}

fn resolve_parameters(
    index: usize,
    step: &Step,
    identity: &RequestIdentity,
    context: &ExecutionContext,
) -> Resolution {
    let mut references = Vec::new();
    step.parameters.values().for_each(|value| collect_references(value, &mut references));

    let mut dependencies = BTreeSet::new();
    for reference in &references {
        if reference.step >= index {
            return Resolution::Incomplete(format!(
                "parameter references step {} which has not run before step {index}",
                reference.step
            ));
        }
        dependencies.insert(reference.step);
    }

    for dependency in &dependencies {
        match context.status(*dependency) {
            Some(StepStatus::Failed) => {
                return Resolution::Skip(format!("depends on step {dependency} which failed"))
            }
            Some(StepStatus::Skipped) => {
                return Resolution::Skip(format!("depends on step {dependency} which was skipped"))
            }
            _ => {}
        }
    }

    let mut resolved = BTreeMap::new();
    for (key, value) in &step.parameters {
        match substitute(key, value, identity, context) {
            Ok(value) => {
                resolved.insert(key.clone(), value);
            }
            Err(reason) => return Resolution::Incomplete(reason),
        }
    }
    Resolution::Ready(resolved)
}

fn substitute(
    key: &str,
    value: &Value,
    identity: &RequestIdentity,
    context: &ExecutionContext,
) -> Result<Value, String> {
    match value {
        Value::String(text) => {
            if let Some(reference) = parse_reference(text) {
                let output = context.output(reference.step).ok_or_else(|| {
                    format!("parameter `{key}` references step {} with no output", reference.step)
                })?;
                return lookup_path(output, &reference.path).cloned().ok_or_else(|| {
                    format!("parameter `{key}` references `{}` which is absent", reference.raw)
                });
            }
            Ok(substitute_identity(key, text, identity))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(key, item, identity, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(name, item)| {
                substitute(name, item, identity, context).map(|item| (name.clone(), item))
            })
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn substitute_identity(key: &str, text: &str, identity: &RequestIdentity) -> Value {
    let trimmed = text.trim();
    let resolved = match trimmed {
        "{{user_id}}" => Some(&identity.user_id),
        "{{session_id}}" => Some(&identity.session_id),
        CONTEXT_MARKER => {
            let key = key.to_ascii_lowercase();
            if key.contains("session") {
                Some(&identity.session_id)
            } else if key.contains("user") {
                Some(&identity.user_id)
            } else {
                None
            }
        }
        _ => None,
    };
    Value::String(resolved.cloned().unwrap_or_else(|| text.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::catalog::{actions, ToolCatalog};
    use crate::plan::{ActionName, Plan, Step};

    use super::{
        FinalResult, PlanRunner, RequestIdentity, StepStatus, ToolExecutionError, ToolInvoker,
    };

    #[derive(Default)]
    struct ScriptedTools {
        calls: Mutex<Vec<(String, BTreeMap<String, Value>)>>,
    }

    impl ScriptedTools {
        fn calls(&self) -> Vec<(String, BTreeMap<String, Value>)> {
            match self.calls.lock() {
                Ok(calls) => calls.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl ToolInvoker for ScriptedTools {
        async fn invoke(
            &self,
            action: &ActionName,
            parameters: &BTreeMap<String, Value>,
        ) -> Result<Value, ToolExecutionError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((action.to_string(), parameters.clone()));
            }
            match action.as_str() {
                actions::CHECK_INVENTORY => match parameters.get("sku").and_then(Value::as_str) {
                    Some("SKU-001") => Ok(json!({"available": true, "quantity": 10, "sku": "SKU-001"})),
                    Some(other) => Err(ToolExecutionError::NotFound(format!("sku {other}"))),
                    None => Err(ToolExecutionError::InvalidInput("sku".to_string())),
                },
                actions::GET_USER_PROFILE => Ok(json!({
                    "user_id": parameters["user_id"],
                    "name": "Alice",
                    "loyalty_tier": "gold"
                })),
                actions::APPLY_OFFERS => Ok(json!({
                    "total_discount": 10,
                    "tier": parameters["loyalty_tier"]
                })),
                _ => Ok(json!({"echo": action.as_str()})),
            }
        }
    }

    fn runner(tools: Arc<ScriptedTools>) -> PlanRunner {
        PlanRunner::new(ToolCatalog::shared(), tools)
    }

    fn identity() -> RequestIdentity {
        RequestIdentity::new("user_001", "session_001")
    }

    #[tokio::test]
    async fn inventory_lookup_reports_quantity() {
        let plan = Plan::new(
            "check stock",
            vec![Step::new(actions::CHECK_INVENTORY)
                .with_param("sku", "SKU-001")
                .with_param("size", "M")],
        );

        let outcome = runner(Arc::new(ScriptedTools::default())).run(&plan, &identity()).await;

        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].status, StepStatus::Ok);
        assert_eq!(outcome.final_result.output().map(|output| &output["quantity"]), Some(&json!(10)));
    }

    #[tokio::test]
    async fn later_steps_read_earlier_outputs_by_reference() {
        let tools = Arc::new(ScriptedTools::default());
        let plan = Plan::new(
            "price my cart",
            vec![
                Step::new(actions::GET_USER_PROFILE).with_param("user_id", "{{user_id}}"),
                Step::new(actions::APPLY_OFFERS)
                    .with_param("cart", json!([{"price": 100, "quantity": 1}]))
                    .with_param("loyalty_tier", "{{step_0.loyalty_tier}}"),
            ],
        );

        let outcome = runner(tools.clone()).run(&plan, &identity()).await;

        assert!(outcome.steps.iter().all(|step| step.status == StepStatus::Ok));
        let calls = tools.calls();
        assert_eq!(calls[0].1["user_id"], json!("user_001"));
        assert_eq!(calls[1].1["loyalty_tier"], json!("gold"));
        assert_eq!(outcome.context_keys, vec!["step_0".to_string(), "step_1".to_string()]);
    }

    #[tokio::test]
    async fn dependents_of_failed_steps_are_skipped_and_siblings_still_run() {
        let tools = Arc::new(ScriptedTools::default());
        let plan = Plan::new(
            "chain",
            vec![
                Step::new(actions::CHECK_INVENTORY).with_param("sku", "SKU-404"),
                Step::new(actions::GET_FULFILLMENT_OPTIONS).with_param("location", "{{step_0.location}}"),
                Step::new(actions::APPLY_OFFERS)
                    .with_param("cart", json!([]))
                    .with_param("loyalty_tier", "{{step_1.tier}}"),
                Step::new(actions::GET_USER_PROFILE).with_param("user_id", "user_001"),
            ],
        );

        let outcome = runner(tools.clone()).run(&plan, &identity()).await;
        let statuses = outcome.steps.iter().map(|step| step.status).collect::<Vec<_>>();

        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped, StepStatus::Ok]
        );
        assert!(outcome.steps[1]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("step 0 which failed")));
        assert!(outcome.steps[2]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("step 1 which was skipped")));
        assert_eq!(tools.calls().len(), 2, "skipped steps never reach the tool");
        assert!(matches!(outcome.final_result, FinalResult::Value { step: 3, .. }));
    }

    #[tokio::test]
    async fn missing_path_in_successful_output_fails_the_step() {
        let plan = Plan::new(
            "bad path",
            vec![
                Step::new(actions::GET_USER_PROFILE).with_param("user_id", "user_001"),
                Step::new(actions::GET_FULFILLMENT_OPTIONS).with_param("location", "{{step_0.address.city}}"),
            ],
        );

        let outcome = runner(Arc::new(ScriptedTools::default())).run(&plan, &identity()).await;

        assert_eq!(outcome.steps[1].status, StepStatus::Failed);
        assert!(outcome.steps[1]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("step_0.address.city")));
    }

    #[tokio::test]
    async fn forward_references_fail_instead_of_running() {
        let plan = Plan::new(
            "forward",
            vec![Step::new(actions::GET_FULFILLMENT_OPTIONS).with_param("location", "{{step_1}}")],
        );

        let outcome = runner(Arc::new(ScriptedTools::default())).run(&plan, &identity()).await;

        assert_eq!(outcome.steps[0].status, StepStatus::Failed);
        assert!(matches!(outcome.final_result, FinalResult::NoUsableResult { .. }));
    }

    #[tokio::test]
    async fn null_required_parameter_is_incomplete() {
        let plan = Plan::new(
            "null sku",
            vec![Step::new(actions::CHECK_INVENTORY).with_param("sku", Value::Null)],
        );
        let tools = Arc::new(ScriptedTools::default());

        let outcome = runner(tools.clone()).run(&plan, &identity()).await;

        assert_eq!(outcome.steps[0].status, StepStatus::Failed);
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn context_marker_resolves_from_key_name() {
        let tools = Arc::new(ScriptedTools::default());
        let plan = Plan::new(
            "session",
            vec![Step::new(actions::GET_SESSION_CONTEXT)
                .with_param("user_id", "extracted_from_context")
                .with_param("session_id", "extracted_from_context")],
        );

        runner(tools.clone()).run(&plan, &identity()).await;

        let calls = tools.calls();
        assert_eq!(calls[0].1["user_id"], json!("user_001"));
        assert_eq!(calls[0].1["session_id"], json!("session_001"));
    }

    #[tokio::test]
    async fn rerunning_identical_plan_yields_identical_step_results() {
        let plan = Plan::new(
            "repeatable",
            vec![
                Step::new(actions::CHECK_INVENTORY).with_param("sku", "SKU-001"),
                Step::new(actions::CHECK_INVENTORY).with_param("sku", "SKU-002"),
                Step::new(actions::GET_FULFILLMENT_OPTIONS).with_param("location", "{{step_1.location}}"),
            ],
        );

        let first = runner(Arc::new(ScriptedTools::default())).run(&plan, &identity()).await;
        let second = runner(Arc::new(ScriptedTools::default())).run(&plan, &identity()).await;

        let first_bytes = serde_json::to_vec(&first.steps).expect("serialize first");
        let second_bytes = serde_json::to_vec(&second.steps).expect("serialize second");
        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn empty_plan_has_no_usable_result() {
        let outcome =
            runner(Arc::new(ScriptedTools::default())).run(&Plan::unanswerable(), &identity()).await;

        assert!(outcome.steps.is_empty());
        assert!(matches!(outcome.final_result, FinalResult::NoUsableResult { .. }));
    }
}
