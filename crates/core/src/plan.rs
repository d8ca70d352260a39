//! Typed plan model and the boundary parser for planner output.
//!
//! The planner is an untrusted generator: its text is normalized, parsed into a
//! [`Plan`] here, and only then handed to the validator. Nothing downstream reads
//! raw model output.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const UNANSWERABLE_INTENT: &str = "unsupported_request";
pub const DEFAULT_RESPONSE_STYLE: &str = "professional";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionName(pub String);

impl ActionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: ActionName,
    pub parameters: BTreeMap<String, Value>,
}

impl Step {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: ActionName::new(action), parameters: BTreeMap::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intent: String,
    pub steps: Vec<Step>,
    pub response_style: String,
    pub generated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(intent: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            intent: intent.into(),
            steps,
            response_style: DEFAULT_RESPONSE_STYLE.to_string(),
            generated_at: Utc::now(),
        }
    }

    pub fn unanswerable() -> Self {
        Self::new(UNANSWERABLE_INTENT, Vec::new())
    }

    /// Terminal "cannot help with that" plan. Recognized by the validator and
    /// passed through rather than flagged.
    pub fn is_unanswerable(&self) -> bool {
        self.steps.is_empty() && self.intent.trim().eq_ignore_ascii_case(UNANSWERABLE_INTENT)
    }

    pub fn actions(&self) -> Vec<&ActionName> {
        self.steps.iter().map(|step| &step.action).collect()
    }

    pub fn contains_action(&self, action: &str) -> bool {
        self.steps.iter().any(|step| step.action.as_str() == action)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanParseError {
    #[error("model output did not contain a JSON object")]
    NoJsonObject,
    #[error("model output was not valid JSON: {0}")]
    InvalidJson(String),
    #[error("model output JSON was not an object")]
    NotAnObject,
}

/// Strips leading prose, markdown fences, and anything after the final closing brace.
pub fn normalize_model_output(text: &str) -> String {
    let trimmed = text.trim();
    let lines = trimmed.lines().collect::<Vec<_>>();
    let start = lines
        .iter()
        .position(|line| {
            let line = line.trim_start();
            line.starts_with('{') || line.starts_with("```")
        })
        .unwrap_or(0);
    let mut body = lines[start..].join("\n");

    if body.starts_with("```") {
        let mut fenced = body.lines().skip(1).collect::<Vec<_>>();
        if fenced.last().is_some_and(|line| line.trim() == "```") {
            fenced.pop();
        }
        body = fenced.join("\n");
    }

    if let Some(last_brace) = body.rfind('}') {
        body.truncate(last_brace + 1);
    }

    body.trim().to_string()
}

/// Parses model text into a plan. Text without a JSON object is an error; a JSON
/// object with the wrong shape still yields a plan so the validator can report
/// every defect at once.
pub fn parse_plan(text: &str) -> Result<Plan, PlanParseError> {
    let normalized = normalize_model_output(text);
    if !normalized.contains('{') {
        return Err(PlanParseError::NoJsonObject);
    }

    let value: Value = serde_json::from_str(&normalized)
        .map_err(|error| PlanParseError::InvalidJson(error.to_string()))?;
    plan_from_value(&value)
}

pub fn plan_from_value(value: &Value) -> Result<Plan, PlanParseError> {
    let object = value.as_object().ok_or(PlanParseError::NotAnObject)?;

    let intent = object.get("intent").and_then(Value::as_str).unwrap_or_default().to_string();
    let response_style = object
        .get("response_style")
        .and_then(Value::as_str)
        .filter(|style| !style.trim().is_empty())
        .unwrap_or(DEFAULT_RESPONSE_STYLE)
        .to_string();

    let steps = match object.get("steps") {
        Some(Value::Array(items)) => items.iter().map(step_from_value).collect(),
        Some(Value::Null) | None => Vec::new(),
        // a non-list `steps` is kept as a single unnamed step so the defect surfaces
        Some(_) => vec![Step::new("")],
    };

    Ok(Plan { intent, steps, response_style, generated_at: Utc::now() })
}

fn step_from_value(value: &Value) -> Step {
    let Some(object) = value.as_object() else {
        return Step::new("");
    };

    let action = object.get("action").and_then(Value::as_str).unwrap_or_default().trim();
    let parameters = object
        .get("params")
        .or_else(|| object.get("parameters"))
        .and_then(Value::as_object)
        .map(|params| params.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
        .unwrap_or_default();

    Step { action: ActionName::new(action), parameters }
}

/// Wire form sent back to models (governance prompt) and shown in traces.
pub fn plan_to_wire(plan: &Plan) -> Value {
    serde_json::json!({
        "intent": plan.intent,
        "steps": plan
            .steps
            .iter()
            .map(|step| serde_json::json!({ "action": step.action, "params": step.parameters }))
            .collect::<Vec<_>>(),
        "response_style": plan.response_style,
    })
}
