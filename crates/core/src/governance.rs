//! Guardrails applied to a governance repair before it may replace the plan.
//!
//! The repair call is only allowed to reformat. A repaired plan is accepted
//! when it keeps the step count, keeps the ordered action sequence, and keeps
//! enough of the stated intent. Intent overlap is a coarse token heuristic and
//! says nothing about semantic equivalence.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::Plan;

pub const DEFAULT_INTENT_SIMILARITY_THRESHOLD: f64 = 0.2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GovernanceOutcome {
    pub accepted: bool,
    pub plan: Option<Plan>,
    pub rejection_reason: Option<String>,
}

impl GovernanceOutcome {
    pub fn accepted(plan: Plan) -> Self {
        Self { accepted: true, plan: Some(plan), rejection_reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { accepted: false, plan: None, rejection_reason: Some(reason.into()) }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GuardrailViolation {
    #[error("repaired plan has {actual} steps, expected {expected}")]
    StepCount { expected: usize, actual: usize },
    #[error("repaired plan changed step {position} from `{expected}` to `{actual}`")]
    ActionSequence { position: usize, expected: String, actual: String },
    #[error("repaired intent drifted (similarity {similarity:.2} <= threshold {threshold:.2})")]
    IntentDrift { similarity: f64, threshold: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Guardrails {
    intent_similarity_threshold: f64,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self { intent_similarity_threshold: DEFAULT_INTENT_SIMILARITY_THRESHOLD }
    }
}

impl Guardrails {
    pub fn new(intent_similarity_threshold: f64) -> Self {
        Self { intent_similarity_threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.intent_similarity_threshold
    }

    pub fn check(&self, original: &Plan, repaired: &Plan) -> Result<(), GuardrailViolation> {
        if original.steps.len() != repaired.steps.len() {
            return Err(GuardrailViolation::StepCount {
                expected: original.steps.len(),
                actual: repaired.steps.len(),
            });
        }

        let mismatch = original
            .steps
            .iter()
            .zip(&repaired.steps)
            .position(|(before, after)| before.action != after.action);
        if let Some(position) = mismatch {
            return Err(GuardrailViolation::ActionSequence {
                position,
                expected: original.steps[position].action.to_string(),
                actual: repaired.steps[position].action.to_string(),
            });
        }

        let similarity = intent_similarity(&original.intent, &repaired.intent);
        if similarity <= self.intent_similarity_threshold {
            return Err(GuardrailViolation::IntentDrift {
                similarity,
                threshold: self.intent_similarity_threshold,
            });
        }

        Ok(())
    }

    pub fn evaluate(&self, original: &Plan, repaired: Plan) -> GovernanceOutcome {
        match self.check(original, &repaired) {
            Ok(()) => GovernanceOutcome::accepted(repaired),
            Err(violation) => GovernanceOutcome::rejected(violation.to_string()),
        }
    }
}

fn intent_tokens(intent: &str) -> BTreeSet<String> {
    intent
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Share of the original intent's tokens that survive in the repaired intent.
/// An original intent with no tokens has nothing to preserve and scores 1.0.
pub fn intent_similarity(original: &str, repaired: &str) -> f64 {
    let before = intent_tokens(original);
    if before.is_empty() {
        return 1.0;
    }
    let after = intent_tokens(repaired);
    let shared = before.intersection(&after).count();
    shared as f64 / before.len() as f64
}

#[cfg(test)]
mod tests {
    use crate::plan::{Plan, Step};

    use super::{intent_similarity, GuardrailViolation, Guardrails};

    fn plan(intent: &str, actions: &[&str]) -> Plan {
        Plan::new(intent, actions.iter().map(|action| Step::new(*action)).collect())
    }

    #[test]
    fn identical_shape_and_intent_is_accepted() {
        let original = plan("check stock for SKU-001", &["check_inventory"]);
        let repaired = plan("Check stock for sku-001", &["check_inventory"]);

        let outcome = Guardrails::default().evaluate(&original, repaired);

        assert!(outcome.accepted);
        assert!(outcome.plan.is_some());
        assert!(outcome.rejection_reason.is_none());
    }

    #[test]
    fn dropped_step_violates_step_count() {
        let original = plan("checkout", &["get_user_profile", "apply_offers", "calculate_payment"]);
        let repaired = plan("checkout", &["get_user_profile", "calculate_payment"]);

        assert_eq!(
            Guardrails::default().check(&original, &repaired),
            Err(GuardrailViolation::StepCount { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn reordered_actions_violate_sequence_even_with_same_set() {
        let original = plan("checkout", &["apply_offers", "calculate_payment"]);
        let repaired = plan("checkout", &["calculate_payment", "apply_offers"]);

        let outcome = Guardrails::default().evaluate(&original, repaired);

        assert!(!outcome.accepted);
        assert!(outcome
            .rejection_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("step 0")));
    }

    #[test]
    fn unrelated_intent_is_rejected_as_drift() {
        let original = plan("track my recent orders", &["get_orders"]);
        let repaired = plan("sell premium warranty", &["get_orders"]);

        assert!(matches!(
            Guardrails::default().check(&original, &repaired),
            Err(GuardrailViolation::IntentDrift { .. })
        ));
    }

    #[test]
    fn similarity_is_token_overlap_against_original() {
        assert_eq!(intent_similarity("check inventory", "check inventory now"), 1.0);
        assert_eq!(intent_similarity("check inventory", "inventory"), 0.5);
        assert_eq!(intent_similarity("", "anything"), 1.0);
        assert_eq!(intent_similarity("orders", ""), 0.0);
        // added words in the repair do not dilute the score
        assert_eq!(intent_similarity("order status", "check order status for user"), 1.0);
        assert_eq!(intent_similarity("find red shoes", "find boots"), 1.0 / 3.0);
    }

    #[test]
    fn threshold_is_configurable() {
        let original = plan("check inventory", &["check_inventory"]);
        let repaired = plan("inventory", &["check_inventory"]);

        assert!(Guardrails::new(0.2).check(&original, &repaired).is_ok());
        assert!(Guardrails::new(0.5).check(&original, &repaired).is_err());
    }
}
