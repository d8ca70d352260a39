//! Structural and catalog-conformance checks for candidate plans.
//!
//! Checks run in a fixed order and collect every defect instead of failing
//! fast, so a repair pass sees the whole error set:
//!
//! 1. the plan has at least one step (unless it is the unanswerable terminal plan)
//! 2. every action resolves in the [`ToolCatalog`]
//! 3. every step carries all required parameters and nothing undeclared
//! 4. a product query without a recommendation step gets one appended
//!
//! Check 4 is a best-effort correction, only applied to plans that passed 1-3.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{actions, ToolCatalog};
use crate::plan::{Plan, Step};

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("plan has no steps")]
    EmptyPlan,
    #[error("step {index} is missing an action")]
    MissingAction { index: usize },
    #[error("step {index} has unknown action '{action}' (available: {available})")]
    UnknownAction { index: usize, action: String, available: String },
    #[error("step {index} ({action}) is missing required parameters: {}", .missing.join(", "))]
    MissingParameters { index: usize, action: String, missing: Vec<String> },
    #[error("step {index} ({action}) has undeclared parameters: {}", .unexpected.join(", "))]
    UnexpectedParameters { index: usize, action: String, unexpected: Vec<String> },
}

impl ValidationIssue {
    pub fn is_unknown_action(&self) -> bool {
        matches!(self, Self::UnknownAction { .. } | Self::MissingAction { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub issues: Vec<ValidationIssue>,
    pub corrected_plan: Option<Plan>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self { valid: true, errors: Vec::new(), issues: Vec::new(), corrected_plan: None }
    }

    pub fn corrected(plan: Plan) -> Self {
        Self { corrected_plan: Some(plan), ..Self::passed() }
    }

    pub fn failed(issues: Vec<ValidationIssue>) -> Self {
        let errors = issues.iter().map(ToString::to_string).collect();
        Self { valid: false, errors, issues, corrected_plan: None }
    }

    pub fn was_corrected(&self) -> bool {
        self.corrected_plan.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecommendationHint {
    pub category: String,
    pub gender: Option<String>,
}

impl RecommendationHint {
    pub fn into_step(self) -> Step {
        let step = Step::new(actions::RECOMMEND_PRODUCTS).with_param("category", self.category);
        match self.gender {
            Some(gender) => step.with_param("gender", gender),
            None => step,
        }
    }
}

/// Decides whether a plan's intent is a product query that should carry a
/// recommendation step.
pub trait ProductQueryDetector: Send + Sync {
    fn detect(&self, plan: &Plan) -> Option<RecommendationHint>;
}

/// Keyword heuristic over the intent text. Imprecise by nature; swap in another
/// detector when a better signal exists.
#[derive(Clone, Debug)]
pub struct KeywordProductQuery {
    pub trigger_phrases: Vec<String>,
    pub categories: Vec<(String, Vec<String>)>,
    pub fallback_category: String,
}

const TRIGGER_PHRASES: &[&str] = &[
    "product",
    "products",
    "recommend",
    "recommendation",
    "recommendations",
    "suggest",
    "browse",
    "shop",
    "shopping",
    "looking for",
    "find me",
    "show me",
    "clothing",
    "clothes",
    "fashion",
    "apparel",
    "shirt",
    "dress",
    "pants",
    "jeans",
    "shoes",
    "sneakers",
    "footwear",
    "electronics",
    "headphones",
];

const FEMALE_TERMS: &[&str] = &["female", "women", "woman", "ladies", "girl", "girls"];
const MALE_TERMS: &[&str] = &["male", "men", "man", "guys", "boy", "boys"];

impl Default for KeywordProductQuery {
    fn default() -> Self {
        let owned = |terms: &[&str]| terms.iter().map(|term| term.to_string()).collect::<Vec<_>>();
        Self {
            trigger_phrases: owned(TRIGGER_PHRASES),
            categories: vec![
                ("electronics".to_string(), owned(&["electronics", "headphones", "watch", "gadget"])),
                ("footwear".to_string(), owned(&["shoes", "sneakers", "footwear", "boots"])),
            ],
            fallback_category: "Fashion".to_string(),
        }
    }
}

impl ProductQueryDetector for KeywordProductQuery {
    fn detect(&self, plan: &Plan) -> Option<RecommendationHint> {
        let tokens = tokenize(&plan.intent);
        if tokens.is_empty() {
            return None;
        }
        let padded = format!(" {} ", tokens.join(" "));
        let has_phrase = |phrase: &String| padded.contains(&format!(" {phrase} "));

        if !self.trigger_phrases.iter().any(has_phrase) {
            return None;
        }

        let gender = if tokens.iter().any(|token| FEMALE_TERMS.contains(&token.as_str())) {
            Some("female".to_string())
        } else if tokens.iter().any(|token| MALE_TERMS.contains(&token.as_str())) {
            Some("male".to_string())
        } else {
            None
        };

        let category = self
            .categories
            .iter()
            .find(|(_, terms)| terms.iter().any(has_phrase))
            .map(|(category, _)| category.clone())
            .unwrap_or_else(|| match gender.as_deref() {
                Some("female") => "Women's Fashion".to_string(),
                Some("male") => "Men's Fashion".to_string(),
                _ => self.fallback_category.clone(),
            });

        Some(RecommendationHint { category, gender })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct PlanValidator {
    catalog: Arc<ToolCatalog>,
    product_query: Box<dyn ProductQueryDetector>,
}

impl PlanValidator {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self::with_detector(catalog, KeywordProductQuery::default())
    }

    pub fn with_detector<D>(catalog: Arc<ToolCatalog>, detector: D) -> Self
    where
        D: ProductQueryDetector + 'static,
    {
        Self { catalog, product_query: Box::new(detector) }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn validate(&self, plan: &Plan) -> ValidationResult {
        if plan.is_unanswerable() {
            return ValidationResult::passed();
        }

        let issues = self.structural_issues(plan);
        if !issues.is_empty() {
            return ValidationResult::failed(issues);
        }

        if !plan.contains_action(actions::RECOMMEND_PRODUCTS) {
            if let Some(hint) = self.product_query.detect(plan) {
                let mut corrected = plan.clone();
                corrected.steps.push(hint.into_step());
                return ValidationResult::corrected(corrected);
            }
        }

        ValidationResult::passed()
    }

    fn structural_issues(&self, plan: &Plan) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if plan.steps.is_empty() {
            issues.push(ValidationIssue::EmptyPlan);
        }

        for (index, step) in plan.steps.iter().enumerate() {
            let action = step.action.as_str();
            if action.is_empty() {
                issues.push(ValidationIssue::MissingAction { index });
                continue;
            }

            let Ok(spec) = self.catalog.lookup(action) else {
                issues.push(ValidationIssue::UnknownAction {
                    index,
                    action: action.to_string(),
                    available: self.catalog.action_names().join(", "),
                });
                continue;
            };

            let missing = spec
                .required
                .iter()
                .filter(|name| !step.parameters.contains_key(name.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                issues.push(ValidationIssue::MissingParameters {
                    index,
                    action: action.to_string(),
                    missing,
                });
            }

            let unexpected = step
                .parameters
                .keys()
                .filter(|name| !spec.accepts(name))
                .cloned()
                .collect::<Vec<_>>();
            if !unexpected.is_empty() {
                issues.push(ValidationIssue::UnexpectedParameters {
                    index,
                    action: action.to_string(),
                    unexpected,
                });
            }
        }

        issues
    }
}
