//! Dry-run of the plan validator. Nothing is executed and no model is called.

use std::fs;
use std::path::Path;

use salesdesk_core::catalog::ToolCatalog;
use salesdesk_core::plan::{parse_plan, plan_to_wire, Plan};
use salesdesk_core::validator::{PlanValidator, ValidationResult};
use serde_json::json;

use crate::commands::{exit, CommandResult};

pub fn run(path: &Path) -> CommandResult {
    match fs::read_to_string(path) {
        Ok(raw) => check(&raw),
        Err(error) => CommandResult::failure(
            "validate",
            "plan_read",
            format!("could not read `{}`: {error}", path.display()),
            exit::INPUT,
        ),
    }
}

pub fn check(raw: &str) -> CommandResult {
    let plan = match parse_plan(raw) {
        Ok(plan) => plan,
        Err(error) => {
            return CommandResult::failure("validate", "plan_parse", error.to_string(), exit::INPUT)
        }
    };

    let validator = PlanValidator::new(ToolCatalog::shared());
    report(&plan, validator.validate(&plan))
}

fn report(plan: &Plan, result: ValidationResult) -> CommandResult {
    if !result.valid {
        return CommandResult::failure_with_details(
            "validate",
            "plan_validation",
            format!("plan failed validation with {} error(s)", result.errors.len()),
            exit::VERIFICATION,
            Some(json!({ "errors": result.errors, "issues": result.issues })),
        );
    }

    if plan.is_unanswerable() {
        return CommandResult::success("validate", "plan declines the request as unsupported");
    }

    match result.corrected_plan {
        Some(corrected) => {
            let added = corrected.steps.len().saturating_sub(plan.steps.len());
            CommandResult::success_with_details(
                "validate",
                format!("plan is valid after auto-correction ({added} step(s) appended)"),
                json!({ "corrected_plan": plan_to_wire(&corrected) }),
            )
        }
        None => CommandResult::success_with_details(
            "validate",
            format!("plan is valid ({} step(s))", plan.steps.len()),
            json!({ "actions": plan.actions() }),
        ),
    }
}
