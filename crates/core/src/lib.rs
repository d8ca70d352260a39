pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod execution;
pub mod governance;
pub mod plan;
pub mod retail;
pub mod trace;
pub mod validator;

pub use catalog::{ToolCatalog, ToolSpec, UnknownAction};
pub use domain::customer::{LoyaltyTier, UserId, UserProfile};
pub use domain::order::{Order, OrderId};
pub use domain::product::{InventoryItem, Product, ProductId, StockLevel};
pub use errors::{ApplicationError, InterfaceError, PipelineError, UpstreamStage};
pub use execution::{
    ExecutionOutcome, FinalResult, PlanRunner, RequestIdentity, StepResult, StepStatus,
    ToolExecutionError, ToolInvoker,
};
pub use governance::{GovernanceOutcome, GuardrailViolation, Guardrails};
pub use plan::{parse_plan, ActionName, Plan, PlanParseError, Step};
pub use trace::{ExecutionTrace, TraceAssembler, TraceSink, TraceSinkError};
pub use validator::{PlanValidator, ValidationIssue, ValidationResult};
