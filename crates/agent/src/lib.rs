//! Agent Runtime - plan, validate, repair, execute and respond
//!
//! This crate wires the deterministic pipeline in `salesdesk-core` to the
//! collaborators that make it useful: a language model, the retail
//! repositories and the session store.
//!
//! # Architecture
//!
//! One request flows through a constrained loop:
//! 1. **Planning** (`planner`) - message + context → candidate `Plan`
//! 2. **Validation** - catalog conformance, with product-query auto-correction
//! 3. **Governance** (`governance`) - at most one guarded repair of an invalid plan
//! 4. **Execution** (`tools`) - retail tools run in order behind the `ToolInvoker` seam
//! 5. **Response** (`responder`) - reply phrased from the execution trace only
//!
//! Model calls are bounded by a per-attempt timeout and at most one retry of
//! the same stage (`llm::BoundedCall`).
//!
//! # Safety Principle
//!
//! The LLM is strictly a translator. It NEVER decides stock levels, prices,
//! discounts or which actions exist. Those come from the tool catalog and the
//! deterministic tool bodies.

pub mod governance;
pub mod llm;
pub mod planner;
pub mod prompts;
pub mod responder;
pub mod runtime;
pub mod tools;

pub use llm::{BoundedCall, HttpLlmClient, LlmClient, LlmError, LlmRequest};
pub use runtime::{trace_sink_from_config, AgentReply, AgentRuntime, RuntimeSettings};
pub use tools::{Tool, ToolRegistry};
