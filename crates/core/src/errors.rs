use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model-backed pipeline stage an upstream failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamStage {
    Planning,
    Governance,
    Responder,
}

impl fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planning => "planning",
            Self::Governance => "governance",
            Self::Responder => "responder",
        })
    }
}

/// Terminal failures of one request through the pipeline. Each maps to a
/// distinct caller-facing code; tool failures never surface here.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("{stage} call timed out after {attempts} attempt(s)")]
    UpstreamTimeout { stage: UpstreamStage, attempts: u32 },
    #[error("{stage} call failed after {attempts} attempt(s): {message}")]
    UpstreamCallFailed { stage: UpstreamStage, attempts: u32, message: String },
    #[error("plan could not be repaired: {}", .reasons.join("; "))]
    UnrepairablePlan { reasons: Vec<String> },
}

impl PipelineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamCallFailed { .. } => "upstream_call_failed",
            Self::UnrepairablePlan { .. } => "unrepairable_plan",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout { .. } => {
                "The assistant is taking too long to respond. Please try again in a moment."
            }
            Self::UpstreamCallFailed { .. } => {
                "The assistant is temporarily unavailable. Please try again shortly."
            }
            Self::UnrepairablePlan { .. } => {
                "I couldn't work out how to handle that request. Could you rephrase it?"
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("upstream unavailable ({code}): {message}")]
    UpstreamUnavailable { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::UpstreamUnavailable { .. } => {
                "The assistant is temporarily unavailable. Please try again shortly."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } => *code,
            Self::NotFound { .. } => "not_found",
            Self::UpstreamUnavailable { code, .. } => *code,
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::UpstreamUnavailable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::UpstreamUnavailable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Pipeline(error @ PipelineError::UnrepairablePlan { .. }) => {
                Self::BadRequest {
                    code: error.error_code(),
                    message: error.to_string(),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Pipeline(error) => Self::UpstreamUnavailable {
                code: error.error_code(),
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            ApplicationError::NotFound(message) => {
                Self::NotFound { message, correlation_id: unassigned() }
            }
            ApplicationError::InvalidRequest(message) => {
                Self::BadRequest { code: "bad_request", message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
