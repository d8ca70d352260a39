//! Execution trace assembly and trace sinks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::execution::{ExecutionOutcome, FinalResult, RequestIdentity, StepResult, StepStatus};
use crate::governance::GovernanceOutcome;
use crate::plan::Plan;
use crate::validator::ValidationResult;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: String,
    pub correlation_id: String,
    pub user_id: String,
    pub session_id: String,
    pub plan: Plan,
    pub validation_passed: bool,
    pub validation_errors: Vec<String>,
    pub auto_corrected: bool,
    pub governance: Option<GovernanceOutcome>,
    pub execution_steps: Vec<StepResult>,
    pub final_result: FinalResult,
    pub context_keys: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionTrace {
    pub fn any_step_ok(&self) -> bool {
        self.execution_steps.iter().any(StepResult::is_ok)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.execution_steps.iter().filter(|step| step.status == status).count()
    }
}

/// Folds the per-request artifacts into a trace. No decisions are made here;
/// step order is kept exactly as executed.
pub struct TraceAssembler;

impl TraceAssembler {
    pub fn assemble(
        correlation_id: &str,
        identity: &RequestIdentity,
        plan: Plan,
        validation: &ValidationResult,
        governance: Option<GovernanceOutcome>,
        outcome: ExecutionOutcome,
    ) -> ExecutionTrace {
        ExecutionTrace {
            trace_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            plan,
            validation_passed: validation.valid,
            validation_errors: validation.errors.clone(),
            auto_corrected: validation.was_corrected(),
            governance,
            execution_steps: outcome.steps,
            final_result: outcome.final_result,
            context_keys: outcome.context_keys,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TraceSinkError {
    #[error("could not create trace directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("could not write trace file `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("could not serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, trace: &ExecutionTrace) -> Result<(), TraceSinkError>;
}

/// Records a trace and swallows the failure after logging it. A sink error
/// never fails the request.
pub async fn record_best_effort(sink: &dyn TraceSink, trace: &ExecutionTrace) {
    if let Err(error) = sink.record(trace).await {
        warn!(
            event_name = "system.trace.record_failed",
            correlation_id = %trace.correlation_id,
            trace_id = %trace.trace_id,
            error = %error,
            "failed to record execution trace"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    traces: Arc<Mutex<Vec<ExecutionTrace>>>,
}

impl InMemoryTraceSink {
    pub fn traces(&self) -> Vec<ExecutionTrace> {
        match self.traces.lock() {
            Ok(traces) => traces.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TraceSink for InMemoryTraceSink {
    async fn record(&self, trace: &ExecutionTrace) -> Result<(), TraceSinkError> {
        match self.traces.lock() {
            Ok(mut traces) => traces.push(trace.clone()),
            Err(poisoned) => poisoned.into_inner().push(trace.clone()),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTraceSink;

#[async_trait]
impl TraceSink for TracingTraceSink {
    async fn record(&self, trace: &ExecutionTrace) -> Result<(), TraceSinkError> {
        let body = serde_json::to_string(trace)?;
        info!(
            event_name = "pipeline.trace.recorded",
            correlation_id = %trace.correlation_id,
            trace_id = %trace.trace_id,
            user_id = %trace.user_id,
            session_id = %trace.session_id,
            intent = %trace.plan.intent,
            steps = trace.execution_steps.len(),
            failed = trace.count(StepStatus::Failed),
            skipped = trace.count(StepStatus::Skipped),
            trace = %body,
            "execution trace"
        );
        Ok(())
    }
}

/// Writes one pretty-printed JSON file per trace through `tokio::fs`, so a
/// slow disk parks the request task instead of a runtime worker.
#[derive(Clone, Debug)]
pub struct FileTraceSink {
    dir: PathBuf,
}

impl FileTraceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name(trace: &ExecutionTrace) -> String {
        let short_id = trace.trace_id.split('-').next().unwrap_or(&trace.trace_id);
        format!(
            "execution_trace_{}_{short_id}.json",
            trace.recorded_at.format("%Y%m%d_%H%M%S")
        )
    }
}

#[async_trait]
impl TraceSink for FileTraceSink {
    async fn record(&self, trace: &ExecutionTrace) -> Result<(), TraceSinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| TraceSinkError::CreateDir { path: self.dir.clone(), source })?;
        let path = self.dir.join(Self::file_name(trace));
        let body = serde_json::to_vec_pretty(trace)?;
        tokio::fs::write(&path, body).await.map_err(|source| TraceSinkError::Write { path, source })
    }
}

/// Sends each trace to every inner sink; the first error is returned after all ran.
#[derive(Clone, Default)]
pub struct FanoutTraceSink {
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl FanoutTraceSink {
    pub fn new(sinks: Vec<Arc<dyn TraceSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl TraceSink for FanoutTraceSink {
    async fn record(&self, trace: &ExecutionTrace) -> Result<(), TraceSinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(error) = sink.record(trace).await {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::execution::{
        ExecutionOutcome, FinalResult, RequestIdentity, StepResult, StepStatus,
    };
    use crate::plan::{ActionName, Plan, Step};
    use crate::validator::ValidationResult;

    use super::{
        record_best_effort, ExecutionTrace, FanoutTraceSink, FileTraceSink, InMemoryTraceSink,
        TraceAssembler, TraceSink,
    };

    fn sample_trace() -> ExecutionTrace {
        let plan = Plan::new(
            "check stock",
            vec![
                Step::new("check_inventory").with_param("sku", "SKU-404"),
                Step::new("get_fulfillment_options").with_param("location", "{{step_0.location}}"),
            ],
        );
        let steps = vec![
            StepResult {
                index: 0,
                action: ActionName::new("check_inventory"),
                parameters: plan.steps[0].parameters.clone(),
                output: json!(null),
                status: StepStatus::Failed,
                error: Some("not found: sku SKU-404".to_string()),
            },
            StepResult {
                index: 1,
                action: ActionName::new("get_fulfillment_options"),
                parameters: plan.steps[1].parameters.clone(),
                output: json!(null),
                status: StepStatus::Skipped,
                error: Some("depends on step 0 which failed".to_string()),
            },
        ];
        let final_result = FinalResult::from_steps(&steps);
        TraceAssembler::assemble(
            "req-1",
            &RequestIdentity::new("user_001", "s-1"),
            plan,
            &ValidationResult::passed(),
            None,
            ExecutionOutcome { steps, final_result, context_keys: Vec::new() },
        )
    }

    #[test]
    fn assembly_preserves_step_order_including_failures() {
        let trace = sample_trace();

        let statuses = trace.execution_steps.iter().map(|step| step.status).collect::<Vec<_>>();
        assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Skipped]);
        assert!(trace.validation_passed);
        assert!(!trace.any_step_ok());
        assert!(matches!(trace.final_result, FinalResult::NoUsableResult { .. }));
        assert_eq!(trace.user_id, "user_001");
    }

    #[tokio::test]
    async fn file_sink_writes_one_json_file_per_trace() {
        let dir = TempDir::new().expect("temp dir");
        let sink = FileTraceSink::new(dir.path().join("traces"));
        let trace = sample_trace();

        sink.record(&trace).await.expect("trace written");

        let path = dir.path().join("traces").join(FileTraceSink::file_name(&trace));
        let written: ExecutionTrace =
            serde_json::from_slice(&fs::read(path).expect("read trace")).expect("parse trace");
        assert_eq!(written.trace_id, trace.trace_id);
        assert!(FileTraceSink::file_name(&trace).starts_with("execution_trace_"));
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed_and_other_sinks_still_record() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("blocker file");
        let memory = InMemoryTraceSink::default();
        let fanout = FanoutTraceSink::new(vec![
            Arc::new(FileTraceSink::new(PathBuf::from(&blocker).join("traces"))),
            Arc::new(memory.clone()),
        ]);
        let trace = sample_trace();

        assert!(fanout.record(&trace).await.is_err());
        record_best_effort(&fanout, &trace).await;
        assert_eq!(memory.traces().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_sink_yields_to_other_tasks_on_a_single_thread() {
        let dir = TempDir::new().expect("temp dir");
        let sink = Arc::new(FileTraceSink::new(dir.path().join("nested").join("traces")));
        let traces = (0..8)
            .map(|index| {
                let mut trace = sample_trace();
                trace.trace_id = format!("{index:08x}-0000-0000-0000-000000000000");
                trace
            })
            .collect::<Vec<_>>();

        let writers = traces
            .iter()
            .cloned()
            .map(|trace| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.record(&trace).await })
            })
            .collect::<Vec<_>>();
        let ticker = tokio::spawn(async { tokio::task::yield_now().await });

        ticker.await.expect("ticker ran");
        for writer in writers {
            writer.await.expect("writer joined").expect("trace written");
        }
        let written = fs::read_dir(dir.path().join("nested").join("traces"))
            .expect("read dir")
            .count();
        assert_eq!(written, traces.len());
    }
}
