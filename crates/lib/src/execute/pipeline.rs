//! Staged pipeline with reverse-order rollback.
//!
//! A [`Pipeline`] is an ordered list of named [`Stage`]s, each an ordered list
//! of named [`Operation`]s. Operations run one at a time against a single
//! mutable state. When an operation fails, every operation that completed
//! before it is rolled back in reverse completion order, then the state's
//! own rollback hooks run. The failed operation is never rolled back.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::context::WorkflowContext;
use super::types::{PipelineReport, WorkflowError};

/// An atomic unit of work.
#[async_trait]
pub trait Operation<S: Send>: Send + Sync {
  async fn invoke(&self, ctx: &WorkflowContext, state: &mut S) -> Result<(), WorkflowError>;

  /// Undo a successful [`Operation::invoke`]. Most operations have nothing to undo.
  async fn rollback(&self, _ctx: &WorkflowContext, _state: &mut S) -> Result<(), WorkflowError> {
    Ok(())
  }
}

/// State threaded through a pipeline run.
pub trait PipelineState: Send {
  /// Called once after operation rollback completes. Returns the failures
  /// of any user-level rollback callbacks.
  fn run_rollback_hooks(&mut self) -> Vec<WorkflowError> {
    Vec::new()
  }
}

/// An ordered sequence of named operations.
pub struct Stage<S: Send> {
  operations: Vec<(String, Box<dyn Operation<S>>)>,
}

impl<S: Send> Default for Stage<S> {
  fn default() -> Self {
    Self { operations: Vec::new() }
  }
}

impl<S: Send> Stage<S> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an operation, builder style.
  pub fn with(mut self, name: impl Into<String>, operation: impl Operation<S> + 'static) -> Self {
    self.operations.push((name.into(), Box::new(operation)));
    self
  }

  pub fn append(&mut self, name: impl Into<String>, operation: impl Operation<S> + 'static) {
    self.operations.push((name.into(), Box::new(operation)));
  }

  pub fn len(&self) -> usize {
    self.operations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }
}

/// An ordered sequence of named stages.
pub struct Pipeline<S: Send> {
  name: String,
  stages: Vec<(String, Stage<S>)>,
}

impl<S: PipelineState> Pipeline<S> {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      stages: Vec::new(),
    }
  }

  pub fn append(&mut self, name: impl Into<String>, stage: Stage<S>) {
    self.stages.push((name.into(), stage));
  }

  pub fn with(mut self, name: impl Into<String>, stage: Stage<S>) -> Self {
    self.append(name, stage);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Stage names in execution order.
  pub fn stage_names(&self) -> Vec<&str> {
    self.stages.iter().map(|(name, _)| name.as_str()).collect()
  }

  /// Run every stage in order.
  ///
  /// Cancellation is checked before each operation starts; a cancelled run
  /// fails at that operation and rolls back like any other failure.
  pub async fn run(&self, ctx: &WorkflowContext, state: &mut S) -> Result<PipelineReport, WorkflowError> {
    let started = Instant::now();
    let mut completed: Vec<(usize, usize)> = Vec::new();

    info!(pipeline = %self.name, stages = self.stages.len(), "starting pipeline");

    for (stage_idx, (stage_name, stage)) in self.stages.iter().enumerate() {
      debug!(pipeline = %self.name, stage = %stage_name, operations = stage.len(), "entering stage");

      for (op_idx, (op_name, operation)) in stage.operations.iter().enumerate() {
        let op_started = Instant::now();
        let outcome = match ctx.ensure_active() {
          Ok(()) => operation.invoke(ctx, state).await,
          Err(cancelled) => Err(cancelled),
        };

        match outcome {
          Ok(()) => {
            debug!(
              stage = %stage_name,
              operation = %op_name,
              elapsed_ms = op_started.elapsed().as_millis() as u64,
              "operation complete"
            );
            completed.push((stage_idx, op_idx));
          }
          Err(err) => {
            error!(stage = %stage_name, operation = %op_name, error = %err, "operation failed");
            let rollback_errors = self.rollback(ctx, state, &completed).await;
            return Err(WorkflowError::Aborted {
              stage: stage_name.clone(),
              operation: op_name.clone(),
              source: Box::new(err),
              rollback_errors,
            });
          }
        }
      }
    }

    let report = PipelineReport {
      pipeline: self.name.clone(),
      completed: completed.iter().map(|&(s, o)| self.label(s, o)).collect(),
      elapsed: started.elapsed(),
    };
    info!(
      pipeline = %self.name,
      operations = report.completed.len(),
      elapsed_ms = report.elapsed.as_millis() as u64,
      "pipeline complete"
    );
    Ok(report)
  }

  async fn rollback(&self, ctx: &WorkflowContext, state: &mut S, completed: &[(usize, usize)]) -> Vec<WorkflowError> {
    let mut errors = Vec::new();
    warn!(pipeline = %self.name, operations = completed.len(), "rolling back");

    for &(stage_idx, op_idx) in completed.iter().rev() {
      let (stage_name, stage) = &self.stages[stage_idx];
      let (op_name, operation) = &stage.operations[op_idx];
      debug!(stage = %stage_name, operation = %op_name, "rolling back operation");
      let failures = match operation.rollback(ctx, state).await {
        Ok(()) => continue,
        Err(WorkflowError::Multiple(failures)) => failures,
        Err(err) => vec![err],
      };
      for err in &failures {
        warn!(stage = %stage_name, operation = %op_name, error = %err, "rollback failed");
      }
      errors.extend(failures);
    }

    errors.extend(state.run_rollback_hooks());
    errors
  }

  fn label(&self, stage_idx: usize, op_idx: usize) -> String {
    let (stage_name, stage) = &self.stages[stage_idx];
    format!("{}/{}", stage_name, stage.operations[op_idx].0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execute::context::CancellationToken;

  #[derive(Default)]
  struct Journal {
    events: Vec<String>,
    hook_runs: usize,
    failing_rollbacks: Vec<String>,
  }

  impl PipelineState for Journal {
    fn run_rollback_hooks(&mut self) -> Vec<WorkflowError> {
      self.hook_runs += 1;
      self.events.push("hooks".to_string());
      Vec::new()
    }
  }

  struct Step {
    name: &'static str,
    fail: bool,
  }

  fn ok(name: &'static str) -> Step {
    Step { name, fail: false }
  }

  fn failing(name: &'static str) -> Step {
    Step { name, fail: true }
  }

  #[async_trait]
  impl Operation<Journal> for Step {
    async fn invoke(&self, _ctx: &WorkflowContext, state: &mut Journal) -> Result<(), WorkflowError> {
      state.events.push(format!("invoke:{}", self.name));
      if self.fail {
        return Err(WorkflowError::Verification(format!("{} failed", self.name)));
      }
      Ok(())
    }

    async fn rollback(&self, _ctx: &WorkflowContext, state: &mut Journal) -> Result<(), WorkflowError> {
      state.events.push(format!("rollback:{}", self.name));
      if state.failing_rollbacks.iter().any(|n| n == self.name) {
        return Err(WorkflowError::Verification(format!("{} rollback failed", self.name)));
      }
      Ok(())
    }
  }

  fn pipeline(steps: Vec<Vec<Step>>) -> Pipeline<Journal> {
    let mut pipeline = Pipeline::new("test");
    for (idx, ops) in steps.into_iter().enumerate() {
      let mut stage = Stage::new();
      for op in ops {
        stage.append(op.name, op);
      }
      pipeline.append(format!("stage{idx}"), stage);
    }
    pipeline
  }

  #[tokio::test]
  async fn success_runs_everything_without_rollback() {
    let pipeline = pipeline(vec![vec![ok("a"), ok("b")], vec![ok("c")]]);
    let mut journal = Journal::default();

    let report = pipeline.run(&WorkflowContext::new(), &mut journal).await.unwrap();

    assert_eq!(journal.events, vec!["invoke:a", "invoke:b", "invoke:c"]);
    assert_eq!(report.completed, vec!["stage0/a", "stage0/b", "stage1/c"]);
    assert_eq!(journal.hook_runs, 0);
  }

  #[tokio::test]
  async fn failure_rolls_back_completed_ops_in_reverse() {
    let pipeline = pipeline(vec![vec![ok("a"), ok("b")], vec![ok("c"), failing("d"), ok("e")], vec![ok("f")]]);
    let mut journal = Journal::default();

    let err = pipeline.run(&WorkflowContext::new(), &mut journal).await.unwrap_err();

    assert_eq!(
      journal.events,
      vec![
        "invoke:a",
        "invoke:b",
        "invoke:c",
        "invoke:d",
        "rollback:c",
        "rollback:b",
        "rollback:a",
        "hooks",
      ]
    );
    match err {
      WorkflowError::Aborted {
        stage,
        operation,
        rollback_errors,
        ..
      } => {
        assert_eq!(stage, "stage1");
        assert_eq!(operation, "d");
        assert!(rollback_errors.is_empty());
      }
      other => panic!("expected abort, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn first_op_failure_rolls_back_nothing() {
    let pipeline = pipeline(vec![vec![failing("a"), ok("b")]]);
    let mut journal = Journal::default();

    assert!(pipeline.run(&WorkflowContext::new(), &mut journal).await.is_err());
    assert_eq!(journal.events, vec!["invoke:a", "hooks"]);
  }

  #[tokio::test]
  async fn rollback_errors_are_collected_and_rollback_continues() {
    let pipeline = pipeline(vec![vec![ok("a"), ok("b"), failing("c")]]);
    let mut journal = Journal {
      failing_rollbacks: vec!["b".to_string()],
      ..Journal::default()
    };

    let err = pipeline.run(&WorkflowContext::new(), &mut journal).await.unwrap_err();

    assert!(journal.events.contains(&"rollback:a".to_string()));
    assert_eq!(err.rollback_errors().len(), 1);
    assert!(err.to_string().contains("b rollback failed"));
    assert!(matches!(err.root_cause(), WorkflowError::Verification(msg) if msg == "c failed"));
  }

  struct Scatter;

  #[async_trait]
  impl Operation<Journal> for Scatter {
    async fn invoke(&self, _ctx: &WorkflowContext, _state: &mut Journal) -> Result<(), WorkflowError> {
      Ok(())
    }

    async fn rollback(&self, _ctx: &WorkflowContext, _state: &mut Journal) -> Result<(), WorkflowError> {
      Err(WorkflowError::Multiple(vec![
        WorkflowError::Verification("first leftover".to_string()),
        WorkflowError::Verification("second leftover".to_string()),
      ]))
    }
  }

  #[tokio::test]
  async fn multiple_rollback_failures_are_reported_individually() {
    let mut pipeline = Pipeline::new("test");
    pipeline.append("stage0", Stage::new().with("scatter", Scatter).with("c", failing("c")));
    let mut journal = Journal::default();

    let err = pipeline.run(&WorkflowContext::new(), &mut journal).await.unwrap_err();

    assert_eq!(err.rollback_errors().len(), 2);
    let text = err.to_string();
    assert!(text.contains("first leftover"));
    assert!(text.contains("second leftover"));
  }

  #[tokio::test]
  async fn cancellation_stops_before_next_operation() {
    let token = CancellationToken::new();
    token.cancel("interrupted");
    let pipeline = pipeline(vec![vec![ok("a")]]);
    let mut journal = Journal::default();

    let err = pipeline
      .run(&WorkflowContext::with_token(token), &mut journal)
      .await
      .unwrap_err();

    assert!(matches!(err.root_cause(), WorkflowError::Cancelled(_)));
    assert_eq!(journal.events, vec!["hooks"]);
  }
}
