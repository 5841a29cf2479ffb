//! Engine behavior through the public API.

use async_trait::async_trait;
use stratus_lib::execute::{
  CancellationToken, Operation, Pipeline, PipelineState, Stage, WorkflowContext, WorkflowError,
};

#[derive(Default)]
struct Recorder {
  log: Vec<String>,
}

impl PipelineState for Recorder {
  fn run_rollback_hooks(&mut self) -> Vec<WorkflowError> {
    self.log.push("hooks".to_string());
    Vec::new()
  }
}

struct Step {
  name: &'static str,
  fail: bool,
}

#[async_trait]
impl Operation<Recorder> for Step {
  async fn invoke(&self, _ctx: &WorkflowContext, state: &mut Recorder) -> Result<(), WorkflowError> {
    state.log.push(format!("invoke {}", self.name));
    if self.fail {
      return Err(WorkflowError::Verification(format!("{} failed", self.name)));
    }
    Ok(())
  }

  async fn rollback(&self, _ctx: &WorkflowContext, state: &mut Recorder) -> Result<(), WorkflowError> {
    state.log.push(format!("rollback {}", self.name));
    Ok(())
  }
}

fn step(name: &'static str, fail: bool) -> Step {
  Step { name, fail }
}

#[tokio::test]
async fn rollback_runs_in_reverse_across_stages() {
  let pipeline = Pipeline::new("test")
    .with("first", Stage::new().with("a", step("a", false)).with("b", step("b", false)))
    .with("second", Stage::new().with("c", step("c", false)).with("d", step("d", true)))
    .with("third", Stage::new().with("e", step("e", false)));
  let mut state = Recorder::default();

  let err = pipeline.run(&WorkflowContext::new(), &mut state).await.unwrap_err();

  assert_eq!(
    state.log,
    vec![
      "invoke a", "invoke b", "invoke c", "invoke d", "rollback c", "rollback b", "rollback a", "hooks"
    ]
  );
  assert!(matches!(err, WorkflowError::Aborted { ref stage, ref operation, .. } if stage == "second" && operation == "d"));
}

#[tokio::test]
async fn successful_run_never_rolls_back() {
  let pipeline = Pipeline::new("test").with("only", Stage::new().with("a", step("a", false)));
  let mut state = Recorder::default();

  let report = pipeline.run(&WorkflowContext::new(), &mut state).await.unwrap();

  assert_eq!(report.completed, vec!["only/a".to_string()]);
  assert_eq!(state.log, vec!["invoke a"]);
}

#[tokio::test]
async fn cancelled_token_stops_before_next_operation() {
  let token = CancellationToken::new();
  token.cancel("interrupted");
  let pipeline = Pipeline::new("test").with("only", Stage::new().with("a", step("a", false)));
  let mut state = Recorder::default();

  let err = pipeline
    .run(&WorkflowContext::with_token(token), &mut state)
    .await
    .unwrap_err();

  assert!(matches!(err.root_cause(), WorkflowError::Cancelled(reason) if reason == "interrupted"));
  assert_eq!(state.log, vec!["hooks"]);
}
