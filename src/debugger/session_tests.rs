//! Session state-machine tests against an in-memory sandbox double.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::debugger::client::SandboxTransport;
use crate::debugger::protocol::{RawStep, StepRequest, StepResponse, Timing};
use crate::debugger::session::{DebugSession, SessionState};
use crate::error::{ExecutionError, SessionError};
use crate::types::{
    BlockInfo, BlockMap, BlockMapMetadata, BlockType, BLOCK_MAP_VERSION,
};

struct MockTransport {
    responses: Mutex<VecDeque<Result<StepResponse, ExecutionError>>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockTransport {
    fn new(responses: Vec<Result<StepResponse, ExecutionError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn with_delay(
        responses: Vec<Result<StepResponse, ExecutionError>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxTransport for MockTransport {
    async fn execute(&self, _request: &StepRequest) -> Result<StepResponse, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExecutionError::Transport("no scripted response".into())))
    }
}

fn block_map_with(block_id: &str) -> BlockMap {
    let mut blocks = BTreeMap::new();
    blocks.insert(
        block_id.to_string(),
        BlockInfo {
            block_id: block_id.to_string(),
            block_type: BlockType::Assignment,
            business_line: 1,
            generated_lines: vec![13],
            description: "a = 1".to_string(),
            variables: vec!["a".to_string()],
            parent_block_id: None,
            child_block_ids: Vec::new(),
        },
    );
    BlockMap {
        version: BLOCK_MAP_VERSION,
        blocks,
        metadata: BlockMapMetadata {
            generated_at: chrono::Utc::now(),
            business_rules_hash: "h1".to_string(),
            generated_code_hash: "h2".to_string(),
            total_blocks: 1,
        },
    }
}

fn step(block_id: &str, step_type: &str) -> RawStep {
    RawStep {
        block_id: Some(block_id.to_string()),
        step_type: Some(step_type.to_string()),
        business_line: Some(1),
        description: Some("a = 1".to_string()),
        variables: Some(json!({"a": 1})),
        execution_result: Some("success".to_string()),
    }
}

fn paused_response(steps: Vec<RawStep>) -> StepResponse {
    StepResponse {
        success: true,
        business_steps: steps,
        executed_blocks: 0,
        total_blocks: 3,
        error: None,
        timing: Timing::default(),
    }
}

fn completed_response(steps: Vec<RawStep>) -> StepResponse {
    StepResponse {
        success: true,
        business_steps: steps,
        executed_blocks: 3,
        total_blocks: 3,
        error: None,
        timing: Timing::default(),
    }
}

fn session(transport: Arc<MockTransport>) -> DebugSession {
    DebugSession::new(transport, 2, 1)
}

#[tokio::test]
async fn test_step_monotonicity_and_single_is_last() {
    let transport = MockTransport::new(vec![
        Ok(paused_response(vec![step("blk_a", "assignment")])),
        Ok(paused_response(vec![step("blk_a", "condition")])),
        Ok(completed_response(vec![step("blk_a", "complete")])),
    ]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let mut all_indices = Vec::new();
    for _ in 0..3 {
        let folded = session.step_forward().await.unwrap();
        all_indices.extend(folded.iter().map(|s| s.step_index));
    }

    assert_eq!(all_indices, vec![0, 1, 2]);
    assert_eq!(session.state(), SessionState::Completed);
    let last_count = session.steps().iter().filter(|s| s.is_last).count();
    assert_eq!(last_count, 1);
    let first_count = session.steps().iter().filter(|s| s.is_first).count();
    assert_eq!(first_count, 1);
    assert!(session.steps()[0].is_first);
}

#[tokio::test]
async fn test_cannot_step_past_completion() {
    let transport = MockTransport::new(vec![Ok(completed_response(vec![step(
        "blk_a", "complete",
    )]))]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    session.step_forward().await.unwrap();
    assert!(!session.can_step_forward());
    let err = session.step_forward().await.unwrap_err();
    assert!(!err.is_cancellation());
}

#[tokio::test]
async fn test_cancellation_discards_in_flight_response() {
    let transport = MockTransport::with_delay(
        vec![Ok(paused_response(vec![step("blk_a", "assignment")]))],
        Duration::from_millis(50),
    );
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let handle = session.cancellation_handle().unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
    });

    let err = session.step_forward().await.unwrap_err();
    assert!(err.is_cancellation());
    // The late response was never applied.
    assert!(session.steps().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_retry_only_on_transient_transport_failure() {
    let transport = MockTransport::new(vec![
        Err(ExecutionError::Transport("connection reset".into())),
        Ok(paused_response(vec![step("blk_a", "assignment")])),
    ]);
    let mut session = session(transport.clone());
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let folded = session.step_forward().await.unwrap();
    assert_eq!(folded.len(), 1);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(session.state(), SessionState::Paused);
}

#[tokio::test]
async fn test_timeout_is_not_retried() {
    let transport = MockTransport::new(vec![Err(ExecutionError::Timeout { timeout_secs: 30 })]);
    let mut session = session(transport.clone());
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let err = session.step_forward().await.unwrap_err();
    match err {
        SessionError::Execution(ExecutionError::Timeout { .. }) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 1);
    assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_errored_session_requires_reset() {
    let transport = MockTransport::new(vec![
        Err(ExecutionError::Timeout { timeout_secs: 30 }),
    ]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let _ = session.step_forward().await;
    assert_eq!(session.state(), SessionState::Errored);
    assert!(!session.can_step_forward());

    session.reset();
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_continue_requires_breakpoint() {
    let transport = MockTransport::new(vec![]);
    let mut session = session(transport.clone());
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let err = session.continue_execution().await.unwrap_err();
    assert!(!err.is_cancellation());
    // No request ever went out.
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_continue_with_breakpoint_pauses() {
    let transport = MockTransport::new(vec![Ok(paused_response(vec![
        step("blk_a", "assignment"),
        step("blk_a", "condition"),
    ]))]);
    let mut session = session(transport);
    session.start(
        "code".into(),
        block_map_with("blk_a"),
        vec!["blk_a".to_string()],
        json!({}),
    );

    let folded = session.continue_execution().await.unwrap();
    assert_eq!(folded.len(), 2);
    assert_eq!(session.state(), SessionState::Paused);
}

#[tokio::test]
async fn test_unknown_breakpoints_dropped_at_start() {
    let transport = MockTransport::new(vec![]);
    let mut session = session(transport.clone());
    session.start(
        "code".into(),
        block_map_with("blk_a"),
        vec!["blk_ghost".to_string()],
        json!({}),
    );
    // The only breakpoint named an unknown block, so continue has none to
    // stop at.
    let err = session.continue_execution().await.unwrap_err();
    assert!(!err.is_cancellation());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_steps_dropped_from_fold() {
    let mut bad = step("blk_a", "telepathy");
    bad.business_line = Some(2);
    let transport = MockTransport::new(vec![Ok(paused_response(vec![
        step("blk_a", "assignment"),
        bad,
        step("blk_a", "condition"),
    ]))]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let folded = session.step_forward().await.unwrap();
    assert_eq!(folded.len(), 2);
    assert_eq!(folded[0].step_index, 0);
    assert_eq!(folded[1].step_index, 1);
}

#[tokio::test]
async fn test_sandbox_failure_marks_session_errored() {
    let transport = MockTransport::new(vec![Ok(StepResponse {
        success: false,
        business_steps: vec![],
        executed_blocks: 0,
        total_blocks: 0,
        error: Some("NameError: name 'x' is not defined".to_string()),
        timing: Timing::default(),
    })]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));

    let err = session.step_forward().await.unwrap_err();
    match err {
        SessionError::Execution(ExecutionError::Sandbox { message, .. }) => {
            assert!(message.contains("NameError"))
        }
        other => panic!("expected sandbox error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_start_invalidates_prior_session() {
    let transport = MockTransport::new(vec![]);
    let mut session = session(transport);
    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));
    let first_token = session.cancellation_handle().unwrap();

    session.start("code".into(), block_map_with("blk_a"), vec![], json!({}));
    assert!(first_token.is_cancelled());
    assert_eq!(session.state(), SessionState::Running);
}
