//! Execution session state machine.
//!
//! `idle -> running -> {paused, completed, errored}`, with `cancel` legal
//! from any state. At most one session is active per editor instance;
//! starting a new one first cancels the old one through its token. Business
//! steps live only as long as their session.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::debugger::client::{execute_with_retry, SandboxTransport};
use crate::debugger::protocol::{
    retained_breakpoints, validate_step, StepMode, StepRequest,
};
use crate::error::{ExecutionError, SessionError};
use crate::types::{BlockMap, BusinessStep, StepType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Completed,
    Errored,
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
    generated_code: String,
    block_map: BlockMap,
    breakpoints: Vec<String>,
    initial_variables: JsonValue,
    steps: Vec<BusinessStep>,
}

pub struct DebugSession {
    transport: Arc<dyn SandboxTransport>,
    max_retries: u32,
    backoff_ms: u64,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl DebugSession {
    pub fn new(transport: Arc<dyn SandboxTransport>, max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            transport,
            max_retries,
            backoff_ms,
            state: SessionState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Steps recorded so far in the active session.
    pub fn steps(&self) -> &[BusinessStep] {
        self.active.as_ref().map(|a| a.steps.as_slice()).unwrap_or(&[])
    }

    pub fn can_step_forward(&self) -> bool {
        self.active.is_some()
            && matches!(self.state, SessionState::Running | SessionState::Paused)
    }

    /// Token a UI can cancel out-of-band while a request is in flight.
    pub fn cancellation_handle(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|a| a.cancel.clone())
    }

    /// Arm a new session, invalidating any prior one. Breakpoints naming
    /// blocks the map does not contain are dropped with a warning.
    pub fn start(
        &mut self,
        instrumented_code: String,
        block_map: BlockMap,
        breakpoints: Vec<String>,
        initial_variables: JsonValue,
    ) -> Uuid {
        self.cancel();

        let breakpoints = retained_breakpoints(&breakpoints, &block_map);
        let id = Uuid::new_v4();
        info!(session = %id, breakpoints = breakpoints.len(), "debug session started");

        self.active = Some(ActiveSession {
            id,
            cancel: CancellationToken::new(),
            generated_code: instrumented_code,
            block_map,
            breakpoints,
            initial_variables,
            steps: Vec::new(),
        });
        self.state = SessionState::Running;
        id
    }

    /// Execute until the next business step.
    pub async fn step_forward(&mut self) -> Result<Vec<BusinessStep>, SessionError> {
        if !self.can_step_forward() {
            return Err(SessionError::Execution(ExecutionError::InvalidState(
                format!("cannot step forward from {:?}", self.state),
            )));
        }
        self.drive(StepMode::Step).await
    }

    /// Execute until a breakpoint or completion. Requires at least one
    /// breakpoint; otherwise continuing would just run to the end with no
    /// way back.
    pub async fn continue_execution(&mut self) -> Result<Vec<BusinessStep>, SessionError> {
        if !self.can_step_forward() {
            return Err(SessionError::Execution(ExecutionError::InvalidState(
                format!("cannot continue from {:?}", self.state),
            )));
        }
        let has_breakpoints = self
            .active
            .as_ref()
            .map(|a| !a.breakpoints.is_empty())
            .unwrap_or(false);
        if !has_breakpoints {
            return Err(SessionError::Execution(ExecutionError::InvalidState(
                "continue requires at least one breakpoint".to_string(),
            )));
        }
        self.drive(StepMode::Continue).await
    }

    /// Cancel the active session. Never an error; in-flight requests finish
    /// but their responses are discarded.
    pub fn cancel(&mut self) {
        if let Some(active) = &self.active {
            debug!(session = %active.id, "cancelling debug session");
            active.cancel.cancel();
        }
        self.active = None;
        self.state = SessionState::Idle;
    }

    /// Explicit reset after an error, required before the session is reused.
    pub fn reset(&mut self) {
        self.cancel();
    }

    async fn drive(&mut self, mode: StepMode) -> Result<Vec<BusinessStep>, SessionError> {
        let (request, token, session_id) = {
            let active = self
                .active
                .as_ref()
                .expect("guarded by can_step_forward");
            (
                StepRequest {
                    generated_code: active.generated_code.clone(),
                    block_map: active.block_map.clone(),
                    breakpoints: active.breakpoints.clone(),
                    initial_variables: active.initial_variables.clone(),
                    mode,
                },
                active.cancel.clone(),
                active.id,
            )
        };

        self.state = SessionState::Running;
        let result = execute_with_retry(
            self.transport.as_ref(),
            &request,
            self.max_retries,
            self.backoff_ms,
            &token,
        )
        .await;

        // A response is only applied to the session that sent the request.
        let still_current = self
            .active
            .as_ref()
            .map(|a| a.id == session_id && !a.cancel.is_cancelled())
            .unwrap_or(false);
        if !still_current {
            debug!(session = %session_id, "discarding stale sandbox response");
            self.cancel();
            return Err(SessionError::Cancelled);
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                if err.is_cancellation() {
                    self.cancel();
                } else {
                    self.state = SessionState::Errored;
                }
                return Err(err);
            }
        };

        if !response.success {
            self.state = SessionState::Errored;
            return Err(SessionError::Execution(ExecutionError::Sandbox {
                message: response
                    .error
                    .unwrap_or_else(|| "sandbox reported failure without detail".to_string()),
                block_id: None,
            }));
        }

        let active = self.active.as_mut().expect("checked above");
        let mut folded = Vec::new();
        let mut next_index = active.steps.len();
        for raw in &response.business_steps {
            if let Some(mut step) = validate_step(raw, next_index) {
                step.is_first = next_index == 0;
                folded.push(step);
                next_index += 1;
            }
        }

        let completed = folded
            .iter()
            .any(|s| s.step_type == StepType::Complete)
            || (response.total_blocks > 0 && response.executed_blocks >= response.total_blocks);

        if completed {
            if let Some(last) = folded.last_mut() {
                last.is_last = true;
            } else if let Some(last) = active.steps.last_mut() {
                last.is_last = true;
            }
            self.state = SessionState::Completed;
        } else {
            self.state = SessionState::Paused;
        }

        active.steps.extend(folded.iter().cloned());
        Ok(folded)
    }
}
