//! Sandbox transport.
//!
//! `SandboxTransport` is the seam the session talks through; the production
//! implementation posts to the sandbox's debug-execute endpoint over HTTP,
//! tests substitute an in-memory double. Retry policy lives with the caller
//! (`execute_with_retry`), not the transport: only transient transport
//! failures are retried, never timeouts, sandbox failures or cancellation.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::debugger::protocol::{StepRequest, StepResponse};
use crate::error::{ExecutionError, SessionError};

#[async_trait]
pub trait SandboxTransport: Send + Sync {
    async fn execute(&self, request: &StepRequest) -> Result<StepResponse, ExecutionError>;
}

pub struct HttpSandbox {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpSandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/debug/execute",
                config.base_url.trim_end_matches('/')
            ),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

#[async_trait]
impl SandboxTransport for HttpSandbox {
    async fn execute(&self, request: &StepRequest) -> Result<StepResponse, ExecutionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutionError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    ExecutionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::Transport(format!(
                "sandbox returned HTTP {status}"
            )));
        }

        response
            .json::<StepResponse>()
            .await
            .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))
    }
}

/// Bounded retry with doubling backoff for transient transport failures.
///
/// Timeouts surface immediately (the caller decides on retry policy), and a
/// cancelled token always wins over another attempt.
pub async fn execute_with_retry(
    transport: &dyn SandboxTransport,
    request: &StepRequest,
    max_retries: u32,
    backoff_ms: u64,
    cancel: &CancellationToken,
) -> Result<StepResponse, SessionError> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = transport.execute(request) => result,
        };

        match result {
            Ok(response) => return Ok(response),
            Err(err @ ExecutionError::Transport(_)) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                warn!(attempt, delay_ms = delay, error = %err, "transient sandbox failure, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
            }
            Err(err) => {
                debug!(error = %err, "sandbox request failed");
                return Err(SessionError::Execution(err));
            }
        }
    }
}
