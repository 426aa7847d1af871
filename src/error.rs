//! Error taxonomy for compilation and stepped execution.
//!
//! Compilation distinguishes recoverable, per-statement issues (recorded and
//! carried on the compile result) from fatal errors that abort a stage.
//! Execution distinguishes real failures from user-initiated cancellation so
//! callers never surface a stop as an error.

use thiserror::Error;

/* ===================== Compile side ===================== */

/// A rule line the recognizer could not classify. Non-fatal: recorded with
/// its business line, compilation continues, the result is marked
/// unsuccessful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub business_line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.business_line, self.message)
    }
}

/// An inconsistency detected while building the source map. Logged and
/// degrades breakpoint fidelity for the affected block; never aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingIssue {
    pub generated_line: usize,
    pub message: String,
}

impl std::fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "generated line {}: {}", self.generated_line, self.message)
    }
}

/// Fatal compile-stage failures.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A pattern matched but its generator failed. Fatal for the compile;
    /// no partial artifact is handed out as if valid.
    #[error("generation failed on business line {business_line}: {message}")]
    Generation {
        business_line: usize,
        message: String,
    },
}

/// Instrumentation failures. Fatal for stepping only: the plain artifact is
/// still usable for non-debug execution.
#[derive(Debug, Error)]
pub enum InstrumentationError {
    #[error("ambiguous indentation on generated line {generated_line}: {message}")]
    AmbiguousIndentation {
        generated_line: usize,
        message: String,
    },
    #[error("generated line {generated_line} has no source mapping")]
    UnmappedLine { generated_line: usize },
}

/* ===================== Execution side ===================== */

/// A remote step request failed. The session transitions to `errored` and
/// requires an explicit reset; retries only happen when the caller opted in.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("sandbox request failed: {0}")]
    Transport(String),

    #[error("sandbox request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("sandbox reported failure: {message}")]
    Sandbox {
        message: String,
        /// Block the sandbox attributed the failure to, when known.
        block_id: Option<String>,
    },

    #[error("sandbox response was malformed: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    InvalidState(String),
}

/// Session-level outcome wrapper. Cancellation is deliberately a separate
/// variant from `Execution` so UIs never render a user-initiated stop as a
/// failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("execution cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}
