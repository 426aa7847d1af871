//! Stepped execution against the remote sandbox.
//!
//! Compilation is synchronous and local; execution is not. Every step or
//! continue is a request across a trust boundary, carrying the instrumented
//! code, the block map, active breakpoints (as block ids, which is what
//! makes them survive unrelated edits) and initial variables. The session
//! owns a cancellation token and a uuid identity; responses that outlive
//! their session are discarded, never applied.

pub mod client;
pub mod protocol;
mod session;

#[cfg(test)]
mod session_tests;

pub use client::{HttpSandbox, SandboxTransport};
pub use protocol::{StepMode, StepRequest, StepResponse};
pub use session::{DebugSession, SessionState};
