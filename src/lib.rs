pub mod blockmap;
pub mod completion;
pub mod compiler;
pub mod config;
pub mod debugger;
pub mod error;
pub mod inference;
pub mod instrument;
pub mod registry;
pub mod sourcemap;
pub mod types;

// Re-export main types
pub use types::*;

// Re-export the primary entry points for convenience
pub use compiler::{CompileOutput, Compiler};
pub use completion::CompletionOrchestrator;
pub use config::Config;
pub use debugger::{DebugSession, SessionState};
pub use inference::TypeInferenceService;
pub use registry::Registries;
