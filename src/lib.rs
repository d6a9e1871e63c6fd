//! # Agent Tool Sandbox
//!
//! Guard rails for an AI agent that runs tools on behalf of a CI/CD
//! pipeline.
//!
//! Two independent components:
//!
//! - [`Sandbox`] runs whitelisted tools without a shell. Commands are split
//!   into an argument vector, screened for shell metacharacters, checked
//!   against the tool whitelist, and started with a scrubbed environment,
//!   rlimit ceilings and a wall-clock timeout.
//! - [`PromptInjectionDetector`] scores text against a table of injection
//!   patterns plus length, repetition and character-class heuristics, and
//!   can redact or reject it before it reaches the model, or before model
//!   output is treated as an instruction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_tool_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .work_dir(".")
//!         .timeout(Duration::from_secs(5))
//!         .allow_tool("echo")
//!         .build();
//!
//!     let sandbox = Sandbox::new(config)?;
//!     let result = sandbox.execute("echo hello").await?;
//!     assert!(result.is_success());
//!
//!     let detector = PromptInjectionDetector::strict()?;
//!     let prompt = PromptBuilder::new(&detector)
//!         .add("Please review")
//!         .add("the diff")
//!         .build()?;
//!     assert_eq!(prompt, "Please review\nthe diff");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! This is not a container. It relies on:
//!
//! 1. **No shell**: argv goes straight to `exec`; metacharacters are rejected
//! 2. **Tool whitelist**: only listed executables start
//! 3. **Path rules**: deny patterns always win over allow prefixes
//! 4. **Resource limits**: memory, CPU, process and file ceilings (full on
//!    Linux, partial on macOS, none elsewhere)
//! 5. **Timeouts**: the child's process group is killed when the budget ends

pub mod error;
pub mod injection;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{ErrorCategory, InjectionError, Result, SandboxError};
pub use injection::{
    DetectionMode, DetectionResult, DetectorConfig, PromptBuilder, PromptInjectionDetector,
    Severity,
};
pub use sandbox::config::{NetworkPolicy, ResourceLimits, SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{ExecutionFailure, ExecutionResult, Sandbox};
pub use sandbox::limits::{platform_limiter, Enforcement, ResourceLimiter};
