//! Prelude module for convenient imports.

pub use crate::error::{InjectionError, Result, SandboxError};
pub use crate::injection::{
    DetectionMode, DetectionResult, DetectorConfig, PromptBuilder, PromptInjectionDetector,
    Severity,
};
pub use crate::sandbox::{
    config::{ResourceLimits, SandboxConfig},
    executor::{ExecutionResult, Sandbox},
};
