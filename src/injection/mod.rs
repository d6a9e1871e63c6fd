//! Prompt-injection detection for text crossing a trust boundary.

pub mod builder;
pub mod detector;
pub mod patterns;

pub use builder::PromptBuilder;
pub use detector::{
    DetectionMode, DetectionResult, DetectorConfig, DetectorConfigBuilder, Match,
    PromptInjectionDetector, ScoreWeights, Span,
};
pub use patterns::{InjectionPattern, PatternSpec, Severity, DEFAULT_PATTERNS};
