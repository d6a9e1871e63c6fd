//! Error types for the tool sandbox and the prompt-injection detector.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::injection::DetectionResult;

/// Errors that can occur while validating or executing a sandboxed command.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The command string was empty or contained only whitespace.
    #[error("empty command")]
    EmptyCommand,

    /// An argument contained a shell metacharacter or control code.
    #[error("argument {argument:?} contains disallowed character {character:?}")]
    DangerousCharacter {
        /// The offending argument, as split from the command line.
        argument: String,
        /// The first disallowed character found in it.
        character: char,
    },

    /// The executable is not on the tool whitelist.
    #[error("tool not allowed: {0}")]
    ToolNotAllowed(String),

    /// A path was rejected by the path rules.
    #[error("path denied: {path}: {reason}")]
    PathDenied {
        /// The cleaned, absolute path that was evaluated.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The process could not be started.
    #[error("failed to execute {program}: {source}")]
    ExecutionFailed {
        /// The program that failed to start.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The operating system refused to start the process.
    #[error("permission denied executing {program}: {source}")]
    PermissionDenied {
        /// The program that was refused.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The execution exceeded the configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the execution.
    #[error("execution cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while supervising the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text crossing a trust boundary was rejected by the detector.
    #[error(transparent)]
    Injection(#[from] InjectionError),
}

/// Coarse classification of a [`SandboxError`], for callers that branch on
/// the kind of failure rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any OS-level side effect.
    InputValidation,
    /// The process could not be started or supervised.
    Execution,
    /// The wall-clock budget was exhausted.
    Timeout,
    /// The OS denied the operation.
    PermissionDenied,
    /// Prompt-injection detection rejected the text.
    InjectionDetection,
}

impl SandboxError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SandboxError::EmptyCommand
            | SandboxError::DangerousCharacter { .. }
            | SandboxError::ToolNotAllowed(_)
            | SandboxError::PathDenied { .. }
            | SandboxError::Config(_) => ErrorCategory::InputValidation,
            SandboxError::Timeout(_) => ErrorCategory::Timeout,
            SandboxError::PermissionDenied { .. } => ErrorCategory::PermissionDenied,
            SandboxError::Injection(_) => ErrorCategory::InjectionDetection,
            SandboxError::ExecutionFailed { .. }
            | SandboxError::Cancelled
            | SandboxError::Io(_) => ErrorCategory::Execution,
        }
    }

    /// Check if this error was raised before any process was started.
    pub fn is_input_validation(&self) -> bool {
        self.category() == ErrorCategory::InputValidation
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error represents an OS permission denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SandboxError::PermissionDenied { .. })
    }

    /// Check if this error represents a tool outside the whitelist.
    pub fn is_tool_not_allowed(&self) -> bool {
        matches!(self, SandboxError::ToolNotAllowed(_))
    }

    /// Check if this error represents a denied path.
    pub fn is_path_denied(&self) -> bool {
        matches!(self, SandboxError::PathDenied { .. })
    }

    /// Check if this error represents a disallowed character.
    pub fn is_dangerous_character(&self) -> bool {
        matches!(self, SandboxError::DangerousCharacter { .. })
    }

    /// Check if this error came from the prompt-injection detector.
    pub fn is_injection(&self) -> bool {
        matches!(self, SandboxError::Injection(_))
    }
}

/// Errors raised by the prompt-injection detector.
#[derive(Error, Debug)]
pub enum InjectionError {
    /// The text scored at or above the suspicion threshold.
    #[error("potential prompt injection detected (score {})", .0.score)]
    Detected(Box<DetectionResult>),

    /// Strict mode requires text to open with an approved prefix.
    #[error("text does not start with an approved prefix")]
    MissingSafePrefix,

    /// A detection pattern failed to compile.
    #[error("invalid detection pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// The regex compilation error.
        #[source]
        source: regex::Error,
    },
}

impl InjectionError {
    /// The detection result that triggered this error, if any.
    pub fn detection(&self) -> Option<&DetectionResult> {
        match self {
            InjectionError::Detected(result) => Some(result),
            _ => None,
        }
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_classified() {
        let errors = [
            SandboxError::EmptyCommand,
            SandboxError::DangerousCharacter {
                argument: "a;b".to_string(),
                character: ';',
            },
            SandboxError::ToolNotAllowed("rm".to_string()),
            SandboxError::PathDenied {
                path: PathBuf::from("/etc/shadow"),
                reason: "matches deny pattern".to_string(),
            },
        ];

        for err in &errors {
            assert!(err.is_input_validation(), "{err} should be input validation");
            assert!(!err.is_timeout());
        }
        assert!(errors[2].is_tool_not_allowed());
        assert!(errors[3].is_path_denied());
        assert!(errors[1].is_dangerous_character());
    }

    #[test]
    fn test_error_helpers() {
        let timeout = SandboxError::Timeout(Duration::from_secs(5));
        assert!(timeout.is_timeout());
        assert_eq!(timeout.category(), ErrorCategory::Timeout);

        let denied = SandboxError::PermissionDenied {
            program: "git".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(denied.is_permission_denied());
        assert!(!denied.is_input_validation());

        let failed = SandboxError::ExecutionFailed {
            program: "git".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(failed.category(), ErrorCategory::Execution);
    }

    #[test]
    fn test_injection_error_converts() {
        let err: SandboxError = InjectionError::MissingSafePrefix.into();
        assert!(err.is_injection());
        assert_eq!(err.category(), ErrorCategory::InjectionDetection);
        assert_eq!(err.to_string(), "text does not start with an approved prefix");
    }
}
