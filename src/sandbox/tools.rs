//! Tool whitelist.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Result, SandboxError};

/// Tools permitted when the configuration does not override the list.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "git", "grep", "sed", "awk", "cat", "head", "tail", "wc", "ls", "find", "jq", "go", "python",
    "python3", "node", "npm",
];

/// Whitelist membership check over an executable name.
#[derive(Debug, Clone)]
pub struct ToolValidator {
    allowed: BTreeSet<String>,
    relative_paths: bool,
}

impl ToolValidator {
    /// Create a validator over the given tool names.
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: tools.into_iter().map(Into::into).collect(),
            relative_paths: true,
        }
    }

    /// Whether relative paths such as `./git` may match by basename.
    pub fn with_relative_paths(mut self, allow: bool) -> Self {
        self.relative_paths = allow;
        self
    }

    /// True if `name` or its basename is whitelisted.
    ///
    /// Basename matching means `./bin/git` passes when `git` is listed, and a
    /// relative path resolves against the working directory. When that
    /// directory holds untrusted content (a checked-out pull request), an
    /// executable committed there would run under a whitelisted name. Turn
    /// this off with [`with_relative_paths`](Self::with_relative_paths) to
    /// accept only bare names and absolute paths.
    pub fn is_allowed(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if !self.relative_paths && name.contains('/') && !Path::new(name).is_absolute() {
            return false;
        }
        if self.allowed.contains(name) {
            return true;
        }
        Path::new(name)
            .file_name()
            .and_then(|base| base.to_str())
            .is_some_and(|base| self.allowed.contains(base))
    }

    /// Like [`is_allowed`](Self::is_allowed) but returns `ToolNotAllowed`.
    pub fn check(&self, name: &str) -> Result<()> {
        if self.is_allowed(name) {
            Ok(())
        } else {
            Err(SandboxError::ToolNotAllowed(name.to_string()))
        }
    }

    /// The whitelisted names.
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl Default for ToolValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TOOLS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_basename_match() {
        let validator = ToolValidator::default();
        assert!(validator.is_allowed("git"));
        assert!(validator.is_allowed("/usr/bin/git"));
        assert!(validator.is_allowed("./bin/jq"));
        assert!(!validator.is_allowed("rm"));
        assert!(!validator.is_allowed("/bin/rm"));
        assert!(!validator.is_allowed(""));
    }

    #[test]
    fn test_basename_is_not_a_substring_match() {
        let validator = ToolValidator::default();
        assert!(!validator.is_allowed("gitx"));
        assert!(!validator.is_allowed("/usr/bin/gitk"));
        assert!(!validator.is_allowed("/usr/bin/cat-evil"));
    }

    #[test]
    fn test_relative_paths_can_be_refused() {
        let validator = ToolValidator::default().with_relative_paths(false);
        assert!(validator.is_allowed("git"));
        assert!(validator.is_allowed("/usr/bin/git"));
        assert!(!validator.is_allowed("./git"));
        assert!(!validator.is_allowed("vendor/bin/jq"));
    }

    #[test]
    fn test_check_returns_typed_error() {
        let validator = ToolValidator::new(["echo"]);
        assert!(validator.check("echo").is_ok());
        let err = validator.check("git").unwrap_err();
        assert!(err.is_tool_not_allowed());
    }
}
