//! Path access rules: deny patterns first, then allow prefixes.
//!
//! Paths are evaluated lexically. Nothing here touches the filesystem, so a
//! symlink inside an allowed prefix is judged by where it sits, not where it
//! points.

use std::path::{Path, PathBuf};

use glob::Pattern;
use path_clean::PathClean;

use crate::error::{Result, SandboxError};

/// Sensitive locations that are always denied.
///
/// Entries containing glob metacharacters are matched as globs; the rest by
/// substring containment.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/.ssh",
    "/.gnupg",
    "/.git/config",
    "/.gitconfig",
    "/.aws/credentials",
    "/.netrc",
    "/proc/*/environ",
    "*/id_rsa*",
    "*/id_ed25519*",
];

#[derive(Debug, Clone)]
enum DenyRule {
    Glob(Pattern),
    Substring(String),
}

impl DenyRule {
    fn parse(raw: &str) -> Result<Self> {
        if raw.contains(['*', '?', '[']) {
            let pattern = Pattern::new(raw).map_err(|e| {
                SandboxError::Config(format!("invalid deny pattern {raw:?}: {e}"))
            })?;
            Ok(DenyRule::Glob(pattern))
        } else {
            Ok(DenyRule::Substring(raw.to_string()))
        }
    }

    fn matches(&self, path: &Path) -> bool {
        match self {
            DenyRule::Glob(pattern) => pattern.matches_path(path),
            DenyRule::Substring(needle) => path.to_string_lossy().contains(needle.as_str()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            DenyRule::Glob(pattern) => pattern.as_str(),
            DenyRule::Substring(needle) => needle,
        }
    }
}

/// Stateless evaluator of path rules.
#[derive(Debug, Clone)]
pub struct PathValidator {
    work_dir: PathBuf,
    deny: Vec<DenyRule>,
    allow: Vec<PathBuf>,
    writable: Vec<PathBuf>,
}

impl PathValidator {
    /// Create a validator.
    ///
    /// `extra_deny` is appended to [`DEFAULT_DENY_PATTERNS`]. Relative
    /// prefixes are resolved against `work_dir`, and a relative `work_dir`
    /// against the current directory.
    pub fn new<'a>(
        work_dir: impl Into<PathBuf>,
        allow_prefixes: impl IntoIterator<Item = &'a Path>,
        writable_prefixes: impl IntoIterator<Item = &'a Path>,
        extra_deny: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let work_dir = absolute_work_dir(work_dir.into())?;
        let deny = DEFAULT_DENY_PATTERNS
            .iter()
            .copied()
            .chain(extra_deny)
            .map(DenyRule::parse)
            .collect::<Result<Vec<_>>>()?;
        let resolve = |p: &Path| resolve_against(&work_dir, p);
        let allow = allow_prefixes.into_iter().map(resolve).collect();
        let writable = writable_prefixes.into_iter().map(resolve).collect();

        Ok(Self {
            work_dir,
            deny,
            allow,
            writable,
        })
    }

    /// Validate a path for reading. Returns the cleaned absolute path.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.resolve(path.as_ref())?;
        self.check_deny(&resolved)?;
        if self.allow.iter().any(|prefix| resolved.starts_with(prefix)) {
            return Ok(resolved);
        }
        Err(denied(resolved, "outside allowed paths"))
    }

    /// Validate a path for writing: only the writable prefixes grant access.
    pub fn validate_write(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.resolve(path.as_ref())?;
        self.check_deny(&resolved)?;
        if self.writable.iter().any(|prefix| resolved.starts_with(prefix)) {
            return Ok(resolved);
        }
        Err(denied(resolved, "not writable"))
    }

    /// The directory relative paths are resolved against.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(denied(PathBuf::new(), "empty path"));
        }
        Ok(resolve_against(&self.work_dir, path))
    }

    fn check_deny(&self, path: &Path) -> Result<()> {
        match self.deny.iter().find(|rule| rule.matches(path)) {
            Some(rule) => {
                tracing::warn!(path = %path.display(), pattern = rule.as_str(), "path denied");
                Err(denied(
                    path.to_path_buf(),
                    &format!("matches deny pattern {:?}", rule.as_str()),
                ))
            }
            None => Ok(()),
        }
    }
}

fn absolute_work_dir(dir: PathBuf) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.clean());
    }
    Ok(std::env::current_dir()?.join(dir).clean())
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.clean()
    } else {
        base.join(path).clean()
    }
}

fn denied(path: PathBuf, reason: &str) -> SandboxError {
    SandboxError::PathDenied {
        path,
        reason: reason.to_string(),
    }
}
