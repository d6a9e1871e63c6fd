//! Restricted environment for sandboxed children.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Variable set in every child so it can tell it runs inside the sandbox.
pub const SANDBOX_MARKER_VAR: &str = "AGENT_TOOL_SANDBOX";

/// Variables forwarded from the parent by default.
pub const DEFAULT_ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ"];

/// Directories that may stay on the child's `PATH`.
pub const DEFAULT_TRUSTED_PATH_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/local/sbin",
    "/usr/sbin",
    "/sbin",
    "/opt/homebrew/bin",
];

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Environment handed to a child after `env_clear`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestrictedEnv {
    vars: Vec<(String, OsString)>,
}

impl RestrictedEnv {
    /// Build from the current process environment.
    pub fn from_current(passthrough: &[String], trusted_dirs: &[PathBuf]) -> Self {
        Self::from_vars(std::env::vars_os(), passthrough, trusted_dirs)
    }

    /// Build from an explicit set of parent variables.
    pub fn from_vars<I>(parent: I, passthrough: &[String], trusted_dirs: &[PathBuf]) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut vars = Vec::new();
        let mut saw_path = false;

        for (key, value) in parent {
            let Some(key) = key.to_str() else { continue };
            if key == SANDBOX_MARKER_VAR || !passthrough.iter().any(|name| name == key) {
                continue;
            }
            if key == "PATH" {
                saw_path = true;
                vars.push((key.to_string(), filter_path(&value, trusted_dirs)));
            } else {
                vars.push((key.to_string(), value));
            }
        }

        if !saw_path && passthrough.iter().any(|name| name == "PATH") {
            vars.push(("PATH".to_string(), OsString::from(FALLBACK_PATH)));
        }
        vars.push((SANDBOX_MARKER_VAR.to_string(), OsString::from("1")));
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        Self { vars }
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsString)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Keep only `PATH` entries under a trusted directory.
fn filter_path(value: &OsString, trusted_dirs: &[PathBuf]) -> OsString {
    let kept: Vec<PathBuf> = std::env::split_paths(value)
        .filter(|entry| entry.is_absolute() && is_trusted(entry, trusted_dirs))
        .collect();

    if kept.is_empty() {
        return OsString::from(FALLBACK_PATH);
    }
    std::env::join_paths(kept).unwrap_or_else(|_| OsString::from(FALLBACK_PATH))
}

fn is_trusted(entry: &Path, trusted_dirs: &[PathBuf]) -> bool {
    let cleaned = path_clean::clean(entry);
    trusted_dirs.iter().any(|dir| cleaned.starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> (Vec<String>, Vec<PathBuf>) {
        (
            DEFAULT_ENV_PASSTHROUGH.iter().map(|s| s.to_string()).collect(),
            DEFAULT_TRUSTED_PATH_DIRS.iter().map(PathBuf::from).collect(),
        )
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_only_allowed_names_forwarded() {
        let (passthrough, trusted) = defaults();
        let env = RestrictedEnv::from_vars(
            vars(&[
                ("HOME", "/home/ci"),
                ("GITHUB_TOKEN", "secret"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("LANG", "C.UTF-8"),
                ("LD_PRELOAD", "/tmp/evil.so"),
            ]),
            &passthrough,
            &trusted,
        );

        assert_eq!(env.get("HOME").unwrap(), "/home/ci");
        assert_eq!(env.get("LANG").unwrap(), "C.UTF-8");
        assert!(env.get("GITHUB_TOKEN").is_none());
        assert!(env.get("AWS_SECRET_ACCESS_KEY").is_none());
        assert!(env.get("LD_PRELOAD").is_none());
        assert_eq!(env.get(SANDBOX_MARKER_VAR).unwrap(), "1");
    }

    #[test]
    fn test_path_filtered_to_trusted_dirs() {
        let (passthrough, trusted) = defaults();
        let env = RestrictedEnv::from_vars(
            vars(&[("PATH", "/tmp/evil:/usr/bin:./node_modules/.bin:/bin:/usr/bin/../../tmp")]),
            &passthrough,
            &trusted,
        );
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin:/bin");
    }

    #[test]
    fn test_untrusted_path_falls_back() {
        let (passthrough, trusted) = defaults();
        let env = RestrictedEnv::from_vars(vars(&[("PATH", "/tmp/evil")]), &passthrough, &trusted);
        assert_eq!(env.get("PATH").unwrap(), FALLBACK_PATH);

        let env = RestrictedEnv::from_vars(Vec::new(), &passthrough, &trusted);
        assert_eq!(env.get("PATH").unwrap(), FALLBACK_PATH);
    }

    #[test]
    fn test_marker_cannot_be_spoofed() {
        let passthrough = vec!["PATH".to_string(), SANDBOX_MARKER_VAR.to_string()];
        let (_, trusted) = defaults();
        let env = RestrictedEnv::from_vars(
            vars(&[(SANDBOX_MARKER_VAR, "0")]),
            &passthrough,
            &trusted,
        );
        assert_eq!(env.get(SANDBOX_MARKER_VAR).unwrap(), "1");
        assert_eq!(env.iter().filter(|(k, _)| *k == SANDBOX_MARKER_VAR).count(), 1);
    }
}
