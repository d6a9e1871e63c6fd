//! Sandbox configuration with builder pattern.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sandbox::env::{DEFAULT_ENV_PASSTHROUGH, DEFAULT_TRUSTED_PATH_DIRS};
use crate::sandbox::tools::DEFAULT_ALLOWED_TOOLS;

/// Default per-stream output capture ceiling.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// OS-enforced ceilings applied before a child is started.
///
/// A zero value leaves the corresponding limit unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum address space in bytes.
    pub max_memory_bytes: u64,
    /// Share of `max_wall_time` the child may spend on CPU.
    pub max_cpu_fraction: f64,
    /// Wall-clock ceiling; the effective timeout never exceeds it.
    pub max_wall_time: Duration,
    /// Maximum processes for the child's user.
    pub max_processes: u64,
    /// Maximum open file descriptors.
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            max_cpu_fraction: 1.0,
            max_wall_time: Duration::from_secs(60),
            max_processes: 128,
            max_open_files: 256,
        }
    }
}

impl ResourceLimits {
    /// CPU-time ceiling in whole seconds derived from wall time and CPU share.
    pub fn cpu_time_secs(&self) -> u64 {
        if self.max_wall_time.is_zero() || self.max_cpu_fraction <= 0.0 {
            return 0;
        }
        let secs = (self.max_wall_time.as_secs_f64() * self.max_cpu_fraction).ceil();
        (secs as u64).max(1)
    }
}

/// Advisory network rules. The sandbox never opens sockets itself; callers
/// that proxy traffic for a command consult this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    pub allow_outbound: bool,
    pub allow_inbound: bool,
    pub allowed_hosts: BTreeSet<String>,
    pub blocked_hosts: BTreeSet<String>,
}

impl NetworkPolicy {
    /// Whether an outbound connection to `host` is permitted.
    ///
    /// Blocked hosts win. A listed domain also covers its subdomains.
    pub fn permits_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if domain_listed(&self.blocked_hosts, &host) {
            return false;
        }
        self.allow_outbound && domain_listed(&self.allowed_hosts, &host)
    }
}

fn domain_listed(list: &BTreeSet<String>, host: &str) -> bool {
    list.iter().any(|entry| {
        let entry = entry.trim_end_matches('.').to_ascii_lowercase();
        host == entry
            || host
                .strip_suffix(entry.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Configuration for the tool sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root of the tree the sandbox is allowed to touch.
    pub root_dir: PathBuf,
    /// Working directory for every command; relative paths resolve here.
    pub work_dir: PathBuf,
    /// Paths readable by commands.
    pub read_only_paths: BTreeSet<PathBuf>,
    /// Paths writable by commands.
    pub write_allowed_paths: BTreeSet<PathBuf>,
    /// Deny patterns checked in addition to the built-in sensitive paths.
    pub denied_paths: Vec<String>,
    /// Executable names that may be run.
    pub allowed_tools: BTreeSet<String>,
    pub allow_network: bool,
    pub allowed_domains: BTreeSet<String>,
    /// Maximum execution time before timeout.
    pub timeout: Duration,
    pub limits: ResourceLimits,
    /// Per-stream capture ceiling; the rest of the stream is discarded.
    pub max_output_bytes: usize,
    /// Environment variable names forwarded from the parent.
    pub env_passthrough: Vec<String>,
    /// Directories allowed to remain on the child's `PATH`.
    pub trusted_path_dirs: Vec<PathBuf>,
    /// Apply [`ResourceLimits`] before spawning.
    pub enforce_resource_limits: bool,
    /// Start each child in its own process group so timeouts kill the group.
    pub isolate_process_group: bool,
    /// Run path-like arguments through the path rules.
    pub validate_path_arguments: bool,
    /// Accept relative executable paths such as `./git` by basename.
    pub allow_relative_tool_paths: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            root_dir: cwd.clone(),
            work_dir: cwd,
            read_only_paths: BTreeSet::new(),
            write_allowed_paths: BTreeSet::new(),
            denied_paths: Vec::new(),
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            allow_network: false,
            allowed_domains: BTreeSet::new(),
            timeout: Duration::from_secs(30),
            limits: ResourceLimits::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            env_passthrough: DEFAULT_ENV_PASSTHROUGH.iter().map(|v| v.to_string()).collect(),
            trusted_path_dirs: DEFAULT_TRUSTED_PATH_DIRS.iter().map(PathBuf::from).collect(),
            enforce_resource_limits: true,
            isolate_process_group: true,
            validate_path_arguments: false,
            allow_relative_tool_paths: true,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Wall-clock budget for one command: the tighter of `timeout` and
    /// `limits.max_wall_time`.
    pub fn effective_timeout(&self) -> Duration {
        if self.limits.max_wall_time.is_zero() {
            self.timeout
        } else {
            self.timeout.min(self.limits.max_wall_time)
        }
    }

    /// The advisory network policy implied by this configuration.
    pub fn network_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            allow_outbound: self.allow_network,
            allow_inbound: false,
            allowed_hosts: self.allowed_domains.clone(),
            blocked_hosts: BTreeSet::new(),
        }
    }

    /// Check the values a sandbox cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        let fraction = self.limits.max_cpu_fraction;
        if !fraction.is_finite() || fraction <= 0.0 {
            return Err(format!("max_cpu_fraction must be positive, got {fraction}"));
        }
        if !self.work_dir.is_dir() {
            return Err(format!(
                "work_dir {} is not an existing directory",
                self.work_dir.display()
            ));
        }
        if self.max_output_bytes == 0 {
            return Err("max_output_bytes must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    config: Option<SandboxConfig>,
}

impl SandboxConfigBuilder {
    fn config(&mut self) -> &mut SandboxConfig {
        self.config.get_or_insert_with(SandboxConfig::default)
    }

    /// Set the root directory.
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config().root_dir = dir.into();
        self
    }

    /// Set the working directory.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config().work_dir = dir.into();
        self
    }

    /// Add a read-only path.
    pub fn read_only_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().read_only_paths.insert(path.into());
        self
    }

    /// Add a writable path.
    pub fn write_allowed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().write_allowed_paths.insert(path.into());
        self
    }

    /// Add a deny pattern (glob or substring).
    pub fn deny_path(mut self, pattern: impl Into<String>) -> Self {
        self.config().denied_paths.push(pattern.into());
        self
    }

    /// Permit an additional tool.
    pub fn allow_tool(mut self, tool: impl Into<String>) -> Self {
        self.config().allowed_tools.insert(tool.into());
        self
    }

    /// Replace the tool whitelist.
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config().allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Allow network access for domains in `allowed_domains`.
    pub fn allow_network(mut self, allow: bool) -> Self {
        self.config().allow_network = allow;
        self
    }

    /// Add an allowed domain.
    pub fn allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.config().allowed_domains.insert(domain.into());
        self
    }

    /// Set the maximum execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config().timeout = timeout;
        self
    }

    /// Set the resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.config().limits = limits;
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.config().limits.max_memory_bytes = bytes;
        self
    }

    /// Set the open file descriptor limit.
    pub fn max_open_files(mut self, files: u64) -> Self {
        self.config().limits.max_open_files = files;
        self
    }

    /// Set the per-stream output ceiling.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config().max_output_bytes = bytes;
        self
    }

    /// Replace the forwarded environment variable names.
    pub fn env_passthrough<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config().env_passthrough = names.into_iter().map(Into::into).collect();
        self
    }

    /// Toggle resource limit enforcement.
    pub fn enforce_resource_limits(mut self, enforce: bool) -> Self {
        self.config().enforce_resource_limits = enforce;
        self
    }

    /// Toggle process group isolation.
    pub fn isolate_process_group(mut self, isolate: bool) -> Self {
        self.config().isolate_process_group = isolate;
        self
    }

    /// Toggle path validation of command arguments.
    pub fn validate_path_arguments(mut self, validate: bool) -> Self {
        self.config().validate_path_arguments = validate;
        self
    }

    /// Toggle basename matching for relative executable paths.
    pub fn allow_relative_tool_paths(mut self, allow: bool) -> Self {
        self.config().allow_relative_tool_paths = allow;
        self
    }

    /// Build the SandboxConfig.
    pub fn build(mut self) -> SandboxConfig {
        self.config.take().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.allowed_tools.contains("git"));
        assert!(!config.allowed_tools.contains("rm"));
        assert!(config.enforce_resource_limits);
        assert!(!config.allow_network);
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .max_memory(32 * 1024 * 1024)
            .allow_tool("echo")
            .deny_path("*.pem")
            .build();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.limits.max_memory_bytes, 32 * 1024 * 1024);
        assert!(config.allowed_tools.contains("echo"));
        assert!(config.allowed_tools.contains("git"));
        assert_eq!(config.denied_paths, vec!["*.pem".to_string()]);
    }

    #[test]
    fn test_effective_timeout_uses_tighter_bound() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(120))
            .build();
        assert_eq!(config.effective_timeout(), Duration::from_secs(60));

        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.effective_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_cpu_time_secs() {
        let limits = ResourceLimits {
            max_wall_time: Duration::from_secs(10),
            max_cpu_fraction: 0.25,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.cpu_time_secs(), 3);

        let limits = ResourceLimits {
            max_wall_time: Duration::from_millis(100),
            max_cpu_fraction: 0.1,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.cpu_time_secs(), 1);

        let limits = ResourceLimits {
            max_wall_time: Duration::ZERO,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.cpu_time_secs(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SandboxConfig::builder().timeout(Duration::ZERO).build();
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.limits.max_cpu_fraction = f64::NAN;
        assert!(config.validate().is_err());

        let config = SandboxConfig::builder()
            .work_dir("/definitely/not/a/real/dir")
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_policy() {
        let mut policy = SandboxConfig::builder()
            .allow_network(true)
            .allowed_domain("github.com")
            .build()
            .network_policy();

        assert!(policy.permits_host("github.com"));
        assert!(policy.permits_host("api.github.com"));
        assert!(!policy.permits_host("evilgithub.com"));
        assert!(!policy.permits_host("example.com"));

        policy.blocked_hosts.insert("gist.github.com".to_string());
        assert!(!policy.permits_host("gist.github.com"));

        policy.allow_outbound = false;
        assert!(!policy.permits_host("github.com"));
    }
}
