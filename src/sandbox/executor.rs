//! Core execution engine for the tool sandbox.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SandboxError};
use crate::sandbox::command::CommandLine;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::env::RestrictedEnv;
use crate::sandbox::io::{read_capped, CapturedOutput, CapturedStream};
use crate::sandbox::limits::{platform_limiter, ResourceLimiter};
use crate::sandbox::path::PathValidator;
use crate::sandbox::tools::ToolValidator;

/// How long stream readers may keep running once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Exit code conventionally used when a program was found but could not run.
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Why a started command did not finish normally.
///
/// A non-zero exit is not a failure in this sense; it is reported through
/// [`ExecutionResult::exit_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The wall-clock budget ran out and the child was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The caller cancelled the run and the child was killed.
    #[error("cancelled")]
    Cancelled,
    /// The child was terminated by a signal.
    #[error("terminated by signal {0}")]
    Signaled(i32),
    /// The child exhausted its CPU-time ceiling.
    #[error("CPU time limit exceeded")]
    CpuLimitExceeded,
    /// The program could not be executed.
    #[error("permission denied")]
    PermissionDenied,
}

/// Result of a sandboxed command.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The argument vector that was executed.
    pub command: Vec<String>,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration: Duration,
    /// Exit code, or -1 when the child did not exit on its own.
    pub exit_code: i32,
    /// Exit code 0 and no failure.
    pub success: bool,
    pub error: Option<ExecutionFailure>,
    /// Captured stdout followed by captured stderr.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    /// Whether either stream exceeded the capture ceiling.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Check if the execution was successful.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Check if the child was killed for exceeding its time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self.error, Some(ExecutionFailure::Timeout(_)))
    }

    /// Check if the OS refused to run the program.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.error, Some(ExecutionFailure::PermissionDenied))
    }

    /// Check if the caller cancelled the run.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(ExecutionFailure::Cancelled))
    }

    /// Turn a timed-out or cancelled run into the matching [`SandboxError`].
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(ExecutionFailure::Timeout(after)) => Err(SandboxError::Timeout(after)),
            Some(ExecutionFailure::Cancelled) => Err(SandboxError::Cancelled),
            _ => Ok(self),
        }
    }
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Validates and runs whitelisted tools under resource and access limits.
///
/// The configuration is fixed at construction. `Sandbox` is `Send + Sync`;
/// share it behind an `Arc` to run commands concurrently.
pub struct Sandbox {
    config: SandboxConfig,
    tools: ToolValidator,
    paths: PathValidator,
    limiter: Arc<dyn ResourceLimiter>,
    /// Serializes environment preparation, limit installation and spawn.
    /// Never held while waiting on a child.
    spawn_lock: Mutex<()>,
}

impl Sandbox {
    /// Create a sandbox using the limiter for the current platform.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Self::with_limiter(config, platform_limiter())
    }

    /// Create a sandbox with an explicit resource limiter.
    pub fn with_limiter(config: SandboxConfig, limiter: Arc<dyn ResourceLimiter>) -> Result<Self> {
        config.validate().map_err(SandboxError::Config)?;

        let tools = ToolValidator::new(config.allowed_tools.iter().cloned())
            .with_relative_paths(config.allow_relative_tool_paths);
        let allow = [config.root_dir.as_path(), config.work_dir.as_path()]
            .into_iter()
            .chain(config.read_only_paths.iter().map(PathBuf::as_path))
            .chain(config.write_allowed_paths.iter().map(PathBuf::as_path));
        let paths = PathValidator::new(
            &config.work_dir,
            allow,
            config.write_allowed_paths.iter().map(PathBuf::as_path),
            config.denied_paths.iter().map(String::as_str),
        )?;

        tracing::debug!(
            work_dir = %config.work_dir.display(),
            limiter = limiter.name(),
            enforcement = ?limiter.enforcement(),
            "sandbox created"
        );

        Ok(Self {
            config,
            tools,
            paths,
            limiter,
            spawn_lock: Mutex::new(()),
        })
    }

    /// The configuration this sandbox was built with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The resource limiter in use.
    pub fn limiter(&self) -> &dyn ResourceLimiter {
        self.limiter.as_ref()
    }

    /// True if `name` or its basename is a whitelisted tool.
    pub fn validate_tool(&self, name: &str) -> bool {
        self.tools.is_allowed(name)
    }

    /// Check `path` against the deny patterns and allow prefixes.
    ///
    /// Relative paths are resolved against the working directory. Returns
    /// the cleaned absolute path.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.paths.validate(path)
    }

    /// Check `path` against the deny patterns and the writable prefixes.
    pub fn validate_write_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.paths.validate_write(path)
    }

    /// Split `command` on whitespace, validate it, and run it.
    ///
    /// Validation failures are returned before anything is spawned. A
    /// non-zero exit, a timeout or a kill by signal is reported in the
    /// returned [`ExecutionResult`], not as an error.
    pub async fn execute(&self, command: &str) -> Result<ExecutionResult> {
        self.execute_with_cancel(command, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but stops the child when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let cmd = CommandLine::parse(command).inspect_err(log_rejection)?;
        self.run_validated(cmd, cancel).await
    }

    /// Run a pre-split argument vector. Every element is screened exactly as
    /// [`execute`](Self::execute) screens split fields.
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once(program.to_string())
            .chain(args.into_iter().map(Into::into))
            .collect();
        let cmd = CommandLine::from_argv(argv).inspect_err(log_rejection)?;
        self.run_validated(cmd, &CancellationToken::new()).await
    }

    async fn run_validated(
        &self,
        cmd: CommandLine,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.authorize(&cmd).inspect_err(log_rejection)?;

        let start_time = SystemTime::now();
        let started = Instant::now();
        let timeout = self.config.effective_timeout();

        let mut child = self.spawn(&cmd)?;
        let pid = child.id();
        let max_bytes = self.config.max_output_bytes;
        let stdout_buf = CapturedOutput::new();
        let stderr_buf = CapturedOutput::new();
        let stdout_task = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(read_capped(stream, max_bytes, stdout_buf.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(read_capped(stream, max_bytes, stderr_buf.clone())));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let (exit_code, error) = match outcome {
            Outcome::Exited(status) => classify_exit(status),
            Outcome::TimedOut => {
                tracing::warn!(program = cmd.program(), ?timeout, "command timed out");
                self.terminate(&mut child, pid).await;
                (-1, Some(ExecutionFailure::Timeout(timeout)))
            }
            Outcome::Cancelled => {
                tracing::warn!(program = cmd.program(), "command cancelled");
                self.terminate(&mut child, pid).await;
                (-1, Some(ExecutionFailure::Cancelled))
            }
        };

        // Anything the child left running in its group goes with it.
        if self.config.isolate_process_group {
            kill_process_group(pid);
        }

        let stdout = collect_stream(stdout_task, &stdout_buf).await;
        let stderr = collect_stream(stderr_task, &stderr_buf).await;
        let duration = started.elapsed();

        tracing::info!(
            program = cmd.program(),
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "command finished"
        );

        let stdout_text = stdout.to_string_lossy();
        let stderr_text = stderr.to_string_lossy();
        Ok(ExecutionResult {
            command: cmd.into_argv(),
            start_time,
            end_time: SystemTime::now(),
            duration,
            exit_code,
            success: exit_code == 0 && error.is_none(),
            error,
            output: format!("{stdout_text}{stderr_text}"),
            stdout: stdout_text,
            stderr: stderr_text,
            truncated: stdout.truncated || stderr.truncated,
        })
    }

    /// Tool whitelist and, if enabled, path rules for path-like arguments.
    fn authorize(&self, cmd: &CommandLine) -> Result<()> {
        self.tools.check(cmd.program())?;
        if self.config.validate_path_arguments {
            for arg in cmd.path_like_args() {
                self.paths.validate(arg)?;
            }
        }
        Ok(())
    }

    /// Build the child under the spawn lock and start it.
    fn spawn(&self, cmd: &CommandLine) -> Result<Child> {
        let mut command = Command::new(cmd.program());
        command
            .args(cmd.args())
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();

        let _guard = self.spawn_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let env = RestrictedEnv::from_current(
            &self.config.env_passthrough,
            &self.config.trusted_path_dirs,
        );
        command.envs(env.iter());

        #[cfg(unix)]
        self.install_pre_exec(&mut command);

        tracing::debug!(
            program = cmd.program(),
            args = ?cmd.args(),
            limits = self.config.enforce_resource_limits,
            "spawning command"
        );

        command.spawn().map_err(|source| {
            let program = cmd.program().to_string();
            if source.kind() == std::io::ErrorKind::PermissionDenied {
                SandboxError::PermissionDenied { program, source }
            } else {
                SandboxError::ExecutionFailed { program, source }
            }
        })
    }

    #[cfg(unix)]
    fn install_pre_exec(&self, command: &mut Command) {
        if self.config.isolate_process_group {
            command.process_group(0);
        }
        if self.config.enforce_resource_limits {
            let limiter = Arc::clone(&self.limiter);
            let limits = self.config.limits;
            // SAFETY: the hook runs between fork and exec and only calls
            // getrlimit/setrlimit, which are async-signal-safe.
            unsafe {
                command.pre_exec(move || limiter.apply(&limits));
            }
        }
    }

    /// Kill the child (and its process group) and reap it. Best effort.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        if self.config.isolate_process_group {
            kill_process_group(pid);
        }
        if let Err(err) = child.kill().await {
            tracing::debug!(%err, "failed to kill child");
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // The group is already empty.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => tracing::debug!(pid, %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("config", &self.config)
            .field("limiter", &self.limiter.name())
            .finish_non_exhaustive()
    }
}

fn log_rejection(err: &SandboxError) {
    tracing::warn!(error = %err, "command rejected");
}

fn classify_exit(status: ExitStatus) -> (i32, Option<ExecutionFailure>) {
    if let Some(code) = status.code() {
        let failure = (code == EXIT_NOT_EXECUTABLE).then_some(ExecutionFailure::PermissionDenied);
        return (code, failure);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            let failure = if signal == libc::SIGXCPU {
                ExecutionFailure::CpuLimitExceeded
            } else {
                ExecutionFailure::Signaled(signal)
            };
            return (-1, Some(failure));
        }
    }

    (-1, None)
}

/// Wait for a stream reader, then return what it captured.
///
/// A reader still running after [`OUTPUT_GRACE`] is aborted; the bytes it
/// read so far are kept and the stream is marked truncated.
async fn collect_stream(
    task: Option<JoinHandle<std::io::Result<()>>>,
    output: &CapturedOutput,
) -> CapturedStream {
    let Some(mut task) = task else {
        return output.snapshot();
    };

    match tokio::time::timeout(OUTPUT_GRACE, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => {
            tracing::warn!(%err, "failed to read child output");
            output.mark_truncated();
        }
        Ok(Err(err)) => {
            tracing::warn!(%err, "output reader task failed");
            output.mark_truncated();
        }
        Err(_) => {
            // A process outside the group still holds the pipe.
            tracing::debug!("output stream still open after grace period");
            task.abort();
            output.mark_truncated();
        }
    }
    output.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::limits::NoopLimiter;

    fn sandbox_in(dir: &Path) -> Sandbox {
        let config = SandboxConfig::builder()
            .root_dir(dir)
            .work_dir(dir)
            .allow_tool("echo")
            .timeout(Duration::from_secs(5))
            .build();
        Sandbox::new(config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SandboxConfig::builder().timeout(Duration::ZERO).build();
        let err = Sandbox::new(config).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_validate_tool_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        assert!(sandbox.validate_tool("echo"));
        assert!(sandbox.validate_tool("/usr/bin/git"));
        assert!(!sandbox.validate_tool("rm"));
    }

    #[test]
    fn test_validate_path_allows_work_dir_only() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        assert!(sandbox.validate_path("notes.txt").is_ok());
        assert!(sandbox.validate_path("/etc/shadow").unwrap_err().is_path_denied());
        assert!(sandbox.validate_path("/var/log/syslog").is_err());
        assert!(sandbox.validate_write_path("notes.txt").is_err());
    }

    #[test]
    fn test_custom_limiter_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder().work_dir(dir.path()).build();
        let sandbox = Sandbox::with_limiter(config, Arc::new(NoopLimiter)).unwrap();
        assert_eq!(sandbox.limiter().name(), "noop");
    }

    #[test]
    fn test_into_result_maps_timeout() {
        let result = ExecutionResult {
            command: vec!["sleep".into(), "10".into()],
            start_time: SystemTime::now(),
            end_time: SystemTime::now(),
            duration: Duration::from_secs(1),
            exit_code: -1,
            success: false,
            error: Some(ExecutionFailure::Timeout(Duration::from_secs(1))),
            output: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
        };
        assert!(result.is_timeout());
        assert!(!result.is_permission_denied());
        assert!(result.into_result().unwrap_err().is_timeout());
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_exit() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(classify_exit(ExitStatus::from_raw(0)), (0, None));
        assert_eq!(classify_exit(ExitStatus::from_raw(2 << 8)), (2, None));
        assert_eq!(
            classify_exit(ExitStatus::from_raw(126 << 8)),
            (126, Some(ExecutionFailure::PermissionDenied))
        );
        assert_eq!(
            classify_exit(ExitStatus::from_raw(libc::SIGXCPU)),
            (-1, Some(ExecutionFailure::CpuLimitExceeded))
        );
        assert_eq!(
            classify_exit(ExitStatus::from_raw(libc::SIGKILL)),
            (-1, Some(ExecutionFailure::Signaled(libc::SIGKILL)))
        );
    }

    #[tokio::test]
    async fn test_echo_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        let result = sandbox.execute("echo hello").await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.command, ["echo", "hello"]);
    }

    #[tokio::test]
    async fn test_unlisted_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        let err = sandbox.execute("rm -rf /").await.unwrap_err();
        assert!(err.is_tool_not_allowed());
    }
}
