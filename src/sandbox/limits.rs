//! Resource ceilings applied before a child program is exec'd.
//!
//! A limiter sets rlimit-style ceilings on the calling process, so it runs
//! inside the forked child between `fork` and `exec`. Whatever it sets is
//! inherited by the program and by everything that program starts.
//!
//! [`ResourceLimiter::apply`] is called from a `pre_exec` hook and must stay
//! async-signal-safe: no allocation, no locks, no logging.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::sandbox::config::ResourceLimits;

/// How much of [`ResourceLimits`] a limiter actually enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// Memory, CPU time, process count and open files.
    Full,
    /// A subset; see the limiter's documentation.
    Partial,
    /// Nothing is enforced.
    None,
}

/// Platform capability for applying resource ceilings to the calling process.
pub trait ResourceLimiter: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// What this limiter enforces.
    fn enforcement(&self) -> Enforcement;

    /// Apply `limits` to the calling process.
    fn apply(&self, limits: &ResourceLimits) -> io::Result<()>;
}

/// Select the limiter for the platform this crate was built for.
pub fn platform_limiter() -> Arc<dyn ResourceLimiter> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxLimiter)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(MacLimiter)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Arc::new(NoopLimiter)
    }
}

/// Address space, CPU time, process count and open files.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxLimiter;

#[cfg(target_os = "linux")]
impl ResourceLimiter for LinuxLimiter {
    fn name(&self) -> &'static str {
        "linux-rlimit"
    }

    fn enforcement(&self) -> Enforcement {
        Enforcement::Full
    }

    fn apply(&self, limits: &ResourceLimits) -> io::Result<()> {
        use nix::sys::resource::Resource;

        lower_limit(Resource::RLIMIT_AS, limits.max_memory_bytes, 0)?;
        lower_limit(Resource::RLIMIT_CPU, limits.cpu_time_secs(), CPU_HARD_HEADROOM_SECS)?;
        lower_limit(Resource::RLIMIT_NPROC, limits.max_processes, 0)?;
        lower_limit(Resource::RLIMIT_NOFILE, limits.max_open_files, 0)?;
        Ok(())
    }
}

/// Data segment, CPU time and open files. macOS has no usable process-count
/// ceiling for a single job and does not enforce `RLIMIT_AS`.
#[cfg(target_os = "macos")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MacLimiter;

#[cfg(target_os = "macos")]
impl ResourceLimiter for MacLimiter {
    fn name(&self) -> &'static str {
        "macos-rlimit"
    }

    fn enforcement(&self) -> Enforcement {
        Enforcement::Partial
    }

    fn apply(&self, limits: &ResourceLimits) -> io::Result<()> {
        use nix::sys::resource::Resource;

        lower_limit(Resource::RLIMIT_DATA, limits.max_memory_bytes, 0)?;
        lower_limit(Resource::RLIMIT_CPU, limits.cpu_time_secs(), CPU_HARD_HEADROOM_SECS)?;
        lower_limit(Resource::RLIMIT_NOFILE, limits.max_open_files, 0)?;
        Ok(())
    }
}

/// Enforces nothing. Used where the OS has no rlimit equivalent (Windows);
/// callers must not assume any ceiling holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLimiter;

impl ResourceLimiter for NoopLimiter {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn enforcement(&self) -> Enforcement {
        Enforcement::None
    }

    fn apply(&self, _limits: &ResourceLimits) -> io::Result<()> {
        Ok(())
    }
}

/// The CPU hard limit sits above the soft one so the child sees `SIGXCPU`
/// before the kernel escalates to `SIGKILL`.
#[cfg(any(target_os = "linux", target_os = "macos"))]
const CPU_HARD_HEADROOM_SECS: u64 = 1;

/// Set the soft limit to `value` and the hard limit to `value + headroom`,
/// never above the current hard limit. Zero leaves the limit alone.
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn lower_limit(resource: nix::sys::resource::Resource, value: u64, headroom: u64) -> io::Result<()> {
    use nix::sys::resource::{getrlimit, setrlimit};

    if value == 0 {
        return Ok(());
    }
    let (_, current_hard) = getrlimit(resource).map_err(io::Error::from)?;
    let soft = (value as libc::rlim_t).min(current_hard);
    let hard = (value.saturating_add(headroom) as libc::rlim_t).min(current_hard);
    setrlimit(resource, soft, hard).map_err(io::Error::from)
}
