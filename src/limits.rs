// OS-level resource ceilings applied to the interpreter before exec
use std::io;
use std::sync::Arc;

use crate::config::LimitSettings;

/// Ceilings a child process is started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCeilings {
    pub memory_bytes: u64,
    pub cpu_time_secs: u64,
    pub file_size_bytes: u64,
}

impl ProcessCeilings {
    /// CPU time is capped at twice the wall-clock timeout.
    pub fn for_run(settings: &LimitSettings, timeout_secs: u64) -> Self {
        Self {
            memory_bytes: settings.max_memory_bytes(),
            cpu_time_secs: timeout_secs.saturating_mul(2),
            file_size_bytes: settings.max_file_size_bytes(),
        }
    }

    /// Apply every ceiling, stopping at the first failure.
    ///
    /// Runs in the forked child before exec, so it must not allocate or log.
    pub fn apply(&self, limiter: &dyn ResourceLimiter) -> io::Result<()> {
        limiter.set_memory_ceiling(self.memory_bytes)?;
        limiter.set_cpu_time_ceiling(self.cpu_time_secs)?;
        limiter.set_file_size_ceiling(self.file_size_bytes)
    }
}

/// Platform hook that installs ceilings on the current process.
pub trait ResourceLimiter: Send + Sync {
    fn set_memory_ceiling(&self, bytes: u64) -> io::Result<()>;
    fn set_cpu_time_ceiling(&self, seconds: u64) -> io::Result<()>;

    fn set_file_size_ceiling(&self, _bytes: u64) -> io::Result<()> {
        Ok(())
    }

    /// False when this limiter leaves enforcement to the resource monitor.
    fn is_enforcing(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// POSIX `setrlimit` ceilings: address space, CPU seconds, file size.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RlimitLimiter;

#[cfg(unix)]
impl RlimitLimiter {
    fn set(resource: nix::sys::resource::Resource, value: u64) -> io::Result<()> {
        let limit = value as nix::libc::rlim_t;
        nix::sys::resource::setrlimit(resource, limit, limit).map_err(io::Error::from)
    }
}

#[cfg(unix)]
impl ResourceLimiter for RlimitLimiter {
    fn set_memory_ceiling(&self, bytes: u64) -> io::Result<()> {
        Self::set(nix::sys::resource::Resource::RLIMIT_AS, bytes)
    }

    fn set_cpu_time_ceiling(&self, seconds: u64) -> io::Result<()> {
        Self::set(nix::sys::resource::Resource::RLIMIT_CPU, seconds)
    }

    fn set_file_size_ceiling(&self, bytes: u64) -> io::Result<()> {
        Self::set(nix::sys::resource::Resource::RLIMIT_FSIZE, bytes)
    }

    fn name(&self) -> &'static str {
        "rlimit"
    }
}

/// No OS ceilings; the resource monitor is the only enforcement.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingOnlyLimiter;

impl ResourceLimiter for PollingOnlyLimiter {
    fn set_memory_ceiling(&self, _bytes: u64) -> io::Result<()> {
        Ok(())
    }

    fn set_cpu_time_ceiling(&self, _seconds: u64) -> io::Result<()> {
        Ok(())
    }

    fn is_enforcing(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "polling-only"
    }
}

/// Best limiter available on this platform, honoring `enforce_rlimits`.
pub fn default_limiter(settings: &LimitSettings) -> Arc<dyn ResourceLimiter> {
    #[cfg(unix)]
    {
        if settings.enforce_rlimits {
            return Arc::new(RlimitLimiter);
        }
    }
    #[cfg(not(unix))]
    let _ = settings;

    Arc::new(PollingOnlyLimiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLimiter {
        calls: Mutex<Vec<(&'static str, u64)>>,
    }

    impl ResourceLimiter for RecordingLimiter {
        fn set_memory_ceiling(&self, bytes: u64) -> io::Result<()> {
            self.calls.lock().unwrap().push(("memory", bytes));
            Ok(())
        }

        fn set_cpu_time_ceiling(&self, seconds: u64) -> io::Result<()> {
            self.calls.lock().unwrap().push(("cpu", seconds));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn test_ceilings_for_run() {
        let ceilings = ProcessCeilings::for_run(&LimitSettings::default(), 30);
        assert_eq!(ceilings.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(ceilings.cpu_time_secs, 60);
        assert_eq!(ceilings.file_size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_apply_calls_limiter() {
        let limiter = RecordingLimiter::default();
        let ceilings = ProcessCeilings::for_run(&LimitSettings::default(), 5);
        ceilings.apply(&limiter).unwrap();
        let calls = limiter.calls.lock().unwrap();
        assert_eq!(*calls, vec![("memory", 512 * 1024 * 1024), ("cpu", 10)]);
    }

    #[test]
    fn test_default_limiter_respects_setting() {
        let settings = LimitSettings {
            enforce_rlimits: false,
            ..Default::default()
        };
        let limiter = default_limiter(&settings);
        assert!(!limiter.is_enforcing());
        assert_eq!(limiter.name(), "polling-only");
    }

    #[cfg(unix)]
    #[test]
    fn test_default_limiter_on_unix() {
        let limiter = default_limiter(&LimitSettings::default());
        assert!(limiter.is_enforcing());
        assert_eq!(limiter.name(), "rlimit");
    }
}
