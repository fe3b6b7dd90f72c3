// Resource monitor: periodic sampling of a running interpreter
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::config::LimitSettings;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Which ceiling a sample crossed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum LimitBreach {
    Memory { observed_mb: f64, limit_mb: u64 },
    Cpu { observed_percent: f32, limit_percent: f32 },
}

impl fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitBreach::Memory {
                observed_mb,
                limit_mb,
            } => write!(
                f,
                "exceeded memory limit ({observed_mb:.1}MB > {limit_mb}MB)"
            ),
            LimitBreach::Cpu {
                observed_percent,
                limit_percent,
            } => write!(
                f,
                "exceeded CPU limit ({observed_percent:.1}% > {limit_percent:.1}%)"
            ),
        }
    }
}

/// One observation of a process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub memory_mb: f64,
    pub cpu_percent: f32,
}

/// Thin wrapper over a `sysinfo::System` kept alive between samples.
pub struct ProcessSampler {
    system: System,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Sample `pid`. `None` once the process has exited.
    ///
    /// CPU usage is computed against the previous refresh of the same
    /// sampler, so the first sample of a process always reports 0%.
    /// sysinfo only derives per-process CPU usage on a full process-table
    /// refresh, so every sample refreshes all processes.
    pub fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );
        self.system.process(pid).map(|process| ResourceSample {
            memory_mb: process.memory() as f64 / BYTES_PER_MB,
            cpu_percent: process.cpu_usage(),
        })
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Ceilings checked against every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitPolicy {
    pub max_memory_mb: u64,
    pub max_cpu_percent: Option<f32>,
}

impl LimitPolicy {
    /// Memory is checked before CPU.
    pub fn check(&self, sample: &ResourceSample) -> Option<LimitBreach> {
        if sample.memory_mb > self.max_memory_mb as f64 {
            return Some(LimitBreach::Memory {
                observed_mb: sample.memory_mb,
                limit_mb: self.max_memory_mb,
            });
        }
        match self.max_cpu_percent {
            Some(limit) if sample.cpu_percent > limit => Some(LimitBreach::Cpu {
                observed_percent: sample.cpu_percent,
                limit_percent: limit,
            }),
            _ => None,
        }
    }
}

impl From<&LimitSettings> for LimitPolicy {
    fn from(settings: &LimitSettings) -> Self {
        Self {
            max_memory_mb: settings.max_memory_mb,
            max_cpu_percent: settings.max_cpu_percent,
        }
    }
}

/// Watches one interpreter process until it breaches a ceiling.
pub struct ResourceMonitor {
    pid: u32,
    policy: LimitPolicy,
    poll_interval: Duration,
    sampler: ProcessSampler,
}

impl ResourceMonitor {
    pub fn new(pid: u32, settings: &LimitSettings) -> Self {
        Self {
            pid,
            policy: LimitPolicy::from(settings),
            poll_interval: settings.poll_interval(),
            sampler: ProcessSampler::new(),
        }
    }

    /// Resolve with the first breach observed.
    ///
    /// Once the process can no longer be sampled the future never resolves;
    /// the caller's other branches (exit, deadline) decide the outcome.
    pub async fn watch(mut self) -> LimitBreach {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(sample) = self.sampler.sample(self.pid) else {
                debug!(pid = self.pid, "Process gone, resource monitor stopped");
                return std::future::pending().await;
            };
            if let Some(breach) = self.policy.check(&sample) {
                warn!(pid = self.pid, breach = %breach, "Resource limit exceeded");
                return breach;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LimitPolicy {
        LimitPolicy {
            max_memory_mb: 512,
            max_cpu_percent: Some(50.0),
        }
    }

    #[test]
    fn test_within_limits() {
        let sample = ResourceSample {
            memory_mb: 100.0,
            cpu_percent: 10.0,
        };
        assert_eq!(policy().check(&sample), None);
    }

    #[test]
    fn test_memory_checked_first() {
        let sample = ResourceSample {
            memory_mb: 600.0,
            cpu_percent: 99.0,
        };
        assert!(matches!(
            policy().check(&sample),
            Some(LimitBreach::Memory { limit_mb: 512, .. })
        ));
    }

    #[test]
    fn test_cpu_limit_can_be_disabled() {
        let sample = ResourceSample {
            memory_mb: 1.0,
            cpu_percent: 400.0,
        };
        assert!(matches!(
            policy().check(&sample),
            Some(LimitBreach::Cpu { .. })
        ));

        let relaxed = LimitPolicy {
            max_cpu_percent: None,
            ..policy()
        };
        assert_eq!(relaxed.check(&sample), None);
    }

    #[test]
    fn test_breach_display() {
        let breach = LimitBreach::Memory {
            observed_mb: 600.4,
            limit_mb: 512,
        };
        assert_eq!(
            breach.to_string(),
            "exceeded memory limit (600.4MB > 512MB)"
        );
    }

    #[test]
    fn test_sample_current_process() {
        let mut sampler = ProcessSampler::new();
        let sample = sampler.sample(std::process::id()).unwrap();
        assert!(sample.memory_mb > 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_busy_process_reports_cpu_usage() {
        let mut busy = std::process::Command::new("sh")
            .args(["-c", "while true; do :; done"])
            .spawn()
            .unwrap();
        let pid = busy.id();

        let mut sampler = ProcessSampler::new();
        let mut peak = 0.0f32;
        for _ in 0..6 {
            if let Some(sample) = sampler.sample(pid) {
                peak = peak.max(sample.cpu_percent);
            }
            std::thread::sleep(Duration::from_millis(250));
        }
        let _ = busy.kill();
        let _ = busy.wait();

        assert!(peak > 20.0, "busy loop sampled at {peak}% CPU");
    }
}
