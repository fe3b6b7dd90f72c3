// Process registry: the live interpreter processes of one executor
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::monitor::ProcessSampler;

/// Identity of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in generated file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ask a running execution to stop.
#[derive(Debug, Clone)]
pub struct TerminationRequest {
    pub reason: String,
}

/// Registry entry for one spawned interpreter.
#[derive(Debug)]
pub struct ProcessHandle {
    pub id: ExecutionId,
    pub pid: Option<u32>,
    pub interpreter: String,
    pub script_path: PathBuf,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    terminator: Option<oneshot::Sender<TerminationRequest>>,
}

impl ProcessHandle {
    /// Returns the handle and the receiving end its execution listens on.
    pub fn new(
        id: ExecutionId,
        pid: Option<u32>,
        interpreter: impl Into<String>,
        script_path: PathBuf,
    ) -> (Self, oneshot::Receiver<TerminationRequest>) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            id,
            pid,
            interpreter: interpreter.into(),
            script_path,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            terminator: Some(tx),
        };
        (handle, rx)
    }

    /// Deliver a termination request. Returns false when nobody is listening.
    fn request_termination(&mut self, reason: &str) -> bool {
        match self.terminator.take() {
            Some(tx) => tx
                .send(TerminationRequest {
                    reason: reason.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Point-in-time view of a live execution.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub id: String,
    pub pid: Option<u32>,
    pub interpreter: String,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f32>,
}

/// Concurrent map of live executions.
///
/// Entries are inserted after spawn and removed when the owning
/// `RegistrationGuard` drops, so an entry never outlives its `execute` call.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: DashMap<ExecutionId, ProcessHandle>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        self: &Arc<Self>,
        handle: ProcessHandle,
    ) -> Result<RegistrationGuard, RegistryError> {
        let id = handle.id;
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateIdentity { id: id.to_string() }),
            Entry::Vacant(slot) => {
                debug!(execution_id = %id, pid = handle.pid, "Process registered");
                slot.insert(handle);
                Ok(RegistrationGuard {
                    registry: Arc::clone(self),
                    id,
                })
            }
        }
    }

    pub fn deregister(&self, id: &ExecutionId) -> Option<ProcessHandle> {
        self.entries.remove(id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots of every live execution, with a fresh resource sample.
    pub fn live_entries(&self) -> Vec<ProcessSnapshot> {
        let mut sampler = ProcessSampler::new();
        self.entries
            .iter()
            .map(|entry| {
                let handle = entry.value();
                let sample = handle.pid.and_then(|pid| sampler.sample(pid));
                ProcessSnapshot {
                    id: handle.id.to_string(),
                    pid: handle.pid,
                    interpreter: handle.interpreter.clone(),
                    script_path: handle.script_path.clone(),
                    started_at: handle.started_wall,
                    elapsed_seconds: handle.started_at.elapsed().as_secs_f64(),
                    memory_mb: sample.map(|s| s.memory_mb),
                    cpu_percent: sample.map(|s| s.cpu_percent),
                }
            })
            .collect()
    }

    /// Remove every entry and stop its process.
    ///
    /// Executions still listening receive a termination request and run
    /// their own escalation; any other process group is killed outright.
    /// Returns the number of entries removed.
    pub fn terminate_all(&self, reason: &str) -> usize {
        let ids: Vec<ExecutionId> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut terminated = 0;

        for id in ids {
            let Some((_, mut handle)) = self.entries.remove(&id) else {
                continue;
            };
            terminated += 1;

            if !handle.request_termination(reason) {
                if let Some(pid) = handle.pid {
                    crate::process::kill_process_group(pid);
                }
            }
        }

        if terminated > 0 {
            info!(count = terminated, reason = %reason, "Terminated running executions");
        }
        terminated
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.terminate_all("registry dropped");
    }
}

/// Removes its registry entry when dropped.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ProcessRegistry>,
    id: ExecutionId,
}

impl RegistrationGuard {
    pub fn id(&self) -> ExecutionId {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.registry.deregister(&self.id).is_some() {
            debug!(execution_id = %self.id, "Process deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: ExecutionId) -> (ProcessHandle, oneshot::Receiver<TerminationRequest>) {
        ProcessHandle::new(id, None, "flex", PathBuf::from("script.flex"))
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let registry = Arc::new(ProcessRegistry::new());
        let id = ExecutionId::new();
        let (h, _rx) = handle(id);

        let guard = registry.register(h).unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let registry = Arc::new(ProcessRegistry::new());
        let id = ExecutionId::new();
        let (first, _rx1) = handle(id);
        let (second, _rx2) = handle(id);

        let _guard = registry.register(first).unwrap();
        let error = registry.register(second).unwrap_err();
        assert!(matches!(error, RegistryError::DuplicateIdentity { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_terminate_all_signals_listeners() {
        let registry = Arc::new(ProcessRegistry::new());
        let (h, mut rx) = handle(ExecutionId::new());
        let guard = registry.register(h).unwrap();

        assert_eq!(registry.terminate_all("shutdown"), 1);
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().unwrap().reason, "shutdown");

        // The guard finds nothing left to remove.
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_live_entries() {
        let registry = Arc::new(ProcessRegistry::new());
        let id = ExecutionId::new();
        let (h, _rx) = handle(id);
        let _guard = registry.register(h).unwrap();

        let entries = registry.live_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id.to_string());
        assert_eq!(entries[0].memory_mb, None);
    }

    #[test]
    fn test_short_id() {
        let id = ExecutionId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().starts_with(&id.short()));
    }
}
