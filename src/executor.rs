// Sandbox executor: runs Flex source under time and resource bounds
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};

use crate::config::{clamp_timeout, Settings};
use crate::error::{ExecutionError, ExecutionErrorKind, Result};
use crate::limits::{default_limiter, ProcessCeilings, ResourceLimiter};
use crate::logging::utils::{execution_span, log_execution_completion, log_execution_start};
use crate::materialize::{plan_source_path, FsSourceStore, MaterializedSource, SourceStore};
use crate::monitor::{LimitBreach, ResourceMonitor};
use crate::process::{
    kill_now, kill_process_group, probe_interpreter, terminate_gracefully, OutputReaders,
    ProcessConfig,
};
use crate::registry::{
    ExecutionId, ProcessHandle, ProcessRegistry, ProcessSnapshot, TerminationRequest,
};

/// One request to run source text.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    pub source_text: String,
    /// Only honored when `persist_to_disk` is set
    pub target_filename: Option<String>,
    pub persist_to_disk: bool,
    /// Clamped to 1..=300 when the request runs
    pub timeout_seconds: u64,
}

impl ExecutionRequest {
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            target_filename: None,
            persist_to_disk: false,
            timeout_seconds: 30,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Keep the script after the run, optionally under `filename`.
    pub fn persisted(mut self, filename: Option<String>) -> Self {
        self.persist_to_disk = true;
        self.target_filename = filename;
        self
    }

    /// Same settings, different source text.
    pub fn with_source(&self, source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..self.clone()
        }
    }
}

/// Outcome of one execution. Every request yields exactly one.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout_text: String,
    pub stderr_text: String,
    pub error_text: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub suggestion: Option<String>,
    pub elapsed_seconds: f64,
    pub materialized_path: Option<PathBuf>,
    /// -1 when the process never produced an exit code
    pub exit_code: i32,
}

impl ExecutionResult {
    fn failure(error: &ExecutionError, started: Instant, path: Option<PathBuf>) -> Self {
        Self {
            succeeded: false,
            stdout_text: String::new(),
            stderr_text: String::new(),
            error_text: Some(error.report_text()),
            error_kind: Some(error.kind()),
            suggestion: error.suggestion(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            materialized_path: path,
            exit_code: -1,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ExecutionErrorKind::Timeout)
    }
}

/// Executor configuration and liveness summary.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub interpreter: String,
    pub interpreter_available: bool,
    pub interpreter_version: Option<String>,
    pub default_timeout_secs: u64,
    pub max_memory_mb: u64,
    pub max_cpu_percent: Option<f32>,
    pub limiter: String,
    pub running_processes: usize,
}

/// Which branch of the execution race finished first.
enum RaceOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    LimitBreached(LimitBreach),
    TimedOut,
    Cancelled(TerminationRequest),
}

pub struct SandboxExecutor {
    settings: Settings,
    store: Arc<dyn SourceStore>,
    limiter: Arc<dyn ResourceLimiter>,
    registry: Arc<ProcessRegistry>,
}

impl SandboxExecutor {
    pub fn new(settings: Settings) -> Self {
        let limiter = default_limiter(&settings.limits);
        Self {
            settings,
            store: Arc::new(FsSourceStore),
            limiter,
            registry: Arc::new(ProcessRegistry::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn ResourceLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Run one request to completion.
    ///
    /// Failures of the run itself come back as a failed `ExecutionResult`;
    /// `Err` is reserved for registry invariant violations.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let started = Instant::now();
        let id = ExecutionId::new();
        let timeout_secs = clamp_timeout(request.timeout_seconds);
        let span = execution_span(&id.to_string(), timeout_secs);

        async move {
            if let Err(error) = self.probe_interpreter().await {
                return Ok(self.finish(ExecutionResult::failure(&error, started, None)));
            }

            let plan = plan_source_path(
                &self.settings.execution,
                request.target_filename.as_deref(),
                request.persist_to_disk,
                &id,
            );
            let planned_path = plan.path.clone();
            let source =
                match MaterializedSource::write(Arc::clone(&self.store), plan, &request.source_text)
                    .await
                {
                    Ok(source) => source,
                    Err(error) => {
                        return Ok(self.finish(ExecutionResult::failure(
                            &error,
                            started,
                            Some(planned_path),
                        )))
                    }
                };

            let result = self.run_script(id, source.path(), timeout_secs, started).await;
            source.cleanup().await;
            result.map(|r| self.finish(r))
        }
        .instrument(span)
        .await
    }

    /// Run source text from a temporary file with the default timeout
    /// unless one is given.
    pub async fn execute_code_string(
        &self,
        code: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let timeout = timeout_secs.unwrap_or(self.settings.execution.default_timeout_secs);
        self.execute(ExecutionRequest::new(code).with_timeout(timeout))
            .await
    }

    /// Run an existing script in place.
    pub async fn execute_file(
        &self,
        path: &Path,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let id = ExecutionId::new();
        let timeout_secs =
            clamp_timeout(timeout_secs.unwrap_or(self.settings.execution.default_timeout_secs));
        let span = execution_span(&id.to_string(), timeout_secs);

        async move {
            if let Err(error) = self.probe_interpreter().await {
                return Ok(self.finish(ExecutionResult::failure(&error, started, None)));
            }

            if let Err(e) = self.store.read_source(path).await {
                let error = ExecutionError::MaterializationFailed {
                    path: Some(path.to_path_buf()),
                    error: format!("cannot read {}: {e}", path.display()),
                };
                return Ok(self.finish(ExecutionResult::failure(
                    &error,
                    started,
                    Some(path.to_path_buf()),
                )));
            }

            let source = MaterializedSource::existing(Arc::clone(&self.store), path.to_path_buf());
            let result = self.run_script(id, source.path(), timeout_secs, started).await;
            source.cleanup().await;
            result.map(|r| self.finish(r))
        }
        .instrument(span)
        .await
    }

    /// Resolve the interpreter and run its version probe.
    pub async fn probe_interpreter(&self) -> std::result::Result<String, ExecutionError> {
        probe_interpreter(
            &self.settings.interpreter.path,
            self.settings.interpreter.probe_timeout(),
        )
        .await
    }

    pub fn running_processes(&self) -> Vec<ProcessSnapshot> {
        self.registry.live_entries()
    }

    /// Stop every live execution. Returns how many were stopped.
    pub fn kill_all(&self) -> usize {
        self.registry.terminate_all("kill_all requested")
    }

    pub async fn stats(&self) -> ExecutorStats {
        let probe = self.probe_interpreter().await;
        ExecutorStats {
            interpreter: self.settings.interpreter.path.clone(),
            interpreter_available: probe.is_ok(),
            interpreter_version: probe.ok(),
            default_timeout_secs: self.settings.execution.default_timeout_secs,
            max_memory_mb: self.settings.limits.max_memory_mb,
            max_cpu_percent: self.settings.limits.max_cpu_percent,
            limiter: self.limiter.name().to_string(),
            running_processes: self.registry.len(),
        }
    }

    /// Terminate stragglers and wait for their executions to unwind, up to
    /// one grace period.
    pub async fn shutdown(&self) {
        let stopped = self.kill_all();
        if stopped > 0 {
            tokio::time::sleep(self.settings.execution.grace_period()).await;
        }
        info!(stopped = stopped, "Executor shut down");
    }

    async fn run_script(
        &self,
        id: ExecutionId,
        script: &Path,
        timeout_secs: u64,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let interpreter = &self.settings.interpreter.path;
        let script_path = script.to_path_buf();

        let config = ProcessConfig::new(interpreter.clone())
            .with_args(vec![script.as_os_str().to_os_string()])
            .with_ceilings(
                ProcessCeilings::for_run(&self.settings.limits, timeout_secs),
                Arc::clone(&self.limiter),
            );

        let mut child = match config.spawn() {
            Ok(child) => child,
            Err(error) => return Ok(ExecutionResult::failure(&error, started, Some(script_path))),
        };
        let pid = child.id();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        log_execution_start(pid, script);

        let (handle, mut termination) =
            ProcessHandle::new(id, pid, interpreter.clone(), script_path.clone());
        let _registration = match self.registry.register(handle) {
            Ok(guard) => guard,
            Err(error) => {
                kill_now(&mut child).await;
                return Err(error.into());
            }
        };

        let readers = OutputReaders::attach(&mut child);
        let monitor = async {
            match pid {
                Some(pid) => ResourceMonitor::new(pid, &self.settings.limits).watch().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            // A dropped sender disables this branch instead of matching.
            Ok(request) = &mut termination => RaceOutcome::Cancelled(request),
            status = child.wait() => RaceOutcome::Exited(status),
            breach = monitor => RaceOutcome::LimitBreached(breach),
            _ = tokio::time::sleep_until(deadline) => RaceOutcome::TimedOut,
        };

        let grace = self.settings.execution.grace_period();
        let (exit_status, error) = match outcome {
            RaceOutcome::Exited(Ok(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                let error = (!status.success()).then(|| ExecutionError::NonZeroExit {
                    exit_code,
                    stderr: String::new(),
                });
                (Some(status), error)
            }
            RaceOutcome::Exited(Err(e)) => (
                kill_now(&mut child).await,
                Some(ExecutionError::SpawnFailed {
                    command: interpreter.clone(),
                    error: format!("failed to wait for process: {e}"),
                }),
            ),
            RaceOutcome::LimitBreached(breach) => (
                kill_now(&mut child).await,
                Some(ExecutionError::ResourceLimitExceeded { breach }),
            ),
            RaceOutcome::TimedOut => {
                debug!(pid = pid, "Deadline reached, terminating");
                (
                    terminate_gracefully(&mut child, grace).await,
                    Some(ExecutionError::Timeout { timeout_secs }),
                )
            }
            RaceOutcome::Cancelled(request) => (
                terminate_gracefully(&mut child, grace).await,
                Some(ExecutionError::Cancelled {
                    reason: request.reason,
                }),
            ),
        };

        // Whatever the outcome, nothing in the interpreter's process group
        // outlives the run; this also releases pipes held by background jobs.
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        let output = readers.collect(grace).await;
        let stderr_text = output.stderr();
        let error = error.map(|error| match error {
            ExecutionError::NonZeroExit { exit_code, .. } => ExecutionError::NonZeroExit {
                exit_code,
                stderr: stderr_text.clone(),
            },
            other => other,
        });

        Ok(ExecutionResult {
            succeeded: error.is_none(),
            stdout_text: output.stdout(),
            stderr_text,
            error_text: error.as_ref().map(ExecutionError::report_text),
            error_kind: error.as_ref().map(ExecutionError::kind),
            suggestion: error.as_ref().and_then(ExecutionError::suggestion),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            materialized_path: Some(script_path),
            exit_code: exit_status.and_then(|s| s.code()).unwrap_or(-1),
        })
    }

    fn finish(&self, result: ExecutionResult) -> ExecutionResult {
        log_execution_completion(
            result.succeeded,
            result.exit_code,
            (result.elapsed_seconds * 1000.0) as u128,
        );
        result
    }
}
