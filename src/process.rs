// Process management for the Flex interpreter: command building, spawning
// under resource ceilings, output capture, and signal escalation

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::limits::{ProcessCeilings, ResourceLimiter};

/// Interpreter invocation configuration
#[derive(Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<OsString>,
    pub ceilings: Option<(ProcessCeilings, Arc<dyn ResourceLimiter>)>,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            ceilings: None,
        }
    }

    pub fn with_args(mut self, args: Vec<impl Into<OsString>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ceilings(
        mut self,
        ceilings: ProcessCeilings,
        limiter: Arc<dyn ResourceLimiter>,
    ) -> Self {
        self.ceilings = Some((ceilings, limiter));
        self
    }

    /// The child always leads its own process group (unix) so the whole
    /// tree can be signalled at once.
    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
            if let Some((ceilings, limiter)) = self.ceilings.clone() {
                if limiter.is_enforcing() {
                    // SAFETY: the hook only calls setrlimit, which is
                    // async-signal-safe, and never allocates.
                    unsafe {
                        cmd.pre_exec(move || {
                            // A ceiling the kernel refuses leaves the monitor
                            // as the only enforcement.
                            let _ = ceilings.apply(limiter.as_ref());
                            Ok(())
                        });
                    }
                }
            }
        }

        cmd
    }

    pub fn spawn(&self) -> Result<Child, ExecutionError> {
        self.build().spawn().map_err(|e| ExecutionError::SpawnFailed {
            command: self.command.clone(),
            error: e.to_string(),
        })
    }
}

/// Captured output of a finished or killed process
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Background readers draining a child's stdout and stderr.
///
/// Draining concurrently with `wait` keeps a chatty child from blocking on
/// a full pipe. Bytes land in a shared buffer as they arrive, so output read
/// before a reader is abandoned is still reported.
pub struct OutputReaders {
    stdout: Option<StreamCapture>,
    stderr: Option<StreamCapture>,
}

struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputReaders {
    pub fn attach(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(StreamCapture::spawn),
            stderr: child.stderr.take().map(StreamCapture::spawn),
        }
    }

    /// Collect whatever was read. Both readers share one deadline `limit`
    /// from now; a reader still blocked then (a process outside the group
    /// holding the pipe open) is abandoned with its partial output kept.
    pub async fn collect(self, limit: Duration) -> CapturedOutput {
        let deadline = Instant::now() + limit;
        let (stdout, stderr) = tokio::join!(
            StreamCapture::finish(self.stdout, deadline),
            StreamCapture::finish(self.stderr, deadline),
        );
        CapturedOutput { stdout, stderr }
    }
}

impl StreamCapture {
    fn spawn<R>(mut stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        lock(&sink).extend_from_slice(&chunk[..n]);
                    }
                    Err(e) => {
                        debug!(error = %e, "Output stream closed with error");
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    async fn finish(capture: Option<Self>, deadline: Instant) -> Vec<u8> {
        let Some(mut capture) = capture else {
            return Vec::new();
        };
        match tokio::time::timeout_at(deadline, &mut capture.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Output reader task failed"),
            Err(_) => {
                capture.task.abort();
                warn!("Output reader did not finish, keeping partial output");
            }
        }
        let mut buffer = lock(&capture.buffer);
        std::mem::take(&mut *buffer)
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    // The reader never panics while holding the lock; recover the data anyway.
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SIGKILL the whole process group led by `pid`. Errors are ignored: the
/// group may already be gone.
pub fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn terminate_process_group(pid: u32) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    killpg(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

/// Kill immediately and reap.
pub async fn kill_now(child: &mut Child) -> Option<ExitStatus> {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    let _ = child.start_kill();
    child.wait().await.ok()
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            if terminate_process_group(pid) {
                if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                    return status.ok();
                }
                debug!(pid = pid, "Grace period elapsed, escalating to SIGKILL");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    kill_now(child).await
}

/// Check that `interpreter` resolves and answers `--version` within
/// `timeout`. Returns the first line the interpreter printed.
pub async fn probe_interpreter(interpreter: &str, timeout: Duration) -> Result<String, ExecutionError> {
    let unavailable = |reason: String| ExecutionError::InterpreterUnavailable {
        interpreter: interpreter.to_string(),
        reason,
    };

    let resolved = resolve_interpreter(interpreter).map_err(|e| unavailable(e.to_string()))?;

    let mut cmd = Command::new(&resolved);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(unavailable(e.to_string())),
        Err(_) => {
            return Err(unavailable(format!(
                "version probe timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        return Err(unavailable(format!(
            "version probe exited with {}",
            output.status
        )));
    }

    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr)
    } else {
        String::from_utf8_lossy(&output.stdout)
    };
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

/// Resolve through PATH unless the name already points at a file.
pub fn resolve_interpreter(interpreter: &str) -> Result<PathBuf, which::Error> {
    let path = Path::new(interpreter);
    if path.components().count() > 1 && path.is_file() {
        return Ok(path.to_path_buf());
    }
    which::which(interpreter)
}
