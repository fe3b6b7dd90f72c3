// Writing source text to disk before it is handed to the interpreter
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ExecutionSettings;
use crate::error::ExecutionError;
use crate::registry::ExecutionId;

const DEFAULT_EXTENSION: &str = "flex";

/// Storage seam for script files.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Write `contents` to `path`, creating parent directories as needed.
    async fn write_source(&self, path: &Path, contents: &str) -> io::Result<()>;
    async fn read_source(&self, path: &Path) -> io::Result<String>;
    async fn remove_source(&self, path: &Path) -> io::Result<()>;
}

/// `SourceStore` backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceStore;

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn write_source(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    async fn read_source(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn remove_source(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Where a request's source will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub path: PathBuf,
    /// Removed once the run finishes
    pub temporary: bool,
}

/// Decide the script path for a run.
///
/// A caller-supplied filename only applies to persisted runs; relative names
/// land in `output_dir`, absolute ones are used as given.
pub fn plan_source_path(
    settings: &ExecutionSettings,
    target_filename: Option<&str>,
    persist: bool,
    id: &ExecutionId,
) -> SourcePlan {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

    if !persist {
        return SourcePlan {
            path: settings.temp_dir.join(format!(
                "temp_exec_{timestamp}_{}.{DEFAULT_EXTENSION}",
                id.short()
            )),
            temporary: true,
        };
    }

    let path = match target_filename.map(str::trim).filter(|f| !f.is_empty()) {
        Some(filename) => {
            let mut path = settings.output_dir.join(filename);
            if !settings.has_flex_extension(&path) {
                path = PathBuf::from(format!("{}.{DEFAULT_EXTENSION}", path.display()));
            }
            path
        }
        None => settings.output_dir.join(format!(
            "execution_{timestamp}_{}.{DEFAULT_EXTENSION}",
            id.short()
        )),
    };

    SourcePlan {
        path,
        temporary: false,
    }
}

/// A script file on disk for the duration of one run.
///
/// Temporary files are removed by `cleanup`; if the run is abandoned before
/// that, `Drop` removes them synchronously.
pub struct MaterializedSource {
    path: PathBuf,
    temporary: bool,
    store: Arc<dyn SourceStore>,
    cleaned: bool,
}

impl MaterializedSource {
    pub async fn write(
        store: Arc<dyn SourceStore>,
        plan: SourcePlan,
        contents: &str,
    ) -> Result<Self, ExecutionError> {
        store
            .write_source(&plan.path, contents)
            .await
            .map_err(|e| ExecutionError::MaterializationFailed {
                path: Some(plan.path.clone()),
                error: e.to_string(),
            })?;

        debug!(path = %plan.path.display(), temporary = plan.temporary, "Source materialized");
        Ok(Self {
            path: plan.path,
            temporary: plan.temporary,
            store,
            cleaned: false,
        })
    }

    /// Wrap a file that already exists; it is never removed.
    pub fn existing(store: Arc<dyn SourceStore>, path: PathBuf) -> Self {
        Self {
            path,
            temporary: false,
            store,
            cleaned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cleanup(mut self) {
        if self.temporary {
            if let Err(e) = self.store.remove_source(&self.path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove temporary source");
                }
            }
        }
        self.cleaned = true;
    }
}

impl Drop for MaterializedSource {
    fn drop(&mut self) {
        if self.temporary && !self.cleaned {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
