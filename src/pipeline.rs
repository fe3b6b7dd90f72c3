// Validate-then-execute orchestration
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::error::Result;
use crate::executor::{ExecutionRequest, ExecutionResult, SandboxExecutor};
use crate::fixer::fix_critical_loop_defects;

/// What happened to one source text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The analyzer blocked execution; nothing was spawned.
    Rejected {
        report: AnalysisReport,
        source: String,
    },
    Executed {
        report: AnalysisReport,
        source: String,
        result: ExecutionResult,
    },
}

impl PipelineOutcome {
    pub fn report(&self) -> &AnalysisReport {
        match self {
            PipelineOutcome::Rejected { report, .. } | PipelineOutcome::Executed { report, .. } => {
                report
            }
        }
    }

    /// The text that was judged, after any auto-fix.
    pub fn source(&self) -> &str {
        match self {
            PipelineOutcome::Rejected { source, .. } | PipelineOutcome::Executed { source, .. } => {
                source
            }
        }
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            PipelineOutcome::Executed { result, .. } => Some(result),
            PipelineOutcome::Rejected { .. } => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result().is_some_and(|r| r.succeeded)
    }
}

pub struct Pipeline {
    analyzer: Analyzer,
    executor: Arc<SandboxExecutor>,
    auto_fix: bool,
}

impl Pipeline {
    pub fn new(analyzer: Analyzer, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            analyzer,
            executor,
            auto_fix: false,
        }
    }

    /// Rewrite critical loop bounds before judging the source.
    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix = enabled;
        self
    }

    pub fn executor(&self) -> &Arc<SandboxExecutor> {
        &self.executor
    }

    /// Analyze `source` and run it only when the report allows.
    ///
    /// `template` supplies persistence and timeout; its source text is
    /// replaced by the judged text.
    pub async fn run(&self, source: &str, template: &ExecutionRequest) -> Result<PipelineOutcome> {
        let mut report = self.analyzer.analyze(source);
        let mut source = source.to_string();

        if self.auto_fix && report.has_critical_loop_defect() {
            source = fix_critical_loop_defects(&source);
            report = self.analyzer.analyze(&source);
            info!(
                still_critical = report.has_critical_loop_defect(),
                "Applied loop-bound auto-fix"
            );
        }

        if !report.is_acceptable() || report.has_critical_loop_defect() {
            warn!(
                errors = report.findings().len(),
                critical = report.has_critical_loop_defect(),
                "Execution blocked by analysis"
            );
            return Ok(PipelineOutcome::Rejected { report, source });
        }

        let result = self.executor.execute(template.with_source(source.as_str())).await?;
        Ok(PipelineOutcome::Executed {
            report,
            source,
            result,
        })
    }
}
