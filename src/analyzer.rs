// Safety and syntax analyzer for Flex source text
//
// Detection is lexical: each check walks the source line by line and applies
// the pattern library. Defects are returned as data, never as errors.
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::debug;

use crate::config::AnalysisSettings;
use crate::dialect::{classify, SourceDialect};
use crate::fixer::adjust_bound;
use crate::logging::utils::{analysis_span, log_analysis_completion};
use crate::patterns::{
    has_bound_adjustment, COMMENT_MARKERS, CONDITIONAL_GUARD, DIVISION_OPERATOR, ERRORS, FRANCO,
    INPUT_CALL, LENGTH_CALL, NUMERIC_LITERAL, SAFETY, SINGLE_LETTER_IDENT,
};

/// Class of a detected defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DisallowedTerminator,
    UnbalancedBlock,
    CriticalLoopBoundDefect,
    PotentialIndexDefect,
    DivisionByZero,
    ModuloByZero,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::DisallowedTerminator => "disallowed_terminator",
            FindingKind::UnbalancedBlock => "unbalanced_block",
            FindingKind::CriticalLoopBoundDefect => "critical_loop_bound_defect",
            FindingKind::PotentialIndexDefect => "potential_index_defect",
            FindingKind::DivisionByZero => "division_by_zero",
            FindingKind::ModuloByZero => "modulo_by_zero",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected defect. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    /// Human-readable fix
    pub suggestion: String,
    /// Why the rule exists
    pub rationale: String,
    pub is_critical_loop_defect: bool,
}

impl Finding {
    fn new(kind: FindingKind, message: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
            column: None,
            suggestion: String::new(),
            rationale: String::new(),
            is_critical_loop_defect: false,
        }
    }

    fn at_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    fn critical(mut self) -> Self {
        self.is_critical_loop_defect = true;
        self
    }
}

/// Result of one `Analyzer::analyze` call. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    dialect: SourceDialect,
    findings: Vec<Finding>,
    warnings: Vec<String>,
    suggestions: Vec<String>,
}

impl AnalysisReport {
    /// True iff no error-severity finding was produced. Warnings and
    /// suggestions never block acceptance.
    pub fn is_acceptable(&self) -> bool {
        self.findings.is_empty()
    }

    /// The one condition that must always block execution.
    pub fn has_critical_loop_defect(&self) -> bool {
        self.findings.iter().any(|f| f.is_critical_loop_defect)
    }

    pub fn dialect(&self) -> SourceDialect {
        self.dialect
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

impl Serialize for AnalysisReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct ReportView<'a> {
            is_acceptable: bool,
            has_critical_loop_defect: bool,
            dialect: SourceDialect,
            errors: &'a [Finding],
            warnings: &'a [String],
            suggestions: &'a [String],
        }

        ReportView {
            is_acceptable: self.is_acceptable(),
            has_critical_loop_defect: self.has_critical_loop_defect(),
            dialect: self.dialect,
            errors: &self.findings,
            warnings: &self.warnings,
            suggestions: &self.suggestions,
        }
        .serialize(serializer)
    }
}

/// Line-oriented rendering used by the CLI's text output.
impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.has_critical_loop_defect() {
            "rejected (critical loop-bound defect)"
        } else if self.is_acceptable() {
            "acceptable"
        } else {
            "rejected"
        };
        writeln!(f, "dialect: {}", self.dialect)?;
        writeln!(f, "status: {status}")?;

        for finding in &self.findings {
            write!(f, "error[{}]", finding.kind)?;
            match (finding.line, finding.column) {
                (Some(line), Some(column)) => write!(f, " {line}:{column}")?,
                (Some(line), None) => write!(f, " line {line}")?,
                _ => {}
            }
            writeln!(f, ": {}", finding.message)?;
            if !finding.suggestion.is_empty() {
                writeln!(f, "  help: {}", finding.suggestion)?;
            }
            if !finding.rationale.is_empty() {
                writeln!(f, "  why: {}", finding.rationale)?;
            }
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        for suggestion in &self.suggestions {
            writeln!(f, "suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Analyzer tuning knobs.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub long_line_threshold: usize,
    /// Lines after a literal-bounded loop searched for indexed access
    pub lookahead_window: usize,
    /// Single-letter names that never trigger the naming warning
    pub conventional_short_names: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            long_line_threshold: 120,
            lookahead_window: 10,
            conventional_short_names: ["i", "j", "x", "y"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl From<&AnalysisSettings> for AnalyzerConfig {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            long_line_threshold: settings.long_line_threshold,
            lookahead_window: settings.lookahead_window,
            ..Default::default()
        }
    }
}

/// Stateless analyzer; one instance can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, source: &str) -> AnalysisReport {
        let span = analysis_span(source.len());
        let _guard = span.enter();

        let lines = split_lines(source);
        let dialect = classify(source);

        let mut findings = Vec::new();
        findings.extend(self.check_terminators(&lines));
        findings.extend(self.check_block_balance(&lines));
        findings.extend(self.check_safety(&lines));

        let report = AnalysisReport {
            dialect,
            findings,
            warnings: self.collect_warnings(&lines, dialect),
            suggestions: self.collect_suggestions(source, dialect),
        };

        log_analysis_completion(
            report.dialect.as_str(),
            report.findings.len(),
            report.warnings.len(),
            report.has_critical_loop_defect(),
        );
        report
    }

    /// Run only the critical loop-bound rule.
    ///
    /// Returns `(is_safe, findings)`; `is_safe` agrees with
    /// `!analyze(source).has_critical_loop_defect()`.
    pub fn check_loop_safety(&self, source: &str) -> (bool, Vec<Finding>) {
        let findings: Vec<Finding> = split_lines(source)
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let caps = FRANCO.loop_construct.captures(line)?;
                let bound = caps.get(2)?;
                critical_bound(bound.as_str().trim())
                    .then(|| critical_loop_finding(line, idx + 1, bound))
            })
            .collect();
        (findings.is_empty(), findings)
    }

    fn check_terminators(&self, lines: &[&str]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            for m in ERRORS.statement_terminator.find_iter(line) {
                findings.push(
                    Finding::new(
                        FindingKind::DisallowedTerminator,
                        "Semicolons are not allowed in Flex",
                        idx + 1,
                    )
                    .at_column(column_of(line, m.start()))
                    .with_suggestion("Remove the semicolon; Flex uses curly braces for code blocks")
                    .with_rationale(
                        "Flex statements end at the line break and never take a terminator",
                    ),
                );
            }
        }
        findings
    }

    fn check_block_balance(&self, lines: &[&str]) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut depth: i64 = 0;

        for (idx, line) in lines.iter().enumerate() {
            let opens = line.matches('{').count() as i64;
            let closes = line.matches('}').count() as i64;
            depth += opens - closes;

            if depth < 0 {
                let suggestion = match header_missing_brace(&lines[..idx]) {
                    Some(header_line) => format!(
                        "Line {header_line} starts a block without '{{'; add it at the end of that line"
                    ),
                    None => "Add an opening brace '{' before this line".to_string(),
                };
                findings.push(
                    Finding::new(
                        FindingKind::UnbalancedBlock,
                        "Unmatched closing brace",
                        idx + 1,
                    )
                    .with_suggestion(suggestion)
                    .with_rationale("Always match opening and closing braces"),
                );
                // Reset so later imbalances are still reported.
                depth = 0;
            }
        }

        if depth > 0 {
            let suggestion = match last_unclosed_block(lines) {
                Some(open_line) => format!(
                    "Add closing braces '}}' to match all opening braces (last unclosed block opens on line {open_line})"
                ),
                None => "Add closing braces '}' to match all opening braces".to_string(),
            };
            findings.push(
                Finding::new(
                    FindingKind::UnbalancedBlock,
                    "Unmatched opening brace",
                    lines.len(),
                )
                .with_suggestion(suggestion)
                .with_rationale("Always match opening and closing braces"),
            );
        }

        findings
    }

    fn check_safety(&self, lines: &[&str]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let line_number = idx + 1;

            if let Some(caps) = FRANCO.loop_construct.captures(line) {
                if let (Some(header), Some(bound)) = (caps.get(0), caps.get(2)) {
                    let bound_text = bound.as_str().trim();
                    if critical_bound(bound_text) {
                        findings.push(critical_loop_finding(line, line_number, bound));
                    } else if NUMERIC_LITERAL.is_match(bound_text)
                        && !LENGTH_CALL.is_match(bound_text)
                        && self.indexed_access_follows(lines, idx, header.end())
                    {
                        findings.push(
                            Finding::new(
                                FindingKind::PotentialIndexDefect,
                                "Franco loop with hardcoded limit may cause array access issues",
                                line_number,
                            )
                            .at_column(column_of(line, bound.start()))
                            .with_suggestion(
                                "Verify that the loop limit doesn't exceed array bounds",
                            )
                            .with_rationale(
                                "Use 'length(array) - 1' for array iteration or verify bounds manually",
                            ),
                        );
                    }
                }
            }

            if let Some(m) = SAFETY.division_by_zero.find(line) {
                findings.push(
                    Finding::new(
                        FindingKind::DivisionByZero,
                        "Division by zero detected",
                        line_number,
                    )
                    .at_column(column_of(line, m.start()))
                    .with_suggestion("Add a check: lw divisor != 0 { ... } before division")
                    .with_rationale(
                        "Always validate divisor is not zero before division operations",
                    ),
                );
            }

            if let Some(m) = SAFETY.modulo_by_zero.find(line) {
                findings.push(
                    Finding::new(
                        FindingKind::ModuloByZero,
                        "Modulo by zero detected",
                        line_number,
                    )
                    .at_column(column_of(line, m.start()))
                    .with_suggestion("Add a check: lw divisor != 0 { ... } before modulo operation")
                    .with_rationale(
                        "Always validate divisor is not zero before modulo operations",
                    ),
                );
            }
        }

        findings
    }

    /// Indexed access in the rest of the loop line or the following
    /// `lookahead_window` lines.
    fn indexed_access_follows(&self, lines: &[&str], loop_idx: usize, header_end: usize) -> bool {
        let same_line_body = &lines[loop_idx][header_end..];
        SAFETY.indexed_access.is_match(same_line_body)
            || lines
                .iter()
                .skip(loop_idx + 1)
                .take(self.config.lookahead_window)
                .any(|line| SAFETY.indexed_access.is_match(line))
    }

    fn collect_warnings(&self, lines: &[&str], dialect: SourceDialect) -> Vec<String> {
        let mut warnings = Vec::new();

        if dialect == SourceDialect::Mixed {
            warnings.push(
                "Code mixes Franco and English syntax; consider using a consistent style"
                    .to_string(),
            );
        }

        for (idx, line) in lines.iter().enumerate() {
            let short_names: Vec<&str> = SINGLE_LETTER_IDENT
                .find_iter(line)
                .map(|m| m.as_str())
                .filter(|name| {
                    !self
                        .config
                        .conventional_short_names
                        .iter()
                        .any(|allowed| allowed.as_str() == *name)
                })
                .collect();
            if let Some(first) = short_names.first() {
                warnings.push(format!(
                    "Line {}: Consider using more descriptive variable names (found '{first}')",
                    idx + 1
                ));
            }
        }

        for (idx, line) in lines.iter().enumerate() {
            let length = line.chars().count();
            if length > self.config.long_line_threshold {
                warnings.push(format!(
                    "Line {}: Line is very long ({length} characters); consider breaking it up",
                    idx + 1
                ));
            }
        }

        warnings
    }

    fn collect_suggestions(&self, source: &str, dialect: SourceDialect) -> Vec<String> {
        let mut suggestions = Vec::new();

        if dialect == SourceDialect::Undetermined {
            suggestions.push("Consider using explicit Franco or English syntax for clarity".into());
        }
        if INPUT_CALL.is_match(source) {
            suggestions.push("Consider adding input validation for user inputs".into());
        }
        if DIVISION_OPERATOR.is_match(source) && !CONDITIONAL_GUARD.is_match(source) {
            suggestions.push("Consider adding error handling for division operations".into());
        }
        if !COMMENT_MARKERS.iter().any(|marker| source.contains(marker)) {
            suggestions.push("Consider adding comments to explain complex logic".into());
        }

        suggestions
    }
}

/// A loop bound that calls a length/size builtin without the `-1`
/// adjustment. Shared with the fixer so both agree on what gets rewritten.
pub(crate) fn critical_bound(bound: &str) -> bool {
    LENGTH_CALL.is_match(bound) && !has_bound_adjustment(bound)
}

fn critical_loop_finding(line: &str, line_number: usize, bound: regex::Match<'_>) -> Finding {
    let bound_text = bound.as_str().trim();
    let call_offset = LENGTH_CALL
        .find(bound.as_str())
        .map(|m| m.start())
        .unwrap_or(0);

    Finding::new(
        FindingKind::CriticalLoopBoundDefect,
        "Franco l7d loops are INCLUSIVE: this bound causes out-of-bounds array access on the last iteration",
        line_number,
    )
    .at_column(column_of(line, bound.start() + call_offset))
    .with_suggestion(format!(
        "Change '{bound_text}' to '{}' for safe array access",
        adjust_bound(bound_text)
    ))
    .with_rationale(
        "l7d runs while the counter is <= the bound, so 'length(array)' indexes one element past the end; always use 'length(array) - 1'",
    )
    .critical()
}

/// Nearest line above a stray `}` that opens a block but lacks its `{`.
fn header_missing_brace(preceding: &[&str]) -> Option<usize> {
    preceding
        .iter()
        .rposition(|line| ERRORS.block_header_without_brace.is_match(line))
        .map(|idx| idx + 1)
}

fn last_unclosed_block(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .rposition(|line| ERRORS.unclosed_brace.is_match(line))
        .map(|idx| idx + 1)
}

fn split_lines(source: &str) -> Vec<&str> {
    source
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

fn column_of(line: &str, byte_offset: usize) -> usize {
    line[..byte_offset].chars().count() + 1
}

/// A documented loop-bound snippet, safe or unsafe.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LoopSafetyExample {
    pub name: &'static str,
    pub description: &'static str,
    pub code: &'static str,
    pub is_safe: bool,
}

static LOOP_SAFETY_EXAMPLES: [LoopSafetyExample; 3] = [
    LoopSafetyExample {
        name: "safe_array_iteration",
        description: "Franco l7d loop with proper bounds",
        code: "dorg myArray = [1, 2, 3, 4, 5]\nkarr i=0 l7d length(myArray) - 1 {\n    etb3(myArray[i])  // Safe access\n}\n",
        is_safe: true,
    },
    LoopSafetyExample {
        name: "unsafe_pattern",
        description: "Will cause an out-of-bounds error on the last iteration",
        code: "dorg myArray = [1, 2, 3, 4, 5]\nkarr i=0 l7d length(myArray) {\n    etb3(myArray[i])  // ERROR on last iteration!\n}\n",
        is_safe: false,
    },
    LoopSafetyExample {
        name: "alternative_english",
        description: "English loops use an exclusive '<' bound",
        code: "list myArray = [1, 2, 3, 4, 5]\nfor(i=0; i<length(myArray); i++) {\n    print(myArray[i])  // Safe access\n}\n",
        is_safe: true,
    },
];

pub fn loop_safety_examples() -> &'static [LoopSafetyExample] {
    &LOOP_SAFETY_EXAMPLES
}
