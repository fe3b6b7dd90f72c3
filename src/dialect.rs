// Style classifier: decides which Flex dialect a source text is written in
use serde::Serialize;
use std::fmt;

use crate::patterns::{ENGLISH, FRANCO};

/// Dialect of a Flex source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDialect {
    /// Franco keywords (`karr`, `l7d`, `rakm`, `etb3`, ...)
    DialectA,
    /// English keywords (`for`, `int`, `print`, ...)
    DialectB,
    /// Both vocabularies matched at least once
    Mixed,
    /// Neither vocabulary matched, or both matched equally often
    Undetermined,
}

impl SourceDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDialect::DialectA => "franco",
            SourceDialect::DialectB => "english",
            SourceDialect::Mixed => "mixed",
            SourceDialect::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for SourceDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-dialect match counts behind a classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DialectCounts {
    pub dialect_a: usize,
    pub dialect_b: usize,
}

impl DialectCounts {
    pub fn dialect(&self) -> SourceDialect {
        if self.dialect_a > 0 && self.dialect_b > 0 {
            SourceDialect::Mixed
        } else if self.dialect_a > self.dialect_b {
            SourceDialect::DialectA
        } else if self.dialect_b > self.dialect_a {
            SourceDialect::DialectB
        } else {
            SourceDialect::Undetermined
        }
    }
}

/// Count construct matches of each dialect across the whole source.
///
/// This is a frequency heuristic: keywords inside string literals and
/// comments are counted like any other text.
pub fn dialect_counts(source: &str) -> DialectCounts {
    DialectCounts {
        dialect_a: FRANCO.count_matches(source),
        dialect_b: ENGLISH.count_matches(source),
    }
}

pub fn classify(source: &str) -> SourceDialect {
    dialect_counts(source).dialect()
}
