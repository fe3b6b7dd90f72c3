// Automatic rewrite of inclusive Franco loop bounds
use regex::Captures;
use std::borrow::Cow;
use tracing::debug;

use crate::analyzer::critical_bound;
use crate::patterns::{FRANCO, LENGTH_CALL};

/// Append ` - 1` after every length/size call in a loop bound.
///
/// `length(items)` becomes `length(items) - 1`.
pub fn adjust_bound(bound: &str) -> String {
    LENGTH_CALL
        .replace_all(bound, |caps: &Captures<'_>| format!("{} - 1", &caps[0]))
        .into_owned()
}

/// Rewrite every loop header that carries the critical bound defect.
///
/// Only the bound text changes; everything else, including line endings and
/// a missing trailing newline, is preserved. Applying the fix twice yields
/// the same text as applying it once.
pub fn fix_critical_loop_defects(source: &str) -> String {
    let mut rewritten = 0usize;
    let fixed: Vec<Cow<'_, str>> = source
        .split('\n')
        .map(|line| {
            let fixed = fix_line(line);
            if matches!(fixed, Cow::Owned(_)) {
                rewritten += 1;
            }
            fixed
        })
        .collect();

    debug!(rewritten, "Loop bound auto-fix applied");
    fixed.join("\n")
}

fn fix_line(line: &str) -> Cow<'_, str> {
    let Some(bound) = FRANCO
        .loop_construct
        .captures(line)
        .and_then(|caps| caps.get(2))
    else {
        return Cow::Borrowed(line);
    };

    let raw = bound.as_str();
    let trimmed = raw.trim();
    if !critical_bound(trimmed) {
        return Cow::Borrowed(line);
    }

    let start = bound.start() + (raw.len() - raw.trim_start().len());
    let end = start + trimmed.len();
    Cow::Owned(format!(
        "{}{}{}",
        &line[..start],
        adjust_bound(trimmed),
        &line[end..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;

    #[test]
    fn test_fix_simple_loop() {
        let source = "dorg myArray = [1, 2, 3]\nkarr i=0 l7d length(myArray) {\n    etb3(myArray[i])\n}";
        let fixed = fix_critical_loop_defects(source);
        assert!(fixed.contains("karr i=0 l7d length(myArray) - 1 {"));
        assert!(!Analyzer::default().analyze(&fixed).has_critical_loop_defect());
    }

    #[test]
    fn test_fix_is_idempotent() {
        let source = "karr i=0 l7d length(a) {\n}\nkarr j=0 l7d size(b) {\n}\n";
        let once = fix_critical_loop_defects(source);
        let twice = fix_critical_loop_defects(&once);
        assert_eq!(once, twice);
        assert!(once.ends_with('\n'));
    }

    #[test]
    fn test_safe_source_is_untouched() {
        let source = "karr i=0 l7d length(a) - 1 {\n    etb3(a[i])\n}\nrakm total = length(a)";
        assert_eq!(fix_critical_loop_defects(source), source);
    }

    #[test]
    fn test_only_loop_header_changes() {
        let source = "rakm n = length(a)\nkarr i=0 l7d length(a) {\n}";
        let fixed = fix_critical_loop_defects(source);
        assert!(fixed.starts_with("rakm n = length(a)\n"));
    }

    #[test]
    fn test_crlf_endings_are_preserved() {
        let source = "karr i=0 l7d length(a) {\r\n}\r\n";
        assert_eq!(
            fix_critical_loop_defects(source),
            "karr i=0 l7d length(a) - 1 {\r\n}\r\n"
        );
    }

    #[test]
    fn test_adjust_bound() {
        assert_eq!(adjust_bound("length(items)"), "length(items) - 1");
    }
}
