// Pattern library: compiled lexical patterns for both Flex dialects
//
// Everything here is pure data. Patterns are compiled on first use and shared
// by the classifier, the analyzer and the fixer.
use once_cell::sync::Lazy;
use regex::Regex;

/// Built-in patterns are constants; a failure here is a programming error
/// caught by the unit tests below.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in Flex pattern must compile")
}

/// Construct patterns for one dialect.
#[derive(Debug)]
pub struct DialectPatterns {
    /// Loop header. For the Franco dialect, capture group 2 is the bound.
    pub loop_construct: Regex,
    pub variable: Regex,
    pub function: Regex,
    pub conditional: Regex,
    pub print: Regex,
    pub input: Regex,
    pub boolean_true: Regex,
    pub boolean_false: Regex,
    pub while_loop: Regex,
    pub else_branch: Regex,
    pub return_stmt: Regex,
}

impl DialectPatterns {
    /// All construct patterns, by name.
    pub fn named(&self) -> [(&'static str, &Regex); 11] {
        [
            ("loop", &self.loop_construct),
            ("variable", &self.variable),
            ("function", &self.function),
            ("conditional", &self.conditional),
            ("print", &self.print),
            ("input", &self.input),
            ("boolean_true", &self.boolean_true),
            ("boolean_false", &self.boolean_false),
            ("while_loop", &self.while_loop),
            ("else", &self.else_branch),
            ("return", &self.return_stmt),
        ]
    }

    /// Total number of non-overlapping construct matches in `source`.
    pub fn count_matches(&self, source: &str) -> usize {
        self.named()
            .iter()
            .map(|(_, regex)| regex.find_iter(source).count())
            .sum()
    }
}

/// Franco vocabulary (DialectA).
pub static FRANCO: Lazy<DialectPatterns> = Lazy::new(|| DialectPatterns {
    loop_construct: compile(r"\bkarr\s+(\w+\s*=\s*\d+\s+)?l7d\s+([^{]+)\s*\{"),
    variable: compile(r"\b(rakm|kasr|so2al|klma|dorg)\s+\w+"),
    function: compile(r"\bsndo2\s+\w+\s*\([^)]*\)\s*\{"),
    conditional: compile(r"\blw\s+[^{]+\s*\{"),
    print: compile(r"\betb3\s*\([^)]+\)"),
    input: compile(r"\bda5l\s*\(\s*\)"),
    boolean_true: compile(r"\bsa7\b"),
    boolean_false: compile(r"\bghalt\b"),
    while_loop: compile(r"\btalama\s+[^{]+\s*\{"),
    else_branch: compile(r"\bgher\s*\{"),
    return_stmt: compile(r"\brg3\s"),
});

/// English vocabulary (DialectB).
pub static ENGLISH: Lazy<DialectPatterns> = Lazy::new(|| DialectPatterns {
    loop_construct: compile(r"\bfor\s*\([^)]+\)\s*\{"),
    variable: compile(r"\b(int|float|bool|string|list)\s+\w+"),
    function: compile(r"\bfun\s+\w+\s*\([^)]*\)\s*\{"),
    conditional: compile(r"\bif\s*\([^)]+\)\s*\{"),
    print: compile(r"\bprint\s*\([^)]+\)"),
    input: compile(r"\bscan\s*\(\s*\)"),
    boolean_true: compile(r"\btrue\b"),
    boolean_false: compile(r"\bfalse\b"),
    while_loop: compile(r"\bwhile\s*\([^)]+\)\s*\{"),
    else_branch: compile(r"\belse\s*\{"),
    return_stmt: compile(r"\breturn\s"),
});

/// Cross-cutting safety shapes. The critical inclusive-loop shape is the
/// Franco loop header whose bound holds a [`LENGTH_CALL`] without a
/// [`BOUND_ADJUSTMENTS`] marker; see `analyzer::critical_bound`.
#[derive(Debug)]
pub struct SafetyPatterns {
    pub indexed_access: Regex,
    pub division_by_zero: Regex,
    pub modulo_by_zero: Regex,
}

pub static SAFETY: Lazy<SafetyPatterns> = Lazy::new(|| SafetyPatterns {
    indexed_access: compile(r"\w+\s*\[\s*([^\]]+)\s*\]"),
    division_by_zero: compile(r"/\s*0\b"),
    modulo_by_zero: compile(r"%\s*0\b"),
});

/// Shapes that are always syntax errors in Flex.
#[derive(Debug)]
pub struct ErrorPatterns {
    pub statement_terminator: Regex,
    pub block_header_without_brace: Regex,
    pub unclosed_brace: Regex,
}

pub static ERRORS: Lazy<ErrorPatterns> = Lazy::new(|| ErrorPatterns {
    statement_terminator: compile(r";"),
    block_header_without_brace: compile(
        r"\b(lw|if|karr|for|sndo2|fun|talama|while)\s+[^{]*$",
    ),
    unclosed_brace: compile(r"\{[^}]*$"),
});

/// A call to a length/size builtin, e.g. `length(items)`.
pub static LENGTH_CALL: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:length|size)\s*\([^)]+\)"));

/// Textual markers that a bound already carries the `-1` adjustment.
pub const BOUND_ADJUSTMENTS: [&str; 2] = ["- 1", "-1"];

/// A bare integer literal.
pub static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| compile(r"\b\d+\b"));

/// A lone lowercase letter used as a name.
pub static SINGLE_LETTER_IDENT: Lazy<Regex> = Lazy::new(|| compile(r"\b[a-z]\b"));

/// Either dialect's input call.
pub static INPUT_CALL: Lazy<Regex> = Lazy::new(|| compile(r"\b(da5l|scan)\s*\(\s*\)"));

/// Conditional keyword of either dialect, used as evidence of a guard.
pub static CONDITIONAL_GUARD: Lazy<Regex> = Lazy::new(|| compile(r"\b(lw|if)\b"));

/// A `/` that is not part of a `//` comment marker.
pub static DIVISION_OPERATOR: Lazy<Regex> = Lazy::new(|| compile(r"(?:^|[^/])/(?:[^/]|$)"));

/// Comment markers accepted by the interpreter.
pub const COMMENT_MARKERS: [&str; 2] = ["#", "//"];

/// True when a loop bound carries a `-1` adjustment in either spelling.
pub fn has_bound_adjustment(bound: &str) -> bool {
    BOUND_ADJUSTMENTS
        .iter()
        .any(|adjustment| bound.contains(adjustment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        // Forcing every Lazy exercises the compile() invariant.
        assert_eq!(FRANCO.named().len(), 11);
        assert_eq!(ENGLISH.named().len(), 11);
        assert!(SAFETY.indexed_access.is_match("arr[i]"));
        assert!(ERRORS.statement_terminator.is_match("x;"));
        assert!(LENGTH_CALL.is_match("length(a)"));
        assert!(NUMERIC_LITERAL.is_match("10"));
        assert!(SINGLE_LETTER_IDENT.is_match("a"));
        assert!(INPUT_CALL.is_match("da5l()"));
        assert!(CONDITIONAL_GUARD.is_match("lw x {"));
        assert!(DIVISION_OPERATOR.is_match("a / b"));
    }

    #[test]
    fn test_franco_loop_captures_bound() {
        let caps = FRANCO
            .loop_construct
            .captures("karr i=0 l7d length(items) - 1 {")
            .unwrap();
        assert_eq!(caps.get(2).unwrap().as_str().trim(), "length(items) - 1");
    }

    #[test]
    fn test_division_operator_ignores_comment_marker() {
        assert!(!DIVISION_OPERATOR.is_match("// only a comment"));
        assert!(DIVISION_OPERATOR.is_match("rakm half = total / 2"));
        assert!(DIVISION_OPERATOR.is_match("x/y"));
    }

    #[test]
    fn test_zero_divisor_shapes() {
        assert!(SAFETY.division_by_zero.is_match("10 / 0"));
        assert!(SAFETY.division_by_zero.is_match("10/0"));
        assert!(!SAFETY.division_by_zero.is_match("10 / 05"));
        assert!(SAFETY.modulo_by_zero.is_match("n % 0"));
        assert!(!SAFETY.modulo_by_zero.is_match("n % 10"));
    }

    #[test]
    fn test_bound_adjustment_spellings() {
        assert!(has_bound_adjustment("length(a) - 1"));
        assert!(has_bound_adjustment("length(a)-1"));
        assert!(!has_bound_adjustment("length(a)"));
    }

    #[test]
    fn test_count_matches_per_dialect() {
        let franco = "rakm x = 1\netb3(x)\nlw x > 0 {\n}";
        assert_eq!(FRANCO.count_matches(franco), 3);
        assert_eq!(ENGLISH.count_matches(franco), 0);
    }
}
