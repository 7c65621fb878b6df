use regex::Regex;
use std::sync::LazyLock;

use super::QualityMetrics;

static FUNCTION_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+[A-Za-z_]\w*\s*\(").unwrap());

static CLASS_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*class\s+[A-Za-z_]\w*").unwrap());

static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)(?:^|\s)#").unwrap());

static ERROR_HANDLING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:try\s*:|except\b|finally\s*:|raise\b|assert\b)").unwrap()
});

static IMPORT_STMT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:import\s+[A-Za-z_]|from\s+[\w.]+\s+import\b)").unwrap()
});

const DOCSTRING_DELIMITERS: [&str; 2] = ["\"\"\"", "'''"];

/// Shallow presence/absence signals over snippet text. Never runs anything.
pub fn analyze(code: &str) -> QualityMetrics {
    QualityMetrics {
        line_count: code.lines().filter(|l| !l.trim().is_empty()).count(),
        has_function_def: FUNCTION_DEF.is_match(code),
        has_class_def: CLASS_DEF.is_match(code),
        has_docstring: DOCSTRING_DELIMITERS.iter().any(|d| code.contains(d)),
        has_comments: LINE_COMMENT.is_match(code),
        has_error_handling: ERROR_HANDLING.is_match(code),
        imports_used: IMPORT_STMT.find_iter(code).count(),
    }
}
