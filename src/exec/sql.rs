//! SQL text helpers: named-placeholder extraction and statement
//! classification.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

fn param_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[:@]([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex"))
}

/// Named parameters (`:name` / `@name`) referenced by the SQL text.
///
/// Regex-based, so placeholders inside string literals are reported too;
/// good enough for coverage checks, not a SQL parser.
pub fn extract_named_params(sql: &str) -> BTreeSet<String> {
    param_pattern()
        .captures_iter(sql)
        .map(|c| c[1].to_string())
        .collect()
}

/// Check that the provided parameter names cover every placeholder in the
/// SQL. Returns the missing names on failure.
pub fn missing_params<'a>(
    sql: &str,
    provided: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let mut used = extract_named_params(sql);
    for name in provided {
        used.remove(name);
    }
    used.into_iter().collect()
}

/// A statement is treated as a read when its trimmed text begins with
/// `select`, case-insensitively; everything else is a write.
pub fn is_select(sql: &str) -> bool {
    sql.trim()
        .get(..6)
        .map(|s| s.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}
