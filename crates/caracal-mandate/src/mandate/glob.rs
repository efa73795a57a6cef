//! Scope glob matching.
//!
//! Normative pattern matching for resource and action scopes.
//!
//! | Rule | Specification |
//! |------|---------------|
//! | **Anchoring** | Pattern MUST match the full string, not a substring |
//! | **Case sensitivity** | Matching is case-sensitive |
//! | **`*`** | Matches any run of characters, including `/` and `:` |
//! | **`?`** | Matches exactly one character |
//! | **Literal characters** | All other characters match themselves exactly |
//!
//! No other metacharacters are recognized and there is no escape syntax:
//! a pattern containing a literal `*` or `?` cannot be expressed, which
//! matches how resource identifiers (`api:openai:*`, `db:prod:orders`) are
//! written in practice — they never need a literal wildcard character.
//!
//! # Security limits
//!
//! Matching fills a table of size `pattern_ops x input_chars` rather than
//! backtracking, so it's polynomial, not exponential, in adversarial
//! inputs. These limits keep that table small regardless:
//! - Max pattern/input length: 256 characters
//! - Max segments per pattern: 32

use std::fmt;

const MAX_STRING_LENGTH: usize = 256;
const MAX_PATTERN_LENGTH: usize = 256;
const MAX_SEGMENTS: usize = 32;

/// Error returned when a glob pattern is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobError {
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for GlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid glob pattern '{}': {}",
            self.pattern, self.message
        )
    }
}

impl std::error::Error for GlobError {}

/// Compiled glob pattern for efficient matching.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    segments: Vec<Segment>,
    ops: Vec<MatchOp>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    /// `*` — matches any run of characters, including `/` and `:`.
    Star,
    /// `?` — matches exactly one character.
    Question,
}

/// Per-character view of a compiled pattern, used by `match_dp` so a
/// multi-char `Literal` segment doesn't need special-casing in the matcher.
#[derive(Debug, Clone, Copy)]
enum MatchOp {
    Char(char),
    Any,
    Star,
}

fn flatten(segments: &[Segment]) -> Vec<MatchOp> {
    let mut ops = Vec::new();
    for segment in segments {
        match segment {
            Segment::Literal(lit) => ops.extend(lit.chars().map(MatchOp::Char)),
            Segment::Question => ops.push(MatchOp::Any),
            Segment::Star => ops.push(MatchOp::Star),
        }
    }
    ops
}

impl GlobPattern {
    /// Compile a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern (or its compiled segment count)
    /// exceeds the security limits above.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        if pattern.len() > MAX_PATTERN_LENGTH {
            return Err(GlobError {
                pattern: pattern.chars().take(50).collect::<String>() + "...",
                message: format!(
                    "pattern length {} exceeds maximum {}",
                    pattern.len(),
                    MAX_PATTERN_LENGTH
                ),
            });
        }

        let segments = parse_pattern(pattern);

        if segments.len() > MAX_SEGMENTS {
            return Err(GlobError {
                pattern: pattern.to_string(),
                message: format!(
                    "pattern has {} segments, exceeds maximum {}",
                    segments.len(),
                    MAX_SEGMENTS
                ),
            });
        }

        let ops = flatten(&segments);

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            ops,
        })
    }

    /// Check if the pattern matches the given string. Matching is
    /// case-sensitive and anchored to the full string.
    ///
    /// Returns `false` for inputs exceeding the security limit.
    pub fn matches(&self, input: &str) -> bool {
        if input.len() > MAX_STRING_LENGTH {
            return false;
        }
        match_dp(&self.ops, input)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current_literal = String::new();

    for c in pattern.chars() {
        match c {
            '*' => {
                if !current_literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut current_literal)));
                }
                segments.push(Segment::Star);
            }
            '?' => {
                if !current_literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut current_literal)));
                }
                segments.push(Segment::Question);
            }
            _ => current_literal.push(c),
        }
    }

    if !current_literal.is_empty() {
        segments.push(Segment::Literal(current_literal));
    }

    segments
}

/// Table-filling match, `ops.len() + 1` by `input.chars().len() + 1`, so
/// worst-case time is bounded by `MAX_SEGMENTS * MAX_STRING_LENGTH` rather
/// than the naive per-boundary backtracking a recursive matcher would do
/// for a pattern with many `*` segments — that recursion revisits the same
/// (op, position) pair exponentially often on an adversarial pattern like
/// `a*a*a*a*a*...` against a non-matching input of similar shape.
fn match_dp(ops: &[MatchOp], input: &str) -> bool {
    let chars: Vec<char> = input.chars().collect();
    let n = chars.len();

    // dp[j] tracks whether ops[..i] matches chars[..j], rolled forward one
    // row of `i` at a time since each row only depends on the previous one.
    let mut dp = vec![false; n + 1];
    dp[0] = true;

    for op in ops {
        let mut next = vec![false; n + 1];
        match op {
            MatchOp::Star => {
                // `*` matches empty, so it inherits the prior row's result
                // at j, then propagates forward: once it has swallowed up
                // to j - 1 characters, swallowing one more keeps it matched.
                next[0] = dp[0];
                for j in 1..=n {
                    next[j] = dp[j] || next[j - 1];
                }
            }
            MatchOp::Any => {
                for j in 1..=n {
                    next[j] = dp[j - 1];
                }
            }
            MatchOp::Char(expected) => {
                for j in 1..=n {
                    next[j] = dp[j - 1] && chars[j - 1] == *expected;
                }
            }
        }
        dp = next;
    }

    dp[n]
}

/// Check if a string matches any of the given patterns.
pub fn matches_any(input: &str, patterns: &[impl AsRef<str>]) -> Result<bool, GlobError> {
    for pattern in patterns {
        let glob = GlobPattern::new(pattern.as_ref())?;
        if glob.matches(input) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Convenience wrapper matching the crate's public API surface: compiles
/// `pattern` and checks it against `input` in one call.
pub fn glob_matches(pattern: &str, input: &str) -> Result<bool, GlobError> {
    Ok(GlobPattern::new(pattern)?.matches(input))
}

/// Pre-compiled pattern set for efficient batch matching.
#[derive(Debug, Clone)]
pub struct GlobSet {
    patterns: Vec<GlobPattern>,
}

impl GlobSet {
    pub fn new(patterns: &[impl AsRef<str>]) -> Result<Self, GlobError> {
        let compiled: Result<Vec<_>, _> = patterns
            .iter()
            .map(|p| GlobPattern::new(p.as_ref()))
            .collect();
        Ok(Self {
            patterns: compiled?,
        })
    }

    pub fn matches(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(input))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match_is_anchored() {
        let glob = GlobPattern::new("db:prod:orders").unwrap();
        assert!(glob.matches("db:prod:orders"));
        assert!(!glob.matches("db:prod:orders:extra"));
        assert!(!glob.matches("prefix:db:prod:orders"));
        assert!(!glob.matches("DB:PROD:ORDERS"));
    }

    #[test]
    fn star_matches_slash_and_colon() {
        let glob = GlobPattern::new("api:openai:*").unwrap();
        assert!(glob.matches("api:openai:chat/completions"));
        assert!(glob.matches("api:openai:v1:models"));
        assert!(glob.matches("api:openai:"));
    }

    #[test]
    fn star_is_greedy_across_multiple_occurrences() {
        let glob = GlobPattern::new("*_*").unwrap();
        assert!(glob.matches("search_products"));
        assert!(glob.matches("a_b_c"));
        assert!(!glob.matches("search"));
    }

    #[test]
    fn question_matches_exactly_one_char() {
        let glob = GlobPattern::new("db:prod:order?").unwrap();
        assert!(glob.matches("db:prod:orders"));
        assert!(!glob.matches("db:prod:order"));
        assert!(!glob.matches("db:prod:orderss"));
    }

    #[test]
    fn universal_wildcard() {
        let glob = GlobPattern::new("*").unwrap();
        assert!(glob.matches(""));
        assert!(glob.matches("anything"));
        assert!(glob.matches("api:openai:chat/completions"));
    }

    #[test]
    fn matches_any_patterns() {
        let patterns = &["api:openai:*", "db:prod:orders"];
        assert!(matches_any("api:openai:chat", patterns).unwrap());
        assert!(matches_any("db:prod:orders", patterns).unwrap());
        assert!(!matches_any("db:prod:customers", patterns).unwrap());
    }

    #[test]
    fn glob_set() {
        let set = GlobSet::new(&["api:openai:*", "api:anthropic:*"]).unwrap();
        assert!(set.matches("api:openai:chat"));
        assert!(set.matches("api:anthropic:messages"));
        assert!(!set.matches("api:cohere:chat"));
    }

    #[test]
    fn pattern_length_limit_enforced() {
        let long_pattern = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert!(GlobPattern::new(&long_pattern).is_err());
    }

    #[test]
    fn input_length_limit_enforced() {
        let glob = GlobPattern::new("*").unwrap();
        let long_input = "a".repeat(MAX_STRING_LENGTH + 1);
        assert!(!glob.matches(&long_input));
    }

    #[test]
    fn glob_matches_convenience_fn() {
        assert!(glob_matches("api:openai:*", "api:openai:chat").unwrap());
        assert!(!glob_matches("api:openai:*", "api:anthropic:chat").unwrap());
    }

    #[test]
    fn many_alternating_stars_match_without_blowing_up() {
        // Exercises the table-fill matcher on the pattern shape that made
        // the old recursive backtracker exponential: alternating literal
        // and `*` segments matched against an input with no actual match.
        let pattern = "a*a*a*a*a*a*a*a*a*a*b";
        let glob = GlobPattern::new(pattern).unwrap();
        assert!(!glob.matches(&"a".repeat(200)));
        assert!(glob.matches(&format!("{}b", "a".repeat(30))));
    }
}
