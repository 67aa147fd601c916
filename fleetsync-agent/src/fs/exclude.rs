//! Exclude patterns shared by every stage of a sync run.
//!
//! Patterns use shell `fnmatch` semantics: `*` matches any run of characters
//! (slashes included), `?` matches one character and `[...]` / `[!...]` are
//! character classes. A relative path is excluded when a pattern matches it
//! either as-is or with a leading `/`, so `**/.env` catches `.env` at the root
//! as well as `a/b/.env`.

use crate::utils::errors::{AgentError, Result};
use regex::Regex;

/// Backups written by conflict resolution live here, under each root.
pub const CONFLICT_DIR: &str = ".fleetsync_conflicts";

/// Pattern that keeps conflict backups out of every manifest and transfer.
pub const CONFLICT_DIR_PATTERN: &str = "**/.fleetsync_conflicts/**";

#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl ExcludeSet {
    /// Compile `patterns` in order. The conflict backup directory is always
    /// appended.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut all: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        if !all.iter().any(|p| p == CONFLICT_DIR_PATTERN) {
            all.push(CONFLICT_DIR_PATTERN.to_string());
        }

        let compiled = all
            .iter()
            .map(|pattern| {
                Regex::new(&translate(pattern)).map_err(|e| AgentError::Pattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns: all,
            compiled,
        })
    }

    /// Patterns in evaluation order, built-in ones included.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `rel` is a root-relative POSIX path without a leading slash.
    pub fn is_excluded(&self, rel: &str) -> bool {
        let anchored = format!("/{rel}");
        self.compiled
            .iter()
            .any(|re| re.is_match(rel) || re.is_match(&anchored))
    }
}

/// Translate an fnmatch pattern into an anchored regex.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                // Runs of stars collapse into one.
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    // Unterminated class is a literal bracket.
                    out.push_str("\\[");
                } else {
                    let body: String = chars[i..j].iter().collect();
                    let mut class = String::from("[");
                    let body = match body.strip_prefix('!') {
                        Some(rest) => {
                            class.push('^');
                            rest.to_string()
                        }
                        None => body,
                    };
                    for ch in body.chars() {
                        if matches!(ch, '\\' | '[' | ']' | '^' | '&' | '~') {
                            class.push('\\');
                        }
                        class.push(ch);
                    }
                    class.push(']');
                    out.push_str(&class);
                    i = j + 1;
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> ExcludeSet {
        ExcludeSet::new(patterns).unwrap()
    }

    #[test]
    fn test_recursive_pattern_matches_root_and_nested() {
        let s = set(&["**/.env"]);
        assert!(s.is_excluded(".env"));
        assert!(s.is_excluded("app/.env"));
        assert!(s.is_excluded("a/b/c/.env"));
        assert!(!s.is_excluded("app/.env.example"));
        assert!(!s.is_excluded("env"));
    }

    #[test]
    fn test_directory_contents_pattern() {
        let s = set(&["**/credentials/**"]);
        assert!(s.is_excluded("credentials/key.pem"));
        assert!(s.is_excluded("x/credentials/deep/key.pem"));
        assert!(!s.is_excluded("credentials.txt"));
    }

    #[test]
    fn test_star_crosses_separators() {
        let s = set(&["*.log"]);
        assert!(s.is_excluded("run.log"));
        assert!(s.is_excluded("logs/2024/run.log"));
        assert!(!s.is_excluded("run.log.gz"));
    }

    #[test]
    fn test_anchored_form() {
        let s = set(&["/shared.txt"]);
        assert!(s.is_excluded("shared.txt"));
        assert!(!s.is_excluded("sub/shared.txt"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        let s = set(&["file?.txt", "[!a].bin", "v[0-9].cfg"]);
        assert!(s.is_excluded("file1.txt"));
        assert!(!s.is_excluded("file10.txt"));
        assert!(s.is_excluded("b.bin"));
        assert!(!s.is_excluded("a.bin"));
        assert!(s.is_excluded("v3.cfg"));
        assert!(!s.is_excluded("vx.cfg"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let s = set(&["notes (1).md", "a+b.txt"]);
        assert!(s.is_excluded("notes (1).md"));
        assert!(s.is_excluded("a+b.txt"));
        assert!(!s.is_excluded("aab.txt"));
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        let s = set(&["odd[name"]);
        assert!(s.is_excluded("odd[name"));
    }

    #[test]
    fn test_conflict_dir_always_excluded() {
        let s = set(&[]);
        assert!(s.is_excluded(".fleetsync_conflicts/shared.txt.20240101000000.bak"));
        assert!(s.is_excluded("sub/.fleetsync_conflicts/x"));
        assert!(!s.is_excluded("shared.txt"));
        assert_eq!(s.patterns(), &[CONFLICT_DIR_PATTERN.to_string()]);
    }

    #[test]
    fn test_builtin_pattern_not_duplicated() {
        let s = set(&[CONFLICT_DIR_PATTERN, "*.tmp"]);
        assert_eq!(s.patterns().len(), 2);
    }
}
