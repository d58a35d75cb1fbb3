//! `glob:` and `regex:` path matchers.

use regex::Regex;
use shellfs_path::RemotePath;

use crate::error::{FsError, FsResult};

const GLOB_SYNTAX: &str = "glob";
const REGEX_SYNTAX: &str = "regex";

/// Matches the full string form of a path.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
}

impl PathMatcher {
    /// Parse `"<syntax>:<pattern>"` where syntax is `glob` or `regex`.
    pub fn new(syntax_and_pattern: &str) -> FsResult<Self> {
        let (syntax, pattern) = syntax_and_pattern
            .split_once(':')
            .filter(|(syntax, _)| !syntax.is_empty())
            .ok_or_else(|| {
                FsError::illegal_argument(format!(
                    "expected <syntax>:<pattern>, got {:?}",
                    syntax_and_pattern
                ))
            })?;

        let expr = match syntax {
            GLOB_SYNTAX => glob_to_regex(pattern)?,
            REGEX_SYNTAX => format!("^(?:{})$", pattern),
            other => {
                return Err(FsError::illegal_argument(format!(
                    "syntax {:?} not recognized",
                    other
                )));
            }
        };
        let regex = Regex::new(&expr).map_err(|e| {
            FsError::illegal_argument(format!("invalid pattern {:?}: {}", pattern, e))
        })?;
        Ok(Self { regex })
    }

    pub fn matches(&self, path: &RemotePath) -> bool {
        self.regex.is_match(&path.to_string_lossy())
    }

    /// The anchored regular expression this matcher runs.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Translate a glob into an anchored regex.
///
/// `*` stays within one name, `**` crosses names, `?` is one non-separator
/// character, `[...]` is a class that never matches `/`, `{a,b}` is an
/// alternation (not nestable), and `\` escapes the next character.
fn glob_to_regex(glob: &str) -> FsResult<String> {
    let error = |msg: &str| FsError::illegal_argument(format!("{} in glob {:?}", msg, glob));
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut in_group = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars.next().ok_or_else(|| error("trailing escape"))?;
                push_literal(&mut re, next);
            }
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '{' => {
                if in_group {
                    return Err(error("nested group"));
                }
                re.push_str("(?:");
                in_group = true;
            }
            '}' if in_group => {
                re.push(')');
                in_group = false;
            }
            ',' if in_group => re.push('|'),
            '[' => {
                re.push_str("[[^/]&&[");
                if chars.next_if_eq(&'!').is_some() {
                    re.push('^');
                } else if chars.next_if_eq(&'^').is_some() {
                    re.push_str("\\^");
                }
                let mut closed = false;
                let mut empty = true;
                for member in chars.by_ref() {
                    match member {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '/' => return Err(error("'/' inside class")),
                        '-' => re.push('-'),
                        other => push_literal(&mut re, other),
                    }
                    empty = false;
                }
                if !closed {
                    return Err(error("missing ']'"));
                }
                re.push_str("]]");
            }
            other => push_literal(&mut re, other),
        }
    }

    if in_group {
        return Err(error("missing '}'"));
    }
    re.push('$');
    Ok(re)
}

fn push_literal(re: &mut String, c: char) {
    let mut buf = [0u8; 4];
    re.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        PathMatcher::new(pattern).unwrap().matches(&RemotePath::from(path))
    }

    #[test]
    fn test_glob_star_stays_in_name() {
        assert!(matches("glob:/src/*.rs", "/src/lib.rs"));
        assert!(!matches("glob:/src/*.rs", "/src/a/lib.rs"));
        assert!(matches("glob:/src/**.rs", "/src/a/lib.rs"));
        assert!(matches("glob:/src/**", "/src/a/b/c"));
    }

    #[test]
    fn test_glob_question_class_group() {
        assert!(matches("glob:/log/app?.log", "/log/app1.log"));
        assert!(!matches("glob:/log/app?.log", "/log/app/.log"));
        assert!(matches("glob:/tmp/[a-c]x", "/tmp/bx"));
        assert!(!matches("glob:/tmp/[!a-c]x", "/tmp/bx"));
        assert!(matches("glob:*.{rs,toml}", "Cargo.toml"));
        assert!(!matches("glob:*.{rs,toml}", "Cargo.lock"));
        assert!(matches("glob:a+b(1).txt", "a+b(1).txt"));
    }

    #[test]
    fn test_regex_is_anchored() {
        assert!(matches("regex:/a/.*", "/a/b"));
        assert!(!matches("regex:/a", "/a/b"));
    }

    #[test]
    fn test_bad_syntax() {
        for bad in ["", "/a/*", ":x", "sql:/a", "glob:[abc", "glob:{a,{b}}", "glob:/x[a/b]"] {
            assert!(
                matches!(PathMatcher::new(bad), Err(FsError::IllegalArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
