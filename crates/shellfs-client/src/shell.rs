//! Shell word quoting for single-line remote commands.

/// Quote `arg` for a POSIX shell.
///
/// Arguments made only of safe characters pass through unchanged so that
/// commands echoing their operands (`ls -ld`) print them verbatim.
pub fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+:@%,=".contains(&b));
    if safe {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Split a command line into words, honoring single quotes, double quotes
/// and backslash escapes. The inverse of [`quote`].
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        _ => current.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_passthrough() {
        assert_eq!(quote("/home/u/file.txt"), "/home/u/file.txt");
        assert_eq!(quote("bob"), "bob");
    }

    #[test]
    fn test_quote_special() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_split_round_trip() {
        let args = ["ls", "-ld", "--time-style", "+%Y-%m-%d %H:%M:%S", "/tmp/it's here"];
        let line = args.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ");
        assert_eq!(split_words(&line), args);
    }

    #[test]
    fn test_split_mixed_quotes() {
        assert_eq!(split_words(r#"cp "a b" c\ d"#), vec!["cp", "a b", "c d"]);
        assert_eq!(split_words("  touch   /x  "), vec!["touch", "/x"]);
        assert_eq!(split_words("echo ''"), vec!["echo", ""]);
    }
}
