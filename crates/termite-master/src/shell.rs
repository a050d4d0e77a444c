//! Text-level shell heuristics for dispatched commands.
//!
//! `parse_command` splits a simple command into words without invoking a
//! shell. Anything that would make the shell do real work (globs,
//! variable expansion, redirection, control operators) makes it bail:
//! the worker must never pre-analyse a command it cannot faithfully
//! reproduce. `detect_files` scoops path-looking substrings out of a
//! command line so the master can prefetch their attributes.

/// Split `cmd` into words, honoring quotes and backslash escapes.
/// Returns `None` when the command uses any shell feature beyond
/// quoting, or when quoting is unterminated.
pub fn parse_command(cmd: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut have_word = false;
    let mut in_single = false;
    let mut in_double = false;

    let mut chars = cmd.chars();
    while let Some(c) = chars.next() {
        if in_single {
            if c == '\'' {
                in_single = false;
            } else {
                current.push(c);
            }
            continue;
        }
        if in_double {
            match c {
                '"' => in_double = false,
                // Inside double quotes only $, ` and \ stay special.
                '$' | '`' => return None,
                '\\' => match chars.next()? {
                    escaped @ ('"' | '\\' | '$' | '`') => current.push(escaped),
                    other => {
                        current.push('\\');
                        current.push(other);
                    }
                },
                _ => current.push(c),
            }
            continue;
        }
        match c {
            '\'' => {
                in_single = true;
                have_word = true;
            }
            '"' => {
                in_double = true;
                have_word = true;
            }
            '\\' => {
                current.push(chars.next()?);
                have_word = true;
            }
            ' ' | '\t' => {
                if have_word {
                    words.push(std::mem::take(&mut current));
                    have_word = false;
                }
            }
            ';' | '&' | '|' | '<' | '>' | '(' | ')' | '{' | '}' | '[' | ']' | '*' | '?' | '$'
            | '`' | '~' | '#' | '\n' => return None,
            _ => {
                current.push(c);
                have_word = true;
            }
        }
    }
    if in_single || in_double {
        return None;
    }
    if have_word {
        words.push(current);
    }
    Some(words)
}

/// Substrings of `cmd` that start with `root` and extend over
/// path-looking characters. Used for attribute prefetch only; missing a
/// path costs a round trip, never correctness.
pub fn detect_files(root: &str, cmd: &str) -> Vec<String> {
    let mut out = Vec::new();
    if root.is_empty() {
        return out;
    }
    let bytes = cmd.as_bytes();
    let mut from = 0;
    while let Some(pos) = cmd[from..].find(root) {
        let begin = from + pos;
        let mut end = begin + root.len();
        while end < bytes.len() && is_path_byte(bytes[end]) {
            end += 1;
        }
        out.push(cmd[begin..end].to_string());
        from = end;
    }
    out
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-' | b'+')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_with_shell_features_bail() {
        for cmd in [
            "echo hoi;",
            "echo \"${hoi}\"",
            "a && b",
            "a || b",
            "echo a*b",
            "echo 'x' \\ >> temp.sed",
        ] {
            assert_eq!(parse_command(cmd), None, "should fail: {cmd:?}");
        }
    }

    #[test]
    fn plain_commands_split_into_words() {
        let cases: &[(&str, &[&str])] = &[
            ("echo \"a'b\"", &["echo", "a'b"]),
            ("\"a'b\"", &["a'b"]),
            ("a\\ b", &["a b"]),
            ("a'x y'b", &["ax yb"]),
            ("echo \"a[]<>*&;;\"", &["echo", "a[]<>*&;;"]),
            ("a   b", &["a", "b"]),
            ("a\\$b", &["a$b"]),
        ];
        for (cmd, want) in cases {
            let got = parse_command(cmd).unwrap_or_else(|| panic!("should parse: {cmd:?}"));
            assert_eq!(got, *want, "cmd {cmd:?}");
        }
    }

    #[test]
    fn unterminated_quote_bails() {
        assert_eq!(parse_command("echo 'oops"), None);
        assert_eq!(parse_command("echo \"oops"), None);
        assert_eq!(parse_command("echo oops\\"), None);
    }

    #[test]
    fn detect_files_finds_paths_under_root() {
        let found = detect_files("/src/foo", "gcc /src/foo/bar.cc -I/src/foo/baz");
        assert_eq!(found.len(), 2);
        assert!(found.contains(&"/src/foo/bar.cc".to_string()));
        assert!(found.contains(&"/src/foo/baz".to_string()));
    }

    #[test]
    fn detect_files_ignores_unrelated_paths() {
        let found = detect_files("/src/foo", "gcc /usr/include/x.h -o out");
        assert!(found.is_empty());
    }
}
