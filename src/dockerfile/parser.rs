//! The Dockerfile tokenizer (§6 "Dockerfile dialect"): turns raw text into a
//! sequence of `{name, args, raw, lineno}` objects. Line continuations
//! (trailing `\`) are joined before an instruction is tokenized; comments
//! and blank lines are dropped.

use crate::error::{Error, Result};

/// One `{name, args, raw, lineno}` object, prior to any variable expansion
/// or instruction-specific argument parsing.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub name: String,
    pub args: String,
    pub raw: String,
    pub lineno: usize,
}

/// Parse a whole Dockerfile into raw instructions. The first non-comment,
/// non-blank line's instruction name must be `FROM` (checked by the
/// dispatcher, not here, since `scratch`-only builds are also rejected
/// there).
pub fn parse(contents: &str) -> Result<Vec<RawInstruction>> {
    let mut out = Vec::new();
    let mut lines = contents.lines().enumerate().peekable();

    while let Some((idx, line)) = lines.next() {
        let trimmed = line.trim_end();

        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }

        let lineno = idx + 1;
        let mut joined = String::new();
        let mut cur = trimmed;

        loop {
            if let Some(stripped) = cur.strip_suffix('\\') {
                joined.push_str(stripped.trim_end_matches(' '));
                joined.push(' ');

                match lines.next() {
                    Some((_, next_line)) => {
                        cur = next_line.trim_end();
                        if cur.trim().is_empty() {
                            break;
                        }
                        continue;
                    }
                    None => break,
                }
            } else {
                joined.push_str(cur);
                break;
            }
        }

        let joined = joined.trim().to_string();
        if joined.is_empty() {
            continue;
        }

        let (name, args) = split_instruction(&joined)?;
        out.push(RawInstruction {
            name: name.to_ascii_uppercase(),
            args,
            raw: joined,
            lineno,
        });
    }

    Ok(out)
}

fn split_instruction(line: &str) -> Result<(String, String)> {
    let line = line.trim_start();
    let split_at = line
        .find(|c: char| c.is_whitespace())
        .unwrap_or(line.len());
    let (name, rest) = line.split_at(split_at);

    if name.is_empty() {
        return Err(Error::InputError(format!(
            "could not parse Dockerfile line: '{line}'"
        )));
    }

    Ok((name.to_string(), rest.trim_start().to_string()))
}

/// Split a raw argument string into words, honoring single/double quotes the
/// way a shell would when tokenizing e.g. `LABEL`/`ENV` key-value pairs.
pub fn split_words(s: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        None => return Err(Error::InputError("unterminated quote".to_string())),
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(next) = chars.next() {
                                current.push(next);
                            }
                        }
                        Some(c) => current.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

/// Parse a JSON-array exec-form argument (`["a", "b"]`), used by `CMD`,
/// `ENTRYPOINT`, `RUN`.
pub fn parse_exec_form(args: &str) -> Option<Vec<String>> {
    let trimmed = args.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str::<Vec<String>>(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn skips_comments_and_blank_lines() {
        let df = "# comment\n\nFROM scratch\n";
        let instrs = parse(df).unwrap();
        assert!(instrs.len() == 1);
        assert!(instrs[0].name == "FROM");
        assert!(instrs[0].args == "scratch");
    }

    #[test]
    fn joins_line_continuations() {
        let df = "RUN echo a \\\n    && echo b\n";
        let instrs = parse(df).unwrap();
        assert!(instrs.len() == 1);
        assert!(instrs[0].args.contains("echo a") && instrs[0].args.contains("echo b"));
    }

    #[test]
    fn tracks_line_numbers() {
        let df = "FROM scratch\nRUN foo\n";
        let instrs = parse(df).unwrap();
        assert!(instrs[0].lineno == 1);
        assert!(instrs[1].lineno == 2);
    }

    #[test]
    fn split_words_handles_quotes() {
        let words = split_words("FOO=\"bar baz\" QUX=1").unwrap();
        assert!(words == vec!["FOO=bar baz".to_string(), "QUX=1".to_string()]);
    }

    #[test]
    fn exec_form_parses_json_array() {
        let v = parse_exec_form("[\"/bin/sh\", \"-c\", \"echo\"]").unwrap();
        assert!(v == vec!["/bin/sh".to_string(), "-c".to_string(), "echo".to_string()]);
    }

    #[test]
    fn non_array_is_not_exec_form() {
        assert!(parse_exec_form("echo hi").is_none());
    }
}
