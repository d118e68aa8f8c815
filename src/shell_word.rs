//! Shell-like `$VAR` / `${VAR}` expansion against an environment list (§4.2).
//!
//! A single-pass character cursor; correctness over performance, with a fast
//! path for words that contain none of `$`, `'`, `"`, `\`.

use crate::error::{Error, Result};

/// Expand `word` against `envs` (a list of `"K=V"` strings; first match wins).
pub fn expand(word: &str, envs: &[String]) -> Result<String> {
    if !word.contains(['$', '\'', '"', '\\']) {
        return Ok(word.to_string());
    }

    let mut cursor = Cursor::new(word);
    expand_run(&mut cursor, envs, None)
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            chars: s.chars().peekable(),
        }
    }

    fn next(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }
}

fn lookup(name: &str, envs: &[String]) -> String {
    let prefix = format!("{name}=");
    for kv in envs {
        if let Some(v) = kv.strip_prefix(&prefix) {
            return v.to_string();
        }
    }
    String::new()
}

/// Expand characters from `cursor` until exhausted, or (when `stop_at` is
/// `Some('}')`) until the matching closing brace is consumed.
fn expand_run(cursor: &mut Cursor, envs: &[String], stop_at: Option<char>) -> Result<String> {
    let mut out = String::new();

    while let Some(c) = cursor.next() {
        if Some(c) == stop_at {
            return Ok(out);
        }

        match c {
            '\\' => {
                if let Some(next) = cursor.next() {
                    out.push(next);
                }
            }
            '\'' => {
                for c in cursor.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    out.push(c);
                }
            }
            '"' => loop {
                match cursor.next() {
                    None | Some('"') => break,
                    Some('\\') => match cursor.peek() {
                        Some('"') | Some('$') => out.push(cursor.next().unwrap()),
                        _ => {
                            out.push('\\');
                        }
                    },
                    Some('$') => out.push_str(&expand_dollar(cursor, envs)?),
                    Some(c) => out.push(c),
                }
            },
            '$' => out.push_str(&expand_dollar(cursor, envs)?),
            other => out.push(other),
        }
    }

    if stop_at.is_some() {
        return Err(Error::BadShellSubstitution(
            "unterminated ${...}".to_string(),
        ));
    }

    Ok(out)
}

fn expand_dollar(cursor: &mut Cursor, envs: &[String]) -> Result<String> {
    match cursor.peek() {
        Some('{') => {
            cursor.next();
            expand_braced(cursor, envs)
        }
        Some(c) if c.is_ascii_digit() => {
            cursor.next();
            Ok(lookup(&c.to_string(), envs))
        }
        Some(c) if is_name_start(c) => {
            let mut name = String::new();
            while let Some(c) = cursor.peek() {
                if is_name_char(c) {
                    name.push(c);
                    cursor.next();
                } else {
                    break;
                }
            }
            Ok(lookup(&name, envs))
        }
        _ => Ok(String::new()),
    }
}

fn expand_braced(cursor: &mut Cursor, envs: &[String]) -> Result<String> {
    let mut name = String::new();
    while let Some(c) = cursor.peek() {
        if is_name_char(c) {
            name.push(c);
            cursor.next();
        } else {
            break;
        }
    }

    match cursor.peek() {
        Some('}') => {
            cursor.next();
            Ok(lookup(&name, envs))
        }
        Some(':') => {
            cursor.next();
            let modifier = cursor
                .next()
                .ok_or_else(|| Error::BadShellSubstitution(format!("${{{name}:...")))?;
            let value = lookup(&name, envs);
            let word = expand_run(cursor, envs, Some('}'))?;

            match modifier {
                '+' => {
                    if !value.is_empty() {
                        Ok(word)
                    } else {
                        Ok(String::new())
                    }
                }
                '-' => {
                    if value.is_empty() {
                        Ok(word)
                    } else {
                        Ok(value)
                    }
                }
                other => Err(Error::BadShellSubstitution(format!(
                    "unsupported modifier '{other}' in ${{{name}:{other}...}}"
                ))),
            }
        }
        _ => Err(Error::BadShellSubstitution(format!(
            "missing ':' in ${{{name}...}}"
        ))),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    fn envs(pairs: &[(&str, &str)]) -> Vec<String> {
        pairs.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    #[test]
    fn plain_dollar_var() {
        let e = envs(&[("FOO", "bar")]);
        assert!(expand("$FOO", &e).unwrap() == "bar");
        assert!(expand("pre$FOO.post", &e).unwrap() == "prebar.post");
    }

    #[test]
    fn braced_var() {
        let e = envs(&[("FOO", "bar")]);
        assert!(expand("${FOO}baz", &e).unwrap() == "barbaz");
    }

    #[test]
    fn unknown_var_is_empty() {
        let e: Vec<String> = vec![];
        assert!(expand("$MISSING", &e).unwrap() == "");
    }

    #[test]
    fn default_value_modifier() {
        let e: Vec<String> = vec![];
        assert!(expand("${FOO:-def}", &e).unwrap() == "def");

        let e = envs(&[("FOO", "bar")]);
        assert!(expand("${FOO:-def}", &e).unwrap() == "bar");
    }

    #[test]
    fn alternate_value_modifier() {
        let e = envs(&[("FOO", "bar")]);
        assert!(expand("${FOO:+alt}", &e).unwrap() == "alt");

        let e: Vec<String> = vec![];
        assert!(expand("${FOO:+alt}", &e).unwrap() == "");
    }

    #[test]
    fn single_quotes_are_verbatim() {
        let e = envs(&[("FOO", "bar")]);
        assert!(expand("'$FOO'", &e).unwrap() == "$FOO");
    }

    #[test]
    fn double_quotes_still_expand() {
        let e = envs(&[("FOO", "bar")]);
        assert!(expand("\"$FOO baz\"", &e).unwrap() == "bar baz");
    }

    #[test]
    fn unsupported_modifier_fails() {
        let e: Vec<String> = vec![];
        assert!(expand("${FOO:?oops}", &e).is_err());
    }

    #[test]
    fn missing_colon_fails() {
        let e: Vec<String> = vec![];
        assert!(expand("${FOO!oops}", &e).is_err());
    }
}
