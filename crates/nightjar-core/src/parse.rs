//! Tokenizing of command argument streams and small shared grammars.
//!
//! Command arguments are whitespace-separated; a token starting with `"`
//! runs to the closing quote and may contain spaces. The same tokenizer
//! backs wire commands, config-file payloads, and CLI seed arguments, which
//! is what makes the value round-trip law hold across all three.

use crate::error::ValueError;

/// Borrowing token stream over one command line.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Next token, quote-aware. `None` at end of line.
    pub fn next_token(&mut self) -> Option<&'a str> {
        let s = self.rest.trim_start();
        if s.is_empty() {
            self.rest = s;
            return None;
        }
        if let Some(stripped) = s.strip_prefix('"') {
            match stripped.find('"') {
                Some(end) => {
                    self.rest = &stripped[end + 1..];
                    Some(&stripped[..end])
                }
                // Unterminated quote: consume the remainder.
                None => {
                    self.rest = "";
                    Some(stripped)
                }
            }
        } else {
            let end = s.find(char::is_whitespace).unwrap_or(s.len());
            self.rest = &s[end..];
            Some(&s[..end])
        }
    }

    pub fn next_str(&mut self) -> Result<&'a str, ValueError> {
        self.next_token().ok_or(ValueError::InvalidParams)
    }

    pub fn next_f64(&mut self) -> Result<f64, ValueError> {
        self.next_str()?
            .parse()
            .map_err(|_| ValueError::InvalidParams)
    }

    pub fn next_f32(&mut self) -> Result<f32, ValueError> {
        self.next_str()?
            .parse()
            .map_err(|_| ValueError::InvalidParams)
    }

    pub fn next_i32(&mut self) -> Result<i32, ValueError> {
        self.next_str()?
            .parse()
            .map_err(|_| ValueError::InvalidParams)
    }

    pub fn next_i64(&mut self) -> Result<i64, ValueError> {
        self.next_str()?
            .parse()
            .map_err(|_| ValueError::InvalidParams)
    }

    /// True when no tokens remain.
    pub fn is_empty(&self) -> bool {
        self.rest.trim_start().is_empty()
    }

    /// Fails unless the stream is exhausted. Commands with trailing junk
    /// are rejected rather than silently truncated.
    pub fn expect_end(&self) -> Result<(), ValueError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ValueError::InvalidParams)
        }
    }

    /// Drain all remaining tokens.
    pub fn remaining(&mut self) -> Vec<&'a str> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token() {
            out.push(tok);
        }
        out
    }
}

/// Parse a boolean token. `None` is the "unknown" third state.
///
/// Accepted, case-insensitive: `on`/`true`/`yes`/`1`, `off`/`false`/`no`/`0`,
/// and `unknown`/`2`.
pub fn parse_bool(token: &str) -> Result<Option<bool>, ValueError> {
    match token.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(Some(true)),
        "off" | "false" | "no" | "0" => Ok(Some(false)),
        "unknown" | "2" => Ok(None),
        _ => Err(ValueError::InvalidValue(format!(
            "'{token}' is not a boolean"
        ))),
    }
}

/// Parse a bracketed array index specification into concrete indices.
///
/// Grammar: `N` (single index) or `A:B` (inclusive range, either end may be
/// omitted to mean the first / last index). Indices are 0-based: `1:3` on a
/// 5-element array selects indices 1, 2 and 3.
pub fn parse_index_range(spec: &str, len: usize) -> Result<Vec<usize>, ValueError> {
    let check = |idx: usize| {
        if idx < len {
            Ok(idx)
        } else {
            Err(ValueError::IndexOutOfRange { index: idx, len })
        }
    };
    let parse_idx = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| ValueError::InvalidValue(format!("bad array index '{s}'")))
    };

    match spec.split_once(':') {
        None => {
            if spec.is_empty() {
                return Err(ValueError::InvalidParams);
            }
            Ok(vec![check(parse_idx(spec)?)?])
        }
        Some((lo, hi)) => {
            if len == 0 {
                return Err(ValueError::IndexOutOfRange { index: 0, len });
            }
            let lo = if lo.is_empty() { 0 } else { check(parse_idx(lo)?)? };
            let hi = if hi.is_empty() {
                len - 1
            } else {
                check(parse_idx(hi)?)?
            };
            if lo > hi {
                return Err(ValueError::InvalidValue(format!(
                    "empty array range '{spec}'"
                )));
            }
            Ok((lo..=hi).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_tokens() {
        let mut toks = Tokens::new("EXPTIME = 12.5");
        assert_eq!(toks.next_token(), Some("EXPTIME"));
        assert_eq!(toks.next_token(), Some("="));
        assert_eq!(toks.next_f64().unwrap(), 12.5);
        assert!(toks.is_empty());
        assert_eq!(toks.next_token(), None);
    }

    #[test]
    fn test_quoted_token_keeps_spaces() {
        let mut toks = Tokens::new("\"dark frame\" next");
        assert_eq!(toks.next_token(), Some("dark frame"));
        assert_eq!(toks.next_token(), Some("next"));
    }

    #[test]
    fn test_unterminated_quote_consumes_rest() {
        let mut toks = Tokens::new("\"no closing quote");
        assert_eq!(toks.next_token(), Some("no closing quote"));
        assert!(toks.is_empty());
    }

    #[test]
    fn test_expect_end() {
        let mut toks = Tokens::new("a b");
        toks.next_token();
        assert_eq!(toks.expect_end(), Err(ValueError::InvalidParams));
        toks.next_token();
        assert_eq!(toks.expect_end(), Ok(()));
    }

    #[test]
    fn test_parse_bool_grammar() {
        assert_eq!(parse_bool("ON").unwrap(), Some(true));
        assert_eq!(parse_bool("yes").unwrap(), Some(true));
        assert_eq!(parse_bool("OFF").unwrap(), Some(false));
        assert_eq!(parse_bool("0").unwrap(), Some(false));
        assert_eq!(parse_bool("unknown").unwrap(), None);
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_range_single_index() {
        assert_eq!(parse_index_range("2", 5).unwrap(), vec![2]);
        assert!(matches!(
            parse_index_range("5", 5),
            Err(ValueError::IndexOutOfRange { index: 5, len: 5 })
        ));
    }

    #[test]
    fn test_range_inclusive() {
        assert_eq!(parse_index_range("1:3", 5).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_index_range(":2", 5).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_index_range("3:", 5).unwrap(), vec![3, 4]);
        assert_eq!(parse_index_range(":", 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_range_rejects_inverted_and_empty() {
        assert!(parse_index_range("3:1", 5).is_err());
        assert!(parse_index_range("", 5).is_err());
        assert!(parse_index_range(":", 0).is_err());
    }
}
