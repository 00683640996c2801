//! Wire encoding and parsing helpers for array payloads.
//!
//! Array payloads are space-joined member encodings; string members
//! containing whitespace (or empty strings) are double-quoted so the
//! tokenizer can reassemble them.

use crate::error::ValueError;
use crate::parse::{Tokens, parse_bool};

use super::fmt_f64;

pub fn encode_f64s(members: &[f64]) -> String {
    members.iter().map(|m| fmt_f64(*m)).collect::<Vec<_>>().join(" ")
}

pub fn encode_i32s(members: &[i32]) -> String {
    members
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn encode_bools(members: &[bool]) -> String {
    members
        .iter()
        .map(|m| if *m { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn encode_strings(members: &[String]) -> String {
    members
        .iter()
        .map(|m| quote_if_needed(m))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_if_needed(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

/// Parse all remaining tokens as doubles.
pub fn parse_f64s(toks: &mut Tokens<'_>) -> Result<Vec<f64>, ValueError> {
    toks.remaining()
        .into_iter()
        .map(|t| t.parse().map_err(|_| ValueError::InvalidParams))
        .collect()
}

pub fn parse_i32s(toks: &mut Tokens<'_>) -> Result<Vec<i32>, ValueError> {
    toks.remaining()
        .into_iter()
        .map(|t| t.parse().map_err(|_| ValueError::InvalidParams))
        .collect()
}

pub fn parse_bools(toks: &mut Tokens<'_>) -> Result<Vec<bool>, ValueError> {
    toks.remaining()
        .into_iter()
        .map(|t| match parse_bool(t)? {
            Some(b) => Ok(b),
            None => Err(ValueError::InvalidValue(
                "boolean array members cannot be unknown".to_string(),
            )),
        })
        .collect()
}

pub fn parse_strings(toks: &mut Tokens<'_>) -> Result<Vec<String>, ValueError> {
    Ok(toks.remaining().into_iter().map(str::to_string).collect())
}

/// Bounds-check a set of indices against an array length.
pub fn check_indices(indices: &[usize], len: usize) -> Result<(), ValueError> {
    for &index in indices {
        if index >= len {
            return Err(ValueError::IndexOutOfRange { index, len });
        }
    }
    Ok(())
}
