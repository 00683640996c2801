//! Bounded scalar payloads and the four-corner rectangle composite.

use crate::error::ValueError;
use crate::flags::BaseType;
use crate::parse::Tokens;

use super::{Value, feq, fmt_f64};

/// Double payload with inclusive [min, max] bounds.
///
/// Bounds default to infinite (unbounded); NaN stays assignable as the
/// unset sentinel.
#[derive(Debug, Clone)]
pub struct DoubleMinMax {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for DoubleMinMax {
    fn default() -> Self {
        Self {
            value: f64::NAN,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }
}

impl DoubleMinMax {
    pub fn in_bounds(&self, v: f64) -> bool {
        v.is_nan() || (v >= self.min && v <= self.max)
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            fmt_f64(self.value),
            fmt_f64(self.min),
            fmt_f64(self.max)
        )
    }

    /// Accepts either a bare value or the full `value min max` triple.
    pub fn parse_into(&mut self, toks: &mut Tokens<'_>) -> Result<(), ValueError> {
        let value = toks.next_f64()?;
        let (min, max) = if toks.is_empty() {
            (self.min, self.max)
        } else {
            (toks.next_f64()?, toks.next_f64()?)
        };
        self.min = min;
        self.max = max;
        if !self.in_bounds(value) {
            return Err(ValueError::OutOfBounds);
        }
        self.value = value;
        Ok(())
    }

    pub fn is_equal(&self, other: &Self) -> bool {
        feq(self.value, other.value) && feq(self.min, other.min) && feq(self.max, other.max)
    }
}

/// Integer payload with inclusive [min, max] bounds.
#[derive(Debug, Clone)]
pub struct IntegerMinMax {
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

impl IntegerMinMax {
    pub fn new(unset: i32) -> Self {
        Self {
            value: unset,
            min: i32::MIN,
            max: i32::MAX,
        }
    }

    pub fn in_bounds(&self, v: i32) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn encode(&self) -> String {
        format!("{} {} {}", self.value, self.min, self.max)
    }

    pub fn parse_into(&mut self, toks: &mut Tokens<'_>) -> Result<(), ValueError> {
        let value = toks.next_i32()?;
        let (min, max) = if toks.is_empty() {
            (self.min, self.max)
        } else {
            (toks.next_i32()?, toks.next_i32()?)
        };
        self.min = min;
        self.max = max;
        if !self.in_bounds(value) {
            return Err(ValueError::OutOfBounds);
        }
        self.value = value;
        Ok(())
    }
}

/// Composite payload owning four child values (X, Y, width, height) of a
/// uniform base type. Change state is the OR of the children's.
#[derive(Debug, Clone)]
pub struct Rectangle {
    pub x: Value,
    pub y: Value,
    pub w: Value,
    pub h: Value,
}

impl Rectangle {
    pub fn new(base: BaseType) -> Self {
        Self {
            x: Value::plain(base, "X"),
            y: Value::plain(base, "Y"),
            w: Value::plain(base, "WIDTH"),
            h: Value::plain(base, "HEIGHT"),
        }
    }

    pub fn children(&self) -> [&Value; 4] {
        [&self.x, &self.y, &self.w, &self.h]
    }

    pub fn children_mut(&mut self) -> [&mut Value; 4] {
        [&mut self.x, &mut self.y, &mut self.w, &mut self.h]
    }

    pub fn encode(&self) -> String {
        self.children()
            .map(|c| c.encode())
            .join(" ")
    }

    /// Consumes exactly four tokens. Parses all of them before mutating
    /// any child, so a malformed corner leaves the rectangle untouched.
    pub fn parse_into(&mut self, toks: &mut Tokens<'_>) -> Result<(), ValueError> {
        let corners: [&str; 4] = [
            toks.next_str()?,
            toks.next_str()?,
            toks.next_str()?,
            toks.next_str()?,
        ];
        let mut parsed = self.clone();
        for (child, tok) in parsed.children_mut().into_iter().zip(corners) {
            child.set_from_str(tok)?;
        }
        *self = parsed;
        Ok(())
    }

    pub fn is_equal(&self, other: &Self) -> bool {
        self.children()
            .into_iter()
            .zip(other.children())
            .all(|(a, b)| a.is_equal(b))
    }

    pub fn was_changed(&self) -> bool {
        self.children().into_iter().any(|c| c.was_changed())
    }

    pub fn reset_changed(&mut self) {
        for c in self.children_mut() {
            c.reset_changed();
        }
    }
}
