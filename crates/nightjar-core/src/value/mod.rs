//! The self-describing typed value model.
//!
//! A [`Value`] is a named, change-tracked unit of daemon state. Its payload
//! is a tagged union ([`ValueKind`]) covering the scalar base types plus the
//! composite variants (arrays, statistics, bounded scalars, rectangle,
//! selection). All parse and apply operations return `Result` and leave the
//! payload untouched on failure.
//!
//! Change tracking: any committed payload mutation that actually alters the
//! payload sets both the `changed` and `need_send` flags. `need_send` is
//! cleared after broadcast, `changed` only by an explicit reset.

pub mod array;
pub mod extrema;
pub mod stat;

use crate::error::ValueError;
use crate::flags::{BaseType, DisplayType, ExtType, FlagsError, Severity, ValueFlags};
use crate::parse::{Tokens, parse_bool};

use extrema::{DoubleMinMax, IntegerMinMax, Rectangle};
use stat::{DoubleStat, Timeserie, stat_equal};

/// Full-precision float serialization used on the wire; `set_from_str`
/// accepts everything this produces, including `NaN` and `inf`.
pub(crate) fn fmt_f64(v: f64) -> String {
    format!("{v:.20e}")
}

/// Float equality with NaN treated as equal to NaN, so unset sentinels
/// round-trip and compare stable.
pub(crate) fn feq(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

pub(crate) fn feq32(a: f32, b: f32) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

/// Normalize an angle into (-180, 180].
pub(crate) fn norm180(v: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    let mut r = v % 360.0;
    if r > 180.0 {
        r -= 360.0;
    } else if r <= -180.0 {
        r += 360.0;
    }
    r
}

/// Set-command operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Assign,
    Add,
    Sub,
}

impl Op {
    pub fn parse(token: &str) -> Result<Self, ValueError> {
        match token {
            "=" => Ok(Op::Assign),
            "+" | "+=" => Ok(Op::Add),
            "-" | "-=" => Ok(Op::Sub),
            other => Err(ValueError::InvalidValue(format!(
                "unknown operator '{other}'"
            ))),
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Op::Assign => '=',
            Op::Add => '+',
            Op::Sub => '-',
        }
    }
}

/// A pair of angles (RA/Dec or Alt/Az).
#[derive(Debug, Clone, Copy)]
pub struct AnglePair {
    pub first: f64,
    pub second: f64,
}

impl AnglePair {
    fn unset() -> Self {
        Self {
            first: f64::NAN,
            second: f64::NAN,
        }
    }
}

/// Ordered option list with an integer index payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub index: i32,
    pub options: Vec<String>,
}

impl Selection {
    fn find(&self, name: &str) -> Option<i32> {
        self.options.iter().position(|o| o == name).map(|i| i as i32)
    }

    fn in_range(&self, index: i32) -> bool {
        index >= 0 && (index as usize) < self.options.len()
    }
}

/// Tagged payload union. One variant per base-type/extension combination.
#[derive(Debug, Clone)]
pub enum ValueKind {
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Time(f64),
    Float(f32),
    /// `None` is the "unknown" third state.
    Bool(Option<bool>),
    Selection(Selection),
    RaDec(AnglePair),
    AltAz(AnglePair),
    Stat(DoubleStat),
    Timeserie(Timeserie),
    DoubleMinMax(DoubleMinMax),
    IntegerMinMax(IntegerMinMax),
    Rectangle(Box<Rectangle>),
    StringArray(Vec<String>),
    DoubleArray(Vec<f64>),
    TimeArray(Vec<f64>),
    IntegerArray(Vec<i32>),
    BoolArray(Vec<bool>),
}

fn scalar_kind(base: BaseType, not_null: bool) -> ValueKind {
    match base {
        BaseType::String => ValueKind::String(String::new()),
        BaseType::Integer => ValueKind::Integer(if not_null { i32::MIN } else { 0 }),
        BaseType::Long => ValueKind::Long(if not_null { i64::MIN } else { 0 }),
        BaseType::Double => ValueKind::Double(f64::NAN),
        BaseType::Time => ValueKind::Time(f64::NAN),
        BaseType::Float => ValueKind::Float(f32::NAN),
        BaseType::Bool => ValueKind::Bool(None),
        BaseType::Selection => ValueKind::Selection(Selection {
            index: 0,
            options: Vec::new(),
        }),
        BaseType::RaDec => ValueKind::RaDec(AnglePair::unset()),
        BaseType::AltAz => ValueKind::AltAz(AnglePair::unset()),
    }
}

fn default_kind(flags: &ValueFlags) -> Result<ValueKind, FlagsError> {
    let unsupported = || FlagsError::UnsupportedCombination(flags.pack());
    match flags.ext {
        ExtType::Plain => Ok(scalar_kind(flags.base, flags.not_null)),
        ExtType::Stat => match flags.base {
            BaseType::Double => Ok(ValueKind::Stat(DoubleStat::default())),
            _ => Err(unsupported()),
        },
        ExtType::Timeserie => match flags.base {
            BaseType::Double => Ok(ValueKind::Timeserie(Timeserie::default())),
            _ => Err(unsupported()),
        },
        ExtType::MinMax => match flags.base {
            BaseType::Double => Ok(ValueKind::DoubleMinMax(DoubleMinMax::default())),
            BaseType::Integer => Ok(ValueKind::IntegerMinMax(IntegerMinMax::new(
                if flags.not_null { i32::MIN } else { 0 },
            ))),
            _ => Err(unsupported()),
        },
        ExtType::Rectangle => match flags.base {
            BaseType::Integer | BaseType::Double => {
                Ok(ValueKind::Rectangle(Box::new(Rectangle::new(flags.base))))
            }
            _ => Err(unsupported()),
        },
        ExtType::Array => match flags.base {
            BaseType::String => Ok(ValueKind::StringArray(Vec::new())),
            BaseType::Double => Ok(ValueKind::DoubleArray(Vec::new())),
            BaseType::Time => Ok(ValueKind::TimeArray(Vec::new())),
            BaseType::Integer => Ok(ValueKind::IntegerArray(Vec::new())),
            BaseType::Bool => Ok(ValueKind::BoolArray(Vec::new())),
            _ => Err(unsupported()),
        },
    }
}

fn encode_kind(kind: &ValueKind) -> String {
    match kind {
        ValueKind::String(s) => s.clone(),
        ValueKind::Integer(v) => v.to_string(),
        ValueKind::Long(v) => v.to_string(),
        ValueKind::Double(v) | ValueKind::Time(v) => fmt_f64(*v),
        ValueKind::Float(v) => fmt_f64(*v as f64),
        ValueKind::Bool(b) => match b {
            Some(true) => "1".to_string(),
            Some(false) => "0".to_string(),
            None => "unknown".to_string(),
        },
        ValueKind::Selection(sel) => sel.index.to_string(),
        ValueKind::RaDec(p) | ValueKind::AltAz(p) => {
            format!("{} {}", fmt_f64(p.first), fmt_f64(p.second))
        }
        ValueKind::Stat(st) => st.encode(),
        ValueKind::Timeserie(ts) => ts.encode(),
        ValueKind::DoubleMinMax(mm) => mm.encode(),
        ValueKind::IntegerMinMax(mm) => mm.encode(),
        ValueKind::Rectangle(r) => r.encode(),
        ValueKind::StringArray(v) => array::encode_strings(v),
        ValueKind::DoubleArray(v) | ValueKind::TimeArray(v) => array::encode_f64s(v),
        ValueKind::IntegerArray(v) => array::encode_i32s(v),
        ValueKind::BoolArray(v) => array::encode_bools(v),
    }
}

/// Structural payload comparison used for change marking: every
/// broadcast-visible field counts, unlike [`Value::is_equal`] which uses
/// the looser wire-equality rules.
fn payload_identical(a: &ValueKind, b: &ValueKind) -> bool {
    match (a, b) {
        (ValueKind::Selection(x), ValueKind::Selection(y)) => x == y,
        _ => encode_kind(a) == encode_kind(b),
    }
}

fn kind_unset(kind: &ValueKind) -> bool {
    match kind {
        ValueKind::String(s) => s.is_empty(),
        ValueKind::Integer(v) => *v == i32::MIN,
        ValueKind::Long(v) => *v == i64::MIN,
        ValueKind::Double(v) | ValueKind::Time(v) => v.is_nan(),
        ValueKind::Float(v) => v.is_nan(),
        ValueKind::Bool(b) => b.is_none(),
        ValueKind::Selection(sel) => sel.options.is_empty(),
        ValueKind::RaDec(p) | ValueKind::AltAz(p) => p.first.is_nan() || p.second.is_nan(),
        ValueKind::Stat(st) => st.value.is_nan(),
        ValueKind::Timeserie(ts) => ts.stat.value.is_nan(),
        ValueKind::DoubleMinMax(mm) => mm.value.is_nan(),
        ValueKind::IntegerMinMax(mm) => mm.value == i32::MIN,
        ValueKind::Rectangle(r) => r.children().into_iter().any(|c| kind_unset(&c.kind)),
        ValueKind::StringArray(v) => v.is_empty(),
        ValueKind::DoubleArray(v) | ValueKind::TimeArray(v) => v.is_empty(),
        ValueKind::IntegerArray(v) => v.is_empty(),
        ValueKind::BoolArray(v) => v.is_empty(),
    }
}

/// A named, typed, change-tracked unit of daemon state.
#[derive(Debug, Clone)]
pub struct Value {
    name: String,
    description: String,
    flags: ValueFlags,
    kind: ValueKind,
}

impl Value {
    /// Construct with the default (unset) payload for the flag combination.
    pub fn new(
        flags: ValueFlags,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, FlagsError> {
        let kind = default_kind(&flags)?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            flags,
            kind,
        })
    }

    /// Internal plain scalar, used for rectangle children.
    pub(crate) fn plain(base: BaseType, name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            flags: ValueFlags::new(base),
            kind: scalar_kind(base, false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn flags(&self) -> &ValueFlags {
        &self.flags
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn base_type(&self) -> BaseType {
        self.flags.base
    }

    pub fn is_writable(&self) -> bool {
        self.flags.writable
    }

    pub fn set_severity(&mut self, severity: Severity) {
        if self.flags.severity != severity {
            self.flags.severity = severity;
            self.mark_changed();
        }
    }

    // ── Change tracking ─────────────────────────────────────────────────

    pub fn was_changed(&self) -> bool {
        if self.flags.changed {
            return true;
        }
        match &self.kind {
            ValueKind::Rectangle(r) => r.was_changed(),
            _ => false,
        }
    }

    pub fn reset_changed(&mut self) {
        self.flags.changed = false;
        if let ValueKind::Rectangle(r) = &mut self.kind {
            r.reset_changed();
        }
    }

    pub fn need_send(&self) -> bool {
        self.flags.need_send
    }

    pub fn reset_need_send(&mut self) {
        self.flags.need_send = false;
    }

    /// Force both dirty bits, e.g. after out-of-band payload access.
    pub fn mark_changed(&mut self) {
        self.flags.changed = true;
        self.flags.need_send = true;
    }

    fn commit_kind(&mut self, kind: ValueKind) {
        if !payload_identical(&self.kind, &kind) {
            self.kind = kind;
            self.mark_changed();
        }
    }

    fn normalized(&self, v: f64) -> f64 {
        if self.flags.display == DisplayType::DegDist180 {
            norm180(v)
        } else {
            v
        }
    }

    // ── Parse / serialize ───────────────────────────────────────────────

    /// Parse the payload from wire tokens. Arity or format mismatch leaves
    /// the payload untouched.
    pub fn set_from_tokens(&mut self, toks: &mut Tokens<'_>) -> Result<(), ValueError> {
        let parsed = match &self.kind {
            ValueKind::String(_) => ValueKind::String(toks.next_str()?.to_string()),
            ValueKind::Integer(_) => ValueKind::Integer(toks.next_i32()?),
            ValueKind::Long(_) => ValueKind::Long(toks.next_i64()?),
            ValueKind::Double(_) => ValueKind::Double(self.normalized(toks.next_f64()?)),
            ValueKind::Time(_) => ValueKind::Time(toks.next_f64()?),
            ValueKind::Float(_) => ValueKind::Float(toks.next_f32()?),
            ValueKind::Bool(_) => ValueKind::Bool(parse_bool(toks.next_str()?)?),
            ValueKind::Selection(sel) => {
                let token = toks.next_str()?;
                let index = match token.parse::<i32>() {
                    Ok(i) => {
                        if !sel.in_range(i) {
                            return Err(ValueError::OutOfBounds);
                        }
                        i
                    }
                    Err(_) => sel.find(token).ok_or_else(|| {
                        ValueError::InvalidValue(format!("unknown selection option '{token}'"))
                    })?,
                };
                ValueKind::Selection(Selection {
                    index,
                    options: sel.options.clone(),
                })
            }
            ValueKind::RaDec(_) | ValueKind::AltAz(_) => {
                let first = self.normalized(toks.next_f64()?);
                let second = if toks.is_empty() {
                    first
                } else {
                    self.normalized(toks.next_f64()?)
                };
                let pair = AnglePair { first, second };
                match self.kind {
                    ValueKind::RaDec(_) => ValueKind::RaDec(pair),
                    _ => ValueKind::AltAz(pair),
                }
            }
            ValueKind::Stat(st) => {
                let mut parsed = DoubleStat::parse(toks)?;
                parsed.samples = st.samples.clone();
                ValueKind::Stat(parsed)
            }
            ValueKind::Timeserie(ts) => {
                let mut parsed = Timeserie::parse(toks)?;
                parsed.samples = ts.samples.clone();
                ValueKind::Timeserie(parsed)
            }
            ValueKind::DoubleMinMax(mm) => {
                let mut parsed = mm.clone();
                parsed.parse_into(toks)?;
                parsed.value = self.normalized(parsed.value);
                ValueKind::DoubleMinMax(parsed)
            }
            ValueKind::IntegerMinMax(mm) => {
                let mut parsed = mm.clone();
                parsed.parse_into(toks)?;
                ValueKind::IntegerMinMax(parsed)
            }
            ValueKind::Rectangle(r) => {
                let mut parsed = r.clone();
                parsed.parse_into(toks)?;
                ValueKind::Rectangle(parsed)
            }
            ValueKind::StringArray(_) => ValueKind::StringArray(array::parse_strings(toks)?),
            ValueKind::DoubleArray(_) => ValueKind::DoubleArray(
                array::parse_f64s(toks)?
                    .into_iter()
                    .map(|v| self.normalized(v))
                    .collect(),
            ),
            ValueKind::TimeArray(_) => ValueKind::TimeArray(array::parse_f64s(toks)?),
            ValueKind::IntegerArray(_) => ValueKind::IntegerArray(array::parse_i32s(toks)?),
            ValueKind::BoolArray(_) => ValueKind::BoolArray(array::parse_bools(toks)?),
        };
        self.commit_kind(parsed);
        Ok(())
    }

    /// Parse the payload from a single free-form string — the textual
    /// grammar [`Value::encode`] produces round-trips through here.
    pub fn set_from_str(&mut self, s: &str) -> Result<(), ValueError> {
        if let ValueKind::String(_) = self.kind {
            // Whole-string payload; strip one optional layer of quotes.
            let payload = s
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(s);
            self.commit_kind(ValueKind::String(payload.to_string()));
            return Ok(());
        }
        let mut toks = Tokens::new(s);
        self.set_from_tokens(&mut toks)?;
        toks.expect_end()
    }

    /// Canonical full-precision serialization (wire form).
    pub fn encode(&self) -> String {
        encode_kind(&self.kind)
    }

    /// Human-readable form; may lose precision.
    pub fn display(&self) -> String {
        match &self.kind {
            ValueKind::Double(v) | ValueKind::Time(v) => format!("{v}"),
            ValueKind::Float(v) => format!("{v}"),
            ValueKind::Bool(b) => {
                let on_off = self.flags.display == DisplayType::OnOff;
                match (b, on_off) {
                    (Some(true), true) => "on".to_string(),
                    (Some(false), true) => "off".to_string(),
                    (Some(true), false) => "true".to_string(),
                    (Some(false), false) => "false".to_string(),
                    (None, _) => "unknown".to_string(),
                }
            }
            ValueKind::Selection(sel) => sel
                .options
                .get(sel.index as usize)
                .cloned()
                .unwrap_or_else(|| sel.index.to_string()),
            ValueKind::RaDec(p) | ValueKind::AltAz(p) => format!("{} {}", p.first, p.second),
            ValueKind::Stat(st) => format!(
                "{} {} {} {} {} {}",
                st.value, st.n, st.median, st.min, st.max, st.stdev
            ),
            ValueKind::DoubleMinMax(mm) => format!("{} [{} {}]", mm.value, mm.min, mm.max),
            ValueKind::IntegerMinMax(mm) => format!("{} [{} {}]", mm.value, mm.min, mm.max),
            ValueKind::DoubleArray(v) | ValueKind::TimeArray(v) => v
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            ValueKind::BoolArray(v) => {
                let on_off = self.flags.display == DisplayType::OnOff;
                v.iter()
                    .map(|b| match (*b, on_off) {
                        (true, true) => "on",
                        (false, true) => "off",
                        (true, false) => "true",
                        (false, false) => "false",
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            _ => self.encode(),
        }
    }

    // ── Operators / equality / copy ─────────────────────────────────────

    /// Apply `op` against `current`, storing the result in `self` (the
    /// proposed value). For `'+'`/`'-'` the result is `current op self`.
    pub fn apply_op(&mut self, op: Op, current: &Value) -> Result<(), ValueError> {
        if op == Op::Assign {
            return Ok(());
        }
        let sign = if op == Op::Add { 1.0 } else { -1.0 };
        let deg180 = self.flags.display == DisplayType::DegDist180;
        let norm = |v: f64| if deg180 { norm180(v) } else { v };
        match (&mut self.kind, &current.kind) {
            (ValueKind::Integer(n), ValueKind::Integer(c)) => {
                *n = if op == Op::Add {
                    c.wrapping_add(*n)
                } else {
                    c.wrapping_sub(*n)
                };
            }
            (ValueKind::Long(n), ValueKind::Long(c)) => {
                *n = if op == Op::Add {
                    c.wrapping_add(*n)
                } else {
                    c.wrapping_sub(*n)
                };
            }
            (ValueKind::Double(n), ValueKind::Double(c))
            | (ValueKind::Time(n), ValueKind::Time(c)) => {
                *n = norm(c + sign * *n);
            }
            (ValueKind::Float(n), ValueKind::Float(c)) => {
                *n = c + sign as f32 * *n;
            }
            (ValueKind::DoubleMinMax(n), ValueKind::DoubleMinMax(c)) => {
                let result = norm(c.value + sign * n.value);
                if !n.in_bounds(result) {
                    return Err(ValueError::OutOfBounds);
                }
                n.value = result;
            }
            (ValueKind::IntegerMinMax(n), ValueKind::IntegerMinMax(c)) => {
                let result = if op == Op::Add {
                    c.value.wrapping_add(n.value)
                } else {
                    c.value.wrapping_sub(n.value)
                };
                if !n.in_bounds(result) {
                    return Err(ValueError::OutOfBounds);
                }
                n.value = result;
            }
            (ValueKind::RaDec(n), ValueKind::RaDec(c))
            | (ValueKind::AltAz(n), ValueKind::AltAz(c)) => {
                n.first = norm(c.first + sign * n.first);
                n.second = norm(c.second + sign * n.second);
            }
            // modular over the option list, so a filter wheel can cycle
            (ValueKind::Selection(n), ValueKind::Selection(c)) => {
                let len = n.options.len() as i32;
                if len == 0 {
                    return Err(ValueError::OutOfBounds);
                }
                n.index = if op == Op::Add {
                    (c.index + n.index).rem_euclid(len)
                } else {
                    (c.index - n.index).rem_euclid(len)
                };
            }
            (a, b) if std::mem::discriminant(a) != std::mem::discriminant(b) => {
                return Err(ValueError::TypeMismatch);
            }
            _ => return Err(ValueError::UnsupportedOp(op.symbol())),
        }
        Ok(())
    }

    /// Wire-level payload equality; suppresses redundant broadcasts and
    /// redundant queue entries.
    pub fn is_equal(&self, other: &Value) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Integer(a), ValueKind::Integer(b)) => a == b,
            (ValueKind::Long(a), ValueKind::Long(b)) => a == b,
            (ValueKind::Double(a), ValueKind::Double(b))
            | (ValueKind::Time(a), ValueKind::Time(b)) => feq(*a, *b),
            (ValueKind::Float(a), ValueKind::Float(b)) => feq32(*a, *b),
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Selection(a), ValueKind::Selection(b)) => a.index == b.index,
            (ValueKind::RaDec(a), ValueKind::RaDec(b))
            | (ValueKind::AltAz(a), ValueKind::AltAz(b)) => {
                feq(a.first, b.first) && feq(a.second, b.second)
            }
            (ValueKind::Stat(a), ValueKind::Stat(b)) => stat_equal(a, b),
            (ValueKind::Timeserie(a), ValueKind::Timeserie(b)) => stat_equal(&a.stat, &b.stat),
            (ValueKind::DoubleMinMax(a), ValueKind::DoubleMinMax(b)) => a.is_equal(b),
            (ValueKind::IntegerMinMax(a), ValueKind::IntegerMinMax(b)) => {
                a.value == b.value && a.min == b.min && a.max == b.max
            }
            (ValueKind::Rectangle(a), ValueKind::Rectangle(b)) => a.is_equal(b),
            (ValueKind::StringArray(a), ValueKind::StringArray(b)) => a == b,
            (ValueKind::DoubleArray(a), ValueKind::DoubleArray(b))
            | (ValueKind::TimeArray(a), ValueKind::TimeArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| feq(*x, *y))
            }
            (ValueKind::IntegerArray(a), ValueKind::IntegerArray(b)) => a == b,
            (ValueKind::BoolArray(a), ValueKind::BoolArray(b)) => a == b,
            _ => false,
        }
    }

    /// Copy the payload (never identity or flags) from `other`, marking
    /// this value changed iff the payload actually differed.
    pub fn set_from(&mut self, other: &Value) -> Result<(), ValueError> {
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&other.kind) {
            return Err(ValueError::TypeMismatch);
        }
        self.commit_kind(other.kind.clone());
        Ok(())
    }

    /// 1 when the NOT_NULL flag is set and the payload is still the type's
    /// unset sentinel, else 0.
    pub fn check_not_null(&self) -> usize {
        usize::from(self.flags.not_null && kind_unset(&self.kind))
    }

    // ── Arrays ──────────────────────────────────────────────────────────

    pub fn is_array(&self) -> bool {
        self.flags.ext == ExtType::Array
    }

    pub fn array_len(&self) -> Option<usize> {
        match &self.kind {
            ValueKind::StringArray(v) => Some(v.len()),
            ValueKind::DoubleArray(v) | ValueKind::TimeArray(v) => Some(v.len()),
            ValueKind::IntegerArray(v) => Some(v.len()),
            ValueKind::BoolArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Assign one parsed scalar to each of the given indices, leaving all
    /// other members untouched. Indices are bounds-checked before any
    /// mutation.
    pub fn set_indexed(
        &mut self,
        indices: &[usize],
        toks: &mut Tokens<'_>,
    ) -> Result<(), ValueError> {
        let len = self.array_len().ok_or(ValueError::TypeMismatch)?;
        array::check_indices(indices, len)?;
        let parsed = match &self.kind {
            ValueKind::DoubleArray(v) => {
                let x = self.normalized(toks.next_f64()?);
                let mut v = v.clone();
                for &i in indices {
                    v[i] = x;
                }
                ValueKind::DoubleArray(v)
            }
            ValueKind::TimeArray(v) => {
                let x = toks.next_f64()?;
                let mut v = v.clone();
                for &i in indices {
                    v[i] = x;
                }
                ValueKind::TimeArray(v)
            }
            ValueKind::IntegerArray(v) => {
                let x = toks.next_i32()?;
                let mut v = v.clone();
                for &i in indices {
                    v[i] = x;
                }
                ValueKind::IntegerArray(v)
            }
            ValueKind::BoolArray(v) => {
                let x = parse_bool(toks.next_str()?)?.ok_or_else(|| {
                    ValueError::InvalidValue("boolean array members cannot be unknown".to_string())
                })?;
                let mut v = v.clone();
                for &i in indices {
                    v[i] = x;
                }
                ValueKind::BoolArray(v)
            }
            ValueKind::StringArray(v) => {
                let x = toks.next_str()?.to_string();
                let mut v = v.clone();
                for &i in indices {
                    v[i] = x.clone();
                }
                ValueKind::StringArray(v)
            }
            _ => return Err(ValueError::TypeMismatch),
        };
        self.commit_kind(parsed);
        Ok(())
    }

    // ── Typed accessors for device code ─────────────────────────────────

    pub fn as_f64(&self) -> Option<f64> {
        match &self.kind {
            ValueKind::Double(v) | ValueKind::Time(v) => Some(*v),
            ValueKind::Float(v) => Some(*v as f64),
            ValueKind::Integer(v) => Some(*v as f64),
            ValueKind::Long(v) => Some(*v as f64),
            ValueKind::Stat(st) => Some(st.value),
            ValueKind::Timeserie(ts) => Some(ts.stat.value),
            ValueKind::DoubleMinMax(mm) => Some(mm.value),
            ValueKind::IntegerMinMax(mm) => Some(mm.value as f64),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match &self.kind {
            ValueKind::Integer(v) => Some(*v),
            ValueKind::Selection(sel) => Some(sel.index),
            ValueKind::IntegerMinMax(mm) => Some(mm.value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.kind {
            ValueKind::Long(v) => Some(*v),
            ValueKind::Integer(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<Option<bool>> {
        match &self.kind {
            ValueKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn set_double(&mut self, v: f64) -> Result<(), ValueError> {
        let v = self.normalized(v);
        let changed = match &mut self.kind {
            ValueKind::Double(d) | ValueKind::Time(d) => {
                if feq(*d, v) {
                    false
                } else {
                    *d = v;
                    true
                }
            }
            ValueKind::Float(f) => {
                if feq32(*f, v as f32) {
                    false
                } else {
                    *f = v as f32;
                    true
                }
            }
            ValueKind::Stat(st) => {
                if feq(st.value, v) {
                    false
                } else {
                    st.value = v;
                    true
                }
            }
            ValueKind::DoubleMinMax(mm) => {
                if feq(mm.value, v) {
                    false
                } else {
                    mm.value = v;
                    true
                }
            }
            _ => return Err(ValueError::TypeMismatch),
        };
        if changed {
            self.mark_changed();
        }
        Ok(())
    }

    pub fn set_integer(&mut self, v: i32) -> Result<(), ValueError> {
        let changed = match &mut self.kind {
            ValueKind::Integer(n) => {
                if *n == v {
                    false
                } else {
                    *n = v;
                    true
                }
            }
            ValueKind::IntegerMinMax(mm) => {
                if mm.value == v {
                    false
                } else {
                    mm.value = v;
                    true
                }
            }
            _ => return Err(ValueError::TypeMismatch),
        };
        if changed {
            self.mark_changed();
        }
        Ok(())
    }

    pub fn set_long(&mut self, v: i64) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Long(n) => {
                if *n != v {
                    *n = v;
                    self.mark_changed();
                }
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    pub fn set_string(&mut self, s: impl Into<String>) -> Result<(), ValueError> {
        let s = s.into();
        match &mut self.kind {
            ValueKind::String(cur) => {
                if *cur != s {
                    *cur = s;
                    self.mark_changed();
                }
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    pub fn set_bool(&mut self, b: Option<bool>) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Bool(cur) => {
                if *cur != b {
                    *cur = b;
                    self.mark_changed();
                }
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    // ── Selection ───────────────────────────────────────────────────────

    pub fn sel_index(&self) -> Option<i32> {
        match &self.kind {
            ValueKind::Selection(sel) => Some(sel.index),
            _ => None,
        }
    }

    pub fn sel_name(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Selection(sel) => {
                sel.options.get(sel.index as usize).map(String::as_str)
            }
            _ => None,
        }
    }

    pub fn sel_options(&self) -> Option<&[String]> {
        match &self.kind {
            ValueKind::Selection(sel) => Some(&sel.options),
            _ => None,
        }
    }

    /// Append a selection option. Does not touch the index.
    pub fn add_sel_option(&mut self, name: impl Into<String>) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Selection(sel) => {
                sel.options.push(name.into());
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    /// Replace the option set; the index resets to 0.
    pub fn set_sel_options(&mut self, options: Vec<String>) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Selection(sel) => {
                sel.options = options;
                sel.index = 0;
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    /// Out-of-range indices are rejected without mutation.
    pub fn set_sel_index(&mut self, index: i32) -> Result<(), ValueError> {
        let changed = match &mut self.kind {
            ValueKind::Selection(sel) => {
                if !sel.in_range(index) {
                    return Err(ValueError::OutOfBounds);
                }
                if sel.index == index {
                    false
                } else {
                    sel.index = index;
                    true
                }
            }
            _ => return Err(ValueError::TypeMismatch),
        };
        if changed {
            self.mark_changed();
        }
        Ok(())
    }

    pub fn set_sel_by_name(&mut self, name: &str) -> Result<(), ValueError> {
        let index = match &self.kind {
            ValueKind::Selection(sel) => sel.find(name).ok_or_else(|| {
                ValueError::InvalidValue(format!("unknown selection option '{name}'"))
            })?,
            _ => return Err(ValueError::TypeMismatch),
        };
        self.set_sel_index(index)
    }

    // ── Statistics ──────────────────────────────────────────────────────

    pub fn add_sample(&mut self, sample: f64) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Stat(st) => {
                st.add_sample(sample);
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    pub fn add_timed_sample(&mut self, sample: f64, time: f64) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Timeserie(ts) => {
                ts.add_sample(sample, time);
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch),
        }
    }

    /// Recompute statistics from the sample history; marks the value
    /// changed when anything was recomputed.
    pub fn calculate_stats(&mut self) -> Result<(), ValueError> {
        let recomputed = match &mut self.kind {
            ValueKind::Stat(st) => st.calculate(),
            ValueKind::Timeserie(ts) => ts.calculate(),
            _ => return Err(ValueError::TypeMismatch),
        };
        if recomputed {
            self.mark_changed();
        }
        Ok(())
    }

    pub fn clear_stats(&mut self) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::Stat(st) => st.clear(),
            ValueKind::Timeserie(ts) => ts.clear(),
            _ => return Err(ValueError::TypeMismatch),
        }
        self.mark_changed();
        Ok(())
    }

    // ── Bounds ──────────────────────────────────────────────────────────

    pub fn set_min_from_str(&mut self, s: &str) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::DoubleMinMax(mm) => {
                mm.min = s.parse().map_err(|_| ValueError::InvalidParams)?;
            }
            ValueKind::IntegerMinMax(mm) => {
                mm.min = s.parse().map_err(|_| ValueError::InvalidParams)?;
            }
            _ => return Err(ValueError::TypeMismatch),
        }
        self.mark_changed();
        Ok(())
    }

    pub fn set_max_from_str(&mut self, s: &str) -> Result<(), ValueError> {
        match &mut self.kind {
            ValueKind::DoubleMinMax(mm) => {
                mm.max = s.parse().map_err(|_| ValueError::InvalidParams)?;
            }
            ValueKind::IntegerMinMax(mm) => {
                mm.max = s.parse().map_err(|_| ValueError::InvalidParams)?;
            }
            _ => return Err(ValueError::TypeMismatch),
        }
        self.mark_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn value(flags: ValueFlags) -> Value {
        Value::new(flags, "TEST", "test value").unwrap()
    }

    #[test]
    fn test_round_trip_law_scalars() {
        // every base type: set_from_str(encode()) must reproduce an equal
        // payload, including the unset sentinels
        let bases = [
            BaseType::String,
            BaseType::Integer,
            BaseType::Time,
            BaseType::Double,
            BaseType::Float,
            BaseType::Bool,
            BaseType::Long,
            BaseType::RaDec,
            BaseType::AltAz,
        ];
        for base in bases {
            let v1 = value(ValueFlags::new(base));
            let mut v2 = value(ValueFlags::new(base));
            v2.set_from_str(&v1.encode()).unwrap();
            assert!(v2.is_equal(&v1), "sentinel round-trip failed for {base:?}");
        }

        let mut v1 = value(ValueFlags::new(BaseType::Double));
        v1.set_from_str("12.5").unwrap();
        let mut v2 = value(ValueFlags::new(BaseType::Double));
        v2.set_from_str(&v1.encode()).unwrap();
        assert!(v2.is_equal(&v1));
    }

    #[test]
    fn test_round_trip_law_composites() {
        let mut arr = value(ValueFlags::new(BaseType::Double).ext(ExtType::Array));
        arr.set_from_str("1.0 NaN 3.5").unwrap();
        let mut arr2 = value(ValueFlags::new(BaseType::Double).ext(ExtType::Array));
        arr2.set_from_str(&arr.encode()).unwrap();
        assert!(arr2.is_equal(&arr));

        let mut mm = value(ValueFlags::new(BaseType::Double).ext(ExtType::MinMax));
        mm.set_from_str("5 0 10").unwrap();
        let mut mm2 = value(ValueFlags::new(BaseType::Double).ext(ExtType::MinMax));
        mm2.set_from_str(&mm.encode()).unwrap();
        assert!(mm2.is_equal(&mm));

        let mut rect = value(ValueFlags::new(BaseType::Integer).ext(ExtType::Rectangle));
        rect.set_from_str("0 0 640 480").unwrap();
        let mut rect2 = value(ValueFlags::new(BaseType::Integer).ext(ExtType::Rectangle));
        rect2.set_from_str(&rect.encode()).unwrap();
        assert!(rect2.is_equal(&rect));
    }

    #[test]
    fn test_change_flag_only_on_real_change() {
        let mut v = value(ValueFlags::new(BaseType::Integer));
        v.set_from_str("5").unwrap();
        assert!(v.was_changed());
        v.reset_changed();
        v.set_from_str("5").unwrap();
        assert!(!v.was_changed());
        v.set_from_str("6").unwrap();
        assert!(v.was_changed());
    }

    #[test]
    fn test_need_send_and_changed_cleared_independently() {
        let mut v = value(ValueFlags::new(BaseType::Double));
        v.set_from_str("1.0").unwrap();
        assert!(v.need_send());
        assert!(v.was_changed());
        v.reset_need_send();
        assert!(!v.need_send());
        assert!(v.was_changed());
        v.reset_changed();
        assert!(!v.was_changed());
    }

    #[test]
    fn test_parse_failure_leaves_payload() {
        let mut v = value(ValueFlags::new(BaseType::Integer));
        v.set_from_str("42").unwrap();
        v.reset_changed();
        assert!(v.set_from_str("not-a-number").is_err());
        assert_eq!(v.as_i32(), Some(42));
        assert!(!v.was_changed());
    }

    #[test]
    fn test_selection_bounds() {
        let mut v = value(ValueFlags::new(BaseType::Selection));
        for opt in ["B", "V", "R"] {
            v.add_sel_option(opt).unwrap();
        }
        v.reset_changed();
        assert_eq!(v.set_sel_index(3), Err(ValueError::OutOfBounds));
        assert_eq!(v.set_sel_index(-1), Err(ValueError::OutOfBounds));
        assert!(v.set_sel_by_name("H-alpha").is_err());
        assert!(!v.was_changed());
        assert_eq!(v.sel_index(), Some(0));

        v.set_sel_by_name("R").unwrap();
        assert_eq!(v.sel_index(), Some(2));
        assert_eq!(v.sel_name(), Some("R"));
    }

    #[test]
    fn test_selection_parses_index_or_name() {
        let mut v = value(ValueFlags::new(BaseType::Selection));
        v.set_sel_options(vec!["open".into(), "closed".into()]).unwrap();
        v.set_from_str("closed").unwrap();
        assert_eq!(v.sel_index(), Some(1));
        v.set_from_str("0").unwrap();
        assert_eq!(v.sel_index(), Some(0));
        assert!(v.set_from_str("7").is_err());
        assert_eq!(v.sel_index(), Some(0));
    }

    #[test]
    fn test_selection_op_wraps_over_options() {
        let mut current = value(ValueFlags::new(BaseType::Selection));
        for opt in ["B", "V", "R"] {
            current.add_sel_option(opt).unwrap();
        }
        current.set_sel_index(2).unwrap();

        // '+' wraps forward past the last option
        let mut proposed = current.clone();
        proposed.set_sel_index(2).unwrap();
        proposed.apply_op(Op::Add, &current).unwrap();
        assert_eq!(proposed.sel_index(), Some(1));

        // '-' wraps backward below zero
        current.set_sel_index(0).unwrap();
        let mut proposed = current.clone();
        proposed.set_sel_index(1).unwrap();
        proposed.apply_op(Op::Sub, &current).unwrap();
        assert_eq!(proposed.sel_index(), Some(2));
    }

    #[test]
    fn test_apply_op_arithmetic() {
        let mut current = value(ValueFlags::new(BaseType::Double));
        current.set_from_str("10.0").unwrap();
        let mut proposed = current.clone();
        proposed.set_from_str("2.5").unwrap();
        proposed.apply_op(Op::Add, &current).unwrap();
        assert_eq!(proposed.as_f64(), Some(12.5));

        let mut proposed = current.clone();
        proposed.set_from_str("2.5").unwrap();
        proposed.apply_op(Op::Sub, &current).unwrap();
        assert_eq!(proposed.as_f64(), Some(7.5));
    }

    #[test]
    fn test_apply_op_unsupported_for_strings() {
        let current = value(ValueFlags::new(BaseType::String));
        let mut proposed = current.clone();
        proposed.set_from_str("abc").unwrap();
        assert_eq!(
            proposed.apply_op(Op::Add, &current),
            Err(ValueError::UnsupportedOp('+'))
        );
    }

    #[test]
    fn test_minmax_op_bounds() {
        let mut current = value(ValueFlags::new(BaseType::Double).ext(ExtType::MinMax));
        current.set_from_str("8 0 10").unwrap();
        let mut proposed = current.clone();
        proposed.set_double(5.0).unwrap();
        assert_eq!(
            proposed.apply_op(Op::Add, &current),
            Err(ValueError::OutOfBounds)
        );

        let mut proposed = current.clone();
        proposed.set_double(2.0).unwrap();
        proposed.apply_op(Op::Add, &current).unwrap();
        assert_eq!(proposed.as_f64(), Some(10.0));
    }

    #[test]
    fn test_deg_dist_180_normalization() {
        let mut v = value(
            ValueFlags::new(BaseType::Double).display(DisplayType::DegDist180),
        );
        v.set_from_str("270").unwrap();
        assert_eq!(v.as_f64(), Some(-90.0));
        v.set_double(540.0).unwrap();
        assert_eq!(v.as_f64(), Some(180.0));
        v.set_double(-180.0).unwrap();
        assert_eq!(v.as_f64(), Some(180.0));
    }

    #[test]
    fn test_not_null_audit_sentinels() {
        let unset = value(ValueFlags::new(BaseType::Double).not_null());
        assert_eq!(unset.check_not_null(), 1);

        let mut set = value(ValueFlags::new(BaseType::Double).not_null());
        set.set_from_str("0.0").unwrap();
        assert_eq!(set.check_not_null(), 0);

        let int_unset = value(ValueFlags::new(BaseType::Integer).not_null());
        assert_eq!(int_unset.check_not_null(), 1);

        let not_flagged = value(ValueFlags::new(BaseType::Double));
        assert_eq!(not_flagged.check_not_null(), 0);

        let str_unset = value(ValueFlags::new(BaseType::String).not_null());
        assert_eq!(str_unset.check_not_null(), 1);
    }

    #[test]
    fn test_set_indexed_scopes_write() {
        let mut arr = value(ValueFlags::new(BaseType::Double).ext(ExtType::Array));
        arr.set_from_str("0.5 1.5 2.5 3.5 4.5").unwrap();
        arr.reset_changed();
        arr.set_indexed(&[1, 2, 3], &mut Tokens::new("0.0")).unwrap();
        assert_eq!(arr.encode(), array::encode_f64s(&[0.5, 0.0, 0.0, 0.0, 4.5]));
        assert!(arr.was_changed());
    }

    #[test]
    fn test_set_indexed_rejects_out_of_range() {
        let mut arr = value(ValueFlags::new(BaseType::Double).ext(ExtType::Array));
        arr.set_from_str("1 2 3").unwrap();
        arr.reset_changed();
        assert!(
            arr.set_indexed(&[3], &mut Tokens::new("9.0")).is_err()
        );
        assert!(!arr.was_changed());
    }

    #[test]
    fn test_set_from_copies_payload_not_flags() {
        let mut live = value(ValueFlags::new(BaseType::Double).writable());
        let mut proposed = live.clone();
        proposed.set_from_str("3.25").unwrap();
        live.set_from(&proposed).unwrap();
        assert_eq!(live.as_f64(), Some(3.25));
        assert!(live.is_writable());
        assert!(live.was_changed());
        assert!(live.need_send());
    }

    #[test]
    fn test_set_from_type_mismatch() {
        let mut live = value(ValueFlags::new(BaseType::Double));
        let other = value(ValueFlags::new(BaseType::Integer));
        assert_eq!(live.set_from(&other), Err(ValueError::TypeMismatch));
    }

    #[test]
    fn test_radec_one_or_two_tokens() {
        let mut v = value(ValueFlags::new(BaseType::RaDec));
        v.set_from_tokens(&mut Tokens::new("10.5 -45.25")).unwrap();
        match v.kind() {
            ValueKind::RaDec(p) => {
                assert_eq!(p.first, 10.5);
                assert_eq!(p.second, -45.25);
            }
            _ => unreachable!(),
        }
        v.set_from_tokens(&mut Tokens::new("1.0")).unwrap();
        match v.kind() {
            ValueKind::RaDec(p) => {
                assert_eq!(p.first, 1.0);
                assert_eq!(p.second, 1.0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_bool_on_off_display() {
        let mut v = value(
            ValueFlags::new(BaseType::Bool).display(DisplayType::OnOff),
        );
        v.set_from_str("on").unwrap();
        assert_eq!(v.encode(), "1");
        assert_eq!(v.display(), "on");
        v.set_from_str("0").unwrap();
        assert_eq!(v.display(), "off");
    }

    #[test]
    fn test_unsupported_combination_rejected() {
        let flags = ValueFlags::new(BaseType::String).ext(ExtType::Stat);
        assert!(Value::new(flags, "X", "").is_err());
    }
}
