//! The 32-bit value type word, decomposed.
//!
//! Every value carries a single integer on the wire that encodes its base
//! type, extension type, display hint, and a dozen independent flag bits.
//! The bit layout is fixed by the protocol; internally we keep a structured
//! [`ValueFlags`] record and confine all masking to [`ValueFlags::pack`] and
//! [`ValueFlags::unpack`].

/// Mask for the mutually-exclusive base type bits.
pub const MASK_BASE_TYPE: u32 = 0x0000_000f;
/// Mask for the mutually-exclusive extension type bits.
pub const MASK_EXT_TYPE: u32 = 0x0000_0070;
/// Mask for the display-hint field.
pub const MASK_DISPLAY: u32 = 0x003f_0000;
/// Mask for the per-value error severity field.
pub const MASK_SEVERITY: u32 = 0x3000_0000;

const FLAG_DEBUG: u32 = 0x0000_0080;
const FLAG_FITS: u32 = 0x0000_0100;
const FLAG_DEV_PREFIX: u32 = 0x0000_0200;
const FLAG_CHANGED: u32 = 0x0000_0400;
const FLAG_AUTOSAVE: u32 = 0x0080_0000;
const FLAG_NEED_SEND: u32 = 0x0100_0000;
const FLAG_WRITABLE: u32 = 0x0200_0000;
const FLAG_NOT_NULL: u32 = 0x0800_0000;

const SEVERITY_WARNING: u32 = 0x1000_0000;
const SEVERITY_ERROR: u32 = 0x2000_0000;

/// Base payload type of a value. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    String,
    Integer,
    Time,
    Double,
    Float,
    Bool,
    Selection,
    Long,
    RaDec,
    AltAz,
}

impl BaseType {
    fn code(self) -> u32 {
        match self {
            BaseType::String => 0x01,
            BaseType::Integer => 0x02,
            BaseType::Time => 0x03,
            BaseType::Double => 0x04,
            BaseType::Float => 0x05,
            BaseType::Bool => 0x06,
            BaseType::Selection => 0x07,
            BaseType::Long => 0x08,
            BaseType::RaDec => 0x09,
            BaseType::AltAz => 0x0A,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x01 => BaseType::String,
            0x02 => BaseType::Integer,
            0x03 => BaseType::Time,
            0x04 => BaseType::Double,
            0x05 => BaseType::Float,
            0x06 => BaseType::Bool,
            0x07 => BaseType::Selection,
            0x08 => BaseType::Long,
            0x09 => BaseType::RaDec,
            0x0A => BaseType::AltAz,
            _ => return None,
        })
    }
}

/// Extension type layered on top of the base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtType {
    #[default]
    Plain,
    Stat,
    MinMax,
    Rectangle,
    Array,
    Timeserie,
}

impl ExtType {
    fn code(self) -> u32 {
        match self {
            ExtType::Plain => 0x00,
            ExtType::Stat => 0x10,
            ExtType::MinMax => 0x20,
            ExtType::Rectangle => 0x30,
            ExtType::Array => 0x40,
            ExtType::Timeserie => 0x70,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x00 => ExtType::Plain,
            0x10 => ExtType::Stat,
            0x20 => ExtType::MinMax,
            0x30 => ExtType::Rectangle,
            0x40 => ExtType::Array,
            0x70 => ExtType::Timeserie,
            _ => return None,
        })
    }
}

/// Display hint — affects human formatting only, never the wire payload.
///
/// `DegDist180` additionally forces range normalization of double payloads
/// into (-180, 180] on every set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayType {
    #[default]
    Generic,
    Ra,
    Dec,
    Degrees,
    DegDist,
    Percents,
    Hex,
    ByteSize,
    Kmg,
    Interval,
    OnOff,
    DegDist180,
}

impl DisplayType {
    fn code(self) -> u32 {
        match self {
            DisplayType::Generic => 0x0,
            DisplayType::Ra => 0x1,
            DisplayType::Dec => 0x2,
            DisplayType::Degrees => 0x3,
            DisplayType::DegDist => 0x4,
            DisplayType::Percents => 0x5,
            DisplayType::Hex => 0x6,
            DisplayType::ByteSize => 0x7,
            DisplayType::Kmg => 0x8,
            DisplayType::Interval => 0x9,
            DisplayType::OnOff => 0xB,
            DisplayType::DegDist180 => 0xC,
        }
    }

    fn from_code(code: u32) -> Self {
        match code {
            0x1 => DisplayType::Ra,
            0x2 => DisplayType::Dec,
            0x3 => DisplayType::Degrees,
            0x4 => DisplayType::DegDist,
            0x5 => DisplayType::Percents,
            0x6 => DisplayType::Hex,
            0x7 => DisplayType::ByteSize,
            0x8 => DisplayType::Kmg,
            0x9 => DisplayType::Interval,
            0xB => DisplayType::OnOff,
            0xC => DisplayType::DegDist180,
            // Unknown hints degrade to generic formatting.
            _ => DisplayType::Generic,
        }
    }
}

/// Per-value error severity, shown by clients next to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Error,
}

/// Errors from unpacking a wire type word.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlagsError {
    #[error("unknown base type code {0:#x}")]
    UnknownBaseType(u32),

    #[error("unknown extension type code {0:#x}")]
    UnknownExtType(u32),

    #[error("unsupported base/extension type combination {0:#x}")]
    UnsupportedCombination(u32),
}

/// Structured form of the wire type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueFlags {
    pub base: BaseType,
    pub ext: ExtType,
    pub display: DisplayType,
    /// Clients may write this value.
    pub writable: bool,
    /// Record this value into FITS headers.
    pub fits: bool,
    /// Prefix the value name with the device name in FITS headers.
    pub dev_prefix: bool,
    /// Debug-only value, hidden from normal listings.
    pub debug: bool,
    /// Persist to the autosave file on every change.
    pub autosave: bool,
    /// Sentinel payload at init time is an error.
    pub not_null: bool,
    /// Payload differs from the last explicit reset.
    pub changed: bool,
    /// Payload differs from the last broadcast.
    pub need_send: bool,
    pub severity: Severity,
}

impl ValueFlags {
    /// A plain, read-only scalar of the given base type.
    pub fn new(base: BaseType) -> Self {
        Self {
            base,
            ext: ExtType::Plain,
            display: DisplayType::Generic,
            writable: false,
            fits: false,
            dev_prefix: false,
            debug: false,
            autosave: false,
            not_null: false,
            changed: false,
            need_send: false,
            severity: Severity::Ok,
        }
    }

    pub fn ext(mut self, ext: ExtType) -> Self {
        self.ext = ext;
        self
    }

    pub fn display(mut self, display: DisplayType) -> Self {
        self.display = display;
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn fits(mut self) -> Self {
        self.fits = true;
        self
    }

    pub fn autosave(mut self) -> Self {
        self.autosave = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Pack into the wire type word. The inverse of [`ValueFlags::unpack`].
    pub fn pack(&self) -> u32 {
        let mut word = self.base.code() | self.ext.code() | (self.display.code() << 16);
        if self.debug {
            word |= FLAG_DEBUG;
        }
        if self.fits {
            word |= FLAG_FITS;
        }
        if self.dev_prefix {
            word |= FLAG_DEV_PREFIX;
        }
        if self.changed {
            word |= FLAG_CHANGED;
        }
        if self.autosave {
            word |= FLAG_AUTOSAVE;
        }
        if self.need_send {
            word |= FLAG_NEED_SEND;
        }
        if self.writable {
            word |= FLAG_WRITABLE;
        }
        if self.not_null {
            word |= FLAG_NOT_NULL;
        }
        word |= match self.severity {
            Severity::Ok => 0,
            Severity::Warning => SEVERITY_WARNING,
            Severity::Error => SEVERITY_ERROR,
        };
        word
    }

    /// Unpack a wire type word into its structured form.
    pub fn unpack(word: u32) -> Result<Self, FlagsError> {
        let base = BaseType::from_code(word & MASK_BASE_TYPE)
            .ok_or(FlagsError::UnknownBaseType(word & MASK_BASE_TYPE))?;
        let ext = ExtType::from_code(word & MASK_EXT_TYPE)
            .ok_or(FlagsError::UnknownExtType(word & MASK_EXT_TYPE))?;
        let severity = if word & SEVERITY_ERROR != 0 {
            Severity::Error
        } else if word & SEVERITY_WARNING != 0 {
            Severity::Warning
        } else {
            Severity::Ok
        };
        Ok(Self {
            base,
            ext,
            display: DisplayType::from_code((word & MASK_DISPLAY) >> 16),
            writable: word & FLAG_WRITABLE != 0,
            fits: word & FLAG_FITS != 0,
            dev_prefix: word & FLAG_DEV_PREFIX != 0,
            debug: word & FLAG_DEBUG != 0,
            autosave: word & FLAG_AUTOSAVE != 0,
            not_null: word & FLAG_NOT_NULL != 0,
            changed: word & FLAG_CHANGED != 0,
            need_send: word & FLAG_NEED_SEND != 0,
            severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pack_unpack_round_trip() {
        let flags = ValueFlags::new(BaseType::Double)
            .ext(ExtType::Array)
            .display(DisplayType::DegDist180)
            .writable()
            .fits()
            .autosave()
            .not_null();
        let word = flags.pack();
        assert_eq!(ValueFlags::unpack(word).unwrap(), flags);
    }

    #[test]
    fn test_known_bit_positions() {
        let flags = ValueFlags::new(BaseType::Double).writable();
        // double = 0x04, writable = 0x02000000
        assert_eq!(flags.pack(), 0x0200_0004);

        let flags = ValueFlags::new(BaseType::Bool).display(DisplayType::OnOff);
        assert_eq!(flags.pack(), 0x000b_0006);
    }

    #[test]
    fn test_unknown_base_type_rejected() {
        assert_eq!(
            ValueFlags::unpack(0x0000_000f),
            Err(FlagsError::UnknownBaseType(0x0f))
        );
    }

    #[test]
    fn test_unknown_ext_type_rejected() {
        assert_eq!(
            ValueFlags::unpack(0x0000_0051),
            Err(FlagsError::UnknownExtType(0x50))
        );
    }

    #[test]
    fn test_severity_bits() {
        let mut flags = ValueFlags::new(BaseType::Integer);
        flags.severity = Severity::Error;
        let word = flags.pack();
        assert_eq!(word & MASK_SEVERITY, 0x2000_0000);
        assert_eq!(ValueFlags::unpack(word).unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_unknown_display_hint_degrades_to_generic() {
        let word = 0x0004 | (0xA << 16);
        let flags = ValueFlags::unpack(word).unwrap();
        assert_eq!(flags.display, DisplayType::Generic);
    }
}
