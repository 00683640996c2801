//! Device status word and progress bounds.
//!
//! The status word is the single source of truth for what the device is
//! doing. Its bit layout is part of the wire protocol and also serves as
//! the gating condition for deferred writes.

/// Error nibble of the status word.
pub const ERROR_MASK: u32 = 0x000f_0000;
/// Device reported a hardware problem.
pub const ERROR_HW: u32 = 0x0002_0000;
/// Device is not ready to operate.
pub const ERROR_NOT_READY: u32 = 0x0001_0000;
/// Device is blocked by another subsystem.
pub const ERROR_BLOCKED: u32 = 0x0004_0000;

/// Block-operation bits; set while an operation must not be disturbed.
pub const BOP_MASK: u32 = 0x3f00_0000;
/// Immediate-stop request bit.
pub const STOP_MASK: u32 = 0x4000_0000;
/// Bad-weather bit.
pub const WEATHER_MASK: u32 = 0x8000_0000;

/// Echo bit added to status sent back to the connection that commanded
/// the transition.
pub const STATE_COMMANDED: u32 = 0x0000_1000;

/// Current status word plus optional progress-interval bounds.
///
/// Progress bounds are UNIX timestamps; NaN means "no progress interval".
#[derive(Debug, Clone, Copy)]
pub struct DeviceState {
    pub value: u32,
    pub start: f64,
    pub expected_end: f64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            value: 0,
            start: f64::NAN,
            expected_end: f64::NAN,
        }
    }
}

impl DeviceState {
    pub fn has_progress(&self) -> bool {
        !self.start.is_nan() && !self.expected_end.is_nan()
    }

    /// Merge-update: clears the error nibble and `mask`, then ORs in
    /// `new_state`.
    pub fn masked(&self, mask: u32, new_state: u32) -> u32 {
        (self.value & !(ERROR_MASK | mask)) | new_state
    }
}
