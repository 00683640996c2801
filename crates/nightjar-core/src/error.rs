//! Error types, one mechanism per layer.
//!
//! Per-value parse/apply operations return [`ValueError`]; the command
//! dispatch layer maps those onto the negative wire response codes via
//! [`CommandError`]; daemon bring-up failures use [`DaemonError`] and are
//! fatal. Device hook failures travel as [`HwError`] and become `-4`
//! responses, never process exits.

use crate::flags::FlagsError;

/// Failure of a single value parse or apply operation.
///
/// These never mutate the value they were invoked on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("wrong number or format of parameters")]
    InvalidParams,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("value out of bounds")]
    OutOfBounds,

    #[error("array index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("operator '{0}' not supported for this value type")]
    UnsupportedOp(char),

    #[error("value type mismatch")]
    TypeMismatch,
}

/// Device-reported hardware failure, surfaced as a `-4` response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HwError(pub String);

impl HwError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A failed client command, carrying its wire response code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    /// Generic command failure (unknown value, read-only target, unknown
    /// command). Wire code -1.
    #[error("{0}")]
    Command(String),

    /// Wrong parameter count or format. Wire code -2.
    #[error("wrong number or format of parameters")]
    InvalidParams,

    /// Parameter parsed but its value was rejected. Wire code -3.
    #[error("{0}")]
    InvalidValue(String),

    /// Device hook reported a hardware failure. Wire code -4.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Daemon-side failure unrelated to the request. Wire code -5.
    #[error("system error: {0}")]
    System(String),
}

impl CommandError {
    /// The negative completion code sent on the wire.
    pub fn code(&self) -> i32 {
        match self {
            CommandError::Command(_) => -1,
            CommandError::InvalidParams => -2,
            CommandError::InvalidValue(_) => -3,
            CommandError::Hardware(_) => -4,
            CommandError::System(_) => -5,
        }
    }
}

impl From<ValueError> for CommandError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::InvalidParams => CommandError::InvalidParams,
            other => CommandError::InvalidValue(other.to_string()),
        }
    }
}

impl From<HwError> for CommandError {
    fn from(err: HwError) -> Self {
        CommandError::Hardware(err.0)
    }
}

/// Fatal daemon bring-up and registration errors.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("value '{0}' already exists")]
    DuplicateValue(String),

    #[error("unknown value '{0}'")]
    UnknownValue(String),

    #[error("{0} not-null value(s) left unset at init")]
    NullAudit(usize),

    #[error("cannot seed value '{name}': {reason}")]
    Seed { name: String, reason: String },

    #[error("bad value file entry '{0}': unknown type suffix")]
    BadValueSuffix(String),

    #[error(transparent)]
    Flags(#[from] FlagsError),

    #[error(transparent)]
    Config(#[from] nightjar_config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
