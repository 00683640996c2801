#![deny(unsafe_code)]

//! Nightjar core daemon runtime.
//!
//! Provides the building blocks of an observatory device daemon: the
//! typed value store with change tracking, the state-gated deferred
//! write queue, the line-oriented TCP protocol, and the process
//! lifecycle (lock file, daemonization, autorestart). A concrete device
//! plugs in through the [`Device`] trait and inherits the whole command
//! surface.

/// Connection registry and outbound broadcast channels.
pub mod connection;
/// Daemon orchestration: value store, write pipeline, command dispatch.
pub mod daemon;
/// Device hook trait and the hardware-free default device.
pub mod device;
/// Error types, one mechanism per layer.
pub mod error;
/// The decomposed value type word and its wire packing.
pub mod flags;
/// Lock file, daemonization, autorestart, privilege drop.
pub mod lifecycle;
/// Wire tokenizer and small shared parsers.
pub mod parse;
/// Protocol line rendering.
pub mod proto;
/// The deferred-write queue.
pub mod queue;
/// TCP server loop.
pub mod server;
/// Device status word and progress bounds.
pub mod state;
/// Typed, change-tracked values.
pub mod value;

pub use connection::ConnId;
pub use daemon::{Daemon, SetOutcome, ValueStore};
pub use device::{Device, GenericDevice, HookAction};
pub use error::{CommandError, DaemonError, HwError, ValueError};
pub use flags::{BaseType, DisplayType, ExtType, FlagsError, Severity, ValueFlags};
pub use queue::ValueId;
pub use server::DeviceServer;
pub use state::DeviceState;
pub use value::{Op, Value, ValueKind};
