//! Device hook surface.
//!
//! A concrete device (camera, focuser, dome...) plugs into the daemon by
//! implementing [`Device`]. Every hook has a neutral default so a device
//! only overrides the seams it cares about.

use crate::daemon::ValueStore;
use crate::error::HwError;
use crate::value::Value;

/// Device verdict on a proposed value change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// Apply immediately.
    Apply,
    /// Accepted, but the hardware will take a while to settle; the daemon
    /// leaves the live payload alone and the device commits it once the
    /// hardware reports the new position.
    ApplySlow,
    /// Accepted, but deferred: the daemon parks the write on its queue and
    /// retries after the next state transition.
    Queue,
    /// Refuse the change; the reason travels back to the client.
    Reject(String),
}

/// Hook points invoked by the daemon around value and state changes.
///
/// Hooks run inside the daemon task; blocking here stalls every
/// connection, so hardware I/O should be bounded.
pub trait Device: Send + 'static {
    /// Authorize or veto a proposed change. `old` is the live value,
    /// `new` the fully parsed and operator-applied result.
    fn set_value(&mut self, old: &Value, new: &Value) -> HookAction {
        let _ = (old, new);
        HookAction::Apply
    }

    /// Refresh hardware-backed values before a broadcast. Errors become a
    /// `-4` response for the requesting client and never kill the daemon.
    fn info(&mut self, values: &mut ValueStore) -> Result<(), HwError> {
        let _ = values;
        Ok(())
    }

    /// Observe a completed state transition.
    fn state_changed(&mut self, new_state: u32, old_state: u32, description: &str) {
        let _ = (new_state, old_state, description);
    }

    /// Observe a committed value change.
    fn value_changed(&mut self, value: &Value) {
        let _ = value;
    }
}

/// Device with no hardware behind it; its values come entirely from value
/// files and client writes.
#[derive(Debug, Default)]
pub struct GenericDevice;

impl Device for GenericDevice {}
