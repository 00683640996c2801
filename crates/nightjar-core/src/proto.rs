//! Wire-protocol line rendering.
//!
//! The protocol is line-oriented text. This module is the only place
//! where values, state, and command completions become protocol lines:
//!
//! - `E <flags> "name" "description"` — value metainfo
//! - `V <name> <payload>` — value payload
//! - `F "name" ["option"]` — selection option (bare form clears)
//! - `S <state> "msg"` / `R <state> <start> <end> "msg"` — status
//! - `P <start> <end>` — progress
//! - `+N msg` / `-N msg` — command completion

use crate::state::DeviceState;
use crate::value::{Value, ValueKind};

/// Completion code for an immediately applied command.
pub const CODE_OK: i32 = 0;
/// Completion code for an accepted but deferred write.
pub const CODE_QUEUED: i32 = 1;

pub fn metainfo_line(value: &Value) -> String {
    format!(
        "E {} \"{}\" \"{}\"",
        value.flags().pack(),
        value.name(),
        value.description()
    )
}

pub fn value_line(value: &Value) -> String {
    match value.kind() {
        // string payloads are quoted so embedded spaces survive framing
        ValueKind::String(s) => format!("V {} \"{}\"", value.name(), s),
        _ => format!("V {} {}", value.name(), value.encode()),
    }
}

/// One `F` line per option, preceded by the bare clear line so clients
/// rebuild rather than append when the option set changes.
pub fn selection_lines(value: &Value) -> Vec<String> {
    let mut lines = vec![format!("F \"{}\"", value.name())];
    if let Some(options) = value.sel_options() {
        for option in options {
            lines.push(format!("F \"{}\" \"{}\"", value.name(), option));
        }
    }
    lines
}

/// Status line; the progress form is used only while both progress bounds
/// are set.
pub fn status_line(state: &DeviceState, message: &str) -> String {
    if state.has_progress() {
        format!(
            "R {} {} {} \"{}\"",
            state.value, state.start, state.expected_end, message
        )
    } else {
        format!("S {} \"{}\"", state.value, message)
    }
}

pub fn progress_line(start: f64, expected_end: f64) -> String {
    format!("P {start} {expected_end}")
}

/// Command completion line; the code always carries an explicit sign.
pub fn command_end(code: i32, message: &str) -> String {
    format!("{code:+} {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{BaseType, ValueFlags};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_end_signs() {
        assert_eq!(command_end(0, "OK"), "+0 OK");
        assert_eq!(command_end(1, "queued"), "+1 queued");
        assert_eq!(command_end(-2, "bad params"), "-2 bad params");
    }

    #[test]
    fn test_metainfo_line() {
        let v = Value::new(
            ValueFlags::new(BaseType::Double).writable(),
            "EXPTIME",
            "exposure time",
        )
        .unwrap();
        assert_eq!(
            metainfo_line(&v),
            format!("E {} \"EXPTIME\" \"exposure time\"", 0x0200_0004u32)
        );
    }

    #[test]
    fn test_string_value_line_quoted() {
        let mut v = Value::new(ValueFlags::new(BaseType::String), "OBJECT", "").unwrap();
        v.set_from_str("M 31").unwrap();
        assert_eq!(value_line(&v), "V OBJECT \"M 31\"");
    }

    #[test]
    fn test_selection_lines_clear_then_options() {
        let mut v = Value::new(ValueFlags::new(BaseType::Selection), "FILTER", "").unwrap();
        v.add_sel_option("B").unwrap();
        v.add_sel_option("V").unwrap();
        let lines = selection_lines(&v);
        assert_eq!(
            lines,
            vec![
                "F \"FILTER\"".to_string(),
                "F \"FILTER\" \"B\"".to_string(),
                "F \"FILTER\" \"V\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_status_line_forms() {
        let mut state = DeviceState::default();
        state.value = 2;
        assert_eq!(status_line(&state, "idle"), "S 2 \"idle\"");
        state.start = 10.0;
        state.expected_end = 20.0;
        assert_eq!(status_line(&state, "exposing"), "R 2 10 20 \"exposing\"");
    }
}
