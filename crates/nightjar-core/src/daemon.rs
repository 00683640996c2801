//! Daemon orchestration: the value store, the deferred-write pipeline,
//! state transitions, and the text command surface.
//!
//! A single daemon task owns everything in here. Connections talk to it
//! through [`Daemon::handle_line`] and receive broadcasts through the
//! outbound channels registered in the connection registry, so every
//! client observes value and state changes in the same total order.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nightjar_config::IniFile;

use crate::connection::{ConnId, ConnectionRegistry};
use crate::device::{Device, HookAction};
use crate::error::{CommandError, DaemonError};
use crate::flags::{BaseType, DisplayType, ExtType, Severity, ValueFlags};
use crate::parse::{parse_index_range, Tokens};
use crate::proto;
use crate::queue::{CondValue, QueuedWrite, ValueId, WriteQueue};
use crate::state::{DeviceState, STATE_COMMANDED};
use crate::value::{Op, Value, ValueKind};

/// Seconds since the UNIX epoch.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// How a write request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Committed to the live value.
    Applied,
    /// Assign of an identical payload; nothing happened.
    Unchanged,
    /// Deferred until the device state releases the value's gate.
    Queued,
}

// ── Value store ─────────────────────────────────────────────────────────

/// The daemon's live values, addressed by stable [`ValueId`].
///
/// Ids are indices into an append-only vector; values are never removed,
/// so an id handed out at registration stays valid for the daemon's life.
#[derive(Debug, Default)]
pub struct ValueStore {
    entries: Vec<CondValue>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: Value, queue_condition: u32) -> ValueId {
        self.entries.push(CondValue {
            value,
            queue_condition,
        });
        self.entries.len() - 1
    }

    /// Name lookup, case-insensitive like the wire protocol.
    pub fn find(&self, name: &str) -> Option<ValueId> {
        self.entries
            .iter()
            .position(|e| e.value.name().eq_ignore_ascii_case(name))
    }

    pub fn get(&self, id: ValueId) -> &Value {
        &self.entries[id].value
    }

    pub fn get_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.entries[id].value
    }

    pub fn by_name(&self, name: &str) -> Option<&Value> {
        self.find(name).map(|id| self.get(id))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Value> {
        let id = self.find(name)?;
        Some(self.get_mut(id))
    }

    pub fn queue_condition(&self, id: ValueId) -> u32 {
        self.entries[id].queue_condition
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.entries.iter().enumerate().map(|(i, e)| (i, &e.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Daemon ──────────────────────────────────────────────────────────────

/// One observatory device daemon.
pub struct Daemon<D: Device> {
    name: String,
    device: D,
    store: ValueStore,
    consts: Vec<Value>,
    queue: WriteQueue,
    state: DeviceState,
    state_message: String,
    conns: ConnectionRegistry,
    modes: Option<IniFile>,
    mode_value: Option<ValueId>,
    autosave_path: Option<PathBuf>,
    info_time: ValueId,
    uptime: ValueId,
}

impl<D: Device> Daemon<D> {
    pub fn new(device: D, name: impl Into<String>) -> Result<Self, DaemonError> {
        let mut daemon = Self {
            name: name.into(),
            device,
            store: ValueStore::new(),
            consts: Vec::new(),
            queue: WriteQueue::default(),
            state: DeviceState::default(),
            state_message: String::new(),
            conns: ConnectionRegistry::new(),
            modes: None,
            mode_value: None,
            autosave_path: None,
            info_time: 0,
            uptime: 0,
        };
        daemon.info_time = daemon.create_value(
            ValueFlags::new(BaseType::Time).fits(),
            "infotime",
            "time of last update",
            0,
        )?;
        daemon.uptime = daemon.create_value(
            ValueFlags::new(BaseType::Time),
            "uptime",
            "daemon start time",
            0,
        )?;
        let _ = daemon.store.get_mut(daemon.uptime).set_double(unix_now());
        Ok(daemon)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ValueStore {
        &mut self.store
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    // ── Value registration ──────────────────────────────────────────────

    /// Register a live value. `queue_condition` names the state bits under
    /// which writes to it are deferred; zero means writes always apply.
    pub fn create_value(
        &mut self,
        flags: ValueFlags,
        name: &str,
        description: &str,
        queue_condition: u32,
    ) -> Result<ValueId, DaemonError> {
        if self.store.find(name).is_some() || self.find_const(name).is_some() {
            return Err(DaemonError::DuplicateValue(name.to_string()));
        }
        let value = Value::new(flags, name, description)?;
        let meta = proto::metainfo_line(&value);
        let id = self.store.push(value, queue_condition);
        // live connections learn about late registrations immediately
        self.conns.send_all(&meta);
        Ok(id)
    }

    /// Register an immutable constant, visible through `base_info`.
    pub fn add_const_value(
        &mut self,
        flags: ValueFlags,
        name: &str,
        description: &str,
        payload: &str,
    ) -> Result<(), DaemonError> {
        if self.store.find(name).is_some() || self.find_const(name).is_some() {
            return Err(DaemonError::DuplicateValue(name.to_string()));
        }
        let mut value = Value::new(flags, name, description)?;
        value
            .set_from_str(payload)
            .map_err(|e| DaemonError::Seed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        value.reset_need_send();
        self.consts.push(value);
        Ok(())
    }

    fn find_const(&self, name: &str) -> Option<&Value> {
        self.consts
            .iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }

    // ── Connections ─────────────────────────────────────────────────────

    /// Register an outbound channel and replay the full device picture to
    /// it: metainfo, selection options, payloads, then current status.
    pub fn register_connection(&mut self, tx: mpsc::UnboundedSender<String>) -> ConnId {
        let id = self.conns.register(tx);
        for value in &self.consts {
            self.conns.send_to(id, proto::metainfo_line(value));
            self.conns.send_to(id, proto::value_line(value));
        }
        for (_, value) in self.store.iter() {
            self.conns.send_to(id, proto::metainfo_line(value));
            if matches!(value.kind(), ValueKind::Selection(_)) {
                for line in proto::selection_lines(value) {
                    self.conns.send_to(id, line);
                }
            }
            self.conns.send_to(id, proto::value_line(value));
        }
        self.conns
            .send_to(id, proto::status_line(&self.state, &self.state_message));
        id
    }

    pub fn unregister_connection(&mut self, id: ConnId) {
        self.conns.unregister(id);
    }

    pub fn connections(&self) -> usize {
        self.conns.len()
    }

    // ── Command surface ─────────────────────────────────────────────────

    /// Dispatch one protocol line from a client. Always answers with a
    /// completion line on that client's channel.
    pub fn handle_line(&mut self, conn: ConnId, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let mut toks = Tokens::new(line);
        let Some(cmd) = toks.next_token() else {
            return;
        };
        let outcome = match cmd {
            "X" => self.cmd_set_value(&mut toks),
            "info" => self.cmd_info(conn, &mut toks),
            "base_info" => self.cmd_base_info(conn, &mut toks),
            "autosave" => self.cmd_autosave(&mut toks),
            "mode" => self.cmd_mode(&mut toks),
            "this_device" => self.cmd_this_device(conn, &mut toks),
            other => Err(CommandError::Command(format!("unknown command '{other}'"))),
        };
        let reply = match outcome {
            Ok((code, message)) => proto::command_end(code, &message),
            Err(e) => proto::command_end(e.code(), &e.to_string()),
        };
        self.conns.send_to(conn, reply);
    }

    fn cmd_set_value(&mut self, toks: &mut Tokens<'_>) -> Result<(i32, String), CommandError> {
        let target = toks.next_str()?;
        let (id, indices) = self.resolve_target(target)?;
        let value = self.store.get(id);
        if !value.is_writable() {
            return Err(CommandError::Command(format!(
                "cannot set read-only value '{}'",
                value.name()
            )));
        }
        let op = Op::parse(toks.next_str()?)?;
        let mut proposed = value.clone();
        match &indices {
            Some(idx) => proposed.set_indexed(idx, toks)?,
            None => proposed.set_from_tokens(toks)?,
        }
        toks.expect_end()?;
        match self.set_cond_value(id, op, proposed)? {
            SetOutcome::Queued => Ok((proto::CODE_QUEUED, "value change queued".to_string())),
            _ => Ok((proto::CODE_OK, "OK".to_string())),
        }
    }

    /// Resolve `NAME`, `NAME[range]`, or the legacy `NAME_3` spelling into
    /// a value id plus optional member indices.
    fn resolve_target(&self, target: &str) -> Result<(ValueId, Option<Vec<usize>>), CommandError> {
        if let Some(open) = target.find('[') {
            let Some(spec) = target[open + 1..].strip_suffix(']') else {
                return Err(CommandError::InvalidParams);
            };
            let name = &target[..open];
            let id = self.find_required(name)?;
            let len = self.store.get(id).array_len().ok_or_else(|| {
                CommandError::Command(format!("value '{name}' is not an array"))
            })?;
            let indices = parse_index_range(spec, len)?;
            return Ok((id, Some(indices)));
        }
        if let Some(id) = self.store.find(target) {
            return Ok((id, None));
        }
        // NAME_3 is accepted only when NAME itself is a registered array,
        // so plain names containing underscores keep working
        if let Some((prefix, digits)) = target.rsplit_once('_') {
            if let (Some(id), Ok(index)) = (self.store.find(prefix), digits.parse::<usize>()) {
                if let Some(len) = self.store.get(id).array_len() {
                    if index >= len {
                        return Err(CommandError::from(crate::error::ValueError::IndexOutOfRange {
                            index,
                            len,
                        }));
                    }
                    return Ok((id, Some(vec![index])));
                }
            }
        }
        Err(CommandError::Command(format!(
            "cannot find value '{target}'"
        )))
    }

    fn find_required(&self, name: &str) -> Result<ValueId, CommandError> {
        self.store
            .find(name)
            .ok_or_else(|| CommandError::Command(format!("cannot find value '{name}'")))
    }

    fn cmd_info(
        &mut self,
        conn: ConnId,
        toks: &mut Tokens<'_>,
    ) -> Result<(i32, String), CommandError> {
        toks.expect_end()?;
        self.info_all()?;
        for (_, value) in self.store.iter() {
            self.conns.send_to(conn, proto::value_line(value));
        }
        Ok((proto::CODE_OK, "OK".to_string()))
    }

    fn cmd_base_info(
        &mut self,
        conn: ConnId,
        toks: &mut Tokens<'_>,
    ) -> Result<(i32, String), CommandError> {
        toks.expect_end()?;
        for value in &self.consts {
            self.conns.send_to(conn, proto::metainfo_line(value));
            self.conns.send_to(conn, proto::value_line(value));
        }
        Ok((proto::CODE_OK, "OK".to_string()))
    }

    fn cmd_autosave(&mut self, toks: &mut Tokens<'_>) -> Result<(i32, String), CommandError> {
        toks.expect_end()?;
        let count = self
            .autosave_values()
            .map_err(|e| CommandError::System(e.to_string()))?;
        Ok((proto::CODE_OK, format!("{count} value(s) saved")))
    }

    fn cmd_mode(&mut self, toks: &mut Tokens<'_>) -> Result<(i32, String), CommandError> {
        let selector = toks.next_str()?;
        let selector = selector.to_string();
        toks.expect_end()?;
        match self.set_mode(&selector)? {
            SetOutcome::Queued => Ok((proto::CODE_QUEUED, "mode change queued".to_string())),
            _ => Ok((proto::CODE_OK, "OK".to_string())),
        }
    }

    fn cmd_this_device(
        &mut self,
        conn: ConnId,
        toks: &mut Tokens<'_>,
    ) -> Result<(i32, String), CommandError> {
        let name = toks.next_str()?;
        let name = name.to_string();
        toks.expect_end()?;
        self.conns.set_name(conn, name);
        Ok((proto::CODE_OK, "OK".to_string()))
    }

    // ── Write pipeline ──────────────────────────────────────────────────

    /// Entry point for every value write: queue it, drop it as a no-op, or
    /// apply it now.
    pub fn set_cond_value(
        &mut self,
        id: ValueId,
        op: Op,
        proposed: Value,
    ) -> Result<SetOutcome, CommandError> {
        let gate = self.store.queue_condition(id);
        let equal = op == Op::Assign && self.store.get(id).is_equal(&proposed);
        // an identical assign still queues when an older write is pending,
        // so it can supersede that write instead of silently losing
        if (op != Op::Assign || !equal || self.queue.is_queued(id))
            && self.state.value & gate != 0
        {
            debug!(
                value = self.store.get(id).name(),
                op = %op.symbol(),
                "write deferred by device state"
            );
            self.queue.push_replace(QueuedWrite {
                target: id,
                op,
                operand: proposed,
            });
            return Ok(SetOutcome::Queued);
        }
        if equal {
            return Ok(SetOutcome::Unchanged);
        }
        self.queue.remove(id);
        self.do_set_value(id, op, proposed)
    }

    /// Apply one write: fold the operator, consult the device hook, commit,
    /// notify, autosave, broadcast.
    fn do_set_value(
        &mut self,
        id: ValueId,
        op: Op,
        mut proposed: Value,
    ) -> Result<SetOutcome, CommandError> {
        proposed.apply_op(op, self.store.get(id))?;
        match self.device.set_value(self.store.get(id), &proposed) {
            HookAction::Reject(reason) => return Err(CommandError::InvalidValue(reason)),
            HookAction::Queue => {
                debug!(
                    value = self.store.get(id).name(),
                    "write deferred by device hook"
                );
                self.queue.push_replace(QueuedWrite {
                    target: id,
                    op: Op::Assign,
                    operand: proposed,
                });
                return Ok(SetOutcome::Queued);
            }
            HookAction::ApplySlow => {
                // hardware settles on its own schedule; echo the live
                // payload, the device commits the new one when it lands
                self.conns.send_all(&proto::value_line(self.store.get(id)));
                return Ok(SetOutcome::Applied);
            }
            HookAction::Apply => {}
        }
        if self.mode_value == Some(id) {
            let index = proposed
                .sel_index()
                .ok_or_else(|| CommandError::System("mode value is not a selection".to_string()))?;
            // replay the section first; a failing mode leaves MODE unchanged
            self.apply_mode(index as usize)?;
        }
        self.store
            .get_mut(id)
            .set_from(&proposed)
            .map_err(CommandError::from)?;
        let value = self.store.get(id);
        self.device.value_changed(value);
        debug!(value = value.name(), payload = %value.encode(), "value committed");
        if value.flags().autosave {
            if let Err(e) = self.autosave_values() {
                warn!(error = %e, "autosave failed");
            }
        }
        self.send_value(id);
        Ok(SetOutcome::Applied)
    }

    /// Broadcast a value's payload if it is flagged for sending.
    fn send_value(&mut self, id: ValueId) {
        if self.store.get(id).need_send() {
            self.conns.send_all(&proto::value_line(self.store.get(id)));
            self.store.get_mut(id).reset_need_send();
        }
    }

    /// Flag a value's health in its wire type word. Clients learn about
    /// the new verdict through a metainfo rebroadcast; an unchanged
    /// verdict is a no-op.
    pub fn set_value_severity(&mut self, id: ValueId, severity: Severity) {
        if self.store.get(id).flags().severity == severity {
            return;
        }
        self.store.get_mut(id).set_severity(severity);
        self.conns
            .send_all(&proto::metainfo_line(self.store.get(id)));
    }

    /// Seed a value by name from a textual payload, bypassing writability.
    /// Used by defaults, autosave, mode replay, and command-line seeds.
    pub fn seed_value(&mut self, name: &str, payload: &str) -> Result<SetOutcome, CommandError> {
        let id = self.find_required(name)?;
        let mut proposed = self.store.get(id).clone();
        proposed.set_from_str(payload)?;
        self.set_cond_value(id, Op::Assign, proposed)
    }

    // ── State transitions ───────────────────────────────────────────────

    /// Replace bits of the status word: the error nibble and `mask` are
    /// cleared, `new_state` is ORed in. `commanded` names the connection
    /// whose request triggered the transition, if any.
    pub fn mask_state(
        &mut self,
        mask: u32,
        new_state: u32,
        description: &str,
        start: f64,
        expected_end: f64,
        commanded: Option<ConnId>,
    ) {
        let next = self.state.masked(mask, new_state);
        self.set_state(next, description, start, expected_end, commanded);
    }

    pub fn set_state(
        &mut self,
        new_state: u32,
        description: &str,
        start: f64,
        expected_end: f64,
        commanded: Option<ConnId>,
    ) {
        let old = self.state.value;
        self.state.value = new_state;
        self.state.start = start;
        self.state.expected_end = expected_end;
        self.state_message = description.to_string();
        if old != new_state {
            info!(
                device = %self.name,
                old = old,
                new = new_state,
                "state changed: {description}"
            );
            self.device.state_changed(new_state, old, description);
        }
        let line = proto::status_line(&self.state, description);
        self.conns.send_all_except(commanded, &line);
        if let Some(conn) = commanded {
            let echo = DeviceState {
                value: new_state | STATE_COMMANDED,
                ..self.state
            };
            self.conns.send_to(conn, proto::status_line(&echo, description));
        }
        self.apply_released_writes();
    }

    /// Update only the progress bounds, leaving the status word alone.
    pub fn send_progress(&mut self, start: f64, expected_end: f64) {
        self.state.start = start;
        self.state.expected_end = expected_end;
        self.conns
            .send_all(&proto::progress_line(start, expected_end));
    }

    /// Apply, in arrival order, every queued write whose gate the current
    /// state no longer holds. Failures are logged and dropped; a write
    /// accepted with `+1` must never kill the daemon later.
    pub fn apply_released_writes(&mut self) {
        let state = self.state.value;
        let store = &self.store;
        let released = self
            .queue
            .drain_released(|id| state & store.queue_condition(id) == 0);
        for write in released {
            let name = self.store.get(write.target).name().to_string();
            match self.do_set_value(write.target, write.op, write.operand) {
                Ok(_) => debug!(value = %name, "deferred write applied"),
                Err(e) => warn!(value = %name, error = %e, "deferred write failed"),
            }
        }
    }

    // ── Info ────────────────────────────────────────────────────────────

    /// Let the device refresh its hardware-backed values, then broadcast
    /// everything that changed.
    pub fn info_all(&mut self) -> Result<(), CommandError> {
        self.device
            .info(&mut self.store)
            .map_err(CommandError::from)?;
        let _ = self.store.get_mut(self.info_time).set_double(unix_now());
        let pending: Vec<ValueId> = self
            .store
            .iter()
            .filter(|(_, v)| v.need_send())
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            self.send_value(id);
        }
        Ok(())
    }

    // ── Modes ───────────────────────────────────────────────────────────

    /// Load a mode file and expose its sections as a writable `MODE`
    /// selection.
    pub fn load_mode_file(&mut self, path: &Path) -> Result<(), DaemonError> {
        let ini = IniFile::load(path)?;
        let names: Vec<String> = ini.section_names().iter().map(|s| s.to_string()).collect();
        if names.is_empty() {
            warn!(path = %path.display(), "mode file has no sections");
            return Ok(());
        }
        let id = self.create_value(
            ValueFlags::new(BaseType::Selection).writable(),
            "MODE",
            "device mode",
            0,
        )?;
        self.store
            .get_mut(id)
            .set_sel_options(names)
            .map_err(|e| DaemonError::Seed {
                name: "MODE".to_string(),
                reason: e.to_string(),
            })?;
        self.store.get_mut(id).reset_need_send();
        self.mode_value = Some(id);
        self.modes = Some(ini);
        Ok(())
    }

    /// Switch mode by section name or index, through the normal write
    /// pipeline so validation and queueing apply.
    pub fn set_mode(&mut self, selector: &str) -> Result<SetOutcome, CommandError> {
        let id = self
            .mode_value
            .ok_or_else(|| CommandError::Command("no mode file loaded".to_string()))?;
        let mut proposed = self.store.get(id).clone();
        proposed.set_from_str(selector)?;
        self.set_cond_value(id, Op::Assign, proposed)
    }

    /// Replay one mode section into the store. `NAME.min` / `NAME.max`
    /// entries adjust bounds; everything else seeds the named value.
    fn apply_mode(&mut self, index: usize) -> Result<(), CommandError> {
        let Some(modes) = &self.modes else {
            return Err(CommandError::Command("no mode file loaded".to_string()));
        };
        let names = modes.section_names();
        let name = names
            .get(index)
            .ok_or_else(|| CommandError::InvalidValue(format!("no mode with index {index}")))?
            .to_string();
        let entries: Vec<(String, String)> = modes
            .section(&name)
            .map(|s| s.entries.clone())
            .unwrap_or_default();
        info!(device = %self.name, mode = %name, "applying mode");
        for (key, payload) in entries {
            if let Some(base) = key.strip_suffix(".min") {
                let value = self
                    .store
                    .by_name_mut(base)
                    .ok_or_else(|| CommandError::Command(format!("cannot find value '{base}'")))?;
                value.set_min_from_str(&payload)?;
            } else if let Some(base) = key.strip_suffix(".max") {
                let value = self
                    .store
                    .by_name_mut(base)
                    .ok_or_else(|| CommandError::Command(format!("cannot find value '{base}'")))?;
                value.set_max_from_str(&payload)?;
            } else {
                self.seed_value(&key, &payload)?;
            }
        }
        Ok(())
    }

    // ── Value files ─────────────────────────────────────────────────────

    /// Create writable values from a value file. Entry keys carry a type
    /// suffix after the last dot (`exposure.d = "1.5"`); a lowercase
    /// suffix also flags the value for FITS recording.
    pub fn load_value_file(&mut self, path: &Path) -> Result<(), DaemonError> {
        let ini = IniFile::load(path)?;
        for (key, payload) in ini.global() {
            self.create_value_from_entry(key, payload)?;
        }
        Ok(())
    }

    fn create_value_from_entry(&mut self, key: &str, payload: &str) -> Result<(), DaemonError> {
        let Some((name, suffix)) = key.rsplit_once('.') else {
            return Err(DaemonError::BadValueSuffix(key.to_string()));
        };
        let fits = suffix.chars().all(|c| !c.is_ascii_uppercase());
        let mut flags = match suffix.to_ascii_lowercase().as_str() {
            "i" => ValueFlags::new(BaseType::Integer),
            "d" => ValueFlags::new(BaseType::Double),
            "s" => ValueFlags::new(BaseType::String),
            "b" => ValueFlags::new(BaseType::Bool),
            "bo" => ValueFlags::new(BaseType::Bool).display(DisplayType::OnOff),
            "ia" => ValueFlags::new(BaseType::Integer).ext(ExtType::Array),
            "da" => ValueFlags::new(BaseType::Double).ext(ExtType::Array),
            "ba" => ValueFlags::new(BaseType::Bool).ext(ExtType::Array),
            "bao" => ValueFlags::new(BaseType::Bool)
                .ext(ExtType::Array)
                .display(DisplayType::OnOff),
            "std" => ValueFlags::new(BaseType::Double).ext(ExtType::Stat),
            _ => return Err(DaemonError::BadValueSuffix(key.to_string())),
        }
        .writable();
        if fits {
            flags = flags.fits();
        }
        let id = self.create_value(flags, name, "", 0)?;
        self.store
            .get_mut(id)
            .set_from_str(payload)
            .map_err(|e| DaemonError::Seed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        self.store.get_mut(id).reset_need_send();
        Ok(())
    }

    // ── Autosave and defaults ───────────────────────────────────────────

    pub fn set_autosave_path(&mut self, path: PathBuf) {
        self.autosave_path = Some(path);
    }

    /// Rewrite the autosave file with every autosave-flagged value.
    pub fn autosave_values(&self) -> Result<usize, std::io::Error> {
        let Some(path) = &self.autosave_path else {
            return Ok(0);
        };
        let mut out = String::from("; autosaved values, rewritten on every change\n");
        let mut count = 0;
        for (_, value) in self.store.iter() {
            if value.flags().autosave {
                out.push_str(&format!("{} = \"{}\"\n", value.name(), value.encode()));
                count += 1;
            }
        }
        std::fs::write(path, out)?;
        debug!(path = %path.display(), count, "values autosaved");
        Ok(count)
    }

    /// Restore autosaved payloads. Entries naming values that no longer
    /// exist are skipped with a warning; the file may be stale.
    pub fn load_autosave(&mut self) -> Result<(), DaemonError> {
        let Some(path) = self.autosave_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        self.load_seed_file(&path)
    }

    /// Seed values from a defaults file before going on-line.
    pub fn load_defaults(&mut self, path: &Path) -> Result<(), DaemonError> {
        self.load_seed_file(path)
    }

    fn load_seed_file(&mut self, path: &Path) -> Result<(), DaemonError> {
        let ini = IniFile::load(path)?;
        for (name, payload) in ini.global() {
            match self.seed_value(name, payload) {
                Ok(_) => {}
                Err(CommandError::Command(_)) => {
                    warn!(value = %name, path = %path.display(), "skipping unknown value");
                }
                Err(e) => {
                    return Err(DaemonError::Seed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply `name=value` seeds given on the command line. Unlike file
    /// seeds these are operator-typed, so an unknown name is fatal.
    pub fn apply_seed_args(&mut self, seeds: &[(String, String)]) -> Result<(), DaemonError> {
        for (name, payload) in seeds {
            self.seed_value(name, payload)
                .map_err(|e| DaemonError::Seed {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Count not-null values still carrying their unset sentinel. Must be
    /// zero before the daemon goes on-line.
    pub fn check_not_null_all(&self) -> usize {
        self.store.iter().map(|(_, v)| v.check_not_null()).sum()
    }

    /// Run the whole init-file sequence: value file, mode file, defaults,
    /// autosave restore, command-line seeds, then the not-null audit.
    pub fn init_values(
        &mut self,
        valuefile: Option<&Path>,
        modefile: Option<&Path>,
        defaults: Option<&Path>,
        autosave: Option<&Path>,
        seeds: &[(String, String)],
    ) -> Result<(), DaemonError> {
        if let Some(path) = valuefile {
            self.load_value_file(path)?;
        }
        if let Some(path) = modefile {
            self.load_mode_file(path)?;
        }
        if let Some(path) = defaults {
            self.load_defaults(path)?;
        }
        if let Some(path) = autosave {
            self.set_autosave_path(path.to_path_buf());
            self.load_autosave()?;
        }
        self.apply_seed_args(seeds)?;
        let unset = self.check_not_null_all();
        if unset > 0 {
            return Err(DaemonError::NullAudit(unset));
        }
        Ok(())
    }
}
