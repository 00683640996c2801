//! End-to-end daemon behavior through the text command surface.

use nightjar_core::daemon::Daemon;
use nightjar_core::device::{Device, GenericDevice, HookAction};
use nightjar_core::error::HwError;
use nightjar_core::flags::{BaseType, ValueFlags};
use nightjar_core::server::DeviceServer;
use nightjar_core::state::BOP_MASK;
use nightjar_core::value::Value;
use nightjar_core::ValueStore;
use nightjar_test_utils::daemon::{drain_lines, TestDaemon};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[test_log::test(tokio::test)]
async fn test_connection_replay_is_complete_and_ordered() {
    let mut daemon = Daemon::new(GenericDevice, "C0").unwrap();
    daemon
        .add_const_value(
            ValueFlags::new(BaseType::String),
            "serial",
            "camera serial number",
            "CCD-1234",
        )
        .unwrap();
    daemon
        .create_value(
            ValueFlags::new(BaseType::Selection).writable(),
            "FILTER",
            "filter wheel position",
            0,
        )
        .unwrap();
    daemon
        .store_mut()
        .by_name_mut("FILTER")
        .unwrap()
        .set_sel_options(vec!["B".to_string(), "V".to_string()])
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    daemon.register_connection(tx);
    let replay = drain_lines(&mut rx);

    // every value is announced before its payload is sent
    let meta_pos = replay.iter().position(|l| l.contains("\"FILTER\"")).unwrap();
    let payload_pos = replay.iter().position(|l| l.starts_with("V FILTER ")).unwrap();
    assert!(meta_pos < payload_pos);
    // selection options arrive as a clear line plus one line per option
    assert!(replay.contains(&"F \"FILTER\"".to_string()));
    assert!(replay.contains(&"F \"FILTER\" \"B\"".to_string()));
    assert!(replay.contains(&"F \"FILTER\" \"V\"".to_string()));
    // constants are part of the replay
    assert!(replay.contains(&"V serial \"CCD-1234\"".to_string()));
    // the replay closes with the current status
    assert!(replay.last().unwrap().starts_with("S 0 "));
}

#[test_log::test(tokio::test)]
async fn test_broadcasts_share_one_total_order() {
    let mut fixture = TestDaemon::new("F0");
    for name in ["FOC_POS", "FOC_TAR"] {
        fixture
            .daemon
            .create_value(ValueFlags::new(BaseType::Double).writable(), name, "", 0)
            .unwrap();
    }
    let (conn, mut rx_a) = fixture.connect();
    let (_observer, mut rx_b) = fixture.connect();

    fixture.daemon.handle_line(conn, "X FOC_POS = 1.0");
    fixture.daemon.handle_line(conn, "X FOC_TAR = 2.0");
    fixture.daemon.handle_line(conn, "X FOC_POS = 3.0");

    let broadcasts = |lines: Vec<String>| -> Vec<String> {
        lines.into_iter().filter(|l| l.starts_with("V ")).collect()
    };
    let seen_a = broadcasts(drain_lines(&mut rx_a));
    let seen_b = broadcasts(drain_lines(&mut rx_b));
    assert_eq!(seen_a.len(), 3);
    assert_eq!(seen_a, seen_b);
}

#[test_log::test(tokio::test)]
async fn test_deferred_write_lifecycle() {
    let mut fixture = TestDaemon::new("C0");
    fixture
        .daemon
        .create_value(
            ValueFlags::new(BaseType::Double).writable(),
            "EXPTIME",
            "exposure time",
            BOP_MASK,
        )
        .unwrap();
    fixture
        .daemon
        .create_value(
            ValueFlags::new(BaseType::Integer).writable(),
            "BIN",
            "binning",
            0,
        )
        .unwrap();
    let (conn, mut rx) = fixture.connect();

    // exposing: EXPTIME writes queue, ungated BIN writes still apply
    fixture
        .daemon
        .set_state(0x0100_0000, "exposing", f64::NAN, f64::NAN, None);
    drain_lines(&mut rx);
    fixture.daemon.handle_line(conn, "X EXPTIME = 10.0");
    assert_eq!(
        drain_lines(&mut rx).last().unwrap(),
        "+1 value change queued"
    );
    fixture.daemon.handle_line(conn, "X BIN = 2");
    let lines = drain_lines(&mut rx);
    assert!(lines.iter().any(|l| l.starts_with("V BIN ")));
    assert!(fixture
        .daemon
        .store()
        .by_name("EXPTIME")
        .unwrap()
        .as_f64()
        .unwrap()
        .is_nan());

    // exposure done: the status broadcast precedes the released write
    fixture.daemon.set_state(0, "idle", f64::NAN, f64::NAN, None);
    let lines = drain_lines(&mut rx);
    let status_pos = lines.iter().position(|l| l.starts_with("S 0 ")).unwrap();
    let value_pos = lines
        .iter()
        .position(|l| l.starts_with("V EXPTIME "))
        .unwrap();
    assert!(status_pos < value_pos);
    assert_eq!(
        fixture.daemon.store().by_name("EXPTIME").unwrap().as_f64(),
        Some(10.0)
    );
    assert_eq!(fixture.daemon.pending_writes(), 0);
}

struct LimitedFocuser;

impl Device for LimitedFocuser {
    fn set_value(&mut self, old: &Value, new: &Value) -> HookAction {
        if old.name() == "FOC_POS" {
            if let Some(pos) = new.as_f64() {
                if !(0.0..=100.0).contains(&pos) {
                    return HookAction::Reject(format!("position {pos} outside travel range"));
                }
            }
        }
        HookAction::Apply
    }
}

#[test_log::test(tokio::test)]
async fn test_device_hook_vetoes_bad_position() {
    let mut daemon = Daemon::new(LimitedFocuser, "F0").unwrap();
    daemon
        .create_value(
            ValueFlags::new(BaseType::Double).writable(),
            "FOC_POS",
            "focuser position",
            0,
        )
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = daemon.register_connection(tx);
    drain_lines(&mut rx);

    daemon.handle_line(conn, "X FOC_POS = 50.0");
    assert_eq!(drain_lines(&mut rx).last().unwrap(), "+0 OK");

    daemon.handle_line(conn, "X FOC_POS = 250.0");
    let lines = drain_lines(&mut rx);
    assert!(lines.last().unwrap().starts_with("-3 "));
    // the veto left the committed value alone
    assert_eq!(
        daemon.store().by_name("FOC_POS").unwrap().as_f64(),
        Some(50.0)
    );
}

struct FlakyCamera {
    fail: bool,
}

impl Device for FlakyCamera {
    fn info(&mut self, values: &mut ValueStore) -> Result<(), HwError> {
        if self.fail {
            return Err(HwError::new("sensor read timed out"));
        }
        if let Some(temp) = values.by_name_mut("CCD_TEMP") {
            let _ = temp.set_double(-15.0);
        }
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn test_hardware_error_is_reported_not_fatal() {
    let mut daemon = Daemon::new(FlakyCamera { fail: true }, "C0").unwrap();
    daemon
        .create_value(ValueFlags::new(BaseType::Double), "CCD_TEMP", "chip temperature", 0)
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = daemon.register_connection(tx);
    drain_lines(&mut rx);

    daemon.handle_line(conn, "info");
    assert!(drain_lines(&mut rx).last().unwrap().starts_with("-4 "));

    // the daemon keeps serving once the hardware recovers
    daemon.device_mut().fail = false;
    daemon.handle_line(conn, "info");
    let lines = drain_lines(&mut rx);
    assert!(lines.iter().any(|l| l.starts_with("V CCD_TEMP ")));
    assert_eq!(lines.last().unwrap(), "+0 OK");
}

#[test]
fn test_init_file_pipeline() {
    let mut fixture = TestDaemon::new("C0");
    let valuefile = fixture.write_run_file(
        "c0.values",
        "exposure.d = \"1.0\"\nbinning.i = \"1\"\n",
    );
    let modefile = fixture.write_run_file(
        "c0.modes",
        "[DAY]\nexposure = \"0.1\"\n[NIGHT]\nexposure = \"30.0\"\n",
    );
    let defaults = fixture.write_run_file("c0.defaults", "binning = \"2\"\n");
    let autosave = fixture.write_run_file("c0.autosave", "");

    fixture
        .daemon
        .init_values(
            Some(&valuefile),
            Some(&modefile),
            Some(&defaults),
            Some(&autosave),
            &[("exposure".to_string(), "5.0".to_string())],
        )
        .unwrap();

    // command-line seeds are applied last and win
    assert_eq!(
        fixture.daemon.store().by_name("exposure").unwrap().as_f64(),
        Some(5.0)
    );
    assert_eq!(
        fixture.daemon.store().by_name("binning").unwrap().as_i32(),
        Some(2)
    );
    // the mode file surfaced as a MODE selection, not yet applied
    let mode = fixture.daemon.store().by_name("MODE").unwrap();
    assert_eq!(
        mode.sel_options().unwrap().to_vec(),
        vec!["DAY".to_string(), "NIGHT".to_string()]
    );

    // switching modes replays the section
    fixture.daemon.set_mode("NIGHT").unwrap();
    assert_eq!(
        fixture.daemon.store().by_name("exposure").unwrap().as_f64(),
        Some(30.0)
    );
}

async fn next_line(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> String {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .expect("read failed")
        .expect("connection closed")
}

#[test_log::test(tokio::test)]
async fn test_tcp_round_trip() {
    let mut daemon = Daemon::new(GenericDevice, "W0").unwrap();
    daemon
        .create_value(
            ValueFlags::new(BaseType::Double).writable(),
            "DOME_AZ",
            "dome azimuth",
            0,
        )
        .unwrap();
    let server = DeviceServer::bind(daemon, "127.0.0.1:0".parse().unwrap(), 0)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // the replay closes with the status line
    loop {
        let line = next_line(&mut lines).await;
        if line.starts_with("S ") {
            break;
        }
    }

    write_half.write_all(b"X DOME_AZ = 180.0\n").await.unwrap();
    let mut saw_broadcast = false;
    loop {
        let line = next_line(&mut lines).await;
        if line.starts_with("V DOME_AZ ") {
            saw_broadcast = true;
        }
        if line == "+0 OK" {
            break;
        }
    }
    assert!(saw_broadcast);
}
