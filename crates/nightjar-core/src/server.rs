//! TCP front end for one daemon.
//!
//! A single task owns the daemon and the listener. Per-connection reader
//! tasks turn socket lines into events on one channel; per-connection
//! writer tasks drain the outbound channels the daemon broadcasts into.
//! All state changes happen in the owning task, so clients observe one
//! total order without any locking.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::ConnId;
use crate::daemon::Daemon;
use crate::device::Device;
use crate::error::DaemonError;

#[derive(Debug)]
enum ServerEvent {
    Line(ConnId, String),
    Disconnected(ConnId),
}

/// Listener plus the daemon it fronts.
pub struct DeviceServer<D: Device> {
    daemon: Daemon<D>,
    listener: TcpListener,
    idle_info_secs: u64,
}

impl<D: Device> DeviceServer<D> {
    /// Bind the listener. Port 0 picks an ephemeral port; use
    /// [`local_addr`](Self::local_addr) to learn it.
    pub async fn bind(
        daemon: Daemon<D>,
        addr: SocketAddr,
        idle_info_secs: u64,
    ) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            device = daemon.name(),
            addr = %listener.local_addr()?,
            "listening"
        );
        Ok(Self {
            daemon,
            listener,
            idle_info_secs,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn daemon(&self) -> &Daemon<D> {
        &self.daemon
    }

    pub fn daemon_mut(&mut self) -> &mut Daemon<D> {
        &mut self.daemon
    }

    /// Serve until Ctrl-C.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut tick = interval(Duration::from_secs(self.idle_info_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer, events_tx.clone()),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(event) = events.recv() => match event {
                    ServerEvent::Line(conn, line) => self.daemon.handle_line(conn, &line),
                    ServerEvent::Disconnected(conn) => {
                        debug!(conn, "peer disconnected");
                        self.daemon.unregister_connection(conn);
                    }
                },
                _ = tick.tick(), if self.idle_info_secs > 0 => {
                    if let Err(e) = self.daemon.info_all() {
                        warn!(error = %e, "periodic info refresh failed");
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!(device = self.daemon.name(), "shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }

    fn accept(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = self.daemon.register_connection(tx);
        debug!(conn, peer = %peer, "connection accepted");
        tokio::spawn(writer_task(write_half, rx));
        tokio::spawn(reader_task(conn, read_half, events));
    }
}

async fn reader_task(
    conn: ConnId,
    read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(ServerEvent::Line(conn, line)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = events.send(ServerEvent::Disconnected(conn));
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if write_half.write_all(line.as_bytes()).await.is_err() {
            return;
        }
    }
}
