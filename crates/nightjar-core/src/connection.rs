//! Connection registry — per-connection outbound channels.
//!
//! The daemon task owns the registry and is the only writer. Broadcast
//! enqueues a line on every connection's outbound channel in registration
//! order; the per-connection writer tasks drain them, so one change is
//! observed whole by every client.

use tokio::sync::mpsc;

/// Daemon-unique connection identifier.
pub type ConnId = u64;

#[derive(Debug)]
struct ConnectionHandle {
    id: ConnId,
    name: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

/// All live connections of one daemon.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: ConnId,
    conns: Vec<ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tx: mpsc::UnboundedSender<String>) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;
        self.conns.push(ConnectionHandle { id, name: None, tx });
        id
    }

    pub fn unregister(&mut self, id: ConnId) {
        self.conns.retain(|c| c.id != id);
    }

    /// Peer-announced name (`this_device` command).
    pub fn set_name(&mut self, id: ConnId, name: impl Into<String>) {
        if let Some(conn) = self.conns.iter_mut().find(|c| c.id == id) {
            conn.name = Some(name.into());
        }
    }

    pub fn name(&self, id: ConnId) -> Option<&str> {
        self.conns
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.name.as_deref())
    }

    /// Send one line to one connection. A closed peer is not an error;
    /// its reader task will report the disconnect separately.
    pub fn send_to(&self, id: ConnId, line: impl Into<String>) {
        if let Some(conn) = self.conns.iter().find(|c| c.id == id) {
            let _ = conn.tx.send(line.into());
        }
    }

    pub fn send_all(&self, line: &str) {
        for conn in &self.conns {
            let _ = conn.tx.send(line.to_string());
        }
    }

    pub fn send_all_except(&self, except: Option<ConnId>, line: &str) {
        for conn in &self.conns {
            if Some(conn.id) != except {
                let _ = conn.tx.send(line.to_string());
            }
        }
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.conns.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_broadcast_skips_excluded_connection() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        let _b = registry.register(tx_b);

        registry.send_all_except(Some(a), "S 0 \"idle\"");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), "S 0 \"idle\"");
    }

    #[tokio::test]
    async fn test_send_to_closed_peer_is_not_fatal() {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        drop(rx);
        registry.send_to(id, "V X 1");
        registry.send_all("V X 2");
    }

    #[tokio::test]
    async fn test_names() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        assert_eq!(registry.name(id), None);
        registry.set_name(id, "XMLRPC");
        assert_eq!(registry.name(id), Some("XMLRPC"));
        registry.unregister(id);
        assert!(registry.is_empty());
    }
}
