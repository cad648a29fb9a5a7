use std::collections::HashMap;
use std::net::SocketAddr;

use super::reliability::{AckTracker, ReceiveTracker, StreamReceiver, StreamSender};
use crate::message::ConnectionId;

/// Handshake progress of one remote endpoint.
///
/// A server-side entry moves Connecting (challenge sent) to
/// AwaitingApproval (challenge answered, waiting on the application) to
/// Connected. A client-side entry for the server moves Connecting (request
/// sent) to ChallengeAnswered to Connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    ChallengeAnswered,
    AwaitingApproval,
    Connected,
}

#[derive(Debug)]
pub struct RemoteConnection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub send_sequence: u32,
    pub ack_tracker: AckTracker,
    pub receive_tracker: ReceiveTracker,
    pub stream_sender: StreamSender,
    pub streams: StreamReceiver,
    pub last_received_ms: f64,
    pub last_sent_ms: f64,
    pub handshake_sent_ms: f64,
    pub handshake_attempts: u32,
}

impl RemoteConnection {
    pub fn new(id: ConnectionId, addr: SocketAddr, state: ConnectionState, now_ms: f64) -> Self {
        Self {
            id,
            addr,
            state,
            client_salt: 0,
            server_salt: 0,
            send_sequence: 0,
            ack_tracker: AckTracker::new(),
            receive_tracker: ReceiveTracker::new(),
            stream_sender: StreamSender::default(),
            streams: StreamReceiver::new(),
            last_received_ms: now_ms,
            last_sent_ms: now_ms,
            handshake_sent_ms: now_ms,
            handshake_attempts: 0,
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        seq
    }

    pub fn touch_received(&mut self, now_ms: f64) {
        self.last_received_ms = now_ms;
    }

    pub fn touch_sent(&mut self, now_ms: f64) {
        self.last_sent_ms = now_ms;
    }

    pub fn is_timed_out(&self, now_ms: f64, timeout_ms: u64) -> bool {
        now_ms - self.last_received_ms > timeout_ms as f64
    }

    pub fn needs_keepalive(&self, now_ms: f64, keepalive_ms: u64) -> bool {
        self.state == ConnectionState::Connected
            && now_ms - self.last_sent_ms > keepalive_ms as f64
    }
}

/// All remotes known to one endpoint, addressable by id and by socket
/// address. A client holds a single entry for the server under
/// SERVER_CONNECTION_ID.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, RemoteConnection>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    next_client_id: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            next_client_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    pub fn insert(&mut self, connection: RemoteConnection) {
        self.by_addr.insert(connection.addr, connection.id);
        self.connections.insert(connection.id, connection);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<RemoteConnection> {
        let connection = self.connections.remove(&id)?;
        self.by_addr.remove(&connection.addr);
        Some(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&RemoteConnection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut RemoteConnection> {
        self.connections.get_mut(&id)
    }

    pub fn id_for_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn get_mut_by_addr(&mut self, addr: SocketAddr) -> Option<&mut RemoteConnection> {
        let id = self.id_for_addr(addr)?;
        self.connections.get_mut(&id)
    }

    pub fn contains_addr(&self, addr: SocketAddr) -> bool {
        self.by_addr.contains_key(&addr)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .map(|c| c.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteConnection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemoteConnection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
        self.by_addr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut table = ConnectionTable::new();
        assert_eq!(table.allocate_id(), 1);
        assert_eq!(table.allocate_id(), 2);
    }

    #[test]
    fn test_insert_and_lookup_by_addr() {
        let mut table = ConnectionTable::new();
        let id = table.allocate_id();
        table.insert(RemoteConnection::new(id, addr(9000), ConnectionState::Connecting, 0.0));

        assert_eq!(table.id_for_addr(addr(9000)), Some(id));
        assert!(table.contains_addr(addr(9000)));
        assert!(table.get(id).is_some());
    }

    #[test]
    fn test_remove_cleans_both_maps() {
        let mut table = ConnectionTable::new();
        let id = table.allocate_id();
        table.insert(RemoteConnection::new(id, addr(9001), ConnectionState::Connected, 0.0));

        assert!(table.remove(id).is_some());
        assert!(table.get(id).is_none());
        assert_eq!(table.id_for_addr(addr(9001)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_connected_ids_skip_handshaking_entries() {
        let mut table = ConnectionTable::new();
        let a = table.allocate_id();
        let b = table.allocate_id();
        table.insert(RemoteConnection::new(a, addr(9002), ConnectionState::Connecting, 0.0));
        table.insert(RemoteConnection::new(b, addr(9003), ConnectionState::Connected, 0.0));

        assert_eq!(table.connected_ids(), vec![b]);
        assert_eq!(table.connected_count(), 1);
    }

    #[test]
    fn test_timeout_and_keepalive_windows() {
        let conn = RemoteConnection::new(1, addr(9004), ConnectionState::Connected, 1000.0);
        assert!(!conn.is_timed_out(5000.0, 10_000));
        assert!(conn.is_timed_out(12_000.0, 10_000));
        assert!(conn.needs_keepalive(2500.0, 1000));
        assert!(!conn.needs_keepalive(1500.0, 1000));
    }
}
