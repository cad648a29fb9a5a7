pub mod memory;
pub mod udp;

use crate::error::NetError;
use crate::message::{ConnectionId, Delivery, IncomingMessage, OutgoingMessage};
use crate::stats::NetworkStats;

/// Seam between the peer core and a concrete wire.
///
/// Implementations translate the message model onto whatever medium they
/// own and surface connection lifecycle as synthetic
/// [`crate::message::MessageKind::ConnectionApproval`] / `Connected` /
/// `Disconnected` messages in the receive queue, so the peer handles real
/// and synthetic traffic through one dispatch path.
pub trait Transport {
    /// Opens a session under this name; the transport acts as its server.
    fn create_session(&mut self, name: &str) -> Result<(), NetError>;

    /// Starts connecting to the named session, carrying the approval string
    /// the server's host will judge.
    fn join_session(&mut self, name: &str, approval: &str) -> Result<(), NetError>;

    fn leave_session(&mut self);

    /// Pumps sockets, timeouts and retransmissions. Driven once per peer
    /// tick with the peer's clock.
    fn update(&mut self, now_ms: f64);

    fn next_message(&mut self) -> Option<IncomingMessage>;

    fn send_to(
        &mut self,
        conn: ConnectionId,
        msg: &OutgoingMessage,
        delivery: Delivery,
        channel: u8,
    );

    /// Sends to every established connection. For a client that means the
    /// server.
    fn send_to_all(&mut self, msg: &OutgoingMessage, delivery: Delivery, channel: u8);

    /// Resolves a pending approval positively; the connection becomes
    /// established and both sides observe a synthetic `Connected` message.
    fn approve(&mut self, conn: ConnectionId);

    fn disapprove(&mut self, conn: ConnectionId);

    fn disconnect(&mut self, conn: ConnectionId);

    fn is_connected(&self) -> bool;

    fn has_connections(&self) -> bool;

    fn connection_count(&self) -> usize;

    fn stats(&self) -> NetworkStats;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;
    use crate::message::MessageKind;

    pub(crate) struct SentRecord {
        /// None means broadcast via send_to_all.
        pub to: Option<ConnectionId>,
        pub kind: MessageKind,
        pub payload: Vec<u8>,
        pub delivery: Delivery,
        pub channel: u8,
    }

    /// Hand-fed transport for driving peer handlers directly in unit tests.
    pub(crate) struct ScriptedTransport {
        pub queue: VecDeque<IncomingMessage>,
        pub sent: Vec<SentRecord>,
        pub approvals: Vec<(ConnectionId, bool)>,
        pub kicked: Vec<ConnectionId>,
        pub connected: bool,
        pub connections: usize,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                queue: VecDeque::new(),
                sent: Vec::new(),
                approvals: Vec::new(),
                kicked: Vec::new(),
                connected: true,
                connections: 0,
            }
        }

        pub fn push(&mut self, msg: IncomingMessage) {
            self.queue.push_back(msg);
        }

        pub fn sent_of_kind(&self, kind: MessageKind) -> Vec<&SentRecord> {
            self.sent.iter().filter(|r| r.kind == kind).collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn create_session(&mut self, _name: &str) -> Result<(), NetError> {
            Ok(())
        }

        fn join_session(&mut self, _name: &str, _approval: &str) -> Result<(), NetError> {
            Ok(())
        }

        fn leave_session(&mut self) {
            self.connected = false;
            self.connections = 0;
        }

        fn update(&mut self, _now_ms: f64) {}

        fn next_message(&mut self) -> Option<IncomingMessage> {
            self.queue.pop_front()
        }

        fn send_to(
            &mut self,
            conn: ConnectionId,
            msg: &OutgoingMessage,
            delivery: Delivery,
            channel: u8,
        ) {
            self.sent.push(SentRecord {
                to: Some(conn),
                kind: msg.kind(),
                payload: msg.payload().to_vec(),
                delivery,
                channel,
            });
        }

        fn send_to_all(&mut self, msg: &OutgoingMessage, delivery: Delivery, channel: u8) {
            self.sent.push(SentRecord {
                to: None,
                kind: msg.kind(),
                payload: msg.payload().to_vec(),
                delivery,
                channel,
            });
        }

        fn approve(&mut self, conn: ConnectionId) {
            self.approvals.push((conn, true));
        }

        fn disapprove(&mut self, conn: ConnectionId) {
            self.approvals.push((conn, false));
        }

        fn disconnect(&mut self, conn: ConnectionId) {
            self.kicked.push(conn);
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn has_connections(&self) -> bool {
            self.connections > 0
        }

        fn connection_count(&self) -> usize {
            self.connections
        }

        fn stats(&self) -> NetworkStats {
            NetworkStats::default()
        }
    }
}
