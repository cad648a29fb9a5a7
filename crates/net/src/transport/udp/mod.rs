//! Connection-oriented transport over plain UDP sockets. A salt/challenge
//! handshake guards against spoofed addresses, every packet carries piggyback
//! acks and reliable messages are retransmitted until acknowledged.

mod connection;
mod reliability;
pub mod wire;

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use log::{debug, info, warn};

use self::connection::{ConnectionState, ConnectionTable, RemoteConnection};
use self::reliability::MAX_SEND_ATTEMPTS;
use self::wire::{Envelope, MAX_PACKET_SIZE, Packet, PacketBody, PacketHeader};
use crate::config::UdpConfig;
use crate::error::NetError;
use crate::message::{
    ConnectionId, Delivery, IncomingMessage, MessageKind, OutgoingMessage, SERVER_CONNECTION_ID,
};
use crate::stats::{NetworkStats, PacketLossSimulation, rand_u64};
use crate::transport::Transport;

const RECV_BUFFER_SIZE: usize = 65_536;
const HANDSHAKE_RESEND_MS: f64 = 250.0;
const MAX_HANDSHAKE_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy)]
enum Role {
    Server,
    Client { server_addr: SocketAddr },
}

pub struct UdpTransport {
    socket: UdpSocket,
    role: Role,
    config: UdpConfig,
    session: Option<String>,
    /// Approval string a client presents in its challenge response.
    approval: String,
    connections: ConnectionTable,
    incoming: VecDeque<IncomingMessage>,
    stats: NetworkStats,
    /// Clock of the most recent update call. Sends between updates reuse it.
    now_ms: f64,
}

impl UdpTransport {
    /// Binds the listen socket for a session server.
    pub fn server(config: UdpConfig) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(("0.0.0.0", config.bind_port))?;
        socket.set_nonblocking(true)?;
        info!("listening on {}", socket.local_addr()?);
        Ok(Self::new(socket, Role::Server, config))
    }

    /// Binds an ephemeral socket for a client of the server at `server_addr`.
    pub fn client(server_addr: SocketAddr, config: UdpConfig) -> Result<Self, NetError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self::new(socket, Role::Client { server_addr }, config))
    }

    fn new(socket: UdpSocket, role: Role, config: UdpConfig) -> Self {
        Self {
            socket,
            role,
            config,
            session: None,
            approval: String::new(),
            connections: ConnectionTable::new(),
            incoming: VecDeque::new(),
            stats: NetworkStats::default(),
            now_ms: 0.0,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    fn is_server_role(&self) -> bool {
        matches!(self.role, Role::Server)
    }

    fn pump_socket(&mut self, now_ms: f64) {
        let mut datagrams: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    if len < 8 {
                        continue;
                    }
                    datagrams.push((addr, buf[..len].to_vec()));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("socket receive failed: {err}");
                    break;
                }
            }
        }

        for (addr, bytes) in datagrams {
            self.stats.packets_received += 1;
            self.stats.bytes_received += bytes.len() as u64;

            let packet = match Packet::deserialize(&bytes) {
                Ok(packet) => packet,
                Err(err) => {
                    debug!("undecodable packet from {addr}: {err}");
                    continue;
                }
            };
            if !packet.header.is_valid() {
                debug!("packet from {addr} with bad magic or version");
                continue;
            }

            if self.is_server_role() {
                self.handle_server_packet(addr, packet, now_ms);
            } else {
                self.handle_client_packet(addr, packet, now_ms);
            }
        }
    }

    fn handle_server_packet(&mut self, addr: SocketAddr, packet: Packet, now_ms: f64) {
        let header = packet.header;
        match packet.body {
            PacketBody::ConnectionRequest {
                session,
                client_salt,
            } => self.handle_connection_request(addr, session, client_salt, now_ms),
            body => {
                let Some(id) = self.connections.id_for_addr(addr) else {
                    debug!("packet from unknown address {addr} ignored");
                    return;
                };
                let Some(conn) = self.connections.get_mut(id) else {
                    return;
                };
                if !conn.receive_tracker.record_received(header.sequence) {
                    return;
                }
                conn.ack_tracker
                    .process_ack(header.ack, header.ack_bitfield, now_ms);
                conn.touch_received(now_ms);

                match body {
                    PacketBody::ChallengeResponse {
                        combined_salt,
                        approval,
                    } => match conn.state {
                        ConnectionState::Connecting => {
                            if combined_salt == conn.combined_salt() {
                                conn.state = ConnectionState::AwaitingApproval;
                                debug!("connection {id} answered the challenge");
                                let mut hello =
                                    OutgoingMessage::new(MessageKind::ConnectionApproval);
                                hello.write_str(&approval);
                                self.incoming.push_back(IncomingMessage::new(
                                    MessageKind::ConnectionApproval,
                                    id,
                                    hello.into_payload(),
                                ));
                            } else {
                                warn!("connection {id} failed the challenge, dropping it");
                                self.connections.remove(id);
                                Self::send_unconnected(
                                    &self.socket,
                                    &mut self.stats,
                                    addr,
                                    PacketBody::ConnectionDenied {
                                        reason: "bad challenge response".to_owned(),
                                    },
                                );
                            }
                        }
                        // The host is still deciding; the client will keep
                        // resending until it hears a verdict.
                        ConnectionState::AwaitingApproval => {}
                        ConnectionState::Connected => {
                            // Our accept packet was lost.
                            let body = PacketBody::ConnectionAccepted { connection_id: id };
                            Self::transmit(
                                &self.socket,
                                &mut self.stats,
                                &self.config.loss_sim,
                                conn,
                                body,
                                now_ms,
                                None,
                            );
                        }
                        ConnectionState::ChallengeAnswered => {}
                    },
                    PacketBody::Messages(envelopes) => {
                        if conn.state != ConnectionState::Connected {
                            return;
                        }
                        for env in envelopes {
                            for released in conn.streams.accept(env) {
                                match MessageKind::from_wire(released.kind) {
                                    Ok(kind) => {
                                        self.stats.messages_received += 1;
                                        self.incoming.push_back(IncomingMessage::new(
                                            kind,
                                            id,
                                            released.payload,
                                        ));
                                    }
                                    Err(err) => warn!("dropping message from {id}: {err}"),
                                }
                            }
                        }
                    }
                    PacketBody::Ping { timestamp_ms } => {
                        let body = PacketBody::Pong { timestamp_ms };
                        Self::transmit(
                            &self.socket,
                            &mut self.stats,
                            &self.config.loss_sim,
                            conn,
                            body,
                            now_ms,
                            None,
                        );
                    }
                    PacketBody::Pong { .. } => {}
                    PacketBody::Disconnect => {
                        let was_connected = conn.state == ConnectionState::Connected;
                        self.connections.remove(id);
                        debug!("connection {id} disconnected");
                        if was_connected {
                            self.incoming.push_back(IncomingMessage::new(
                                MessageKind::Disconnected,
                                id,
                                Vec::new(),
                            ));
                        }
                    }
                    // Server-bound packets never carry these bodies.
                    PacketBody::ConnectionRequest { .. }
                    | PacketBody::ConnectionChallenge { .. }
                    | PacketBody::ConnectionAccepted { .. }
                    | PacketBody::ConnectionDenied { .. } => {}
                }
            }
        }
    }

    fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        session: String,
        client_salt: u64,
        now_ms: f64,
    ) {
        let Some(active) = self.session.as_deref() else {
            return;
        };
        if session != active {
            debug!("request for unknown session {session:?} from {addr}");
            Self::send_unconnected(
                &self.socket,
                &mut self.stats,
                addr,
                PacketBody::ConnectionDenied {
                    reason: format!("no session named {session:?}"),
                },
            );
            return;
        }

        if let Some(conn) = self.connections.get_mut_by_addr(addr) {
            // Resent request, our challenge was lost.
            if conn.state == ConnectionState::Connecting && conn.client_salt == client_salt {
                conn.touch_received(now_ms);
                let body = PacketBody::ConnectionChallenge {
                    server_salt: conn.server_salt,
                    challenge: client_salt,
                };
                Self::transmit(
                    &self.socket,
                    &mut self.stats,
                    &self.config.loss_sim,
                    conn,
                    body,
                    now_ms,
                    None,
                );
            }
            return;
        }

        if self.connections.len() >= self.config.max_clients {
            debug!("refusing {addr}, session is full");
            Self::send_unconnected(
                &self.socket,
                &mut self.stats,
                addr,
                PacketBody::ConnectionDenied {
                    reason: "session is full".to_owned(),
                },
            );
            return;
        }

        let id = self.connections.allocate_id();
        let mut conn = RemoteConnection::new(id, addr, ConnectionState::Connecting, now_ms);
        conn.client_salt = client_salt;
        conn.server_salt = rand_u64();
        debug!("connection request from {addr}, assigned id {id}");
        let body = PacketBody::ConnectionChallenge {
            server_salt: conn.server_salt,
            challenge: client_salt,
        };
        Self::transmit(
            &self.socket,
            &mut self.stats,
            &self.config.loss_sim,
            &mut conn,
            body,
            now_ms,
            None,
        );
        self.connections.insert(conn);
    }

    fn handle_client_packet(&mut self, addr: SocketAddr, packet: Packet, now_ms: f64) {
        let Role::Client { server_addr } = self.role else {
            return;
        };
        if addr != server_addr {
            debug!("packet from {addr} is not from the server, ignored");
            return;
        }
        let Some(conn) = self.connections.get_mut(SERVER_CONNECTION_ID) else {
            return;
        };

        let header = packet.header;
        if !conn.receive_tracker.record_received(header.sequence) {
            return;
        }
        conn.ack_tracker
            .process_ack(header.ack, header.ack_bitfield, now_ms);
        conn.touch_received(now_ms);

        match packet.body {
            PacketBody::ConnectionChallenge {
                server_salt,
                challenge,
            } => match conn.state {
                ConnectionState::Connecting => {
                    if challenge != conn.client_salt {
                        warn!("challenge does not echo our salt, ignoring it");
                        return;
                    }
                    conn.server_salt = server_salt;
                    conn.state = ConnectionState::ChallengeAnswered;
                    conn.handshake_attempts = 0;
                    conn.handshake_sent_ms = now_ms;
                    let body = PacketBody::ChallengeResponse {
                        combined_salt: conn.combined_salt(),
                        approval: self.approval.clone(),
                    };
                    Self::transmit(
                        &self.socket,
                        &mut self.stats,
                        &self.config.loss_sim,
                        conn,
                        body,
                        now_ms,
                        None,
                    );
                }
                ConnectionState::ChallengeAnswered => {
                    // Our response was lost, answer again.
                    let body = PacketBody::ChallengeResponse {
                        combined_salt: conn.combined_salt(),
                        approval: self.approval.clone(),
                    };
                    Self::transmit(
                        &self.socket,
                        &mut self.stats,
                        &self.config.loss_sim,
                        conn,
                        body,
                        now_ms,
                        None,
                    );
                }
                _ => {}
            },
            PacketBody::ConnectionAccepted { connection_id } => {
                if conn.state != ConnectionState::Connected {
                    conn.state = ConnectionState::Connected;
                    info!("connected to session as connection {connection_id}");
                    self.incoming.push_back(IncomingMessage::new(
                        MessageKind::Connected,
                        SERVER_CONNECTION_ID,
                        Vec::new(),
                    ));
                }
            }
            PacketBody::ConnectionDenied { reason } => {
                warn!("connection denied: {reason}");
                self.reset_client();
                self.incoming.push_back(IncomingMessage::new(
                    MessageKind::Disconnected,
                    SERVER_CONNECTION_ID,
                    Vec::new(),
                ));
            }
            PacketBody::Messages(envelopes) => {
                if conn.state != ConnectionState::Connected {
                    return;
                }
                for env in envelopes {
                    for released in conn.streams.accept(env) {
                        match MessageKind::from_wire(released.kind) {
                            Ok(kind) => {
                                self.stats.messages_received += 1;
                                self.incoming.push_back(IncomingMessage::new(
                                    kind,
                                    SERVER_CONNECTION_ID,
                                    released.payload,
                                ));
                            }
                            Err(err) => warn!("dropping message from the server: {err}"),
                        }
                    }
                }
            }
            PacketBody::Ping { timestamp_ms } => {
                let body = PacketBody::Pong { timestamp_ms };
                Self::transmit(
                    &self.socket,
                    &mut self.stats,
                    &self.config.loss_sim,
                    conn,
                    body,
                    now_ms,
                    None,
                );
            }
            PacketBody::Pong { .. } => {}
            PacketBody::Disconnect => {
                info!("server closed the connection");
                self.reset_client();
                self.incoming.push_back(IncomingMessage::new(
                    MessageKind::Disconnected,
                    SERVER_CONNECTION_ID,
                    Vec::new(),
                ));
            }
            PacketBody::ConnectionRequest { .. } | PacketBody::ChallengeResponse { .. } => {}
        }
    }

    fn service_connections(&mut self, now_ms: f64) {
        let is_server = self.is_server_role();
        let mut dead: Vec<(ConnectionId, &'static str)> = Vec::new();

        for conn in self.connections.iter_mut() {
            if conn.is_timed_out(now_ms, self.config.timeout_ms) {
                dead.push((conn.id, "timed out"));
                continue;
            }

            match conn.state {
                // Client-driven handshake states resend on a fixed cadence.
                ConnectionState::Connecting if !is_server => {
                    if now_ms - conn.handshake_sent_ms >= HANDSHAKE_RESEND_MS {
                        if conn.handshake_attempts >= MAX_HANDSHAKE_ATTEMPTS {
                            dead.push((conn.id, "handshake timed out"));
                            continue;
                        }
                        conn.handshake_attempts += 1;
                        conn.handshake_sent_ms = now_ms;
                        let body = PacketBody::ConnectionRequest {
                            session: self.session.clone().unwrap_or_default(),
                            client_salt: conn.client_salt,
                        };
                        Self::transmit(
                            &self.socket,
                            &mut self.stats,
                            &self.config.loss_sim,
                            conn,
                            body,
                            now_ms,
                            None,
                        );
                    }
                }
                ConnectionState::ChallengeAnswered => {
                    if now_ms - conn.handshake_sent_ms >= HANDSHAKE_RESEND_MS {
                        if conn.handshake_attempts >= MAX_HANDSHAKE_ATTEMPTS {
                            dead.push((conn.id, "handshake timed out"));
                            continue;
                        }
                        conn.handshake_attempts += 1;
                        conn.handshake_sent_ms = now_ms;
                        let body = PacketBody::ChallengeResponse {
                            combined_salt: conn.combined_salt(),
                            approval: self.approval.clone(),
                        };
                        Self::transmit(
                            &self.socket,
                            &mut self.stats,
                            &self.config.loss_sim,
                            conn,
                            body,
                            now_ms,
                            None,
                        );
                    }
                }
                ConnectionState::Connected => {
                    for (envelopes, send_count) in conn.ack_tracker.due_retransmits(now_ms) {
                        if send_count >= MAX_SEND_ATTEMPTS {
                            dead.push((conn.id, "too many retransmissions"));
                            break;
                        }
                        self.stats.packets_lost += 1;
                        Self::transmit(
                            &self.socket,
                            &mut self.stats,
                            &self.config.loss_sim,
                            conn,
                            PacketBody::Messages(envelopes.clone()),
                            now_ms,
                            Some((envelopes, send_count + 1)),
                        );
                    }
                    if conn.needs_keepalive(now_ms, self.config.keepalive_ms) {
                        let body = PacketBody::Ping {
                            timestamp_ms: now_ms as u64,
                        };
                        Self::transmit(
                            &self.socket,
                            &mut self.stats,
                            &self.config.loss_sim,
                            conn,
                            body,
                            now_ms,
                            None,
                        );
                    }
                }
                _ => {}
            }
        }

        for (id, reason) in dead {
            warn!("dropping connection {id}: {reason}");
            if let Some(mut conn) = self.connections.remove(id) {
                let was_connected = conn.state == ConnectionState::Connected;
                Self::transmit(
                    &self.socket,
                    &mut self.stats,
                    &self.config.loss_sim,
                    &mut conn,
                    PacketBody::Disconnect,
                    now_ms,
                    None,
                );
                if was_connected || !is_server {
                    let sender = if is_server { id } else { SERVER_CONNECTION_ID };
                    self.incoming.push_back(IncomingMessage::new(
                        MessageKind::Disconnected,
                        sender,
                        Vec::new(),
                    ));
                }
            }
            if !is_server {
                self.session = None;
            }
        }
    }

    fn reset_client(&mut self) {
        self.connections.clear();
        self.session = None;
        self.approval.clear();
    }

    fn dispatch(&mut self, id: ConnectionId, msg: &OutgoingMessage, delivery: Delivery, channel: u8) {
        let Some(conn) = self.connections.get_mut(id) else {
            debug!("send to unknown connection {id} dropped");
            return;
        };
        if conn.state != ConnectionState::Connected {
            debug!("send to connection {id} before it is established dropped");
            return;
        }

        let stream_seq = conn.stream_sender.next_seq(delivery.wire_tag(), channel);
        let envelope = Envelope {
            kind: msg.kind().wire_tag(),
            delivery: delivery.wire_tag(),
            channel,
            stream_seq,
            payload: msg.payload().to_vec(),
        };
        let reliable = delivery
            .is_reliable()
            .then(|| (vec![envelope.clone()], 1));
        let now_ms = self.now_ms;
        self.stats.messages_sent += 1;
        Self::transmit(
            &self.socket,
            &mut self.stats,
            &self.config.loss_sim,
            conn,
            PacketBody::Messages(vec![envelope]),
            now_ms,
            reliable,
        );
    }

    /// Builds the header off the connection's trackers and puts one packet on
    /// the wire. Reliable envelopes are tracked before the loss simulation
    /// gets a say, so a simulated drop still ends in retransmission.
    fn transmit(
        socket: &UdpSocket,
        stats: &mut NetworkStats,
        loss: &PacketLossSimulation,
        conn: &mut RemoteConnection,
        body: PacketBody,
        now_ms: f64,
        reliable: Option<(Vec<Envelope>, u32)>,
    ) {
        let sequence = conn.next_sequence();
        let (ack, ack_bitfield) = conn.receive_tracker.ack_data();
        let packet = Packet::new(PacketHeader::new(sequence, ack, ack_bitfield), body);
        let bytes = match packet.serialize() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("packet serialization failed: {err}");
                return;
            }
        };

        conn.ack_tracker.track_packet(sequence, now_ms, reliable);
        conn.touch_sent(now_ms);
        if bytes.len() > MAX_PACKET_SIZE {
            debug!(
                "{} byte packet to {} exceeds the fragmentation-safe size",
                bytes.len(),
                conn.addr
            );
        }
        if loss.should_drop() {
            return;
        }

        stats.packets_sent += 1;
        stats.bytes_sent += bytes.len() as u64;
        if let Err(err) = socket.send_to(&bytes, conn.addr) {
            warn!("send to {} failed: {err}", conn.addr);
        }
    }

    /// For replies to endpoints we hold no connection state for.
    fn send_unconnected(
        socket: &UdpSocket,
        stats: &mut NetworkStats,
        addr: SocketAddr,
        body: PacketBody,
    ) {
        let packet = Packet::new(PacketHeader::new(0, 0, 0), body);
        match packet.serialize() {
            Ok(bytes) => {
                stats.packets_sent += 1;
                stats.bytes_sent += bytes.len() as u64;
                if let Err(err) = socket.send_to(&bytes, addr) {
                    warn!("send to {addr} failed: {err}");
                }
            }
            Err(err) => warn!("packet serialization failed: {err}"),
        }
    }
}

impl Transport for UdpTransport {
    fn create_session(&mut self, name: &str) -> Result<(), NetError> {
        if !self.is_server_role() {
            return Err(NetError::NotServer);
        }
        if self.session.is_some() {
            return Err(NetError::SessionActive);
        }
        self.session = Some(name.to_owned());
        info!("hosting session {name:?}");
        Ok(())
    }

    fn join_session(&mut self, name: &str, approval: &str) -> Result<(), NetError> {
        let Role::Client { server_addr } = self.role else {
            return Err(NetError::NotClient);
        };
        if self.session.is_some() {
            return Err(NetError::SessionActive);
        }

        self.session = Some(name.to_owned());
        self.approval = approval.to_owned();

        let mut conn = RemoteConnection::new(
            SERVER_CONNECTION_ID,
            server_addr,
            ConnectionState::Connecting,
            self.now_ms,
        );
        conn.client_salt = rand_u64();
        conn.handshake_attempts = 1;
        let body = PacketBody::ConnectionRequest {
            session: name.to_owned(),
            client_salt: conn.client_salt,
        };
        Self::transmit(
            &self.socket,
            &mut self.stats,
            &self.config.loss_sim,
            &mut conn,
            body,
            self.now_ms,
            None,
        );
        self.connections.insert(conn);
        info!("joining session {name:?} at {server_addr}");
        Ok(())
    }

    fn leave_session(&mut self) {
        let now_ms = self.now_ms;
        for id in self.connections.ids() {
            if let Some(mut conn) = self.connections.remove(id) {
                Self::transmit(
                    &self.socket,
                    &mut self.stats,
                    &self.config.loss_sim,
                    &mut conn,
                    PacketBody::Disconnect,
                    now_ms,
                    None,
                );
            }
        }
        if let Some(name) = self.session.take() {
            info!("left session {name:?}");
        }
        self.approval.clear();
    }

    fn update(&mut self, now_ms: f64) {
        self.now_ms = now_ms;
        self.pump_socket(now_ms);
        self.service_connections(now_ms);

        let connected = self.connections.connected_count();
        if connected > 0 {
            let n = connected as f32;
            self.stats.rtt_ms = self
                .connections
                .iter()
                .filter(|c| c.state == ConnectionState::Connected)
                .map(|c| c.ack_tracker.srtt())
                .sum::<f32>()
                / n;
            self.stats.rtt_variance = self
                .connections
                .iter()
                .filter(|c| c.state == ConnectionState::Connected)
                .map(|c| c.ack_tracker.rtt_var())
                .sum::<f32>()
                / n;
        }
    }

    fn next_message(&mut self) -> Option<IncomingMessage> {
        self.incoming.pop_front()
    }

    fn send_to(
        &mut self,
        conn: ConnectionId,
        msg: &OutgoingMessage,
        delivery: Delivery,
        channel: u8,
    ) {
        self.dispatch(conn, msg, delivery, channel);
    }

    fn send_to_all(&mut self, msg: &OutgoingMessage, delivery: Delivery, channel: u8) {
        for id in self.connections.connected_ids() {
            self.dispatch(id, msg, delivery, channel);
        }
    }

    fn approve(&mut self, conn: ConnectionId) {
        let now_ms = self.now_ms;
        let Some(remote) = self.connections.get_mut(conn) else {
            warn!("approve for unknown connection {conn}");
            return;
        };
        if remote.state != ConnectionState::AwaitingApproval {
            return;
        }
        remote.state = ConnectionState::Connected;
        info!("connection {conn} approved");
        let body = PacketBody::ConnectionAccepted {
            connection_id: conn,
        };
        Self::transmit(
            &self.socket,
            &mut self.stats,
            &self.config.loss_sim,
            remote,
            body,
            now_ms,
            None,
        );
        self.incoming.push_back(IncomingMessage::new(
            MessageKind::Connected,
            conn,
            Vec::new(),
        ));
    }

    fn disapprove(&mut self, conn: ConnectionId) {
        let now_ms = self.now_ms;
        let Some(remote) = self.connections.get_mut(conn) else {
            return;
        };
        if remote.state != ConnectionState::AwaitingApproval {
            return;
        }
        info!("connection {conn} refused");
        let body = PacketBody::ConnectionDenied {
            reason: "refused by the host".to_owned(),
        };
        Self::transmit(
            &self.socket,
            &mut self.stats,
            &self.config.loss_sim,
            remote,
            body,
            now_ms,
            None,
        );
        self.connections.remove(conn);
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        match self.role {
            Role::Server => {
                let now_ms = self.now_ms;
                let Some(mut remote) = self.connections.remove(conn) else {
                    return;
                };
                let was_connected = remote.state == ConnectionState::Connected;
                Self::transmit(
                    &self.socket,
                    &mut self.stats,
                    &self.config.loss_sim,
                    &mut remote,
                    PacketBody::Disconnect,
                    now_ms,
                    None,
                );
                info!("kicked connection {conn}");
                if was_connected {
                    self.incoming.push_back(IncomingMessage::new(
                        MessageKind::Disconnected,
                        conn,
                        Vec::new(),
                    ));
                }
            }
            Role::Client { .. } if conn == SERVER_CONNECTION_ID => self.leave_session(),
            Role::Client { .. } => {}
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn has_connections(&self) -> bool {
        self.connections.connected_count() > 0
    }

    fn connection_count(&self) -> usize {
        self.connections.connected_count()
    }

    fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }
}
