//! In-process loopback transport. Sessions live in a shared registry and
//! messages hop between endpoints through per-endpoint queues, which makes
//! it the transport of choice for tests and single-process demos.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use log::{debug, info};

use super::Transport;
use crate::error::NetError;
use crate::message::{
    ConnectionId, Delivery, IncomingMessage, MessageKind, OutgoingMessage, SERVER_CONNECTION_ID,
};
use crate::stats::NetworkStats;

type Inbox = Rc<RefCell<VecDeque<IncomingMessage>>>;

struct SessionState {
    /// Receive queue per endpoint, the server under `SERVER_CONNECTION_ID`.
    /// Queues are shared with their owning transport, so notifications
    /// survive session teardown.
    inboxes: HashMap<ConnectionId, Inbox>,
    pending: HashSet<ConnectionId>,
    members: HashSet<ConnectionId>,
    next_id: ConnectionId,
}

impl SessionState {
    fn new() -> Self {
        Self {
            inboxes: HashMap::new(),
            pending: HashSet::new(),
            members: HashSet::new(),
            next_id: SERVER_CONNECTION_ID + 1,
        }
    }
}

/// Session registry shared by every [`MemoryTransport`] cloned from it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    sessions: Rc<RefCell<HashMap<String, SessionState>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Idle,
    Server,
    Client,
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    inbox: Inbox,
    session: Option<String>,
    role: Role,
    local_id: ConnectionId,
    stats: NetworkStats,
}

impl MemoryTransport {
    pub fn new(network: &MemoryNetwork) -> Self {
        Self {
            network: network.clone(),
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            session: None,
            role: Role::Idle,
            local_id: SERVER_CONNECTION_ID,
            stats: NetworkStats::default(),
        }
    }

    fn synthetic(kind: MessageKind, sender: ConnectionId) -> IncomingMessage {
        IncomingMessage::new(kind, sender, Vec::new())
    }

    fn deliver(&mut self, target: ConnectionId, msg: &OutgoingMessage) {
        let Some(name) = self.session.as_deref() else {
            return;
        };
        let sessions = self.network.sessions.borrow();
        let Some(session) = sessions.get(name) else {
            return;
        };
        let Some(inbox) = session.inboxes.get(&target) else {
            debug!("no endpoint {target} in session {name:?}, message dropped");
            return;
        };
        inbox.borrow_mut().push_back(IncomingMessage::new(
            msg.kind(),
            self.local_id,
            msg.payload().to_vec(),
        ));
        self.stats.messages_sent += 1;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += msg.payload().len() as u64;
    }
}

impl Transport for MemoryTransport {
    fn create_session(&mut self, name: &str) -> Result<(), NetError> {
        if self.role != Role::Idle {
            return Err(NetError::SessionActive);
        }
        let mut sessions = self.network.sessions.borrow_mut();
        if sessions.contains_key(name) {
            return Err(NetError::SessionExists(name.to_owned()));
        }
        let mut state = SessionState::new();
        state
            .inboxes
            .insert(SERVER_CONNECTION_ID, Rc::clone(&self.inbox));
        sessions.insert(name.to_owned(), state);
        drop(sessions);

        self.role = Role::Server;
        self.session = Some(name.to_owned());
        self.local_id = SERVER_CONNECTION_ID;
        info!("session {name:?} created");
        Ok(())
    }

    fn join_session(&mut self, name: &str, approval: &str) -> Result<(), NetError> {
        if self.role != Role::Idle {
            return Err(NetError::SessionActive);
        }
        let mut sessions = self.network.sessions.borrow_mut();
        let Some(session) = sessions.get_mut(name) else {
            return Err(NetError::UnknownSession(name.to_owned()));
        };
        let id = session.next_id;
        session.next_id += 1;
        session.inboxes.insert(id, Rc::clone(&self.inbox));
        session.pending.insert(id);

        let mut hello = OutgoingMessage::new(MessageKind::ConnectionApproval);
        hello.write_str(approval);
        if let Some(server_inbox) = session.inboxes.get(&SERVER_CONNECTION_ID) {
            server_inbox.borrow_mut().push_back(IncomingMessage::new(
                MessageKind::ConnectionApproval,
                id,
                hello.into_payload(),
            ));
        }
        drop(sessions);

        self.role = Role::Client;
        self.session = Some(name.to_owned());
        self.local_id = id;
        info!("joined session {name:?} as connection {id}");
        Ok(())
    }

    fn leave_session(&mut self) {
        match self.role {
            Role::Server => {
                if let Some(name) = self.session.take()
                    && let Some(session) = self.network.sessions.borrow_mut().remove(&name)
                {
                    for (id, inbox) in &session.inboxes {
                        if *id != SERVER_CONNECTION_ID {
                            inbox.borrow_mut().push_back(Self::synthetic(
                                MessageKind::Disconnected,
                                SERVER_CONNECTION_ID,
                            ));
                        }
                    }
                    info!("session {name:?} closed");
                }
            }
            Role::Client => {
                if let Some(name) = self.session.take() {
                    let mut sessions = self.network.sessions.borrow_mut();
                    if let Some(session) = sessions.get_mut(&name) {
                        session.inboxes.remove(&self.local_id);
                        let was_member = session.members.remove(&self.local_id);
                        session.pending.remove(&self.local_id);
                        if was_member
                            && let Some(server_inbox) =
                                session.inboxes.get(&SERVER_CONNECTION_ID)
                        {
                            server_inbox.borrow_mut().push_back(Self::synthetic(
                                MessageKind::Disconnected,
                                self.local_id,
                            ));
                        }
                    }
                }
            }
            Role::Idle => {}
        }
        self.role = Role::Idle;
        self.session = None;
        self.local_id = SERVER_CONNECTION_ID;
        self.inbox.borrow_mut().clear();
    }

    fn update(&mut self, _now_ms: f64) {
        // Delivery happens synchronously at send time.
    }

    fn next_message(&mut self) -> Option<IncomingMessage> {
        let msg = self.inbox.borrow_mut().pop_front();
        if msg.is_some() {
            self.stats.messages_received += 1;
            self.stats.packets_received += 1;
        }
        msg
    }

    fn send_to(
        &mut self,
        conn: ConnectionId,
        msg: &OutgoingMessage,
        _delivery: Delivery,
        _channel: u8,
    ) {
        self.deliver(conn, msg);
    }

    fn send_to_all(&mut self, msg: &OutgoingMessage, _delivery: Delivery, _channel: u8) {
        match self.role {
            Role::Server => {
                let members: Vec<ConnectionId> = {
                    let Some(name) = self.session.as_deref() else {
                        return;
                    };
                    let sessions = self.network.sessions.borrow();
                    let Some(session) = sessions.get(name) else {
                        return;
                    };
                    session.members.iter().copied().collect()
                };
                for member in members {
                    self.deliver(member, msg);
                }
            }
            Role::Client => self.deliver(SERVER_CONNECTION_ID, msg),
            Role::Idle => {}
        }
    }

    fn approve(&mut self, conn: ConnectionId) {
        let Some(name) = self.session.as_deref() else {
            return;
        };
        let mut sessions = self.network.sessions.borrow_mut();
        let Some(session) = sessions.get_mut(name) else {
            return;
        };
        if !session.pending.remove(&conn) {
            debug!("approve for unknown connection {conn}");
            return;
        }
        session.members.insert(conn);
        if let Some(inbox) = session.inboxes.get(&conn) {
            inbox
                .borrow_mut()
                .push_back(Self::synthetic(MessageKind::Connected, SERVER_CONNECTION_ID));
        }
        self.inbox
            .borrow_mut()
            .push_back(Self::synthetic(MessageKind::Connected, conn));
    }

    fn disapprove(&mut self, conn: ConnectionId) {
        let Some(name) = self.session.as_deref() else {
            return;
        };
        let mut sessions = self.network.sessions.borrow_mut();
        let Some(session) = sessions.get_mut(name) else {
            return;
        };
        session.pending.remove(&conn);
        if let Some(inbox) = session.inboxes.remove(&conn) {
            inbox
                .borrow_mut()
                .push_back(Self::synthetic(MessageKind::Disconnected, SERVER_CONNECTION_ID));
        }
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        match self.role {
            Role::Server => {
                let Some(name) = self.session.as_deref() else {
                    return;
                };
                let mut sessions = self.network.sessions.borrow_mut();
                let Some(session) = sessions.get_mut(name) else {
                    return;
                };
                session.pending.remove(&conn);
                let was_member = session.members.remove(&conn);
                if let Some(inbox) = session.inboxes.remove(&conn) {
                    inbox.borrow_mut().push_back(Self::synthetic(
                        MessageKind::Disconnected,
                        SERVER_CONNECTION_ID,
                    ));
                }
                drop(sessions);
                if was_member {
                    self.inbox
                        .borrow_mut()
                        .push_back(Self::synthetic(MessageKind::Disconnected, conn));
                }
            }
            Role::Client if conn == SERVER_CONNECTION_ID => self.leave_session(),
            _ => {}
        }
    }

    fn is_connected(&self) -> bool {
        match self.role {
            Role::Idle => false,
            Role::Server => true,
            Role::Client => {
                let Some(name) = self.session.as_deref() else {
                    return false;
                };
                let sessions = self.network.sessions.borrow();
                sessions.get(name).is_some_and(|s| {
                    s.members.contains(&self.local_id) || s.pending.contains(&self.local_id)
                })
            }
        }
    }

    fn has_connections(&self) -> bool {
        self.connection_count() > 0
    }

    fn connection_count(&self) -> usize {
        let Some(name) = self.session.as_deref() else {
            return 0;
        };
        let sessions = self.network.sessions.borrow();
        let Some(session) = sessions.get(name) else {
            return 0;
        };
        match self.role {
            Role::Server => session.members.len(),
            Role::Client => usize::from(session.members.contains(&self.local_id)),
            Role::Idle => 0,
        }
    }

    fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }
}
