use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info, warn};

use super::{
    BATCH_CHANNEL, CHAT_CHANNEL, LevelChange, MOVEMENT_CHANNEL, PROPERTY_CHANNEL, PeerCore,
    RPC_CHANNEL, TRAVEL_CHANNEL, stale_after_travel,
};
use crate::actor::{Actor, ActorHandle, ActorId};
use crate::config::PeerConfig;
use crate::error::{CodecError, NetError};
use crate::message::{ConnectionId, Delivery, IncomingMessage, MessageKind, OutgoingMessage};
use crate::registry::{CallParam, MethodRegistry};
use crate::transport::Transport;

/// Callbacks the hosting simulation provides to the server peer.
pub trait ServerHost {
    /// Judge a joining connection's approval string.
    fn approve_connection(&mut self, conn: ConnectionId, approval: &str) -> bool {
        let _ = (conn, approval);
        true
    }

    /// An approved connection finished the handshake and is now tracked.
    fn client_joined_session(&mut self, conn: ConnectionId) {
        let _ = conn;
    }

    /// Build the player actor for a connection entering the world. The host
    /// assigns the actor id. `None` leaves the connection tracked but without
    /// a player.
    fn create_remote_player(&mut self, conn: ConnectionId, name: &str) -> Option<ActorHandle>;

    /// The connection owning this player actor left; called before the actor
    /// is marked destroyed.
    fn remove_remote_player(&mut self, conn: ConnectionId, player: &ActorHandle) {
        let _ = (conn, player);
    }

    fn chat(&mut self, from: ConnectionId, text: &str) {
        let _ = (from, text);
    }
}

/// The authoritative peer. Owns the actor list, replicates deltas to ready
/// connections and executes remote calls arriving from clients.
///
/// A readiness record appears the moment a connection is established.
/// Creations, destructions and level changes reach every record; dirty-flag
/// deltas reach only records that hold a player actor.
pub struct ServerPeer<T: Transport> {
    core: PeerCore<T>,
    /// Tracked connections and the player actor attached to each, if any.
    ready: HashMap<ConnectionId, Option<ActorHandle>>,
    creation_batch: Vec<ActorHandle>,
    destruction_batch: Vec<ActorId>,
    pending_level: Option<LevelChange>,
    /// Replayed to connections that join after the last travel.
    last_level: Option<LevelChange>,
}

impl<T: Transport> ServerPeer<T> {
    pub fn new(transport: T, config: PeerConfig, registry: MethodRegistry) -> Self {
        Self {
            core: PeerCore::new(transport, config, registry),
            ready: HashMap::new(),
            creation_batch: Vec::new(),
            destruction_batch: Vec::new(),
            pending_level: None,
            last_level: None,
        }
    }

    pub fn create_session(&mut self, name: &str) -> Result<(), NetError> {
        self.core.transport.create_session(name)
    }

    pub fn leave_session(&mut self) {
        self.core.transport.leave_session();
        self.ready.clear();
    }

    /// Registers an actor for replication. The host assigns the id before
    /// registering; the actor reaches ready connections with the next tick's
    /// creation batch.
    pub fn create_actor(&mut self, actor: ActorHandle) {
        self.creation_batch.push(Rc::clone(&actor));
        self.core.actors.push(actor);
    }

    /// Marks an actor destroyed. It is swept from the list at the next tick
    /// and its destruction reaches ready connections with the next batch.
    pub fn destroy_actor(&mut self, actor: &ActorHandle) {
        let mut a = actor.borrow_mut();
        if a.destroyed() {
            return;
        }
        a.set_destroyed();
        self.destruction_batch.push(a.id());
    }

    /// Schedules a level change and empties the live actor set on the spot.
    /// The change goes out at the end of the current tick, taking precedence
    /// over any batched creations and destructions; actors registered after
    /// this call belong to the new level.
    pub fn server_travel(
        &mut self,
        game_state: u8,
        world_builder: &str,
        level_name: &str,
        width: i32,
        height: i32,
    ) {
        info!("server travel to {level_name:?}");
        let change = LevelChange {
            game_state,
            world_builder: world_builder.to_owned(),
            level_name: level_name.to_owned(),
            width,
            height,
        };
        self.core.actors.clear();
        self.last_level = Some(change.clone());
        self.pending_level = Some(change);
    }

    /// Queues a remote call on every client's mirror of the actor.
    pub fn call_method_on_clients(
        &mut self,
        actor_id: ActorId,
        method: &str,
        reliable: bool,
        params: Vec<CallParam>,
    ) {
        self.core.queue_call(actor_id, method, reliable, params);
    }

    pub fn broadcast_chat(&mut self, text: &str) {
        let mut out = OutgoingMessage::new(MessageKind::Chat);
        out.write_str(text);
        self.core
            .transport
            .send_to_all(&out, Delivery::Unreliable, CHAT_CHANNEL);
    }

    pub fn actors(&self) -> &[ActorHandle] {
        &self.core.actors
    }

    pub fn find_actor(&self, id: ActorId) -> Option<ActorHandle> {
        self.core.find_actor(id)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    /// Advances the peer by one tick if the interval has elapsed. Returns
    /// whether a tick ran.
    pub fn update(&mut self, now_ms: f64, host: &mut dyn ServerHost) -> bool {
        if !self.core.tick_ready(now_ms) {
            return false;
        }
        self.core.transport.update(now_ms);
        if !self.core.transport.is_connected() {
            self.core.clear_calls();
            return true;
        }

        self.core.sweep_destroyed();
        self.drain_messages(host);
        if self.core.transport.has_connections() {
            self.core.flush_calls();
        }
        self.core.clear_calls();
        self.end_update();
        true
    }

    fn drain_messages(&mut self, host: &mut dyn ServerHost) {
        let mut traveled = false;
        while let Some(mut msg) = self.core.transport.next_message() {
            if traveled && stale_after_travel(msg.kind()) {
                debug!("discarding {:?} queued behind a level change", msg.kind());
                continue;
            }
            if msg.kind() == MessageKind::ServerTravel {
                traveled = true;
            }
            if let Err(err) = self.handle_message(&mut msg, host) {
                warn!(
                    "failed to handle {:?} from connection {}: {err}",
                    msg.kind(),
                    msg.sender()
                );
            }
        }
    }

    fn handle_message(
        &mut self,
        msg: &mut IncomingMessage,
        host: &mut dyn ServerHost,
    ) -> Result<(), CodecError> {
        match msg.kind() {
            MessageKind::ConnectionApproval => {
                let approval = msg.read_str()?;
                let conn = msg.sender();
                if host.approve_connection(conn, &approval) {
                    self.core.transport.approve(conn);
                } else {
                    info!("connection {conn} rejected by the host");
                    self.core.transport.disapprove(conn);
                }
            }
            MessageKind::Connected => {
                let conn = msg.sender();
                if !self.ready.contains_key(&conn) {
                    info!("connection {conn} established");
                    self.ready.insert(conn, None);
                    host.client_joined_session(conn);
                    // A level applied before this connection existed still
                    // has to reach it.
                    if let Some(last) = self.last_level.clone() {
                        let mut out = OutgoingMessage::new(MessageKind::ServerTravel);
                        last.write_to(&mut out);
                        self.core.transport.send_to(
                            conn,
                            &out,
                            Delivery::ReliableOrdered,
                            TRAVEL_CHANNEL,
                        );
                    }
                }
            }
            MessageKind::Disconnected => self.handle_disconnected(msg.sender(), host),
            // A client acknowledging the level change starts over: fresh
            // record, default player name.
            MessageKind::ServerTravel => {
                let conn = msg.sender();
                self.ready.insert(conn, None);
                self.admit_connection(conn, "default", host);
            }
            MessageKind::PlayerActorRequest => {
                let name = msg.read_str()?;
                self.admit_connection(msg.sender(), &name, host);
            }
            MessageKind::RemoteMethodCall => self.core.handle_remote_call(msg)?,
            MessageKind::Chat => {
                let text = msg.read_str()?;
                host.chat(msg.sender(), &text);
                let mut out = OutgoingMessage::new(MessageKind::Chat);
                out.write_str(&text);
                // Every established connection hears it, the sender included.
                self.core
                    .transport
                    .send_to_all(&out, Delivery::Unreliable, CHAT_CHANNEL);
            }
            MessageKind::PlayerCreation => {}
            other => debug!("server ignoring {other:?}"),
        }
        Ok(())
    }

    /// Player admission shared by the travel ack and the explicit request.
    /// Idempotent per connection: once a player actor is attached, repeats
    /// change nothing.
    fn admit_connection(&mut self, conn: ConnectionId, name: &str, host: &mut dyn ServerHost) {
        if matches!(self.ready.get(&conn), Some(Some(_))) {
            debug!("connection {conn} repeated its player request");
            return;
        }
        info!("connection {conn} entering the world as {name:?}");

        let Some(player) = host.create_remote_player(conn, name) else {
            warn!("host provided no player actor for connection {conn}");
            self.ready.entry(conn).or_insert(None);
            return;
        };
        player.borrow_mut().set_owner(conn);
        self.create_actor(Rc::clone(&player));

        let mut out = OutgoingMessage::new(MessageKind::PlayerActorRequest);
        encode_creation(&*player.borrow(), &mut out);
        self.core
            .transport
            .send_to(conn, &out, Delivery::ReliableUnordered, RPC_CHANNEL);

        self.ready.insert(conn, Some(player));
        self.sync_world(conn);
    }

    /// One creation message carrying every live actor, the freshly attached
    /// player included.
    fn sync_world(&mut self, conn: ConnectionId) {
        let live: Vec<ActorHandle> = self
            .core
            .actors
            .iter()
            .filter(|actor| !actor.borrow().destroyed())
            .cloned()
            .collect();
        let mut out = OutgoingMessage::new(MessageKind::ActorCreation);
        out.write_i32(live.len() as i32);
        for actor in &live {
            encode_creation(&*actor.borrow(), &mut out);
        }
        self.core
            .transport
            .send_to(conn, &out, Delivery::ReliableUnordered, BATCH_CHANNEL);
    }

    fn handle_disconnected(&mut self, conn: ConnectionId, host: &mut dyn ServerHost) {
        info!("connection {conn} left");
        let Some(player) = self.ready.remove(&conn).flatten() else {
            return;
        };
        host.remove_remote_player(conn, &player);

        let player_id = player.borrow().id();
        player.borrow_mut().set_destroyed();

        // The departed player's actor is announced through this notice, not
        // through the destruction batch.
        let mut out = OutgoingMessage::new(MessageKind::ClientDisconnected);
        out.write_i32(player_id);
        for other in self.ready_ids() {
            self.core
                .transport
                .send_to(other, &out, Delivery::ReliableUnordered, BATCH_CHANNEL);
        }
    }

    /// End of tick. With no transport connections the batches and any
    /// pending level change are dropped; otherwise a pending level change
    /// preempts everything, and failing that the creations, destructions and
    /// dirty-flag deltas go out in that order.
    fn end_update(&mut self) {
        if !self.core.transport.has_connections() {
            // Dirty flags outlive the empty tick; the batches and the
            // pending change do not. The remembered level still replays to
            // whoever connects next.
            self.creation_batch.clear();
            self.destruction_batch.clear();
            self.pending_level = None;
            return;
        }

        if let Some(change) = self.pending_level.take() {
            self.creation_batch.clear();
            self.destruction_batch.clear();

            let mut out = OutgoingMessage::new(MessageKind::ServerTravel);
            change.write_to(&mut out);
            for conn in self.ready_ids() {
                self.core
                    .transport
                    .send_to(conn, &out, Delivery::ReliableOrdered, TRAVEL_CHANNEL);
            }
            // Everyone re-acks before receiving the new world.
            self.ready.clear();
            return;
        }

        self.flush_creations();
        self.flush_destructions();
        self.send_deltas();
    }

    fn flush_creations(&mut self) {
        let batch: Vec<ActorHandle> = self
            .creation_batch
            .drain(..)
            .filter(|actor| !actor.borrow().destroyed())
            .collect();
        if batch.is_empty() {
            return;
        }
        let mut out = OutgoingMessage::new(MessageKind::ActorCreation);
        out.write_i32(batch.len() as i32);
        for actor in &batch {
            encode_creation(&*actor.borrow(), &mut out);
        }
        for conn in self.ready_ids() {
            self.core
                .transport
                .send_to(conn, &out, Delivery::ReliableUnordered, BATCH_CHANNEL);
        }
    }

    fn flush_destructions(&mut self) {
        let ready = self.ready_ids();
        for id in self.destruction_batch.drain(..) {
            let mut out = OutgoingMessage::new(MessageKind::ActorDestruction);
            out.write_i32(id);
            for &conn in &ready {
                self.core
                    .transport
                    .send_to(conn, &out, Delivery::ReliableUnordered, BATCH_CHANNEL);
            }
        }
    }

    /// Movement and property deltas for every connection holding a player,
    /// then one flag sweep over all actors whether anyone was served or not.
    fn send_deltas(&mut self) {
        let served: Vec<(ConnectionId, ActorId)> = self
            .ready
            .iter()
            .filter_map(|(conn, player)| player.as_ref().map(|p| (*conn, p.borrow().id())))
            .collect();

        for (conn, player_id) in served {
            // A player's own movement is never echoed back at it.
            let movers: Vec<ActorHandle> = self
                .core
                .actors
                .iter()
                .filter(|actor| {
                    let a = actor.borrow();
                    !a.destroyed()
                        && a.replicate_movement()
                        && a.movement_dirty()
                        && a.id() != player_id
                })
                .cloned()
                .collect();
            if !movers.is_empty() {
                let mut out = OutgoingMessage::new(MessageKind::ActorReplication);
                out.write_i32(movers.len() as i32);
                for actor in &movers {
                    let a = actor.borrow();
                    out.write_i32(a.id());
                    out.write_i32(a.location().x);
                    out.write_i32(a.location().y);
                }
                self.core.transport.send_to(
                    conn,
                    &out,
                    Delivery::UnreliableSequenced,
                    MOVEMENT_CHANNEL,
                );
            }

            let changed: Vec<ActorHandle> = self
                .core
                .actors
                .iter()
                .filter(|actor| {
                    let a = actor.borrow();
                    !a.destroyed() && a.replicate_properties() && a.properties_dirty()
                })
                .cloned()
                .collect();
            if !changed.is_empty() {
                let mut out = OutgoingMessage::new(MessageKind::PropertyReplication);
                out.write_i32(changed.len() as i32);
                for actor in &changed {
                    let a = actor.borrow();
                    out.write_i32(a.id());
                    a.serialize(&mut out);
                }
                self.core.transport.send_to(
                    conn,
                    &out,
                    Delivery::ReliableSequenced,
                    PROPERTY_CHANNEL,
                );
            }
        }

        for actor in &self.core.actors {
            let mut a = actor.borrow_mut();
            a.set_movement_dirty(false);
            a.set_properties_dirty(false);
        }
    }

    fn ready_ids(&self) -> Vec<ConnectionId> {
        self.ready.keys().copied().collect()
    }
}

fn encode_creation(actor: &dyn Actor, out: &mut OutgoingMessage) {
    out.write_i32(actor.id());
    out.write_i32(actor.location().x);
    out.write_i32(actor.location().y);
    out.write_i32(actor.class_hash());
    if actor.replicate_properties() {
        actor.serialize(out);
    }
}
