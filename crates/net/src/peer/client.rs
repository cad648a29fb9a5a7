use glam::IVec2;
use log::{debug, info, warn};

use super::{CHAT_CHANNEL, LevelChange, PeerCore, RPC_CHANNEL, TRAVEL_CHANNEL, stale_after_travel};
use crate::actor::{ActorHandle, ActorId};
use crate::config::PeerConfig;
use crate::error::{CodecError, NetError};
use crate::message::{Delivery, IncomingMessage, MessageKind, OutgoingMessage};
use crate::registry::{CallParam, MethodRegistry};
use crate::transport::Transport;

/// Callbacks the hosting simulation provides to the client peer.
pub trait ClientHost {
    /// Factory for mirrored actors. `None` means the class hash is unknown;
    /// the rest of the creation message is abandoned.
    fn create_remote_actor(
        &mut self,
        class_hash: i32,
        id: ActorId,
        location: IVec2,
    ) -> Option<ActorHandle>;

    /// Build the actor representing the local player, after the server
    /// granted the player request.
    fn create_local_player(&mut self, id: ActorId, location: IVec2) -> Option<ActorHandle>;

    fn connected(&mut self) {}

    fn disconnected(&mut self) {}

    fn change_level(&mut self, change: &LevelChange) {
        let _ = change;
    }

    /// A remote player's actor was removed because its connection left.
    fn player_disconnected(&mut self, player_id: ActorId) {
        let _ = player_id;
    }

    fn chat(&mut self, text: &str) {
        let _ = text;
    }
}

/// The mirroring peer. Builds actors from creation messages, applies
/// replication deltas and forwards remote calls to the server.
pub struct ClientPeer<T: Transport> {
    core: PeerCore<T>,
}

impl<T: Transport> ClientPeer<T> {
    pub fn new(transport: T, config: PeerConfig, registry: MethodRegistry) -> Self {
        Self {
            core: PeerCore::new(transport, config, registry),
        }
    }

    pub fn join_session(&mut self, name: &str, approval: &str) -> Result<(), NetError> {
        self.core.transport.join_session(name, approval)
    }

    pub fn leave_session(&mut self) {
        self.core.transport.leave_session();
        self.core.actors.clear();
    }

    /// Asks the server for a player actor under this name. Hosts that rely
    /// on the travel handshake never need this; the ack admits them with the
    /// default name.
    pub fn request_player_actor(&mut self, name: &str) {
        let mut out = OutgoingMessage::new(MessageKind::PlayerActorRequest);
        out.write_str(name);
        self.core
            .transport
            .send_to_all(&out, Delivery::ReliableOrdered, RPC_CHANNEL);
    }

    /// Queues a remote call on the server's authoritative copy of the actor.
    pub fn call_method_on_server(
        &mut self,
        actor_id: ActorId,
        method: &str,
        reliable: bool,
        params: Vec<CallParam>,
    ) {
        self.core.queue_call(actor_id, method, reliable, params);
    }

    pub fn send_chat(&mut self, text: &str) {
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

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    /// Advances the peer by one tick if the interval has elapsed. Returns
    /// whether a tick ran.
    pub fn update(&mut self, now_ms: f64, host: &mut dyn ClientHost) -> bool {
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
        true
    }

    fn drain_messages(&mut self, host: &mut dyn ClientHost) {
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
                warn!("failed to handle {:?}: {err}", msg.kind());
            }
        }
    }

    fn handle_message(
        &mut self,
        msg: &mut IncomingMessage,
        host: &mut dyn ClientHost,
    ) -> Result<(), CodecError> {
        match msg.kind() {
            MessageKind::Connected => {
                info!("session joined");
                host.connected();
            }
            MessageKind::Disconnected => {
                info!("session lost");
                self.core.actors.clear();
                host.disconnected();
            }
            MessageKind::ServerTravel => {
                let change = LevelChange::read_from(msg)?;
                info!("level change to {:?}", change.level_name);
                self.core.actors.clear();
                host.change_level(&change);
                // Empty-payload ack; it makes us ready on the server.
                let ack = OutgoingMessage::new(MessageKind::ServerTravel);
                self.core
                    .transport
                    .send_to_all(&ack, Delivery::ReliableOrdered, TRAVEL_CHANNEL);
            }
            MessageKind::ActorCreation => self.handle_creation(msg, host)?,
            MessageKind::PlayerActorRequest => {
                // The server's answer to our player request is a full
                // creation entry; only the id and spawn location matter for
                // the locally built player, the trailing fields are skipped.
                let id = msg.read_i32()?;
                let location = IVec2::new(msg.read_i32()?, msg.read_i32()?);
                match host.create_local_player(id, location) {
                    Some(player) => {
                        {
                            let mut p = player.borrow_mut();
                            p.set_id(id);
                            p.set_location(location);
                        }
                        // A mirror created from the batch loses to the
                        // local player representation.
                        self.core.actors.retain(|a| a.borrow().id() != id);
                        self.core.actors.push(player);
                        info!("player actor {id} ready");
                    }
                    None => warn!("host provided no local player actor"),
                }
            }
            MessageKind::ActorReplication => {
                let count = msg.read_i32()?;
                for _ in 0..count {
                    let id = msg.read_i32()?;
                    let location = IVec2::new(msg.read_i32()?, msg.read_i32()?);
                    // Unknown ids race benignly with destruction.
                    if let Some(actor) = self.core.find_actor(id) {
                        actor.borrow_mut().set_location(location);
                    }
                }
            }
            MessageKind::PropertyReplication => {
                let count = msg.read_i32()?;
                for _ in 0..count {
                    let id = msg.read_i32()?;
                    let Some(actor) = self.core.find_actor(id) else {
                        // Without the actor the rest of the payload cannot
                        // be decoded.
                        debug!("property update for unknown actor {id}");
                        return Ok(());
                    };
                    actor.borrow_mut().deserialize(msg)?;
                }
            }
            MessageKind::ActorDestruction => {
                let id = msg.read_i32()?;
                if let Some(actor) = self.core.find_actor(id) {
                    let mut a = actor.borrow_mut();
                    a.set_destroyed();
                    a.remote_destroyed();
                }
            }
            MessageKind::ClientDisconnected => {
                let id = msg.read_i32()?;
                // The departed player's actor leaves right away, not with
                // the sweep; the host hears about it afterwards.
                self.core.actors.retain(|a| a.borrow().id() != id);
                host.player_disconnected(id);
            }
            MessageKind::RemoteMethodCall => self.core.handle_remote_call(msg)?,
            MessageKind::Chat => {
                let text = msg.read_str()?;
                host.chat(&text);
            }
            MessageKind::PlayerCreation => {}
            other => debug!("client ignoring {other:?}"),
        }
        Ok(())
    }

    fn handle_creation(
        &mut self,
        msg: &mut IncomingMessage,
        host: &mut dyn ClientHost,
    ) -> Result<(), CodecError> {
        let count = msg.read_i32()?;
        for _ in 0..count {
            let id = msg.read_i32()?;
            let location = IVec2::new(msg.read_i32()?, msg.read_i32()?);
            let class_hash = msg.read_i32()?;

            if let Some(existing) = self.core.find_actor(id) {
                // Already known. Apply the payload to the live actor instead
                // of creating a duplicate; this also keeps the cursor
                // aligned for the entries behind it.
                let mut actor = existing.borrow_mut();
                if actor.replicate_properties() {
                    actor.deserialize(msg)?;
                }
                continue;
            }

            let Some(actor) = host.create_remote_actor(class_hash, id, location) else {
                // The properties that may follow are undecodable without a
                // concrete type, so the rest of the message is abandoned.
                warn!("no factory for class hash {class_hash}, dropping actor {id}");
                return Ok(());
            };
            {
                let mut a = actor.borrow_mut();
                a.set_id(id);
                a.set_location(location);
                if a.replicate_properties() {
                    a.deserialize(msg)?;
                }
            }
            self.core.actors.push(actor);
            debug!("actor {id} created");
        }
        Ok(())
    }
}
