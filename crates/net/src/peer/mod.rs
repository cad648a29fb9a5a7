pub mod client;
pub mod server;

use log::debug;

use crate::actor::{ActorHandle, ActorId};
use crate::config::PeerConfig;
use crate::error::CodecError;
use crate::message::{Delivery, IncomingMessage, MessageKind, OutgoingMessage};
use crate::registry::{CallParam, MethodRegistry, name_hash};
use crate::transport::Transport;

// Channel assignment is part of the wire format.
pub(crate) const RPC_CHANNEL: u8 = 0;
pub(crate) const BATCH_CHANNEL: u8 = 0;
pub(crate) const TRAVEL_CHANNEL: u8 = 2;
pub(crate) const MOVEMENT_CHANNEL: u8 = 5;
pub(crate) const PROPERTY_CHANNEL: u8 = 6;
pub(crate) const CHAT_CHANNEL: u8 = 0;

/// Payload of a `ServerTravel` message: everything a client needs to tear its
/// world down and build the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelChange {
    pub game_state: u8,
    pub world_builder: String,
    pub level_name: String,
    pub width: i32,
    pub height: i32,
}

impl LevelChange {
    pub(crate) fn write_to(&self, out: &mut OutgoingMessage) {
        out.write_u8(self.game_state);
        out.write_str(&self.world_builder);
        out.write_str(&self.level_name);
        out.write_i32(self.width);
        out.write_i32(self.height);
    }

    pub(crate) fn read_from(msg: &mut IncomingMessage) -> Result<Self, CodecError> {
        Ok(Self {
            game_state: msg.read_u8()?,
            world_builder: msg.read_str()?,
            level_name: msg.read_str()?,
            width: msg.read_i32()?,
            height: msg.read_i32()?,
        })
    }
}

/// Once a drain cycle has seen a level change, these kinds refer to the world
/// being torn down and are discarded for the rest of the cycle.
pub(crate) fn stale_after_travel(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::PropertyReplication
            | MessageKind::RemoteMethodCall
            | MessageKind::ActorDestruction
    )
}

struct QueuedCall {
    actor_id: ActorId,
    method_hash: i32,
    reliable: bool,
    params: Vec<CallParam>,
}

/// Engine shared by both peer specializations: the tick gate, the actor
/// list, the method registry and the coalescing remote-call queue.
pub(crate) struct PeerCore<T: Transport> {
    pub transport: T,
    pub config: PeerConfig,
    pub actors: Vec<ActorHandle>,
    pub registry: MethodRegistry,
    calls: Vec<QueuedCall>,
    last_tick_ms: Option<f64>,
}

impl<T: Transport> PeerCore<T> {
    pub fn new(transport: T, config: PeerConfig, registry: MethodRegistry) -> Self {
        Self {
            transport,
            config,
            actors: Vec::new(),
            registry,
            calls: Vec::new(),
            last_tick_ms: None,
        }
    }

    /// Tick gate. The first call always ticks; afterwards a call ticks only
    /// once the interval has elapsed, and the anchor jumps to the accepted
    /// call's clock. A rejected call has no side effects.
    pub fn tick_ready(&mut self, now_ms: f64) -> bool {
        match self.last_tick_ms {
            Some(anchor) if now_ms - anchor < self.config.tick_interval_ms() => false,
            _ => {
                self.last_tick_ms = Some(now_ms);
                true
            }
        }
    }

    pub fn find_actor(&self, id: ActorId) -> Option<ActorHandle> {
        self.actors
            .iter()
            .find(|a| a.borrow().id() == id)
            .cloned()
    }

    pub fn sweep_destroyed(&mut self) {
        self.actors.retain(|a| !a.borrow().destroyed());
    }

    /// Queues a remote call with last-write-wins coalescing: a later call for
    /// the same actor and method replaces the earlier one in place.
    pub fn queue_call(
        &mut self,
        actor_id: ActorId,
        method: &str,
        reliable: bool,
        params: Vec<CallParam>,
    ) {
        let method_hash = name_hash(method);
        match self
            .calls
            .iter_mut()
            .find(|c| c.actor_id == actor_id && c.method_hash == method_hash)
        {
            Some(existing) => {
                existing.reliable = reliable;
                existing.params = params;
            }
            None => self.calls.push(QueuedCall {
                actor_id,
                method_hash,
                reliable,
                params,
            }),
        }
    }

    /// Encodes and sends every queued call, one wire message each.
    pub fn flush_calls(&mut self) {
        for call in self.calls.drain(..) {
            let mut out = OutgoingMessage::new(MessageKind::RemoteMethodCall);
            out.write_i32(call.actor_id);
            out.write_i32(call.method_hash);
            let count = u8::try_from(call.params.len()).unwrap_or(u8::MAX);
            out.write_u8(count);
            for param in call.params.iter().take(usize::from(count)) {
                param.write_to(&mut out);
            }
            let delivery = if call.reliable {
                Delivery::ReliableOrdered
            } else {
                Delivery::Unreliable
            };
            self.transport.send_to_all(&out, delivery, RPC_CHANNEL);
        }
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Decodes an inbound remote call and invokes it through the registry.
    /// Unknown actors and unknown methods are logged and skipped.
    pub fn handle_remote_call(&mut self, msg: &mut IncomingMessage) -> Result<(), CodecError> {
        let actor_id = msg.read_i32()?;
        let method_hash = msg.read_i32()?;
        let count = usize::from(msg.read_u8()?);
        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            params.push(CallParam::read_from(msg)?);
        }

        let Some(actor) = self.find_actor(actor_id) else {
            debug!("remote call for unknown actor {actor_id}");
            return Ok(());
        };
        let mut actor = actor.borrow_mut();
        if !self.registry.invoke(method_hash, &mut *actor, &params) {
            debug!("no method registered under hash {method_hash}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    use glam::IVec2;

    use super::*;
    use crate::actor::Actor;
    use crate::transport::testing::ScriptedTransport;

    struct Pawn {
        id: ActorId,
        destroyed: bool,
        value: i32,
    }

    impl Actor for Pawn {
        fn id(&self) -> ActorId {
            self.id
        }
        fn set_id(&mut self, id: ActorId) {
            self.id = id;
        }
        fn class_hash(&self) -> i32 {
            name_hash("Pawn")
        }
        fn location(&self) -> IVec2 {
            IVec2::ZERO
        }
        fn set_location(&mut self, _location: IVec2) {}
        fn destroyed(&self) -> bool {
            self.destroyed
        }
        fn set_destroyed(&mut self) {
            self.destroyed = true;
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn core_with_pawn() -> PeerCore<ScriptedTransport> {
        let mut registry = MethodRegistry::new();
        registry.register::<Pawn, _>("SetValue", |pawn, params| {
            if let Some(v) = params.first().and_then(CallParam::as_int) {
                pawn.value = v;
            }
        });
        let mut core = PeerCore::new(ScriptedTransport::new(), PeerConfig::default(), registry);
        core.actors.push(Rc::new(RefCell::new(Pawn {
            id: 1,
            destroyed: false,
            value: 0,
        })));
        core
    }

    #[test]
    fn test_tick_gate_rejects_within_interval() {
        let mut core = core_with_pawn();
        // 60 Hz: 16.66ms interval.
        assert!(core.tick_ready(100.0));
        assert!(!core.tick_ready(100.0));
        assert!(!core.tick_ready(110.0));
        assert!(core.tick_ready(117.0));
        // The anchor jumped to 117, not to 116.66.
        assert!(!core.tick_ready(133.0));
        assert!(core.tick_ready(134.0));
    }

    #[test]
    fn test_coalescing_replaces_params_in_place() {
        let mut core = core_with_pawn();
        core.queue_call(1, "SetValue", false, vec![CallParam::Int(3)]);
        core.queue_call(1, "Jump", false, vec![]);
        core.queue_call(1, "SetValue", true, vec![CallParam::Int(9)]);
        core.flush_calls();

        let sent = core.transport.sent_of_kind(MessageKind::RemoteMethodCall);
        assert_eq!(sent.len(), 2);

        // First slot kept its queue position but carries the later call.
        let mut msg = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, sent[0].payload.clone());
        assert_eq!(msg.read_i32().unwrap(), 1);
        assert_eq!(msg.read_i32().unwrap(), name_hash("SetValue"));
        assert_eq!(msg.read_u8().unwrap(), 1);
        assert_eq!(
            CallParam::read_from(&mut msg).unwrap(),
            CallParam::Int(9)
        );
        assert_eq!(sent[0].delivery, Delivery::ReliableOrdered);
        assert_eq!(sent[1].delivery, Delivery::Unreliable);
        assert_eq!(sent[0].channel, RPC_CHANNEL);
    }

    #[test]
    fn test_inbound_call_dispatches_through_registry() {
        let mut core = core_with_pawn();
        let mut out = OutgoingMessage::new(MessageKind::RemoteMethodCall);
        out.write_i32(1);
        out.write_i32(name_hash("SetValue"));
        out.write_u8(1);
        CallParam::Int(42).write_to(&mut out);

        let mut msg = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, out.into_payload());
        core.handle_remote_call(&mut msg).unwrap();

        let actor = core.find_actor(1).unwrap();
        let mut actor = actor.borrow_mut();
        let pawn = actor.as_any_mut().downcast_mut::<Pawn>().unwrap();
        assert_eq!(pawn.value, 42);
    }

    #[test]
    fn test_unknown_actor_and_method_are_skipped() {
        let mut core = core_with_pawn();

        let mut out = OutgoingMessage::new(MessageKind::RemoteMethodCall);
        out.write_i32(99);
        out.write_i32(name_hash("SetValue"));
        out.write_u8(0);
        let mut msg = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, out.into_payload());
        assert!(core.handle_remote_call(&mut msg).is_ok());

        let mut out = OutgoingMessage::new(MessageKind::RemoteMethodCall);
        out.write_i32(1);
        out.write_i32(name_hash("NoSuchMethod"));
        out.write_u8(0);
        let mut msg = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, out.into_payload());
        assert!(core.handle_remote_call(&mut msg).is_ok());
    }

    #[test]
    fn test_sweep_removes_marked_actors() {
        let mut core = core_with_pawn();
        core.actors.push(Rc::new(RefCell::new(Pawn {
            id: 2,
            destroyed: false,
            value: 0,
        })));
        core.find_actor(1).unwrap().borrow_mut().set_destroyed();
        core.sweep_destroyed();
        assert!(core.find_actor(1).is_none());
        assert!(core.find_actor(2).is_some());
    }

    #[test]
    fn test_level_change_roundtrip() {
        let change = LevelChange {
            game_state: 2,
            world_builder: "grid".to_owned(),
            level_name: "arena".to_owned(),
            width: 40,
            height: 30,
        };
        let mut out = OutgoingMessage::new(MessageKind::ServerTravel);
        change.write_to(&mut out);
        let mut msg = IncomingMessage::new(MessageKind::ServerTravel, 0, out.into_payload());
        assert_eq!(LevelChange::read_from(&mut msg).unwrap(), change);
    }
}
