use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use glam::IVec2;

use crate::error::CodecError;
use crate::message::{ConnectionId, IncomingMessage, OutgoingMessage};

pub type ActorId = i32;

/// Shared handle to a replicated actor. The layer is single threaded and
/// cooperative, so plain `Rc<RefCell<..>>` is the ownership model: the
/// simulation and the peer both hold handles to the same object.
pub type ActorHandle = Rc<RefCell<dyn Actor>>;

/// Contract every replicated entity implements.
///
/// The server owns the authoritative copy; clients hold mirrors created
/// through their actor factory. Dirty flags are raised by the simulation when
/// it changes state and lowered by the peer once the change has been sent to
/// every ready connection.
pub trait Actor: Any {
    /// Numeric identity, unique within the session. Assigned by the hosting
    /// simulation on the server and applied from the wire on clients.
    fn id(&self) -> ActorId;
    fn set_id(&mut self, id: ActorId);

    /// Hashed class name (see [`crate::registry::name_hash`]) used by the
    /// client-side factory to pick a concrete type.
    fn class_hash(&self) -> i32;

    fn location(&self) -> IVec2;
    fn set_location(&mut self, location: IVec2);

    /// Whether location changes replicate to clients.
    fn replicate_movement(&self) -> bool {
        false
    }

    /// Whether property changes replicate to clients.
    fn replicate_properties(&self) -> bool {
        false
    }

    fn movement_dirty(&self) -> bool {
        false
    }
    fn set_movement_dirty(&mut self, dirty: bool) {
        let _ = dirty;
    }

    fn properties_dirty(&self) -> bool {
        false
    }
    fn set_properties_dirty(&mut self, dirty: bool) {
        let _ = dirty;
    }

    /// Mark-then-sweep destruction: marking never removes the actor
    /// immediately, the peer sweeps marked actors at the start of its next
    /// tick.
    fn destroyed(&self) -> bool;
    fn set_destroyed(&mut self);

    /// Runs on a mirror right after the server's destruction message marked
    /// it, while the actor is still in the list. Death effects go here.
    fn remote_destroyed(&mut self) {}

    /// Connection owning this actor as its player, server side only.
    fn owner(&self) -> Option<ConnectionId> {
        None
    }
    fn set_owner(&mut self, conn: ConnectionId) {
        let _ = conn;
    }

    /// Writes the replicated properties as an ordered field sequence.
    fn serialize(&self, out: &mut OutgoingMessage) {
        let _ = out;
    }

    /// Reads the replicated properties in the order [`Actor::serialize`]
    /// wrote them.
    fn deserialize(&mut self, msg: &mut IncomingMessage) -> Result<(), CodecError> {
        let _ = msg;
        Ok(())
    }

    /// Escape hatch for the method registry to recover the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
