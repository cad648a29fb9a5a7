use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::warn;

use crate::actor::Actor;
use crate::error::CodecError;
use crate::message::{IncomingMessage, OutgoingMessage};

/// Polynomial hash over a name's characters, used for both remote method
/// names and actor class names. Seed 23, multiplier 31, wrapping i32
/// arithmetic. The values are part of the wire format.
pub fn name_hash(name: &str) -> i32 {
    if name.is_empty() {
        return 0;
    }
    let mut hash: i32 = 23;
    for c in name.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(c as i32);
    }
    hash
}

/// A single remote call argument. The wire carries a one byte type tag
/// followed by the value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallParam {
    Int(i32),
    Float(f32),
    Str(String),
    Bool(bool),
}

impl CallParam {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn write_to(&self, out: &mut OutgoingMessage) {
        match self {
            Self::Int(v) => {
                out.write_u8(0);
                out.write_i32(*v);
            }
            Self::Float(v) => {
                out.write_u8(1);
                out.write_f32(*v);
            }
            Self::Str(v) => {
                out.write_u8(2);
                out.write_str(v);
            }
            Self::Bool(v) => {
                out.write_u8(3);
                out.write_bool(*v);
            }
        }
    }

    pub(crate) fn read_from(msg: &mut IncomingMessage) -> Result<Self, CodecError> {
        Ok(match msg.read_u8()? {
            0 => Self::Int(msg.read_i32()?),
            1 => Self::Float(msg.read_f32()?),
            2 => Self::Str(msg.read_str()?),
            3 => Self::Bool(msg.read_bool()?),
            tag => return Err(CodecError::UnknownParamTag(tag)),
        })
    }
}

impl From<i32> for CallParam {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for CallParam {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CallParam {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for CallParam {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for CallParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

struct Method {
    name: String,
    invoke: Box<dyn Fn(&mut dyn Actor, &[CallParam])>,
}

/// Maps hashed method names to typed handlers. Both peers hold one: the
/// server invokes it for calls arriving from clients and vice versa.
///
/// Handlers are registered against a concrete actor type; a call landing on
/// an actor of a different type is logged and dropped.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<i32, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, F>(&mut self, name: &str, handler: F)
    where
        A: Actor,
        F: Fn(&mut A, &[CallParam]) + 'static,
    {
        let hash = name_hash(name);
        match self.methods.entry(hash) {
            Entry::Occupied(existing) => {
                warn!(
                    "method {name:?} hashes like {:?}, keeping the first registration",
                    existing.get().name
                );
            }
            Entry::Vacant(slot) => {
                let registered = name.to_owned();
                slot.insert(Method {
                    name: name.to_owned(),
                    invoke: Box::new(move |actor, params| {
                        match actor.as_any_mut().downcast_mut::<A>() {
                            Some(typed) => handler(typed, params),
                            None => {
                                warn!("method {registered:?} invoked on an actor of another type");
                            }
                        }
                    }),
                });
            }
        }
    }

    pub fn contains(&self, hash: i32) -> bool {
        self.methods.contains_key(&hash)
    }

    pub fn method_name(&self, hash: i32) -> Option<&str> {
        self.methods.get(&hash).map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Returns false when no method is registered under the hash.
    pub(crate) fn invoke(&self, hash: i32, actor: &mut dyn Actor, params: &[CallParam]) -> bool {
        match self.methods.get(&hash) {
            Some(method) => {
                (method.invoke)(actor, params);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use glam::IVec2;

    use super::*;
    use crate::actor::ActorId;
    use crate::message::MessageKind;

    #[test]
    fn test_hash_matches_known_values() {
        // 23, then hash * 31 + char for "SetY".
        assert_eq!(name_hash("SetY"), 23_814_382);
        assert_eq!(name_hash(""), 0);
        assert_ne!(name_hash("SetY"), name_hash("SetX"));
    }

    #[test]
    fn test_hash_wraps_instead_of_overflowing() {
        // Just exercising the wrapping arithmetic.
        let _ = name_hash(&"z".repeat(4096));
    }

    #[test]
    fn test_param_roundtrip_and_unknown_tag() {
        let mut out = OutgoingMessage::new(MessageKind::RemoteMethodCall);
        CallParam::Int(41).write_to(&mut out);
        CallParam::Float(-1.5).write_to(&mut out);
        CallParam::Str("go".into()).write_to(&mut out);
        CallParam::Bool(true).write_to(&mut out);

        let mut msg = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, out.into_payload());
        assert_eq!(CallParam::read_from(&mut msg).unwrap(), CallParam::Int(41));
        assert_eq!(
            CallParam::read_from(&mut msg).unwrap(),
            CallParam::Float(-1.5)
        );
        assert_eq!(
            CallParam::read_from(&mut msg).unwrap(),
            CallParam::Str("go".into())
        );
        assert_eq!(CallParam::read_from(&mut msg).unwrap(), CallParam::Bool(true));

        let mut bad = IncomingMessage::new(MessageKind::RemoteMethodCall, 0, vec![9]);
        assert_eq!(
            CallParam::read_from(&mut bad),
            Err(CodecError::UnknownParamTag(9))
        );
    }

    struct Dummy {
        id: ActorId,
        destroyed: bool,
        hits: Vec<i32>,
    }

    impl Actor for Dummy {
        fn id(&self) -> ActorId {
            self.id
        }
        fn set_id(&mut self, id: ActorId) {
            self.id = id;
        }
        fn class_hash(&self) -> i32 {
            name_hash("Dummy")
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

    #[test]
    fn test_registered_method_dispatches_with_params() {
        let mut registry = MethodRegistry::new();
        registry.register::<Dummy, _>("Hit", |actor, params| {
            if let Some(v) = params.first().and_then(CallParam::as_int) {
                actor.hits.push(v);
            }
        });

        let mut dummy = Dummy {
            id: 1,
            destroyed: false,
            hits: Vec::new(),
        };
        assert!(registry.invoke(name_hash("Hit"), &mut dummy, &[CallParam::Int(3)]));
        assert!(!registry.invoke(name_hash("Miss"), &mut dummy, &[]));
        assert_eq!(dummy.hits, vec![3]);
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = MethodRegistry::new();
        registry.register::<Dummy, _>("Hit", |actor, _| actor.hits.push(1));
        registry.register::<Dummy, _>("Hit", |actor, _| actor.hits.push(2));

        let mut dummy = Dummy {
            id: 1,
            destroyed: false,
            hits: Vec::new(),
        };
        registry.invoke(name_hash("Hit"), &mut dummy, &[]);
        assert_eq!(dummy.hits, vec![1]);
    }
}
