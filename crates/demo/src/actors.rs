//! The three replicated actors of the pong court and the method registry
//! both peers share.

use std::any::Any;

use glam::IVec2;
use log::info;

use tether::{
    Actor, ActorId, CallParam, CodecError, ConnectionId, IncomingMessage, MethodRegistry,
    OutgoingMessage, name_hash,
};

pub const FIELD_WIDTH: i32 = 800;
pub const FIELD_HEIGHT: i32 = 500;
pub const BALL_SIZE: i32 = 20;
pub const PADDLE_WIDTH: i32 = 20;
pub const PADDLE_HEIGHT: i32 = 100;
pub const PADDLE_MARGIN: i32 = 10;
pub const PADDLE_SPEED: i32 = 8;

pub const BALL_ID: ActorId = 1;
pub const SCOREBOARD_ID: ActorId = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Methods callable across the wire. Registered identically on the server
/// and on every client.
pub fn build_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register::<Paddle, _>("SetPaddleY", |paddle, params| {
        if let Some(y) = params.first().and_then(CallParam::as_int) {
            paddle.set_y(y);
        }
    });
    registry.register::<Scoreboard, _>("CelebrateGoal", |board, params| {
        if let Some(side) = params.first().and_then(CallParam::as_str) {
            info!("{side} side scores, board shows {}", board.score_line());
        }
    });
    registry
}

/// Server-simulated ball. Only the authoritative copy ever steps; mirrors
/// receive their location through movement replication.
pub struct Ball {
    id: ActorId,
    location: IVec2,
    velocity: IVec2,
    spawn: IVec2,
    movement_dirty: bool,
    destroyed: bool,
}

impl Ball {
    pub fn new(id: ActorId, spawn: IVec2) -> Self {
        Self {
            id,
            location: spawn,
            velocity: IVec2::new(4, 3),
            spawn,
            movement_dirty: false,
            destroyed: false,
        }
    }

    /// Advances the rally by one tick and returns the scoring side when the
    /// ball leaves the court.
    pub fn step(&mut self, paddles: &[IVec2]) -> Option<Side> {
        self.movement_dirty = true;
        self.location += self.velocity;

        if self.location.x > FIELD_WIDTH {
            self.reset();
            return Some(Side::Left);
        }
        if self.location.x < -BALL_SIZE {
            self.reset();
            return Some(Side::Right);
        }

        if self.location.y < 0 || self.location.y > FIELD_HEIGHT - BALL_SIZE {
            self.velocity.y = -self.velocity.y;
        }
        if paddles.iter().any(|p| self.touches(*p)) {
            self.velocity.x = -self.velocity.x;
        }
        None
    }

    fn touches(&self, paddle: IVec2) -> bool {
        self.location.x < paddle.x + PADDLE_WIDTH
            && paddle.x < self.location.x + BALL_SIZE
            && self.location.y < paddle.y + PADDLE_HEIGHT
            && paddle.y < self.location.y + BALL_SIZE
    }

    fn reset(&mut self) {
        self.location = self.spawn;
        self.velocity.x = -self.velocity.x;
    }
}

impl Actor for Ball {
    fn id(&self) -> ActorId {
        self.id
    }
    fn set_id(&mut self, id: ActorId) {
        self.id = id;
    }
    fn class_hash(&self) -> i32 {
        name_hash("Ball")
    }
    fn location(&self) -> IVec2 {
        self.location
    }
    fn set_location(&mut self, location: IVec2) {
        self.location = location;
    }
    fn replicate_movement(&self) -> bool {
        true
    }
    fn movement_dirty(&self) -> bool {
        self.movement_dirty
    }
    fn set_movement_dirty(&mut self, dirty: bool) {
        self.movement_dirty = dirty;
    }
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

/// A player's paddle. The owning client predicts its own movement locally
/// and reports it through the `SetPaddleY` remote call; everyone else gets
/// it through movement replication.
pub struct Paddle {
    id: ActorId,
    location: IVec2,
    movement_dirty: bool,
    destroyed: bool,
    owner: Option<ConnectionId>,
}

impl Paddle {
    pub fn new(id: ActorId, location: IVec2) -> Self {
        Self {
            id,
            location,
            movement_dirty: false,
            destroyed: false,
            owner: None,
        }
    }

    pub fn set_y(&mut self, y: i32) {
        self.location.y = y;
        self.movement_dirty = true;
    }
}

impl Actor for Paddle {
    fn id(&self) -> ActorId {
        self.id
    }
    fn set_id(&mut self, id: ActorId) {
        self.id = id;
    }
    fn class_hash(&self) -> i32 {
        name_hash("Paddle")
    }
    fn location(&self) -> IVec2 {
        self.location
    }
    fn set_location(&mut self, location: IVec2) {
        self.location = location;
    }
    fn replicate_movement(&self) -> bool {
        true
    }
    fn movement_dirty(&self) -> bool {
        self.movement_dirty
    }
    fn set_movement_dirty(&mut self, dirty: bool) {
        self.movement_dirty = dirty;
    }
    fn destroyed(&self) -> bool {
        self.destroyed
    }
    fn set_destroyed(&mut self) {
        self.destroyed = true;
    }
    fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }
    fn set_owner(&mut self, conn: ConnectionId) {
        self.owner = Some(conn);
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Replicated score, one copy per endpoint. Changes flow through property
/// replication whenever a goal raises the dirty flag.
pub struct Scoreboard {
    id: ActorId,
    location: IVec2,
    left: i32,
    right: i32,
    properties_dirty: bool,
    destroyed: bool,
}

impl Scoreboard {
    pub fn new(id: ActorId) -> Self {
        Self {
            id,
            location: IVec2::ZERO,
            left: 0,
            right: 0,
            properties_dirty: false,
            destroyed: false,
        }
    }

    pub fn add_point(&mut self, side: Side) {
        match side {
            Side::Left => self.left += 1,
            Side::Right => self.right += 1,
        }
        self.properties_dirty = true;
    }

    pub fn score_line(&self) -> String {
        format!("{} - {}", self.left, self.right)
    }
}

impl Actor for Scoreboard {
    fn id(&self) -> ActorId {
        self.id
    }
    fn set_id(&mut self, id: ActorId) {
        self.id = id;
    }
    fn class_hash(&self) -> i32 {
        name_hash("Scoreboard")
    }
    fn location(&self) -> IVec2 {
        self.location
    }
    fn set_location(&mut self, location: IVec2) {
        self.location = location;
    }
    fn replicate_properties(&self) -> bool {
        true
    }
    fn properties_dirty(&self) -> bool {
        self.properties_dirty
    }
    fn set_properties_dirty(&mut self, dirty: bool) {
        self.properties_dirty = dirty;
    }
    fn destroyed(&self) -> bool {
        self.destroyed
    }
    fn set_destroyed(&mut self) {
        self.destroyed = true;
    }
    fn serialize(&self, out: &mut OutgoingMessage) {
        out.write_i32(self.left);
        out.write_i32(self.right);
    }
    fn deserialize(&mut self, msg: &mut IncomingMessage) -> Result<(), CodecError> {
        self.left = msg.read_i32()?;
        self.right = msg.read_i32()?;
        Ok(())
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
