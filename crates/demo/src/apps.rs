//! Host callbacks and per-tick driving logic for both ends of the court.

use std::cell::RefCell;
use std::rc::Rc;

use glam::IVec2;
use log::info;

use tether::{
    Actor, ActorHandle, ActorId, CallParam, ClientHost, ClientPeer, ConnectionId, LevelChange,
    ServerHost, ServerPeer, Transport, name_hash,
};

use crate::actors::{
    BALL_ID, BALL_SIZE, Ball, FIELD_HEIGHT, FIELD_WIDTH, PADDLE_HEIGHT, PADDLE_MARGIN,
    PADDLE_SPEED, PADDLE_WIDTH, Paddle, SCOREBOARD_ID, Scoreboard,
};

fn step_toward(current: i32, target: i32, speed: i32) -> i32 {
    current + (target - current).clamp(-speed, speed)
}

/// Authoritative side: owns the ball and the scoreboard, hands out paddles
/// to joining connections and steps the rally once per tick.
pub struct PongServer {
    ball: Rc<RefCell<Ball>>,
    scoreboard: Rc<RefCell<Scoreboard>>,
    next_player_id: ActorId,
    paddles_spawned: u32,
}

impl PongServer {
    pub fn new() -> Self {
        Self {
            ball: Rc::new(RefCell::new(Ball::new(
                BALL_ID,
                IVec2::new(FIELD_WIDTH / 2, FIELD_HEIGHT / 2),
            ))),
            scoreboard: Rc::new(RefCell::new(Scoreboard::new(SCOREBOARD_ID))),
            next_player_id: 10,
            paddles_spawned: 0,
        }
    }

    /// Travels to the court and registers the server-owned actors.
    pub fn build_court<T: Transport>(&mut self, peer: &mut ServerPeer<T>) {
        peer.server_travel(1, "court", "court", FIELD_WIDTH, FIELD_HEIGHT);
        peer.create_actor(self.ball.clone());
        peer.create_actor(self.scoreboard.clone());
    }

    /// One simulation tick, run after every peer tick.
    pub fn step<T: Transport>(&mut self, peer: &mut ServerPeer<T>) {
        let paddles: Vec<IVec2> = peer
            .actors()
            .iter()
            .filter(|a| a.borrow().class_hash() == name_hash("Paddle"))
            .map(|a| a.borrow().location())
            .collect();

        let goal = self.ball.borrow_mut().step(&paddles);
        if let Some(side) = goal {
            self.scoreboard.borrow_mut().add_point(side);
            info!(
                "goal for the {} side, score {}",
                side.label(),
                self.scoreboard.borrow().score_line()
            );
            peer.call_method_on_clients(
                SCOREBOARD_ID,
                "CelebrateGoal",
                true,
                vec![CallParam::Str(side.label().to_owned())],
            );
        }
    }

    pub fn score_line(&self) -> String {
        self.scoreboard.borrow().score_line()
    }
}

impl ServerHost for PongServer {
    fn approve_connection(&mut self, conn: ConnectionId, approval: &str) -> bool {
        let ok = approval == "pong";
        if !ok {
            info!("connection {conn} sent the wrong approval {approval:?}");
        }
        ok
    }

    fn create_remote_player(&mut self, conn: ConnectionId, name: &str) -> Option<ActorHandle> {
        // Odd joiners defend the left goal, even joiners the right one.
        let x = if self.paddles_spawned % 2 == 0 {
            PADDLE_MARGIN
        } else {
            FIELD_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH
        };
        self.paddles_spawned += 1;

        let id = self.next_player_id;
        self.next_player_id += 1;
        info!("paddle {id} enters for {name:?} on connection {conn}");
        Some(Rc::new(RefCell::new(Paddle::new(
            id,
            IVec2::new(x, (FIELD_HEIGHT - PADDLE_HEIGHT) / 2),
        ))))
    }

    fn remove_remote_player(&mut self, conn: ConnectionId, player: &ActorHandle) {
        info!(
            "connection {conn} left, paddle {} retires",
            player.borrow().id()
        );
    }

    fn chat(&mut self, from: ConnectionId, text: &str) {
        info!("[chat] {from}: {text}");
    }
}

/// Mirroring side: builds mirrors for the court actors and plays its paddle
/// with a simple ball-tracking autopilot.
pub struct PongClient {
    name: String,
    ball: Option<ActorHandle>,
    paddle: Option<Rc<RefCell<Paddle>>>,
    greeted: bool,
}

impl PongClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ball: None,
            paddle: None,
            greeted: false,
        }
    }

    /// One autopilot tick: chase the ball and report the paddle position.
    pub fn drive<T: Transport>(&mut self, peer: &mut ClientPeer<T>) {
        let Some(paddle) = self.paddle.clone() else {
            return;
        };
        if !self.greeted {
            self.greeted = true;
            peer.send_chat(&format!("{} is on the court", self.name));
        }
        let Some(ball) = self.ball.clone() else {
            return;
        };

        let target = ball.borrow().location().y + BALL_SIZE / 2 - PADDLE_HEIGHT / 2;
        let (id, y) = {
            let mut p = paddle.borrow_mut();
            let y = step_toward(p.location().y, target, PADDLE_SPEED)
                .clamp(0, FIELD_HEIGHT - PADDLE_HEIGHT);
            if y == p.location().y {
                return;
            }
            p.set_y(y);
            (p.id(), y)
        };
        peer.call_method_on_server(id, "SetPaddleY", false, vec![CallParam::Int(y)]);
    }
}

impl ClientHost for PongClient {
    fn create_remote_actor(
        &mut self,
        class_hash: i32,
        _id: ActorId,
        _location: IVec2,
    ) -> Option<ActorHandle> {
        if class_hash == name_hash("Ball") {
            let ball: ActorHandle = Rc::new(RefCell::new(Ball::new(0, IVec2::ZERO)));
            self.ball = Some(ball.clone());
            Some(ball)
        } else if class_hash == name_hash("Paddle") {
            Some(Rc::new(RefCell::new(Paddle::new(0, IVec2::ZERO))))
        } else if class_hash == name_hash("Scoreboard") {
            Some(Rc::new(RefCell::new(Scoreboard::new(0))))
        } else {
            None
        }
    }

    fn create_local_player(&mut self, id: ActorId, location: IVec2) -> Option<ActorHandle> {
        info!("our paddle is {id}");
        let paddle = Rc::new(RefCell::new(Paddle::new(id, location)));
        self.paddle = Some(paddle.clone());
        Some(paddle)
    }

    fn connected(&mut self) {
        info!("connected, waiting for the court");
    }

    fn disconnected(&mut self) {
        info!("session lost");
        self.ball = None;
        self.paddle = None;
    }

    fn change_level(&mut self, change: &LevelChange) {
        info!(
            "entering {:?} ({} x {})",
            change.level_name, change.width, change.height
        );
        self.ball = None;
        self.paddle = None;
    }

    fn player_disconnected(&mut self, player_id: ActorId) {
        info!("paddle {player_id} left the court");
    }

    fn chat(&mut self, text: &str) {
        info!("[chat] {text}");
    }
}
