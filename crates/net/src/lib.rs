pub mod actor;
pub mod config;
pub mod error;
pub mod message;
pub mod peer;
pub mod registry;
pub mod stats;
pub mod transport;

pub use actor::{Actor, ActorHandle, ActorId};
pub use config::{DEFAULT_PORT, DEFAULT_TICK_RATE, PeerConfig, UdpConfig};
pub use error::{CodecError, NetError};
pub use message::{
    ConnectionId, Delivery, IncomingMessage, MessageKind, OutgoingMessage, SERVER_CONNECTION_ID,
};
pub use peer::LevelChange;
pub use peer::client::{ClientHost, ClientPeer};
pub use peer::server::{ServerHost, ServerPeer};
pub use registry::{CallParam, MethodRegistry, name_hash};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::Transport;
pub use transport::memory::{MemoryNetwork, MemoryTransport};
pub use transport::udp::UdpTransport;
pub use transport::udp::wire::PacketError;
