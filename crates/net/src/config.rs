use serde::{Deserialize, Serialize};

use crate::stats::PacketLossSimulation;

pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_PORT: u16 = 14242;

/// Tuning shared by both peer specializations. The hosting application
/// decides where the values come from; everything here derives serde so a
/// config file can carry them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Ticks per second the peer advances at, no matter how often the
    /// hosting loop calls update.
    pub tick_rate: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
        }
    }
}

impl PeerConfig {
    pub fn tick_interval_ms(&self) -> f64 {
        1000.0 / f64::from(self.tick_rate.max(1))
    }
}

/// Knobs for the UDP transport binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Server listen port. Clients bind an ephemeral port instead.
    pub bind_port: u16,
    pub max_clients: usize,
    /// A connection with no traffic for this long is dropped.
    pub timeout_ms: u64,
    /// Idle connections send a ping at this interval to stay alive.
    pub keepalive_ms: u64,
    pub loss_sim: PacketLossSimulation,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_port: DEFAULT_PORT,
            max_clients: 32,
            timeout_ms: 10_000,
            keepalive_ms: 1_000,
            loss_sim: PacketLossSimulation::default(),
        }
    }
}
