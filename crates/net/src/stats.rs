use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Raw transport counters. Exposed through [`crate::transport::Transport::stats`];
/// anything fancier than counting is the hosting application's business.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

/// Drops a fraction of outgoing packets before they reach the socket, so the
/// retransmission path can be exercised without real packet loss.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// Fraction in `0.0..=1.0`.
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() < self.loss_percent
    }
}

pub fn rand_percent() -> f32 {
    (rand_u64() % 10_000) as f32 / 10_000.0
}

static RAND_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hash-based randomness, good enough for salts and loss simulation without
/// pulling in a dedicated crate. The counter keeps rapid successive calls
/// from landing on the same timer reading.
pub fn rand_u64() -> u64 {
    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    RAND_COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_u64_varies_across_calls() {
        let values: Vec<u64> = (0..16).map(|_| rand_u64()).collect();
        let first = values[0];
        assert!(values.iter().any(|v| *v != first));
    }

    #[test]
    fn test_loss_simulation_extremes() {
        let off = PacketLossSimulation {
            enabled: false,
            loss_percent: 1.0,
        };
        assert!(!off.should_drop());

        let always = PacketLossSimulation {
            enabled: true,
            loss_percent: 1.1,
        };
        for _ in 0..32 {
            assert!(always.should_drop());
        }

        let never = PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
        };
        for _ in 0..32 {
            assert!(!never.should_drop());
        }
    }
}
