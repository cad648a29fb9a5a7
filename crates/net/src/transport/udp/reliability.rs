use std::collections::{BTreeMap, HashMap, VecDeque};

use log::warn;

use super::wire::{Envelope, sequence_greater_than};
use crate::message::Delivery;

/// Give up on a connection once a reliable batch has been sent this many
/// times without an acknowledgement.
pub const MAX_SEND_ATTEMPTS: u32 = 10;

const MAX_PENDING: usize = 256;
const RTO_MIN_MS: f32 = 100.0;
const RTO_MAX_MS: f32 = 2000.0;

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub sent_at_ms: f64,
    pub acked: bool,
}

#[derive(Debug)]
struct ReliableBatch {
    envelopes: Vec<Envelope>,
    sent_at_ms: f64,
    /// How many times these envelopes have gone out, this send included.
    send_count: u32,
}

/// Tracks sent packet sequences against incoming ack fields, estimates RTT
/// and holds reliable envelopes until they are acknowledged or due for
/// another send.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    reliable: HashMap<u32, ReliableBatch>,
    srtt: f32,
    rtt_var: f32,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(MAX_PENDING),
            reliable: HashMap::new(),
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    pub fn track_packet(
        &mut self,
        sequence: u32,
        now_ms: f64,
        reliable: Option<(Vec<Envelope>, u32)>,
    ) {
        while self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(PendingPacket {
            sequence,
            sent_at_ms: now_ms,
            acked: false,
        });

        if let Some((envelopes, send_count)) = reliable {
            self.reliable.insert(
                sequence,
                ReliableBatch {
                    envelopes,
                    sent_at_ms: now_ms,
                    send_count,
                },
            );
        }
    }

    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32, now_ms: f64) {
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                if diff <= 32 {
                    (ack_bitfield & (1 << (diff - 1))) != 0
                } else {
                    false
                }
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                rtt_samples.push((now_ms - pending.sent_at_ms) as f32);
                self.reliable.remove(&pending.sequence);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn rto_ms(&self) -> f32 {
        (self.srtt + 4.0 * self.rtt_var).clamp(RTO_MIN_MS, RTO_MAX_MS)
    }

    /// Removes and returns reliable batches whose retransmission timer
    /// expired. The caller sends them again under a fresh packet sequence
    /// (or drops the connection once the send count is spent).
    pub fn due_retransmits(&mut self, now_ms: f64) -> Vec<(Vec<Envelope>, u32)> {
        let rto = f64::from(self.rto_ms());
        let due: Vec<u32> = self
            .reliable
            .iter()
            .filter(|(_, batch)| now_ms - batch.sent_at_ms >= rto)
            .map(|(&seq, _)| seq)
            .collect();

        due.into_iter()
            .filter_map(|seq| self.reliable.remove(&seq))
            .map(|batch| (batch.envelopes, batch.send_count))
            .collect()
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Builds the ack fields advertised back to the sender and rejects packet
/// replays.
#[derive(Debug, Default)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    primed: bool,
    recent_sequences: VecDeque<u32>,
}

const MAX_RECENT: usize = 128;

impl ReceiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for packets already seen.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }
        if self.recent_sequences.len() >= MAX_RECENT {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if !self.primed {
            self.primed = true;
            self.last_received = sequence;
            self.received_bitfield = 0;
            return true;
        }

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            self.received_bitfield = match diff {
                1..=31 => (self.received_bitfield << diff) | (1 << (diff - 1)),
                32 => 1 << 31,
                _ => 0,
            };
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    /// (latest received sequence, bitfield over the 32 sequences before it).
    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}

/// Hands out per-stream sequence numbers, one counter per
/// (delivery, channel) pair.
#[derive(Debug, Default)]
pub struct StreamSender {
    next: HashMap<(u8, u8), u32>,
}

impl StreamSender {
    pub fn next_seq(&mut self, delivery: u8, channel: u8) -> u32 {
        let counter = self.next.entry((delivery, channel)).or_insert(0);
        let seq = *counter;
        *counter = counter.wrapping_add(1);
        seq
    }
}

/// Sliding dedup window over stream sequences, 64 entries wide. Anything
/// older than the window is treated as a duplicate; retransmissions arrive
/// well within it.
#[derive(Debug, Default)]
struct SeenWindow {
    latest: u32,
    bits: u64,
    primed: bool,
}

impl SeenWindow {
    /// Returns true the first time a sequence is seen.
    fn insert(&mut self, seq: u32) -> bool {
        if !self.primed {
            self.primed = true;
            self.latest = seq;
            self.bits = 0;
            return true;
        }
        if seq == self.latest {
            return false;
        }
        if sequence_greater_than(seq, self.latest) {
            let shift = seq.wrapping_sub(self.latest);
            self.bits = match shift {
                1..=63 => (self.bits << shift) | (1 << (shift - 1)),
                64 => 1 << 63,
                _ => 0,
            };
            self.latest = seq;
            true
        } else {
            let diff = self.latest.wrapping_sub(seq);
            if diff > 64 {
                return false;
            }
            let bit = if diff == 64 { 1 << 63 } else { 1u64 << (diff - 1) };
            if self.bits & bit != 0 {
                false
            } else {
                self.bits |= bit;
                true
            }
        }
    }
}

/// Applies delivery semantics to incoming envelopes: drops stale sequenced
/// messages, deduplicates reliable ones and holds ordered messages back
/// until their predecessors arrive.
#[derive(Debug, Default)]
pub struct StreamReceiver {
    sequenced_latest: HashMap<(u8, u8), u32>,
    seen: HashMap<(u8, u8), SeenWindow>,
    ordered_next: HashMap<(u8, u8), u32>,
    ordered_held: HashMap<(u8, u8), BTreeMap<u32, Envelope>>,
}

impl StreamReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one envelope in, returns the envelopes released for delivery
    /// (possibly none, possibly several when an ordered hole closes).
    pub fn accept(&mut self, env: Envelope) -> Vec<Envelope> {
        let Some(delivery) = Delivery::from_wire(env.delivery) else {
            warn!("envelope with unknown delivery tag {}", env.delivery);
            return Vec::new();
        };
        let key = (env.delivery, env.channel);

        match delivery {
            Delivery::Unreliable => vec![env],
            Delivery::UnreliableSequenced | Delivery::ReliableSequenced => {
                match self.sequenced_latest.get(&key) {
                    Some(&latest) if !sequence_greater_than(env.stream_seq, latest) => Vec::new(),
                    _ => {
                        self.sequenced_latest.insert(key, env.stream_seq);
                        vec![env]
                    }
                }
            }
            Delivery::ReliableUnordered => {
                if self.seen.entry(key).or_default().insert(env.stream_seq) {
                    vec![env]
                } else {
                    Vec::new()
                }
            }
            Delivery::ReliableOrdered => {
                let next = self.ordered_next.entry(key).or_insert(0);
                if env.stream_seq == *next {
                    let mut released = vec![env];
                    *next = next.wrapping_add(1);
                    let held = self.ordered_held.entry(key).or_default();
                    while let Some(follow) = held.remove(next) {
                        released.push(follow);
                        *next = next.wrapping_add(1);
                    }
                    released
                } else if sequence_greater_than(env.stream_seq, *next) {
                    self.ordered_held
                        .entry(key)
                        .or_default()
                        .insert(env.stream_seq, env);
                    Vec::new()
                } else {
                    // Behind the cursor: already delivered, a retransmit.
                    Vec::new()
                }
            }
        }
    }
}
