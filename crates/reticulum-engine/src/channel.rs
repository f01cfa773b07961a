use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

pub const SEQ_MODULUS: u16 = 1 << 14;
pub const MSGTYPE_USER_MAX: u16 = 0xF000;

const WINDOW_MIN: usize = 2;
const WINDOW_MIN_FAST: usize = 16;
const WINDOW_MIN_MEDIUM: usize = 5;
const WINDOW_MAX_FAST: usize = 48;
const WINDOW_MAX_MEDIUM: usize = 12;
const WINDOW_MAX_SLOW: usize = 4;

const RTT_FAST: Duration = Duration::from_millis(100);
const RTT_MEDIUM: Duration = Duration::from_millis(260);
const RTT_SLOW: Duration = Duration::from_millis(1600);

const MAX_TRIES: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    New,
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowTier {
    Fast,
    Medium,
    Slow,
    VerySlow,
}

#[derive(Debug)]
pub enum ChannelError {
    NoHandler,
    PayloadTooLarge,
    InvalidFrame,
    InvalidMessageType,
    WindowFull,
    TornDown,
}

pub trait ChannelOutlet: Send {
    fn send(&mut self, raw: &[u8]) -> Result<(), ChannelError>;
    fn resend(&mut self, raw: &[u8]) -> Result<(), ChannelError>;
    fn mdu(&self) -> usize;
    fn rtt(&self) -> Duration;
    fn is_usable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.payload.len());
        out.extend_from_slice(&self.msg_type.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn unpack(raw: &[u8]) -> Result<Self, ChannelError> {
        if raw.len() < 6 {
            return Err(ChannelError::InvalidFrame);
        }
        let msg_type = u16::from_be_bytes([raw[0], raw[1]]);
        let sequence = u16::from_be_bytes([raw[2], raw[3]]);
        let len = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        if raw.len() < 6 + len {
            return Err(ChannelError::InvalidFrame);
        }
        Ok(Self { msg_type, sequence, payload: raw[6..6 + len].to_vec() })
    }
}

/// Signed distance `to - from` modulo `SEQ_MODULUS`, normalized into
/// `[-SEQ_MODULUS/2, SEQ_MODULUS/2)` so wraparound compares correctly either direction.
fn seq_distance(from: u16, to: u16) -> i32 {
    let modulus = SEQ_MODULUS as i32;
    let half = modulus / 2;
    let mut diff = (to as i32 - from as i32).rem_euclid(modulus);
    if diff >= half {
        diff -= modulus;
    }
    diff
}

pub type Handler = Box<dyn FnMut(Envelope) -> bool + Send>;

struct TxEnvelope {
    raw: Vec<u8>,
    tries: u8,
    timestamp: Instant,
}

pub struct Channel<O: ChannelOutlet> {
    outlet: O,
    next_send_seq: u16,
    next_recv_seq: u16,
    handlers: HashMap<u16, Handler>,
    tx_ring: BTreeMap<u16, TxEnvelope>,
    rx_ring: BTreeMap<u16, Envelope>,
    states: HashMap<u16, MessageState>,
    window: usize,
    window_max: usize,
    window_min: usize,
    rtt: Duration,
    tier: WindowTier,
    torn_down: bool,
}

impl<O: ChannelOutlet> Channel<O> {
    pub fn new(outlet: O) -> Self {
        let rtt = outlet.rtt();
        let mut channel = Self {
            outlet,
            next_send_seq: 0,
            next_recv_seq: 0,
            handlers: HashMap::new(),
            tx_ring: BTreeMap::new(),
            rx_ring: BTreeMap::new(),
            states: HashMap::new(),
            window: WINDOW_MIN,
            window_max: WINDOW_MAX_FAST,
            window_min: WINDOW_MIN_FAST,
            rtt,
            tier: WindowTier::Fast,
            torn_down: false,
        };
        channel.recalculate_window_limits();
        channel
    }

    pub fn register_message_type<F>(
        &mut self,
        msg_type: u16,
        is_system_type: bool,
        handler: F,
    ) -> Result<(), ChannelError>
    where
        F: FnMut(Envelope) -> bool + Send + 'static,
    {
        if is_system_type != (msg_type >= MSGTYPE_USER_MAX) {
            return Err(ChannelError::InvalidMessageType);
        }
        self.handlers.insert(msg_type, Box::new(handler));
        Ok(())
    }

    pub fn is_ready_to_send(&self) -> bool {
        !self.torn_down && self.outlet.is_usable() && self.tx_ring.len() < self.window
    }

    pub fn send(&mut self, msg_type: u16, payload: Vec<u8>) -> Result<u16, ChannelError> {
        if self.torn_down {
            return Err(ChannelError::TornDown);
        }
        if payload.len() + 6 > self.outlet.mdu() {
            return Err(ChannelError::PayloadTooLarge);
        }
        if self.tx_ring.len() >= self.window {
            return Err(ChannelError::WindowFull);
        }

        let sequence = self.next_send_seq;
        self.next_send_seq = (self.next_send_seq + 1) % SEQ_MODULUS;

        let raw = Envelope { msg_type, sequence, payload }.pack();
        self.outlet.send(&raw)?;

        self.tx_ring.insert(sequence, TxEnvelope { raw, tries: 1, timestamp: Instant::now() });
        self.states.insert(sequence, MessageState::Sent);

        Ok(sequence)
    }

    /// Unpacks an inbound envelope, buffers it in sequence order, and dispatches every
    /// contiguous-from-front envelope to its registered handler. Returns the number
    /// delivered this call.
    pub fn receive(&mut self, raw: &[u8]) -> Result<usize, ChannelError> {
        if self.torn_down {
            return Err(ChannelError::TornDown);
        }

        let envelope = Envelope::unpack(raw)?;
        let distance = seq_distance(self.next_recv_seq, envelope.sequence);

        if distance < 0 {
            let behind = (-distance) as usize;
            if behind < self.window_max {
                log::trace!("channel: dropping duplicate seq {}", envelope.sequence);
            } else {
                log::warn!(
                    "channel: dropping stale seq {} ({} behind next {})",
                    envelope.sequence,
                    behind,
                    self.next_recv_seq
                );
            }
            return Ok(0);
        }

        if distance as usize >= self.window_max {
            log::warn!(
                "channel: dropping out-of-window seq {} ({} ahead of next {})",
                envelope.sequence,
                distance,
                self.next_recv_seq
            );
            return Ok(0);
        }

        self.rx_ring.insert(envelope.sequence, envelope);

        let mut delivered = 0;
        while let Some(envelope) = self.rx_ring.remove(&self.next_recv_seq) {
            self.next_recv_seq = (self.next_recv_seq + 1) % SEQ_MODULUS;
            self.dispatch(envelope);
            delivered += 1;
        }

        Ok(delivered)
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if let Some(handler) = self.handlers.get_mut(&envelope.msg_type) {
            let _claimed = handler(envelope);
        } else {
            log::debug!("channel: no handler registered for msgtype {:#06x}", envelope.msg_type);
        }
    }

    /// Called when the carrying Link reports a packet as delivered (proof received).
    pub fn on_packet_delivered(&mut self, sequence: u16) {
        if let Some(envelope) = self.tx_ring.remove(&sequence) {
            self.states.insert(sequence, MessageState::Delivered);
            self.update_rtt(envelope.timestamp.elapsed());
            self.window = (self.window + 1).min(self.window_max);
        }
    }

    /// Periodic maintenance: resends TX envelopes past their backoff timeout and shrinks
    /// the window. Returns `Err(TornDown)` once an envelope exhausts its retries.
    pub fn check_timeouts(&mut self) -> Result<(), ChannelError> {
        if self.torn_down {
            return Err(ChannelError::TornDown);
        }

        let ring_size = self.tx_ring.len();
        let now = Instant::now();
        let rtt = self.rtt;

        let expired: Vec<u16> = self
            .tx_ring
            .iter()
            .filter(|(_, envelope)| {
                now.duration_since(envelope.timestamp)
                    >= Self::retry_timeout(envelope.tries, rtt, ring_size)
            })
            .map(|(sequence, _)| *sequence)
            .collect();

        for sequence in expired {
            let Some(envelope) = self.tx_ring.get_mut(&sequence) else { continue };

            if envelope.tries >= MAX_TRIES {
                self.torn_down = true;
                self.states.insert(sequence, MessageState::Failed);
                return Err(ChannelError::TornDown);
            }

            self.outlet.resend(&envelope.raw)?;
            envelope.tries += 1;
            envelope.timestamp = now;
            self.states.insert(sequence, MessageState::Sent);
            self.window = self.window.saturating_sub(1).max(self.window_min);
        }

        Ok(())
    }

    fn retry_timeout(tries: u8, rtt: Duration, ring_size: usize) -> Duration {
        let backoff = 1.5f64.powi(tries as i32 - 1);
        let rtt_component = (rtt.as_secs_f64() * 2.5).max(0.025);
        Duration::from_secs_f64(backoff * rtt_component * (ring_size as f64 + 1.5))
    }

    fn update_rtt(&mut self, sample: Duration) {
        let rtt_secs = self.rtt.as_secs_f64() * 0.7 + sample.as_secs_f64() * 0.3;
        self.rtt = Duration::from_secs_f64(rtt_secs.max(0.0));
        self.recalculate_window_limits();
    }

    fn recalculate_window_limits(&mut self) {
        let (window_max, window_min, tier) = if self.rtt <= RTT_FAST {
            (WINDOW_MAX_FAST, WINDOW_MIN_FAST, WindowTier::Fast)
        } else if self.rtt <= RTT_MEDIUM {
            (WINDOW_MAX_MEDIUM, WINDOW_MIN_MEDIUM, WindowTier::Medium)
        } else if self.rtt <= RTT_SLOW {
            (WINDOW_MAX_SLOW, WINDOW_MIN, WindowTier::Slow)
        } else {
            (1, 1, WindowTier::VerySlow)
        };

        self.window_max = window_max;
        self.window_min = window_min;
        self.tier = tier;
        self.window = self.window.clamp(window_min, window_max);
    }

    pub fn mark_failed(&mut self, sequence: u16) {
        self.states.insert(sequence, MessageState::Failed);
        self.tx_ring.remove(&sequence);
    }

    pub fn state(&self, sequence: u16) -> MessageState {
        self.states.get(&sequence).copied().unwrap_or(MessageState::New)
    }

    pub fn outstanding(&self) -> usize {
        self.tx_ring.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn mdu(&self) -> usize {
        self.outlet.mdu()
    }

    pub fn outlet(&self) -> &O {
        &self.outlet
    }

    pub fn outlet_mut(&mut self) -> &mut O {
        &mut self.outlet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct MockOutlet {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        resent: Arc<Mutex<Vec<Vec<u8>>>>,
        rtt: Duration,
        mdu: usize,
    }

    impl MockOutlet {
        fn new() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                resent: Arc::new(Mutex::new(Vec::new())),
                rtt: Duration::from_millis(10),
                mdu: 500,
            }
        }
    }

    impl ChannelOutlet for MockOutlet {
        fn send(&mut self, raw: &[u8]) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(raw.to_vec());
            Ok(())
        }
        fn resend(&mut self, raw: &[u8]) -> Result<(), ChannelError> {
            self.resent.lock().unwrap().push(raw.to_vec());
            Ok(())
        }
        fn mdu(&self) -> usize {
            self.mdu
        }
        fn rtt(&self) -> Duration {
            self.rtt
        }
        fn is_usable(&self) -> bool {
            true
        }
    }

    #[test]
    fn send_refuses_once_window_is_full() {
        let mut channel = Channel::new(MockOutlet::new());
        channel.window = 2;

        assert!(channel.send(1, vec![0u8; 4]).is_ok());
        assert!(channel.send(1, vec![0u8; 4]).is_ok());
        assert!(matches!(channel.send(1, vec![0u8; 4]), Err(ChannelError::WindowFull)));
    }

    #[test]
    fn out_of_order_arrivals_deliver_contiguously() {
        let mut channel = Channel::new(MockOutlet::new());
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let delivered_clone = delivered.clone();
        channel
            .register_message_type(1, false, move |envelope| {
                delivered_clone.lock().unwrap().push(envelope.sequence);
                true
            })
            .unwrap();

        let raw = |seq: u16| Envelope { msg_type: 1, sequence: seq, payload: vec![] }.pack();

        assert_eq!(channel.receive(&raw(1)).unwrap(), 0);
        assert_eq!(channel.receive(&raw(2)).unwrap(), 0);
        assert_eq!(channel.receive(&raw(0)).unwrap(), 3);

        assert_eq!(*delivered.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(channel.next_recv_seq, 3);
    }

    #[test]
    fn sequence_distance_handles_wraparound() {
        assert_eq!(seq_distance(SEQ_MODULUS - 1, 0), 1);
        assert_eq!(seq_distance(0, SEQ_MODULUS - 1), -1);
    }

    #[test]
    fn delivery_shrinks_into_slow_tier_after_high_rtt_sample() {
        let mut channel = Channel::new(MockOutlet::new());
        assert_eq!(channel.window_max, WINDOW_MAX_FAST);

        let sequence = channel.send(1, vec![1, 2, 3]).unwrap();
        channel.tx_ring.get_mut(&sequence).unwrap().timestamp =
            Instant::now() - Duration::from_millis(900);
        channel.on_packet_delivered(sequence);

        assert_eq!(channel.window_max, WINDOW_MAX_SLOW);
        assert!(channel.window <= WINDOW_MAX_SLOW);
    }

    #[test]
    fn retries_exhausted_tears_down_the_channel() {
        let mut channel = Channel::new(MockOutlet::new());
        let sequence = channel.send(1, vec![1]).unwrap();

        for _ in 0..MAX_TRIES {
            channel.tx_ring.get_mut(&sequence).unwrap().timestamp =
                Instant::now() - Duration::from_secs(60);
            match channel.check_timeouts() {
                Ok(()) => {}
                Err(ChannelError::TornDown) => break,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert!(channel.is_torn_down());
    }
}
