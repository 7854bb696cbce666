//! # Reliability Layer
//!
//! Retransmit-until-acked delivery with duplicate suppression and in-order
//! release, applied per remote session to frames flagged reliable.
//!
//! ## Design
//!
//! - Sender keeps each unacked datagram and resends it on a fixed timeout;
//!   a datagram that exhausts its resend budget marks the whole layer
//!   failed so the owning endpoint drops the session
//! - Receiver acks every reliable frame, releases payloads strictly in
//!   sequence order and holds early arrivals back until the gap fills
//! - No congestion control: that is outside this layer's contract

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How long to wait before resending an unacked datagram.
const RESEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Resend attempts before the layer gives up and fails the session.
/// Dropping the datagram alone would leave the remote's hold-back waiting
/// on the gap forever, stalling every later reliable payload.
const MAX_RESENDS: u32 = 10;

/// Returns true when sequence `a` is newer than `b` under u16 wrap-around.
#[inline]
#[must_use]
pub fn sequence_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 32_768
}

/// A datagram awaiting acknowledgment.
#[derive(Clone, Debug)]
struct PendingDatagram {
    sequence: u16,
    datagram: Vec<u8>,
    sent_at: Instant,
    resends: u32,
}

/// Per-session reliable delivery state.
#[derive(Debug)]
pub struct ReliabilityLayer {
    /// Sent datagrams not yet acked.
    pending: Vec<PendingDatagram>,
    /// Next sequence number to assign outgoing.
    next_send: u16,
    /// Next sequence number expected incoming.
    next_recv: u16,
    /// Early arrivals held back until the sequence gap fills.
    held: BTreeMap<u16, Vec<u8>>,
}

impl ReliabilityLayer {
    /// Creates a fresh layer with both directions at sequence zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(16),
            next_send: 0,
            next_recv: 0,
            held: BTreeMap::new(),
        }
    }

    /// Allocates the next outgoing sequence number.
    #[inline]
    pub fn next_sequence(&mut self) -> u16 {
        let sequence = self.next_send;
        self.next_send = self.next_send.wrapping_add(1);
        sequence
    }

    /// Tracks a sent datagram until it is acknowledged.
    pub fn track(&mut self, sequence: u16, datagram: Vec<u8>) {
        self.pending.push(PendingDatagram {
            sequence,
            datagram,
            sent_at: Instant::now(),
            resends: 0,
        });
    }

    /// Drops the tracked datagram for an acknowledged sequence.
    pub fn acknowledge(&mut self, sequence: u16) {
        self.pending.retain(|p| p.sequence != sequence);
    }

    /// Returns datagrams due for retransmission, bumping their timers.
    ///
    /// A datagram that hits [`MAX_RESENDS`] without an ack marks the layer
    /// [failed](Self::is_failed); it stays tracked for the teardown flush.
    pub fn due_resends(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut resends = Vec::new();
        for pending in &mut self.pending {
            if now.duration_since(pending.sent_at) >= RESEND_TIMEOUT {
                pending.sent_at = now;
                pending.resends += 1;
                resends.push(pending.datagram.clone());
            }
        }
        resends
    }

    /// True while a datagram that exhausted its resend budget remains
    /// unacked. The owning endpoint must tear the session down: the
    /// remote's in-order release is stuck behind the lost sequence. An
    /// ack that still makes it in time clears the condition.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.pending.iter().any(|p| p.resends >= MAX_RESENDS)
    }

    /// Accepts a received reliable payload.
    ///
    /// Returns the payloads now deliverable in order: empty for duplicates
    /// and early arrivals, one or more once the expected sequence shows up
    /// and unblocks held frames. The caller acks the frame regardless.
    pub fn accept(&mut self, sequence: u16, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let mut deliverable = Vec::new();

        if sequence == self.next_recv {
            deliverable.push(payload);
            self.next_recv = self.next_recv.wrapping_add(1);
            while let Some(held) = self.held.remove(&self.next_recv) {
                deliverable.push(held);
                self.next_recv = self.next_recv.wrapping_add(1);
            }
        } else if sequence_newer(sequence, self.next_recv) {
            self.held.entry(sequence).or_insert(payload);
        }
        // Older than expected: duplicate of something already delivered.

        deliverable
    }

    /// Number of datagrams still awaiting acknowledgment.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// All unacked datagrams, for a final best-effort flush on shutdown.
    #[must_use]
    pub fn pending_datagrams(&self) -> Vec<Vec<u8>> {
        self.pending.iter().map(|p| p.datagram.clone()).collect()
    }
}

impl Default for ReliabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery() {
        let mut layer = ReliabilityLayer::new();
        assert_eq!(layer.accept(0, b"a".to_vec()), vec![b"a".to_vec()]);
        assert_eq!(layer.accept(1, b"b".to_vec()), vec![b"b".to_vec()]);
    }

    #[test]
    fn out_of_order_frames_are_held_back() {
        let mut layer = ReliabilityLayer::new();

        // Sequence 1 and 2 arrive before 0.
        assert!(layer.accept(1, b"b".to_vec()).is_empty());
        assert!(layer.accept(2, b"c".to_vec()).is_empty());

        // Sequence 0 releases everything in order.
        let released = layer.accept(0, b"a".to_vec());
        assert_eq!(released, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn duplicates_are_suppressed() {
        let mut layer = ReliabilityLayer::new();
        assert_eq!(layer.accept(0, b"a".to_vec()).len(), 1);
        assert!(layer.accept(0, b"a".to_vec()).is_empty());

        // Duplicate of a held frame is also suppressed.
        assert!(layer.accept(5, b"f".to_vec()).is_empty());
        assert!(layer.accept(5, b"f".to_vec()).is_empty());
    }

    #[test]
    fn acknowledgment_clears_pending() {
        let mut layer = ReliabilityLayer::new();
        let seq_a = layer.next_sequence();
        let seq_b = layer.next_sequence();
        layer.track(seq_a, b"a".to_vec());
        layer.track(seq_b, b"b".to_vec());
        assert_eq!(layer.pending_count(), 2);

        layer.acknowledge(seq_a);
        assert_eq!(layer.pending_count(), 1);
    }

    #[test]
    fn resends_fire_after_the_timeout() {
        let mut layer = ReliabilityLayer::new();
        let sequence = layer.next_sequence();
        layer.track(sequence, b"a".to_vec());

        assert!(layer.due_resends(Instant::now()).is_empty());
        let later = Instant::now() + RESEND_TIMEOUT + Duration::from_millis(1);
        assert_eq!(layer.due_resends(later), vec![b"a".to_vec()]);
    }

    #[test]
    fn exhausting_the_resend_budget_fails_the_layer() {
        let mut layer = ReliabilityLayer::new();
        let sequence = layer.next_sequence();
        layer.track(sequence, b"a".to_vec());

        let mut now = Instant::now();
        for _ in 0..MAX_RESENDS - 1 {
            now += RESEND_TIMEOUT + Duration::from_millis(1);
            assert_eq!(layer.due_resends(now), vec![b"a".to_vec()]);
            assert!(!layer.is_failed());
        }

        now += RESEND_TIMEOUT + Duration::from_millis(1);
        assert_eq!(layer.due_resends(now), vec![b"a".to_vec()]);
        assert!(layer.is_failed());
        // The datagram is never silently dropped while the layer lives.
        assert_eq!(layer.pending_count(), 1);
    }

    #[test]
    fn late_ack_rescues_the_session() {
        let mut layer = ReliabilityLayer::new();
        let sequence = layer.next_sequence();
        layer.track(sequence, b"a".to_vec());

        let mut now = Instant::now();
        for _ in 0..MAX_RESENDS {
            now += RESEND_TIMEOUT + Duration::from_millis(1);
            layer.due_resends(now);
        }
        assert!(layer.is_failed());

        // The remote did receive it after all: nothing is wedged, so the
        // session does not have to die.
        layer.acknowledge(sequence);
        assert!(!layer.is_failed());
        assert_eq!(layer.pending_count(), 0);
    }

    #[test]
    fn sequence_comparison_wraps() {
        assert!(sequence_newer(1, 0));
        assert!(!sequence_newer(0, 1));
        assert!(sequence_newer(0, u16::MAX));
        assert!(!sequence_newer(u16::MAX, 0));
    }
}
