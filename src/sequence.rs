//! Packet sequence tracking.
//!
//! The device numbers packets with a 7-bit counter that wraps at 128 and sets
//! bit 7 on the first packet after it restarted counting. The tracker turns
//! that into an *extended sequence*: a monotonically increasing packet index
//! used as the discrete time axis. Gaps in the counter are reported as lost
//! packets; the stream itself is never reordered or repaired.
//!
//! A gap of exactly 128 packets is indistinguishable from no loss. The counter
//! carries no wider field to tell the two apart, so a packet repeating the
//! previous counter value keeps the extended sequence and reports nothing lost.

use log::{debug, warn};

const COUNTER_MODULUS: i64 = 0x80;

/// Result of feeding one packet to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    /// Extended sequence of this packet.
    pub extended: i64,
    /// Extended sequence treated as time zero.
    pub origin: i64,
    /// Packets missed since the previous one.
    pub lost: u64,
    /// Whether this packet started a new origin.
    pub resynced: bool,
}

impl SequenceStep {
    /// Packets elapsed since the origin.
    pub fn position(&self) -> i64 {
        self.extended - self.origin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceState {
    pub last_extended: Option<i64>,
    pub origin: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    state: SequenceState,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Forget the current origin; the next packet starts a new one.
    pub fn reset(&mut self) {
        self.state = SequenceState::default();
    }

    /// Advance with the raw sequence byte of a packet.
    pub fn advance(&mut self, sequence: u8) -> SequenceStep {
        let counter = i64::from(sequence & 0x7F);
        let resync = sequence & 0x80 != 0;

        let (last, origin, resynced) = match (self.state.last_extended, self.state.origin) {
            (Some(last), Some(origin)) if !resync => (last, origin, false),
            _ => (counter - 1, counter - 1, true),
        };

        let delta = (counter - last).rem_euclid(COUNTER_MODULUS);
        let extended = last + delta;
        let lost = if delta == 0 {
            debug!("repeated sequence counter {}: extended={}", counter, extended);
            0
        } else if extended != last + 1 {
            let lost = (extended - 1 - last) as u64;
            warn!(
                "lost {} packet(s): seq={:#04x}, counter={}, origin={}, last={}, new={}",
                lost, sequence, counter, origin, last, extended
            );
            lost
        } else {
            0
        };

        self.state = SequenceState {
            last_extended: Some(extended),
            origin: Some(origin),
        };

        SequenceStep {
            extended,
            origin,
            lost,
            resynced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_packet_sets_origin_one_below_counter() {
        let mut tracker = SequenceTracker::new();
        let step = tracker.advance(0x05);
        assert_eq!(step.origin, 4);
        assert_eq!(step.extended, 5);
        assert_eq!(step.position(), 1);
        assert_eq!(step.lost, 0);
        assert!(step.resynced);
    }

    #[test]
    fn counter_wraps_without_loss() {
        let mut tracker = SequenceTracker::new();
        tracker.advance(126);
        assert_eq!(tracker.advance(127).extended, 127);
        let step = tracker.advance(0);
        assert_eq!(step.extended, 128);
        assert_eq!(step.lost, 0);
        assert_eq!(tracker.advance(1).extended, 129);
    }

    #[test]
    fn gap_across_wrap_is_counted() {
        let mut tracker = SequenceTracker::new();
        tracker.advance(125);
        let step = tracker.advance(2);
        assert_eq!(step.lost, 4);
        assert_eq!(step.extended, 130);
    }

    #[test]
    fn resync_resets_origin_regardless_of_history() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..40u8 {
            tracker.advance(seq);
        }
        let step = tracker.advance(0x80 | 17);
        assert!(step.resynced);
        assert_eq!(step.origin, 16);
        assert_eq!(step.extended, 17);
        assert_eq!(step.lost, 0);
        assert_eq!(tracker.advance(18).position(), 2);
    }

    #[test]
    fn full_wrap_gap_is_invisible() {
        let mut tracker = SequenceTracker::new();
        tracker.advance(3);
        let step = tracker.advance(3);
        assert_eq!(step.lost, 0);
        assert_eq!(step.extended, 3);
    }

    #[test]
    fn same_packet_twice_yields_same_position_and_no_loss() {
        let mut tracker = SequenceTracker::new();
        tracker.advance(10);
        let first = tracker.advance(14);
        assert_eq!(first.lost, 3);
        let second = tracker.advance(14);
        assert_eq!(second.extended, first.extended);
        assert_eq!(second.origin, first.origin);
        assert_eq!(second.lost, 0);
        assert_eq!(tracker.advance(15).lost, 0);
    }

    proptest! {
        #[test]
        fn consecutive_counters_step_by_one(start in 0u8..128, len in 1usize..400) {
            let mut tracker = SequenceTracker::new();
            let mut previous = tracker.advance(start).extended;
            for i in 1..len {
                let seq = ((start as usize + i) % 128) as u8;
                let step = tracker.advance(seq);
                prop_assert_eq!(step.extended, previous + 1);
                prop_assert_eq!(step.lost, 0);
                previous = step.extended;
            }
        }

        #[test]
        fn loss_equals_skipped_counter_values(
            start in 0u8..128,
            gaps in proptest::collection::vec(0u8..127, 1..50),
        ) {
            let mut tracker = SequenceTracker::new();
            let mut counter = start as u32;
            let mut previous = tracker.advance(start).extended;
            for gap in gaps {
                counter = (counter + 1 + gap as u32) % 128;
                let step = tracker.advance(counter as u8);
                prop_assert_eq!(step.lost, gap as u64);
                prop_assert_eq!(step.extended, previous + 1 + gap as i64);
                previous = step.extended;
            }
        }
    }
}
