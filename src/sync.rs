//! # Frame slot synchronization
//!
//! Holds the most recent frame from each camera and decides when a computable stereo pair
//! exists. Each side has a single slot: the latest received frame always wins, nothing is queued,
//! and slots are never cleared after a pair has been produced. A stale frame on one side may
//! therefore pair with several newer frames from the other side until its own side updates.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::frame::Frame;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Camera side a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// When the synchronizer considers the two slots a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPolicy {
    /// Pair on every arrival once both slots are populated, regardless of timestamps.
    #[default]
    LatestWins,
    /// Only pair when the two capture stamps are at most this far apart.
    MaxSkew(Duration),
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// The current contents of both slots, handed to one computation cycle.
#[derive(Debug, Clone)]
pub struct StereoPair {
    pub left: Arc<Frame>,
    pub right: Arc<Frame>,
}

#[derive(Debug)]
pub struct FrameSlotSynchronizer {
    policy: PairingPolicy,
    left: Option<Arc<Frame>>,
    right: Option<Arc<Frame>>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

impl PairingPolicy {
    fn accepts(&self, left: &Frame, right: &Frame) -> bool {
        match self {
            PairingPolicy::LatestWins => true,
            PairingPolicy::MaxSkew(max) => stamp_distance(left, right) <= *max,
        }
    }
}

impl StereoPair {
    /// Capture stamp distance between the two frames.
    pub fn skew(&self) -> Duration {
        stamp_distance(&self.left, &self.right)
    }
}

impl Default for FrameSlotSynchronizer {
    fn default() -> Self {
        Self::new(PairingPolicy::default())
    }
}

impl FrameSlotSynchronizer {
    pub fn new(policy: PairingPolicy) -> Self {
        Self {
            policy,
            left: None,
            right: None,
        }
    }

    pub fn policy(&self) -> PairingPolicy {
        self.policy
    }

    /// Store a left frame. Returns the pair to compute if the right slot is populated.
    pub fn arrive_left(&mut self, frame: impl Into<Arc<Frame>>) -> Option<StereoPair> {
        self.arrive(Side::Left, frame.into())
    }

    /// Store a right frame. Returns the pair to compute if the left slot is populated.
    pub fn arrive_right(&mut self, frame: impl Into<Arc<Frame>>) -> Option<StereoPair> {
        self.arrive(Side::Right, frame.into())
    }

    /// Store `frame` in its side's slot, overwriting whatever was there, then check for a pair.
    pub fn arrive(&mut self, side: Side, frame: Arc<Frame>) -> Option<StereoPair> {
        match side {
            Side::Left => self.left = Some(frame),
            Side::Right => self.right = Some(frame),
        }

        let (left, right) = match (&self.left, &self.right) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                trace!(%side, waiting_for = %side.opposite(), "no pair yet");
                return None;
            }
        };

        if !self.policy.accepts(left, right) {
            trace!(%side, "slot stamps too far apart, not pairing");
            return None;
        }

        Some(StereoPair {
            left: Arc::clone(left),
            right: Arc::clone(right),
        })
    }

    pub fn slot(&self, side: Side) -> Option<&Arc<Frame>> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn stamp_distance(a: &Frame, b: &Frame) -> Duration {
    a.stamp
        .duration_since(b.stamp)
        .or_else(|_| b.stamp.duration_since(a.stamp))
        .unwrap_or_default()
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Encoding;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn frame(tag: u8, ms: u64) -> Frame {
        Frame::new(1, 1, Encoding::Mono8, vec![tag], UNIX_EPOCH + Duration::from_millis(ms))
    }

    #[test]
    fn single_side_never_pairs() {
        let mut sync = FrameSlotSynchronizer::default();
        assert!(sync.arrive_left(frame(1, 0)).is_none());
        assert!(sync.arrive_left(frame(2, 10)).is_none());

        let mut sync = FrameSlotSynchronizer::default();
        assert!(sync.arrive_right(frame(1, 0)).is_none());
        assert!(sync.arrive_right(frame(2, 10)).is_none());
    }

    #[test]
    fn stale_frame_pairs_with_every_new_opposite_frame() {
        let mut sync = FrameSlotSynchronizer::default();
        assert!(sync.arrive_left(frame(1, 0)).is_none());

        for tag in 10..13 {
            let pair = sync.arrive_right(frame(tag, tag as u64)).expect("pair");
            assert_eq!(pair.left.data, vec![1]);
            assert_eq!(pair.right.data, vec![tag]);
        }

        let pair = sync.arrive_left(frame(2, 20)).expect("pair");
        assert_eq!(pair.left.data, vec![2]);
        assert_eq!(pair.right.data, vec![12]);
    }

    #[test]
    fn slots_survive_a_cycle() {
        let mut sync = FrameSlotSynchronizer::default();
        sync.arrive_left(frame(1, 0));
        sync.arrive_right(frame(2, 0)).unwrap();
        assert!(sync.slot(Side::Left).is_some());
        assert!(sync.slot(Side::Right).is_some());
    }

    #[test]
    fn max_skew_holds_back_distant_frames() {
        let mut sync = FrameSlotSynchronizer::new(PairingPolicy::MaxSkew(Duration::from_millis(5)));
        sync.arrive_left(frame(1, 100));
        assert!(sync.arrive_right(frame(2, 120)).is_none());
        assert!(sync.arrive_right(frame(3, 97)).is_some());
        // Still paired against the same left slot
        let pair = sync.arrive_right(frame(4, 104)).unwrap();
        assert_eq!(pair.skew(), Duration::from_millis(4));
    }

    #[test]
    fn pair_shares_frames_with_slots() {
        let mut sync = FrameSlotSynchronizer::default();
        let left = Arc::new(Frame::new(1, 1, Encoding::Mono8, vec![7], SystemTime::now()));
        sync.arrive(Side::Left, Arc::clone(&left));
        let pair = sync.arrive_right(frame(0, 0)).unwrap();
        assert!(Arc::ptr_eq(&pair.left, &left));
    }
}
