//! # Depth map node
//!
//! Owns the frame slots, the publisher and its sequence counter, and a handle on the parameter
//! store. Every arrival runs under one lock spanning slot update, pair check, parameter snapshot,
//! computation and publish, so arrivals dispatched from several threads behave exactly like a
//! single dispatch context.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, PoisonError};

use image::GrayImage;
use tracing::{error, instrument, warn};

use crate::block_matching::BlockMatcher;
use crate::disparity::DisparityAlgorithm;
use crate::error::*;
use crate::frame::{Frame, FrameHeader};
use crate::params::{ParameterSet, ParameterStore};
use crate::publisher::Publisher;
use crate::sync::{FrameSlotSynchronizer, PairingPolicy, Side, StereoPair};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct DepthMapNode {
    params: ParameterStore,
    state: Mutex<NodeState>,
}

struct NodeState {
    sync: FrameSlotSynchronizer,
    publisher: Publisher,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DepthMapNode {
    pub fn new(policy: PairingPolicy, params: ParameterStore, publisher: Publisher) -> Self {
        Self {
            params,
            state: Mutex::new(NodeState {
                sync: FrameSlotSynchronizer::new(policy),
                publisher,
            }),
        }
    }

    /// Handle shared with the control surface.
    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Number of maps published since start.
    pub fn published(&self) -> u64 {
        self.lock().publisher.sequence().value()
    }

    pub fn arrive_left(&self, frame: Frame) -> Result<Option<FrameHeader>> {
        self.arrive(Side::Left, frame)
    }

    pub fn arrive_right(&self, frame: Frame) -> Result<Option<FrameHeader>> {
        self.arrive(Side::Right, frame)
    }

    /// Store `frame` and, if a pair is available, run one computation cycle and publish.
    ///
    /// Returns the published header, `Ok(None)` when no pair was available yet, or the error
    /// that aborted the cycle. Failed cycles leave the slots and the sequence untouched apart
    /// from storing `frame`.
    #[instrument(level = "trace", skip(self, frame))]
    pub fn arrive(&self, side: Side, frame: Frame) -> Result<Option<FrameHeader>> {
        let mut state = self.lock();

        let pair = match state.sync.arrive(side, Arc::new(frame)) {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let image = match run_cycle(&pair, self.params.snapshot()) {
            Ok(image) => image,
            Err(e) => {
                match &e {
                    Error::Decode { .. } => error!(error = %e, "dropping cycle"),
                    _ => warn!(error = %e, "dropping cycle"),
                }
                return Err(e);
            }
        };

        Ok(Some(state.publisher.publish(image)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Decode both frames, match them with the given parameters, and normalise the result.
pub fn run_cycle(pair: &StereoPair, params: ParameterSet) -> Result<GrayImage> {
    let left = pair.left.to_intensity(Side::Left)?;
    let right = pair.right.to_intensity(Side::Right)?;

    let mut matcher = BlockMatcher::new(params.effective());
    let map = matcher.compute(&left, &right)?;

    Ok(map.to_luma_normalised())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
