//! # Depth Map Computation
//!
//! This crate derives dense disparity maps from a live pair of rectified stereo streams and
//! republishes them, normalised to 8 bits, for downstream consumers.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod block_matching;
pub mod config;
mod disparity;
mod error;
pub mod frame;
pub mod node;
pub mod params;
pub mod publisher;
pub mod sync;
pub mod transport;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use crate::error::{Error, Result};

pub mod prelude {
    pub use crate::block_matching::BlockMatcher;
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap, DISP_SCALE};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Encoding, Frame, FrameHeader};
    pub use crate::node::DepthMapNode;
    pub use crate::params::{EffectiveParams, Param, ParameterSet, ParameterStore};
    pub use crate::publisher::{ChannelSink, DepthImage, Publisher, Sink, OUTPUT_TOPIC};
    pub use crate::sync::{FrameSlotSynchronizer, PairingPolicy, Side, StereoPair};
}
