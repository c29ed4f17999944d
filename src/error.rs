//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::params::Param;
use crate::sync::Side;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the depthmap crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// One side's frame could not be converted into an intensity image.
    #[error("could not decode {side} frame: {reason}")]
    Decode { side: Side, reason: String },

    /// Left and right intensity images have different dimensions.
    #[error("stereo shape mismatch: left is {}x{}, right is {}x{}", left.0, left.1, right.0, right.1)]
    ShapeMismatch { left: (u32, u32), right: (u32, u32) },

    /// An input or output endpoint could not be opened.
    #[error("failed to bind endpoint '{endpoint}': {reason}")]
    ChannelBind { endpoint: String, reason: String },

    #[error("{param} must be in {min}..={max}, got {value}")]
    ParamOutOfRange {
        param: Param,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("unknown parameter '{0}'")]
    UnknownParam(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Error {
    pub(crate) fn decode(side: Side, reason: impl Into<String>) -> Self {
        Self::Decode {
            side,
            reason: reason.into(),
        }
    }

    pub(crate) fn bind(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ChannelBind {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}
