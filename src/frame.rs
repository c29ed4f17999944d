//! # Frames
//!
//! Raw camera frames as delivered by the input endpoints, and their conversion into the
//! single-channel intensity images the disparity algorithms work on.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::time::SystemTime;

use image::{DynamicImage, GrayImage};

use crate::error::*;
use crate::sync::Side;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

// Fixed-point BT.601 luma weights, scaled by 2^14.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Pixel encoding tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Mono8,
    Mono16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A single received camera frame. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub encoding: Encoding,
    /// Tightly packed row-major pixel buffer.
    pub data: Vec<u8>,
    /// Capture timestamp.
    pub stamp: SystemTime,
}

/// Header attached to every published frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub seq: u64,
    pub stamp: SystemTime,
    pub frame_id: String,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Encoding {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Encoding::Mono8 => 1,
            Encoding::Mono16 => 2,
            Encoding::Rgb8 | Encoding::Bgr8 => 3,
            Encoding::Rgba8 | Encoding::Bgra8 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Mono8 => "mono8",
            Encoding::Mono16 => "mono16",
            Encoding::Rgb8 => "rgb8",
            Encoding::Bgr8 => "bgr8",
            Encoding::Rgba8 => "rgba8",
            Encoding::Bgra8 => "bgra8",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, encoding: Encoding, data: Vec<u8>, stamp: SystemTime) -> Self {
        Self {
            width,
            height,
            encoding,
            data,
            stamp,
        }
    }

    /// Wrap an 8-bit intensity image as a `mono8` frame.
    pub fn from_gray(img: GrayImage, stamp: SystemTime) -> Self {
        let (width, height) = img.dimensions();
        Self::new(width, height, Encoding::Mono8, img.into_raw(), stamp)
    }

    /// Build a frame from a decoded image file, keeping grayscale sources single-channel.
    pub fn from_dynamic(img: &DynamicImage, stamp: SystemTime) -> Self {
        match img.color() {
            image::ColorType::L8 => Self::from_gray(img.to_luma(), stamp),
            _ => {
                let rgb = img.to_rgb();
                let (width, height) = rgb.dimensions();
                Self::new(width, height, Encoding::Rgb8, rgb.into_raw(), stamp)
            }
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Convert the frame into a single-channel intensity image.
    ///
    /// Color encodings go through a fixed-point BT.601 luma transform so the result is
    /// bit-identical across runs and platforms. `side` only labels the error.
    pub fn to_intensity(&self, side: Side) -> Result<GrayImage> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::decode(
                side,
                format!("empty frame {}x{}", self.width, self.height),
            ));
        }

        let bpp = self.encoding.bytes_per_pixel();
        let expected = self.width as usize * self.height as usize * bpp;
        if self.data.len() != expected {
            return Err(Error::decode(
                side,
                format!(
                    "{} buffer of {}x{} should be {} bytes, got {}",
                    self.encoding,
                    self.width,
                    self.height,
                    expected,
                    self.data.len()
                ),
            ));
        }

        let pixels: Vec<u8> = match self.encoding {
            Encoding::Mono8 => self.data.clone(),
            // Big-endian 16 bit, keep the high byte
            Encoding::Mono16 => self.data.chunks_exact(2).map(|px| px[0]).collect(),
            Encoding::Rgb8 | Encoding::Rgba8 => self
                .data
                .chunks_exact(bpp)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
            Encoding::Bgr8 | Encoding::Bgra8 => self
                .data
                .chunks_exact(bpp)
                .map(|px| luma(px[2], px[1], px[0]))
                .collect(),
        };

        GrayImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| Error::decode(side, "intensity buffer does not fit frame dimensions"))
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let acc = r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + (1 << (LUMA_SHIFT - 1));
    (acc >> LUMA_SHIFT) as u8
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
