//! # General disparity objects
//!
//! This module provides generic disparity traits and structures for use by different algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Number of fractional steps per pixel in the fixed-point disparity values.
pub const DISP_SCALE: i16 = 16;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A signed fixed-point disparity map at the resolution of the input images.
///
/// Values are in 1/[`DISP_SCALE`] pixel units. Pixels rejected by the matcher hold the map's
/// `invalid` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisparityMap {
    width: usize,
    height: usize,
    data: Vec<i16>,
    invalid: i16,
    pub max_disp: Option<i16>,
    pub min_disp: Option<i16>,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given rectified intensity pair.
    fn compute(&mut self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    /// Create a map with every pixel set to the `invalid` sentinel.
    pub fn new(width: usize, height: usize, invalid: i16) -> Self {
        DisparityMap {
            width,
            height,
            data: vec![invalid; width * height],
            invalid,
            min_disp: None,
            max_disp: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn invalid(&self) -> i16 {
        self.invalid
    }

    pub fn put(&mut self, x: usize, y: usize, val: i16) {
        self.data[y * self.width + x] = val;

        if val != self.invalid {
            self.min_disp = Some(self.min_disp.map_or(val, |m| m.min(val)));
            self.max_disp = Some(self.max_disp.map_or(val, |m| m.max(val)));
        }
    }

    pub fn get(&self, x: usize, y: usize) -> i16 {
        self.data[y * self.width + x]
    }

    /// Disparity at `(x, y)` in pixels, or `None` if the matcher rejected the pixel.
    pub fn disparity(&self, x: usize, y: usize) -> Option<f32> {
        let val = self.get(x, y);
        if val == self.invalid {
            None
        } else {
            Some(val as f32 / DISP_SCALE as f32)
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != self.invalid).count()
    }

    pub fn as_raw(&self) -> &[i16] {
        &self.data
    }

    /// Converts the map to a min-max normalised GrayImage spanning 0..=255.
    ///
    /// The range is taken over every pixel including invalid ones, so rejected pixels end up at
    /// the dark end of the output. A map with a single distinct value normalises to all zeros.
    pub fn to_luma_normalised(&self) -> GrayImage {
        let (min, max) = self
            .data
            .iter()
            .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let pixels = if self.data.is_empty() || min == max {
            vec![0u8; self.data.len()]
        } else {
            let scale = 255.0 / (max as f64 - min as f64);
            self.data
                .iter()
                .map(|&v| ((v as f64 - min as f64) * scale).round() as u8)
                .collect()
        };

        // Length always matches width * height
        GrayImage::from_raw(self.width as u32, self.height as u32, pixels)
            .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32))
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
