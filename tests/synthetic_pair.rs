//! # Synthetic stereo pair
//!
//! Builds a random-textured scene, views it from two cameras a known disparity apart, and checks
//! the block matcher recovers that disparity.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use cv_depthmap::prelude::*;
use image::{GrayImage, Luma};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const WIDTH: u32 = 192;
const HEIGHT: u32 = 48;
const SHIFT: u32 = 108;

// -----------------------------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------------------------

/// Deterministic xorshift texture, `WIDTH + SHIFT` wide.
fn scene(seed: u32) -> GrayImage {
    let mut state = seed.max(1);
    GrayImage::from_fn(WIDTH + SHIFT, HEIGHT, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Luma([(state >> 24) as u8])
    })
}

/// Left sees the scene directly, right sees it shifted so `left(x) == right(x - SHIFT)`.
fn stereo_pair(seed: u32) -> (GrayImage, GrayImage) {
    let scene = scene(seed);
    let left = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| *scene.get_pixel(x, y));
    let right = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| *scene.get_pixel(x + SHIFT, y));
    (left, right)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn recovers_known_disparity() -> Result<()> {
    let (left, right) = stereo_pair(7);
    let params = ParameterSet::default().effective();
    let mut matcher = BlockMatcher::new(params);

    let map = matcher.compute(&left, &right)?;

    let r = (params.sad_window_size / 2) as usize;
    let x_lo = (params.min_disparity + params.constants.number_of_disparities - 1) as usize + r;
    let x_hi = WIDTH as usize - r;
    let searchable = (x_hi - x_lo) * (HEIGHT as usize - 2 * r);

    assert!(
        map.valid_count() * 10 >= searchable * 8,
        "only {} of {} pixels matched",
        map.valid_count(),
        searchable
    );

    for y in 0..HEIGHT as usize {
        for x in 0..WIDTH as usize {
            if let Some(d) = map.disparity(x, y) {
                assert!((d - SHIFT as f32).abs() <= 1.0, "({}, {}) = {}", x, y, d);
                assert!(x >= x_lo && x < x_hi);
            }
        }
    }

    Ok(())
}

#[test]
fn identical_inputs_give_identical_output() -> Result<()> {
    let (left, right) = stereo_pair(11);
    let params = ParameterSet::default();

    let a = BlockMatcher::new(params.effective()).compute(&left, &right)?;
    let b = BlockMatcher::new(params.effective()).compute(&left, &right)?;

    assert_eq!(a, b);
    assert_eq!(a.to_luma_normalised(), b.to_luma_normalised());
    Ok(())
}

#[test]
fn normalised_output_spans_full_range() -> Result<()> {
    let (left, right) = stereo_pair(3);
    let map = BlockMatcher::new(ParameterSet::default().effective()).compute(&left, &right)?;
    let img = map.to_luma_normalised();

    let min = img.pixels().map(|p| p[0]).min();
    let max = img.pixels().map(|p| p[0]).max();
    assert_eq!(min, Some(0));
    assert_eq!(max, Some(255));
    Ok(())
}

#[test]
fn uniqueness_rejects_search_range_missing_the_true_shift() -> Result<()> {
    let (left, right) = stereo_pair(5);

    // Search 150..166 while the true shift is 108
    let mut params = ParameterSet::default();
    params.set(Param::NumOfDisparity, 50)?;
    params.set(Param::UniquenessRatio, 50)?;
    let map = BlockMatcher::new(params.effective()).compute(&left, &right)?;

    let searchable = (WIDTH as usize - 7 - 172) * (HEIGHT as usize - 14);
    assert!(map.valid_count() * 10 <= searchable);
    Ok(())
}

#[test]
fn featureless_pair_is_rejected_by_texture_threshold() -> Result<()> {
    let flat = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([128]));
    let map = BlockMatcher::new(ParameterSet::default().effective()).compute(&flat, &flat)?;

    assert_eq!(map.valid_count(), 0);
    assert!(map.to_luma_normalised().pixels().all(|p| p[0] == 0));
    Ok(())
}
