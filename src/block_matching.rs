//! # Block-matching disparity computation
//!
//! Classic window-based stereo correspondence on rectified intensity images:
//!
//! 1. Both images are pre-filtered with a clamped normalised response (pixel minus local mean)
//!    so matching is insensitive to brightness differences between the cameras.
//! 2. For every pixel the sum of absolute differences (SAD) over a square window is evaluated for
//!    each candidate disparity and the cheapest one is kept.
//! 3. Matches in low-texture areas, ambiguous matches (uniqueness) and matches that disagree with
//!    the independently computed right-to-left disparity are rejected.
//! 4. Surviving matches are refined to 1/16 px with a parabola fit over the neighbouring costs.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use imageproc::filter::box_filter;
use tracing::debug;

use crate::disparity::{DisparityAlgorithm, DisparityMap, DISP_SCALE};
use crate::error::*;
use crate::params::EffectiveParams;

#[cfg(feature = "statistics")]
use plotters::prelude::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BlockMatcher {
    params: EffectiveParams,
}

/// Best candidate found for one pixel of one image.
#[derive(Clone, Copy)]
struct Candidate {
    cost: u32,
    index: usize,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl BlockMatcher {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: EffectiveParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EffectiveParams {
        &self.params
    }

    /// Sentinel written to rejected pixels: one step below the smallest searched disparity.
    pub fn invalid_value(&self) -> i16 {
        (self.params.min_disparity as i16 - 1) * DISP_SCALE
    }

    /// Normalised-response pre-filter, output values lie in `0..=2 * cap`.
    pub fn pre_filter(&self, img: &GrayImage) -> GrayImage {
        let radius = self.params.constants.pre_filter_size / 2;
        let cap = self.params.pre_filter_cap as i32;
        let mean = box_filter(img, radius, radius);

        let mut out = GrayImage::new(img.width(), img.height());
        for ((o, p), m) in out.pixels_mut().zip(img.pixels()).zip(mean.pixels()) {
            let v = (p[0] as i32 - m[0] as i32).clamp(-cap, cap) + cap;
            o[0] = v as u8;
        }

        out
    }
}

impl DisparityAlgorithm for BlockMatcher {
    /// Compute the disparity map for the given pair.
    fn compute(&mut self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::ShapeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }

        let width = left.width() as usize;
        let height = left.height() as usize;
        let invalid = self.invalid_value();
        let mut disp_map = DisparityMap::new(width, height, invalid);

        let window = self.params.sad_window_size as usize;
        let r = window / 2;
        let min_d = self.params.min_disparity as usize;
        let num_d = self.params.constants.number_of_disparities as usize;
        let cap = self.params.pre_filter_cap as i32;

        // Leftmost column whose window fits the right image at the largest disparity
        let x_lo = min_d + num_d - 1 + r;
        let x_hi = width.saturating_sub(r);

        if height < window || x_lo >= x_hi {
            debug!(width, height, window, min_d, "image too small for search range");
            return Ok(disp_map);
        }

        // ---- PRE FILTER ----

        let pl = self.pre_filter(left);
        let pr = self.pre_filter(right);
        let pl = pl.as_raw();
        let pr = pr.as_raw();

        // ---- STEREO CORRELATION ----

        let span = x_hi - x_lo;
        let mut costs = vec![0u32; span * num_d];
        let mut col = vec![0u32; width];
        let mut texture = vec![0u32; span];

        for y in r..(height - r) {
            // Texture: window sum of the left response's distance from the neutral value
            for x in (x_lo - r)..(x_hi + r) {
                col[x] = (y - r..=y + r)
                    .map(|yy| (pl[yy * width + x] as i32 - cap).unsigned_abs())
                    .sum();
            }
            window_sums(&col, x_lo, x_hi, r, |i, s| texture[i] = s);

            // Cost volume for this row
            for k in 0..num_d {
                let dd = min_d + k;
                for x in (x_lo - r)..(x_hi + r) {
                    col[x] = (y - r..=y + r)
                        .map(|yy| {
                            let row = yy * width;
                            (pl[row + x] as i32 - pr[row + x - dd] as i32).unsigned_abs()
                        })
                        .sum();
                }
                window_sums(&col, x_lo, x_hi, r, |i, s| costs[i * num_d + k] = s);
            }

            let right_best = right_disparities(&costs, num_d, x_lo, min_d, width);

            for i in 0..span {
                let x = x_lo + i;
                let crits = &costs[i * num_d..(i + 1) * num_d];

                let best = match self.select(crits, texture[i]) {
                    Some(b) => b,
                    None => continue,
                };

                if !self.is_consistent(&right_best, x, best.index) {
                    continue;
                }

                disp_map.put(x, y, self.refine(crits, best.index));
            }
        }

        // ---- POST FILTER ----

        let constants = self.params.constants;
        if constants.speckle_window_size > 0 {
            filter_speckles(
                &mut disp_map,
                constants.speckle_window_size as usize,
                constants.speckle_range as i32 * DISP_SCALE as i32,
            );
        }

        debug!(
            width,
            height,
            window,
            min_d,
            valid = disp_map.valid_count(),
            min_disp = ?disp_map.min_disp,
            max_disp = ?disp_map.max_disp,
            "block matching complete"
        );

        // ---- PLOTTING ----
        #[cfg(feature = "statistics")]
        {
            if let Err(e) = plot_valid_rows(&disp_map) {
                tracing::warn!(error = %e, "statistics plot failed");
            }
        }

        Ok(disp_map)
    }
}

impl BlockMatcher {
    /// Pick the cheapest disparity for one pixel, or `None` if the texture or uniqueness
    /// tests reject it.
    fn select(&self, crits: &[u32], texture: u32) -> Option<Candidate> {
        if texture < self.params.constants.texture_threshold {
            return None;
        }

        // Find index of minimum value, lowest disparity wins ties
        let index = crits
            .iter()
            .enumerate()
            .fold(0, |min_idx, (idx, &val)| if val < crits[min_idx] { idx } else { min_idx });
        let min_cost = crits[index] as u64;

        // Reject if any non-neighbouring disparity comes within the uniqueness margin, a ratio
        // of 0 disables the check
        let ratio = self.params.uniqueness_ratio as u64;
        if ratio > 0 {
            let limit = min_cost * (100 + ratio);
            let ambiguous = crits.iter().enumerate().any(|(k, &c)| {
                (k as i64 - index as i64).abs() > 1 && c as u64 * 100 <= limit
            });
            if ambiguous {
                return None;
            }
        }

        Some(Candidate {
            cost: crits[index],
            index,
        })
    }

    /// Left-right check: the right image's own best disparity at the matched column must agree
    /// with `index` to within `disp12_max_diff`.
    fn is_consistent(&self, right_best: &[Option<Candidate>], x: usize, index: usize) -> bool {
        let xr = x - (self.params.min_disparity as usize + index);
        match right_best[xr] {
            Some(c) => {
                (c.index as i64 - index as i64).unsigned_abs()
                    <= self.params.constants.disp12_max_diff as u64
            }
            None => false,
        }
    }

    /// Sub-pixel disparity in fixed point using a parabola through the neighbouring costs.
    fn refine(&self, crits: &[u32], index: usize) -> i16 {
        let base = (self.params.min_disparity as i32 + index as i32) * DISP_SCALE as i32;

        // On the outer edge of the criterion
        if index == 0 || index + 1 >= crits.len() {
            return base as i16;
        }

        let n = crits[index - 1] as i64;
        let c = crits[index] as i64;
        let p = crits[index + 1] as i64;
        let denom = 2 * (n + p - 2 * c);
        if denom <= 0 {
            return base as i16;
        }

        let scaled = (n - p) * DISP_SCALE as i64;
        // Round half away from zero
        let offset = if scaled >= 0 {
            (2 * scaled + denom) / (2 * denom)
        } else {
            -((-2 * scaled + denom) / (2 * denom))
        };

        (base + offset as i32) as i16
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Sliding horizontal window sums of `col` for every centre in `x_lo..x_hi`.
fn window_sums(col: &[u32], x_lo: usize, x_hi: usize, r: usize, mut out: impl FnMut(usize, u32)) {
    let mut acc: u32 = col[x_lo - r..=x_lo + r].iter().sum();
    out(0, acc);

    for x in (x_lo + 1)..x_hi {
        acc = acc + col[x + r] - col[x - r - 1];
        out(x - x_lo, acc);
    }
}

/// Right-to-left disparity for every right image column, read from the left-indexed cost row.
///
/// `costs` holds `num_d` costs per left column starting at `x_lo`. Lowest disparity wins ties.
fn right_disparities(
    costs: &[u32],
    num_d: usize,
    x_lo: usize,
    min_d: usize,
    width: usize,
) -> Vec<Option<Candidate>> {
    let mut right_best: Vec<Option<Candidate>> = vec![None; width];

    for (i, crits) in costs.chunks(num_d).enumerate() {
        for (k, &cost) in crits.iter().enumerate() {
            let xr = x_lo + i - (min_d + k);
            match right_best[xr] {
                Some(c) if c.cost <= cost => {}
                _ => right_best[xr] = Some(Candidate { cost, index: k }),
            }
        }
    }

    right_best
}

/// Invalidate connected regions of similar disparity smaller than `max_size` pixels.
///
/// Neighbouring pixels belong to the same region when their disparities differ by at most
/// `max_diff` (fixed point).
pub fn filter_speckles(map: &mut DisparityMap, max_size: usize, max_diff: i32) {
    let (width, height) = (map.width(), map.height());
    let invalid = map.invalid();
    let mut labelled = vec![false; width * height];
    let mut region = Vec::new();
    let mut stack = Vec::new();

    for start in 0..width * height {
        if labelled[start] || map.as_raw()[start] == invalid {
            continue;
        }

        region.clear();
        stack.push(start);
        labelled[start] = true;

        while let Some(idx) = stack.pop() {
            region.push(idx);
            let (x, y) = (idx % width, idx / width);
            let val = map.as_raw()[idx] as i32;

            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < width).then(|| idx + 1),
                (y > 0).then(|| idx - width),
                (y + 1 < height).then(|| idx + width),
            ];

            for n in neighbours.iter().flatten().copied() {
                let nv = map.as_raw()[n];
                if !labelled[n] && nv != invalid && (nv as i32 - val).abs() <= max_diff {
                    labelled[n] = true;
                    stack.push(n);
                }
            }
        }

        if region.len() < max_size {
            for &idx in &region {
                map.put(idx % width, idx / width, invalid);
            }
        }
    }

    // Range may have shrunk
    let valid: Vec<i16> = map.as_raw().iter().copied().filter(|&v| v != invalid).collect();
    map.min_disp = valid.iter().copied().min();
    map.max_disp = valid.iter().copied().max();
}

#[cfg(feature = "statistics")]
fn plot_valid_rows(map: &DisparityMap) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<(usize, usize)> = (0..map.height())
        .map(|y| {
            let valid = (0..map.width()).filter(|&x| map.get(x, y) != map.invalid()).count();
            (y, valid)
        })
        .collect();

    std::fs::create_dir_all("plots/block_matching")?;

    let area = BitMapBackend::new("plots/block_matching/valid_rows.png", (800, 600))
        .into_drawing_area();
    area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&area)
        .caption("Valid disparities per row", ("sans-serif", 20).into_font())
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_ranged(0..map.height(), 0..map.width() + 1)?;

    chart.configure_mesh().draw()?;
    chart.draw_series(LineSeries::new(rows, &RED))?;

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;

    fn matcher() -> BlockMatcher {
        BlockMatcher::new(ParameterSet::default().effective())
    }

    #[test]
    fn pre_filter_is_bounded_by_cap() {
        let m = matcher();
        let cap = m.params().pre_filter_cap as u8;
        let img = GrayImage::from_fn(32, 32, |x, y| image::Luma([((x * 37 + y * 91) % 256) as u8]));
        let out = m.pre_filter(&img);
        assert!(out.pixels().all(|p| p[0] <= 2 * cap));
    }

    #[test]
    fn flat_image_filters_to_neutral() {
        let m = matcher();
        let cap = m.params().pre_filter_cap as u8;
        let out = m.pre_filter(&GrayImage::from_pixel(16, 16, image::Luma([90])));
        assert!(out.pixels().all(|p| p[0] == cap));
    }

    #[test]
    fn invalid_sentinel_sits_below_search_range() {
        assert_eq!(matcher().invalid_value(), 99 * 16);
    }

    fn matcher_with_ratio(ratio: i32) -> BlockMatcher {
        let mut params = ParameterSet::default();
        params.set(crate::params::Param::UniquenessRatio, ratio).unwrap();
        BlockMatcher::new(params.effective())
    }

    #[test]
    fn ambiguous_costs_are_rejected() {
        let m = matcher_with_ratio(10);
        let mut crits = vec![1000u32; 16];
        crits[3] = 10;
        crits[9] = 10;
        assert!(m.select(&crits, 10_000).is_none());

        // Neighbouring tie is allowed
        crits[9] = 1000;
        crits[4] = 10;
        assert_eq!(m.select(&crits, 10_000).map(|c| c.index), Some(3));
    }

    #[test]
    fn zero_ratio_keeps_distant_ties() {
        let m = matcher();
        let mut crits = vec![1000u32; 16];
        crits[3] = 10;
        crits[9] = 10;
        assert_eq!(m.select(&crits, 10_000).map(|c| c.index), Some(3));
    }

    #[test]
    fn near_miss_is_rejected_only_within_ratio() {
        let mut crits = vec![1000u32; 16];
        crits[3] = 100;
        crits[9] = 105;
        assert!(matcher_with_ratio(5).select(&crits, 10_000).is_none());
        assert_eq!(matcher_with_ratio(4).select(&crits, 10_000).map(|c| c.index), Some(3));
    }

    #[test]
    fn left_right_disagreement_is_rejected() {
        let m = matcher();
        let (min_d, num_d) = (100, 16);
        let x_lo = 115;
        let width = x_lo + 3;

        // Left column 115 matches at k = 5, i.e. right column 10
        let mut costs = vec![1000u32; 3 * num_d];
        costs[5] = 50;

        let right = right_disparities(&costs, num_d, x_lo, min_d, width);
        assert_eq!(right[10].map(|c| c.index), Some(5));
        assert!(m.is_consistent(&right, x_lo, 5));

        // Column 117 sees right column 10 better at k = 7, two steps away
        costs[2 * num_d + 7] = 10;
        let right = right_disparities(&costs, num_d, x_lo, min_d, width);
        assert_eq!(right[10].map(|c| c.index), Some(7));
        assert!(!m.is_consistent(&right, x_lo, 5));

        // Column 116 wins it at k = 6 instead, within disp12_max_diff
        costs[2 * num_d + 7] = 1000;
        costs[num_d + 6] = 10;
        let right = right_disparities(&costs, num_d, x_lo, min_d, width);
        assert_eq!(right[10].map(|c| c.index), Some(6));
        assert!(m.is_consistent(&right, x_lo, 5));
    }

    #[test]
    fn low_texture_is_rejected() {
        let m = matcher();
        let mut crits = vec![1000u32; 16];
        crits[5] = 0;
        assert!(m.select(&crits, 506).is_none());
        assert!(m.select(&crits, 507).is_some());
    }

    #[test]
    fn refinement_moves_toward_cheaper_neighbour() {
        let m = matcher();
        let mut crits = vec![500u32; 16];
        crits[4] = 100;
        crits[5] = 0;
        crits[6] = 300;
        // vertex at 5 + (100 - 300) / (2 * 400) = 4.75
        assert_eq!(m.refine(&crits, 5), (105 * 16 - 4) as i16);
        // Edge of the range is not refined
        assert_eq!(m.refine(&crits, 0), 100 * 16);
    }

    #[test]
    fn mismatched_shapes_fail() {
        let mut m = matcher();
        let res = m.compute(&GrayImage::new(640, 480), &GrayImage::new(320, 240));
        assert!(matches!(
            res,
            Err(Error::ShapeMismatch {
                left: (640, 480),
                right: (320, 240)
            })
        ));
    }

    #[test]
    fn too_small_images_are_all_invalid() {
        let mut m = matcher();
        let map = m.compute(&GrayImage::new(64, 64), &GrayImage::new(64, 64)).unwrap();
        assert_eq!(map.valid_count(), 0);
    }

    #[test]
    fn speckles_below_size_are_removed() {
        let mut map = DisparityMap::new(6, 1, -16);
        for x in 0..4 {
            map.put(x, 0, 1600);
        }
        map.put(5, 0, 2000);

        filter_speckles(&mut map, 2, 16);
        assert_eq!(map.get(5, 0), -16);
        assert_eq!(map.get(0, 0), 1600);
        assert_eq!(map.max_disp, Some(1600));
    }
}
