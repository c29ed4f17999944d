use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_depthmap::prelude::*;
use image::{GrayImage, Luma};

fn textured_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
    let mut state = 0x9e37_79b9u32;
    let scene = GrayImage::from_fn(width + shift, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Luma([(state >> 24) as u8])
    });

    let left = GrayImage::from_fn(width, height, |x, y| *scene.get_pixel(x, y));
    let right = GrayImage::from_fn(width, height, |x, y| *scene.get_pixel(x + shift, y));
    (left, right)
}

fn block_matching_bench(c: &mut Criterion) {
    // Build images
    let (left, right) = textured_pair(320, 240, 108);

    // Build disparity alg
    let mut disp = BlockMatcher::new(ParameterSet::default().effective());

    // Benchmark compute function
    c.bench_function("block matching 320x240", |b| {
        b.iter(|| disp.compute(black_box(&left), black_box(&right)))
    });

    let map = disp.compute(&left, &right).unwrap();
    c.bench_function("normalise 320x240", |b| b.iter(|| black_box(&map).to_luma_normalised()));
}

criterion_group!(benches, block_matching_bench);
criterion_main!(benches);
