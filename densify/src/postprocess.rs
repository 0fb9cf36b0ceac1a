//! Depth-map post-processing: speckle removal and small-gap interpolation.

use crate::depth_data::DepthData;
use mvs_core::{dir_to_normal, is_depth_similar, normal_to_dir, DenseOptions};
use nalgebra::Vector3;

/// Invalidate 4-connected components smaller than `speckle_size`. Two valid
/// pixels join when their depths are similar at `depth_diff_threshold * 0.7`.
pub fn remove_small_segments(data: &mut DepthData, opts: &DenseOptions) {
    let threshold = opts.depth_diff_threshold * 0.7;
    let speckle_size = opts.speckle_size as usize;
    let width = data.depth_map.width() as i64;
    let height = data.depth_map.height() as i64;
    if width == 0 || height == 0 || speckle_size <= 1 {
        return;
    }

    let mut done = vec![false; (width * height) as usize];
    let mut segment: Vec<(u32, u32)> = Vec::new();

    for sy in 0..height as u32 {
        for sx in 0..width as u32 {
            if done[(sy as i64 * width + sx as i64) as usize] {
                continue;
            }
            // grow the segment from this pixel
            segment.clear();
            segment.push((sx, sy));
            let mut cursor = 0;
            while cursor < segment.len() {
                let (cx, cy) = segment[cursor];
                let depth = data.depth_map.get(cx, cy);
                if depth > 0.0 {
                    for (nx, ny) in [
                        (cx as i64 - 1, cy as i64),
                        (cx as i64 + 1, cy as i64),
                        (cx as i64, cy as i64 - 1),
                        (cx as i64, cy as i64 + 1),
                    ] {
                        if nx < 0 || ny < 0 || nx >= width || ny >= height {
                            continue;
                        }
                        let flag = &mut done[(ny * width + nx) as usize];
                        if *flag {
                            continue;
                        }
                        let neighbor = data.depth_map.get(nx as u32, ny as u32);
                        if neighbor > 0.0 && is_depth_similar(depth, neighbor, threshold) {
                            segment.push((nx as u32, ny as u32));
                            *flag = true;
                        }
                    }
                }
                done[(cy as i64 * width + cx as i64) as usize] = true;
                cursor += 1;
            }

            if segment.len() < speckle_size {
                for &(x, y) in &segment {
                    data.depth_map.set(x, y, 0.0);
                    if !data.normal_map.is_empty() {
                        data.normal_map.set(x, y, Vector3::zeros());
                    }
                    if !data.conf_map.is_empty() {
                        data.conf_map.set(x, y, 0.0);
                    }
                }
            }
        }
    }
}

/// Fill runs of at most `ipol_gap_size` invalid pixels bounded by two
/// depth-similar valid pixels: depth linearly, normals through their
/// spherical direction, confidence as the bounding minimum. Row pass, then
/// column pass.
pub fn gap_interpolation(data: &mut DepthData, opts: &DenseOptions) {
    let threshold = opts.depth_diff_threshold * 2.5;
    let gap = opts.ipol_gap_size as usize;
    let width = data.depth_map.width();
    let height = data.depth_map.height();
    if width == 0 || height == 0 || gap == 0 {
        return;
    }

    // 1. row-wise
    for y in 0..height {
        let mut count = 0usize;
        for x in 0..width {
            let depth = data.depth_map.get(x, y);
            if depth <= 0.0 {
                count += 1;
                continue;
            }
            if count > 0 && count <= gap && x as usize > count {
                let first = x - count as u32 - 1;
                let depth_first = data.depth_map.get(first, y);
                if is_depth_similar(depth_first, depth, threshold) {
                    fill_run(data, (first, y), (x, y), count, |i| (first + i, y));
                }
            }
            count = 0;
        }
    }

    // 2. column-wise
    for x in 0..width {
        let mut count = 0usize;
        for y in 0..height {
            let depth = data.depth_map.get(x, y);
            if depth <= 0.0 {
                count += 1;
                continue;
            }
            if count > 0 && count <= gap && y as usize > count {
                let first = y - count as u32 - 1;
                let depth_first = data.depth_map.get(x, first);
                if is_depth_similar(depth_first, depth, threshold) {
                    fill_run(data, (x, first), (x, y), count, |i| (x, first + i));
                }
            }
            count = 0;
        }
    }
}

/// Interpolate the `count` pixels strictly between the two bounds.
fn fill_run(
    data: &mut DepthData,
    from: (u32, u32),
    to: (u32, u32),
    count: usize,
    at: impl Fn(u32) -> (u32, u32),
) {
    let depth_first = data.depth_map.get(from.0, from.1);
    let depth_last = data.depth_map.get(to.0, to.1);
    let diff = (depth_last - depth_first) / (count as f32 + 1.0);
    let conf = if data.conf_map.is_empty() {
        0.0
    } else {
        data.conf_map
            .get(from.0, from.1)
            .min(data.conf_map.get(to.0, to.1))
    };
    let dirs = (!data.normal_map.is_empty()).then(|| {
        let d1 = normal_to_dir(&data.normal_map.get(from.0, from.1));
        let d2 = normal_to_dir(&data.normal_map.get(to.0, to.1));
        (d1, (d2 - d1) / (count as f32 + 1.0))
    });

    let mut d = depth_first;
    for i in 1..=count as u32 {
        let (x, y) = at(i);
        d += diff;
        data.depth_map.set(x, y, d);
        if let Some((dir1, dir_step)) = dirs {
            data.normal_map.set(x, y, dir_to_normal(&(dir1 + dir_step * i as f32)));
        }
        if !data.conf_map.is_empty() {
            data.conf_map.set(x, y, conf);
        }
    }
}
