//! Cross-view depth-map filtering: project neighbor depth maps into the
//! reference frame, then either enforce consensus or adjust by confidence.

use crate::Result;
use log::debug;
use mvs_core::{is_depth_similar, Camera, ConfidenceMap, DenseOptions, DepthMap};
use nalgebra::Point2;

/// Snapshot of one neighbor consulted by the filter.
pub struct NeighborDepthData<'a> {
    pub id: u32,
    pub camera: Camera,
    pub depth_map: &'a DepthMap,
    pub conf_map: &'a ConfidenceMap,
}

/// Snapshot of the reference being filtered.
pub struct ReferenceDepthData<'a> {
    pub id: u32,
    pub camera: Camera,
    pub depth_map: &'a DepthMap,
    pub conf_map: &'a ConfidenceMap,
    pub d_min: f32,
    pub d_max: f32,
}

/// Filter one depth map against its neighbors. Returns the new depth and
/// confidence maps, or `None` when too few neighbor maps are available.
pub fn filter_depth_map(
    reference: &ReferenceDepthData,
    neighbors: &[NeighborDepthData],
    opts: &DenseOptions,
    n_calibrated: usize,
) -> Result<Option<(DepthMap, ConfidenceMap)>> {
    let min_views = (opts.min_views_filter as usize).min(n_calibrated.saturating_sub(1)).max(1);
    let min_views_adjust = (opts.min_views_filter_adjust as usize)
        .min(n_calibrated.saturating_sub(1))
        .max(1);
    if neighbors.len() < min_views || neighbors.len() < min_views_adjust {
        debug!("depth map {} can not be filtered", reference.id);
        return Ok(None);
    }

    let width = reference.depth_map.width();
    let height = reference.depth_map.height();
    let projected: Vec<(DepthMap, ConfidenceMap)> = neighbors
        .iter()
        .map(|n| project_neighbor(reference, n, width, height, opts.filter_adjust))
        .collect();

    let (new_depth, new_conf, discarded, processed) = if opts.filter_adjust {
        adjust(reference, neighbors, &projected, opts, min_views, min_views_adjust)
    } else {
        strict(reference, &projected, opts, min_views)
    };
    debug!(
        "depth map {} filtered using {} other images: {discarded}/{processed} depths discarded",
        reference.id,
        neighbors.len()
    );
    Ok(Some((new_depth, new_conf)))
}

/// Render a neighbor depth map into the reference frame: every valid pixel is
/// unprojected to world and splat onto the four pixels around its fractional
/// projection, keeping the nearest depth per target pixel.
fn project_neighbor(
    reference: &ReferenceDepthData,
    neighbor: &NeighborDepthData,
    width: u32,
    height: u32,
    carry_conf: bool,
) -> (DepthMap, ConfidenceMap) {
    let mut depth_out = DepthMap::new(width, height, 0.0);
    let mut conf_out = ConfidenceMap::new(width, height, 0.0);
    for y in 0..neighbor.depth_map.height() {
        for x in 0..neighbor.depth_map.width() {
            let depth = neighbor.depth_map.get(x, y);
            if depth <= 0.0 {
                continue;
            }
            let world = neighbor
                .camera
                .image_to_world(Point2::new(x as f64, y as f64), depth as f64);
            let cam = reference.camera.world_to_camera(&world);
            if cam.z <= 0.0 {
                continue;
            }
            let px = reference.camera.camera_to_image(&cam);
            let z = cam.z as f32;
            for (tx, ty) in [
                (px.x.floor(), px.y.floor()),
                (px.x.floor(), px.y.ceil()),
                (px.x.ceil(), px.y.floor()),
                (px.x.ceil(), px.y.ceil()),
            ] {
                let (tx, ty) = (tx as i64, ty as i64);
                if !depth_out.is_inside(tx, ty) {
                    continue;
                }
                let (tx, ty) = (tx as u32, ty as u32);
                let existing = depth_out.get(tx, ty);
                if existing != 0.0 && existing < z {
                    continue;
                }
                depth_out.set(tx, ty, z);
                if carry_conf {
                    conf_out.set(tx, ty, neighbor.conf_map.get(x, y));
                }
            }
        }
    }
    (depth_out, conf_out)
}

/// Strict consensus: keep a pixel only when enough projected neighbors agree
/// with it, both at the pixel and over its 4-neighborhood.
fn strict(
    reference: &ReferenceDepthData,
    projected: &[(DepthMap, ConfidenceMap)],
    opts: &DenseOptions,
    min_views: usize,
) -> (DepthMap, ConfidenceMap, usize, usize) {
    let th_strict = opts.depth_diff_threshold * 0.8;
    let th_delta = opts.depth_diff_threshold * 1.2;
    let deltas = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)];
    let min_views_delta = min_views * (deltas.len() - 2);

    let width = reference.depth_map.width();
    let height = reference.depth_map.height();
    let mut new_depth = DepthMap::new(width, height, 0.0);
    let mut new_conf = ConfidenceMap::new(width, height, 0.0);
    let mut processed = 0usize;
    let mut discarded = 0usize;

    for y in 0..height {
        for x in 0..width {
            let depth = reference.depth_map.get(x, y);
            if depth <= 0.0 {
                continue;
            }
            processed += 1;

            // agreement at the pixel itself
            let mut good = 0usize;
            let mut valid = 0usize;
            for (map, _) in projected {
                let d = map.get(x, y);
                if d > 0.0 {
                    valid += 1;
                    if is_depth_similar(depth, d, th_strict) {
                        good += 1;
                    }
                }
            }
            if good < min_views || good * 100 < valid * 75 {
                discarded += 1;
                continue;
            }

            // agreement over the 4-neighborhood
            let mut good = 0usize;
            let mut valid = 0usize;
            for (dx, dy) in deltas {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if !reference.depth_map.is_inside(nx, ny) {
                    continue;
                }
                for (map, _) in projected {
                    let d = map.get(nx as u32, ny as u32);
                    if d > 0.0 {
                        valid += 1;
                        if is_depth_similar(depth, d, th_delta) {
                            good += 1;
                        }
                    }
                }
            }
            if good < min_views_delta || good * 100 < valid * 65 {
                discarded += 1;
                continue;
            }

            new_depth.set(x, y, depth);
            new_conf.set(x, y, reference.conf_map.get(x, y));
        }
    }
    (new_depth, new_conf, discarded, processed)
}

/// Confidence-weighted adjustment: average agreeing depths, penalize
/// occlusions and free-space violations, discard when the negative evidence
/// dominates.
fn adjust(
    reference: &ReferenceDepthData,
    neighbors: &[NeighborDepthData],
    projected: &[(DepthMap, ConfidenceMap)],
    opts: &DenseOptions,
    min_views: usize,
    min_views_adjust: usize,
) -> (DepthMap, ConfidenceMap, usize, usize) {
    let th_depth = opts.depth_diff_threshold * 1.2;
    let width = reference.depth_map.width();
    let height = reference.depth_map.height();
    let mut new_depth = DepthMap::new(width, height, 0.0);
    let mut new_conf = ConfidenceMap::new(width, height, 0.0);
    let mut processed = 0usize;
    let mut discarded = 0usize;

    for y in 0..height {
        for x in 0..width {
            let depth = reference.depth_map.get(x, y);
            if depth <= 0.0 {
                continue;
            }
            processed += 1;

            let mut pos_conf = reference.conf_map.get(x, y);
            let mut neg_conf = 0.0f32;
            let mut avg_depth = depth * pos_conf;
            let mut n_pos = 0usize;
            let mut n_valid = 0usize;
            for (n, (depth_proj, conf_proj)) in neighbors.iter().zip(projected) {
                let d = depth_proj.get(x, y);
                if d <= 0.0 {
                    continue;
                }
                n_valid += 1;
                let c = conf_proj.get(x, y);
                if is_depth_similar(depth, d, th_depth) {
                    avg_depth += d * c;
                    pos_conf += c;
                    n_pos += 1;
                } else if depth > d {
                    // occluded by the neighbor's nearer surface
                    neg_conf += c;
                } else {
                    // free-space violation: consult the neighbor's own
                    // confidence at the reprojection of this depth
                    let world = reference
                        .camera
                        .image_to_world(Point2::new(x as f64, y as f64), depth as f64);
                    let (px, z) = n.camera.world_to_image(&world);
                    let (bx, by) = (px.x.round() as i64, px.y.round() as i64);
                    if z > 0.0 && n.conf_map.is_inside(bx, by) {
                        let cb = n.conf_map.get(bx as u32, by as u32);
                        neg_conf += if cb > 0.0 { cb } else { c };
                    } else {
                        neg_conf += c;
                    }
                }
            }

            let adjusted = avg_depth / pos_conf;
            if n_valid >= min_views
                && n_pos >= min_views_adjust
                && pos_conf > neg_conf
                && adjusted >= reference.d_min
                && adjusted <= reference.d_max
            {
                new_depth.set(x, y, adjusted);
                new_conf.set(x, y, (pos_conf - neg_conf).min(1.0));
            } else {
                discarded += 1;
            }
        }
    }
    (new_depth, new_conf, discarded, processed)
}
