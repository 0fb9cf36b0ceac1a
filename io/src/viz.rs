//! Debug visualizations: maps rendered to PNG and per-image PLY snapshots.

use crate::ply::write_ply;
use crate::Result;
use image::{GrayImage, Luma, Rgb, RgbImage};
use mvs_core::{Camera, ConfidenceMap, DepthMap, NormalMap, PointCloud};
use nalgebra::{Point2, Point3};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Render a depth map to grayscale, normalizing over the valid range.
/// Invalid pixels are black.
pub fn depth_map_to_image(map: &DepthMap) -> GrayImage {
    let mut min_val = f32::INFINITY;
    let mut max_val = f32::NEG_INFINITY;
    for &d in map.data() {
        if d > 0.0 {
            min_val = min_val.min(d);
            max_val = max_val.max(d);
        }
    }
    let range = (max_val - min_val).max(f32::EPSILON);

    let mut img = GrayImage::new(map.width(), map.height());
    for y in 0..map.height() {
        for x in 0..map.width() {
            let d = map.get(x, y);
            let v = if d > 0.0 {
                // near = bright
                (255.0 - (d - min_val) / range * 223.0) as u8
            } else {
                0
            };
            img.put_pixel(x, y, Luma([v]));
        }
    }
    img
}

/// Render a confidence map to grayscale (1 = white).
pub fn confidence_map_to_image(map: &ConfidenceMap) -> GrayImage {
    let mut img = GrayImage::new(map.width(), map.height());
    for y in 0..map.height() {
        for x in 0..map.width() {
            let c = map.get(x, y).clamp(0.0, 1.0);
            img.put_pixel(x, y, Luma([(c * 255.0) as u8]));
        }
    }
    img
}

/// Render a normal map to RGB, mapping each component from [-1,1] to [0,255].
pub fn normal_map_to_image(map: &NormalMap) -> RgbImage {
    let mut img = RgbImage::new(map.width(), map.height());
    for y in 0..map.height() {
        for x in 0..map.width() {
            let n = map.get(x, y);
            let to_byte = |v: f32| (((v + 1.0) * 0.5).clamp(0.0, 1.0) * 255.0) as u8;
            img.put_pixel(x, y, Rgb([to_byte(n.x), to_byte(n.y), to_byte(n.z)]));
        }
    }
    img
}

/// Write a PLY snapshot of one depth map: valid pixels deprojected to world,
/// with normals rotated to world when available.
pub fn export_depth_snapshot(
    path: &Path,
    camera: &Camera,
    depth_map: &DepthMap,
    normal_map: Option<&NormalMap>,
) -> Result<()> {
    let mut cloud = PointCloud::default();
    let mut normals = normal_map.map(|_| Vec::new());
    for y in 0..depth_map.height() {
        for x in 0..depth_map.width() {
            let d = depth_map.get(x, y);
            if d <= 0.0 {
                continue;
            }
            let p = camera.image_to_world(Point2::new(x as f64, y as f64), d as f64);
            cloud.push(Point3::new(p.x as f32, p.y as f32, p.z as f32));
            if let (Some(out), Some(map)) = (normals.as_mut(), normal_map) {
                let n = map.get(x, y);
                let w = camera.r.transpose()
                    * nalgebra::Vector3::new(n.x as f64, n.y as f64, n.z as f64);
                out.push(nalgebra::Vector3::new(w.x as f32, w.y as f32, w.z as f32));
            }
        }
    }
    cloud.normals = normals;
    let mut w = BufWriter::new(File::create(path)?);
    write_ply(&mut w, &cloud)
}
