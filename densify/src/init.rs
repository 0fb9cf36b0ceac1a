//! View selection and depth-map initialization from the sparse cloud.

use crate::depth_data::{DepthData, ViewData};
use crate::{Error, Result};
use image::GrayImage;
use log::debug;
use mvs_core::{
    filter_neighbor_views, DenseOptions, DepthMap, NormalMap, Scene,
};
use nalgebra::{Point3, Vector3};
use std::path::Path;

const MIN_SCALE: f32 = 0.2;
const MAX_SCALE: f32 = 3.2;

/// Rank and filter the neighbor views of `reference`, collecting its sparse
/// seeds. Fails when no viable neighbor remains.
pub fn select_views(
    scene: &Scene,
    opts: &DenseOptions,
    reference: u32,
    data: &mut DepthData,
) -> Result<()> {
    let min_point_views = opts.min_views_trust_point.max(2) as usize;
    let (mut neighbors, seeds) =
        scene.select_neighbor_views(reference, min_point_views, opts.optim_angle.to_radians());
    if !filter_neighbor_views(
        &mut neighbors,
        opts.min_area,
        MIN_SCALE,
        MAX_SCALE,
        opts.min_angle,
        opts.max_angle,
        opts.max_views as usize,
    ) {
        return Err(Error::ViewSelectionInsufficient(reference));
    }
    let required = (opts.min_views as usize)
        .min(scene.images.len().saturating_sub(1))
        .max(1);
    if neighbors.len() < required {
        return Err(Error::ViewSelectionInsufficient(reference));
    }
    data.neighbors = neighbors;
    data.seeds = seeds;
    Ok(())
}

/// Build the view list: slot 0 is the reference, the rest are the chosen
/// neighbor or the top-scoring neighbors above the score floor.
///
/// `load_depth_maps`: 1 loads every slot's on-disk depth map (cross-view
/// consultation), 0 seeds the reference maps from the sparse cloud, -1 leaves
/// the maps untouched.
pub fn init_views(
    scene: &Scene,
    opts: &DenseOptions,
    reference: u32,
    data: &mut DepthData,
    idx_neighbor: Option<usize>,
    num_neighbors: u32,
    load_images: bool,
    load_depth_maps: i32,
    working_dir: &Path,
) -> Result<()> {
    debug_assert!(data.is_valid());
    data.views.clear();

    let ref_img = &scene.images[reference as usize];
    let mut ref_view = ViewData {
        image_id: reference,
        name: ref_img.name.clone(),
        scale: 1.0,
        camera: ref_img.camera,
        image: GrayImage::new(0, 0),
        depth_map: None,
    };
    if load_images {
        let (gray, camera) = ref_img.gray_at_scale(1.0)?;
        ref_view.image = gray;
        ref_view.camera = camera;
    }
    data.camera = ref_view.camera;
    data.views.push(ref_view);

    let selected: Vec<_> = match idx_neighbor {
        Some(i) => vec![data.neighbors[i]],
        None => {
            let best = data.neighbors[0].score;
            let min_score = (best * opts.view_min_score_ratio).max(opts.view_min_score);
            data.neighbors
                .iter()
                .take_while(|n| n.score >= min_score)
                .take(if num_neighbors == 0 {
                    usize::MAX
                } else {
                    num_neighbors as usize
                })
                .copied()
                .collect()
        }
    };

    for neighbor in selected {
        let img = &scene.images[neighbor.id as usize];
        let img_scale = (1.0 / neighbor.scale as f64).min(1.0);
        let mut view = ViewData {
            image_id: neighbor.id,
            name: img.name.clone(),
            scale: img_scale,
            camera: img.camera,
            image: GrayImage::new(0, 0),
            depth_map: None,
        };
        if load_images {
            let (gray, camera) = img.gray_at_scale(img_scale)?;
            view.image = gray;
            view.camera = camera;
        } else if (img_scale - 1.0).abs() > f64::EPSILON {
            view.camera = img.camera.scaled(img_scale);
        }
        if load_depth_maps > 0 {
            let path = mvs_io::compose_depth_file_path(working_dir, neighbor.id, "dmap");
            let raw = mvs_io::load_depth_data(&path)
                .map_err(|e| Error::DepthMapIo(format!("{}: {e}", path.display())))?;
            view.depth_map = Some(raw.depth_map);
        }
        data.views.push(view);
    }

    if data.views.len() < 2 {
        data.views.clear();
        return Err(Error::ViewSelectionInsufficient(reference));
    }
    debug!(
        "reference image {reference} paired with {} views",
        data.views.len() - 1
    );

    match load_depth_maps.cmp(&0) {
        std::cmp::Ordering::Greater => {
            let path = mvs_io::compose_depth_file_path(working_dir, reference, "dmap");
            data.load(&path)?;
        }
        std::cmp::Ordering::Equal => {
            if opts.min_views_trust_point < 2 {
                splat_init(scene, data)?;
            } else {
                init_depth_map(scene, data)?;
            }
        }
        std::cmp::Ordering::Less => {}
    }
    Ok(())
}

/// Write each seed depth over a small window around its projection and
/// bracket the depth range by the seed envelope.
fn splat_init(scene: &Scene, data: &mut DepthData) -> Result<()> {
    const HALF_WINDOW: i64 = 2;
    let reference = data.views[0].image_id;
    let img = &scene.images[reference as usize];
    let (w, h) = (img.width, img.height);
    let camera = data.camera;
    let mut depth_map = DepthMap::new(w, h, 0.0);
    let normal_map = NormalMap::new(w, h, Vector3::zeros());
    let mut d_min = f32::MAX;
    let mut d_max = 0.0f32;

    for &seed in &data.seeds {
        let p32 = scene.pointcloud.points[seed as usize];
        let world = Point3::new(p32.x as f64, p32.y as f64, p32.z as f64);
        let cam_pt = camera.world_to_camera(&world);
        if cam_pt.z <= 0.0 {
            continue;
        }
        let px = camera.camera_to_image(&cam_pt);
        let (cx, cy) = (px.x.round() as i64, px.y.round() as i64);
        let d = cam_pt.z as f32;
        for y in (cy - HALF_WINDOW).max(0)..=(cy + HALF_WINDOW).min(h as i64 - 1) {
            for x in (cx - HALF_WINDOW).max(0)..=(cx + HALF_WINDOW).min(w as i64 - 1) {
                depth_map.set(x as u32, y as u32, d);
            }
        }
        d_min = d_min.min(d);
        d_max = d_max.max(d);
    }

    if d_max <= 0.0 {
        return Err(Error::Invariant(format!(
            "no sparse seeds project into reference image {reference}"
        )));
    }
    data.depth_map = depth_map;
    data.normal_map = normal_map;
    data.d_min = d_min * 0.9;
    data.d_max = d_max * 1.1;
    Ok(())
}

/// Triangulate the seed projections in image space and interpolate depth
/// within each triangle; the per-triangle plane yields the surface normal.
fn init_depth_map(scene: &Scene, data: &mut DepthData) -> Result<()> {
    let reference = data.views[0].image_id;
    let img = &scene.images[reference as usize];
    let (w, h) = (img.width, img.height);
    let camera = data.camera;

    let mut pixels = Vec::with_capacity(data.seeds.len());
    let mut cam_points = Vec::with_capacity(data.seeds.len());
    let mut d_min = f32::MAX;
    let mut d_max = 0.0f32;
    for &seed in &data.seeds {
        let p32 = scene.pointcloud.points[seed as usize];
        let world = Point3::new(p32.x as f64, p32.y as f64, p32.z as f64);
        let cam_pt = camera.world_to_camera(&world);
        if cam_pt.z <= 0.0 {
            continue;
        }
        let px = camera.camera_to_image(&cam_pt);
        pixels.push((px.x, px.y));
        cam_points.push(cam_pt);
        d_min = d_min.min(cam_pt.z as f32);
        d_max = d_max.max(cam_pt.z as f32);
    }
    if pixels.len() < 3 {
        return splat_init(scene, data);
    }

    let mut depth_map = DepthMap::new(w, h, 0.0);
    let mut normal_map = NormalMap::new(w, h, Vector3::zeros());
    for tri in delaunay_triangulate(&pixels) {
        rasterize_triangle(
            &mut depth_map,
            &mut normal_map,
            [pixels[tri[0]], pixels[tri[1]], pixels[tri[2]]],
            [cam_points[tri[0]], cam_points[tri[1]], cam_points[tri[2]]],
        );
    }
    data.depth_map = depth_map;
    data.normal_map = normal_map;
    data.d_min = d_min * 0.9;
    data.d_max = d_max * 1.1;
    Ok(())
}

/// Linear depth interpolation over one triangle; the camera-space plane of
/// its corners supplies the normal, oriented toward the camera.
fn rasterize_triangle(
    depth_map: &mut DepthMap,
    normal_map: &mut NormalMap,
    px: [(f64, f64); 3],
    cam: [Point3<f64>; 3],
) {
    let area = edge(px[0], px[1], px[2]);
    if area.abs() < 1e-9 {
        return;
    }
    let mut normal = (cam[1] - cam[0]).cross(&(cam[2] - cam[0]));
    if normal.norm() < 1e-12 {
        return;
    }
    normal.normalize_mut();
    if normal.dot(&cam[0].coords) > 0.0 {
        normal = -normal;
    }
    let normal32 = Vector3::new(normal.x as f32, normal.y as f32, normal.z as f32);

    let min_x = px.iter().map(|p| p.0).fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let min_y = px.iter().map(|p| p.1).fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let max_x = (px.iter().map(|p| p.0).fold(f64::MIN, f64::max).ceil() as i64)
        .min(depth_map.width() as i64 - 1);
    let max_y = (px.iter().map(|p| p.1).fold(f64::MIN, f64::max).ceil() as i64)
        .min(depth_map.height() as i64 - 1);
    if max_x < 0 || max_y < 0 {
        return;
    }

    for y in min_y..=max_y as u32 {
        for x in min_x..=max_x as u32 {
            let p = (x as f64, y as f64);
            let w0 = edge(px[1], px[2], p) / area;
            let w1 = edge(px[2], px[0], p) / area;
            let w2 = edge(px[0], px[1], p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let d = (w0 * cam[0].z + w1 * cam[1].z + w2 * cam[2].z) as f32;
            if d > 0.0 {
                depth_map.set(x, y, d);
                normal_map.set(x, y, normal32);
            }
        }
    }
}

#[inline]
fn edge(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Bowyer–Watson Delaunay triangulation of 2D points. Returns index triples.
pub(crate) fn delaunay_triangulate(points: &[(f64, f64)]) -> Vec<[usize; 3]> {
    if points.len() < 3 {
        return Vec::new();
    }
    let min_x = points.iter().map(|p| p.0).fold(f64::MAX, f64::min);
    let max_x = points.iter().map(|p| p.0).fold(f64::MIN, f64::max);
    let min_y = points.iter().map(|p| p.1).fold(f64::MAX, f64::min);
    let max_y = points.iter().map(|p| p.1).fold(f64::MIN, f64::max);
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let mid = ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5);

    let mut verts: Vec<(f64, f64)> = points.to_vec();
    let s0 = verts.len();
    verts.push((mid.0 - 20.0 * span, mid.1 - span));
    verts.push((mid.0, mid.1 + 20.0 * span));
    verts.push((mid.0 + 20.0 * span, mid.1 - span));

    let mut triangles: Vec<[usize; 3]> = vec![[s0, s0 + 1, s0 + 2]];
    for i in 0..points.len() {
        let p = verts[i];
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut kept = Vec::with_capacity(triangles.len());
        for tri in triangles.drain(..) {
            if circumcircle_contains(verts[tri[0]], verts[tri[1]], verts[tri[2]], p) {
                for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                    // shared edges cancel; what remains bounds the cavity
                    if let Some(pos) = edges.iter().position(|&(x, y)| x == b && y == a) {
                        edges.swap_remove(pos);
                    } else {
                        edges.push((a, b));
                    }
                }
            } else {
                kept.push(tri);
            }
        }
        triangles = kept;
        for (a, b) in edges {
            triangles.push([a, b, i]);
        }
    }
    triangles.retain(|tri| tri.iter().all(|&v| v < s0));
    triangles
}

fn circumcircle_contains(a: (f64, f64), b: (f64, f64), c: (f64, f64), p: (f64, f64)) -> bool {
    let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
    if d.abs() < 1e-12 {
        return false;
    }
    let a2 = a.0 * a.0 + a.1 * a.1;
    let b2 = b.0 * b.0 + b.1 * b.1;
    let c2 = c.0 * c.0 + c.1 * c.1;
    let ux = (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d;
    let uy = (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d;
    let r2 = (a.0 - ux).powi(2) + (a.1 - uy).powi(2);
    (p.0 - ux).powi(2) + (p.1 - uy).powi(2) < r2
}
