//! Depth-map fusion into a single world-space point cloud.

use crate::depth_data::DepthData;
use crate::Result;
use log::{debug, info};
use mvs_core::{
    estimate_normal_world, is_depth_similar, DenseOptions, Map2D, PointCloud, Scene,
};
use nalgebra::{Point2, Point3, Vector3};
use rayon::prelude::*;
use std::path::Path;

const NO_POINT: u32 = u32::MAX;

/// ZNCC-derived confidence to fusion weight: near, confident depths weigh
/// more.
#[inline]
fn conf_to_weight(conf: f32, depth: f32) -> f32 {
    1.0 / ((1.0 - conf).max(0.03) * depth * depth)
}

fn pixel_conf(data: &DepthData, x: u32, y: u32) -> f32 {
    if data.conf_map.is_empty() {
        0.9
    } else {
        data.conf_map.get(x, y)
    }
}

fn world_normal(data: &DepthData, x: u32, y: u32) -> Vector3<f32> {
    let n = data.normal_map.get(x, y);
    let w = data.camera.r.transpose() * nalgebra::Vector3::new(n.x as f64, n.y as f64, n.z as f64);
    Vector3::new(w.x as f32, w.y as f32, w.z as f32)
}

fn pixel_color(scene: &Scene, image: usize, x: u32, y: u32) -> Point3<f32> {
    let rgb = scene.images[image]
        .color
        .as_ref()
        .expect("color estimation requires loaded images")
        .get_pixel(x, y);
    Point3::new(
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    )
}

/// Union of all depth maps: every valid pixel becomes one point carrying its
/// single source view.
pub fn merge_depth_maps(
    scene: &Scene,
    depth_datas: &mut [DepthData],
    working_dir: &Path,
    opts: &DenseOptions,
) -> Result<PointCloud> {
    let estimate_color =
        opts.estimate_colors && scene.images.iter().all(|img| img.color.is_some());
    let estimate_normal = opts.estimate_normals > 0;

    let mut cloud = PointCloud::default();
    if estimate_color {
        cloud.colors = Some(Vec::new());
    }
    if estimate_normal {
        cloud.normals = Some(Vec::new());
    }
    let mut n_maps = 0usize;
    let mut n_depths = 0usize;

    for idx in 0..depth_datas.len() {
        if !depth_datas[idx].is_valid() {
            continue;
        }
        let path = mvs_io::compose_depth_file_path(working_dir, idx as u32, "dmap");
        depth_datas[idx].inc_ref(&path)?;
        let data = &depth_datas[idx];
        for y in 0..data.depth_map.height() {
            for x in 0..data.depth_map.width() {
                let depth = data.depth_map.get(x, y);
                if depth <= 0.0 {
                    continue;
                }
                let p = data
                    .camera
                    .image_to_world(Point2::new(x as f64, y as f64), depth as f64);
                let i = cloud.push(Point3::new(p.x as f32, p.y as f32, p.z as f32));
                cloud.insert_view(i, idx as u32, conf_to_weight(pixel_conf(data, x, y), depth));
                if let Some(colors) = &mut cloud.colors {
                    colors.push(pixel_color(scene, idx, x, y));
                }
                if let Some(normals) = &mut cloud.normals {
                    let n = if data.normal_map.is_empty() {
                        estimate_normal_world(&data.camera, &data.depth_map, x, y)
                    } else {
                        world_normal(data, x, y)
                    };
                    normals.push(n);
                }
                n_depths += 1;
            }
        }
        depth_datas[idx].dec_ref();
        n_maps += 1;
        debug!("depth map {idx} merged");
    }
    info!(
        "depth-maps merged: {n_maps} depth-maps, {n_depths} depths, {} points",
        cloud.len()
    );
    Ok(cloud)
}

/// Visibility-aware fusion: joins depths that are very likely the same 3D
/// point and invalidates depths that block the view of an accepted point.
pub fn fuse_depth_maps(
    scene: &Scene,
    depth_datas: &mut [DepthData],
    working_dir: &Path,
    opts: &DenseOptions,
) -> Result<PointCloud> {
    // process the best connected images first
    let mut connections: Vec<(usize, f32)> = Vec::new();
    for idx in 0..depth_datas.len() {
        if !depth_datas[idx].is_valid() {
            continue;
        }
        let path = mvs_io::compose_depth_file_path(working_dir, idx as u32, "dmap");
        depth_datas[idx].inc_ref(&path)?;
        connections.push((idx, depth_datas[idx].neighbors.len() as f32));
    }
    connections.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let has_normal_maps = connections
        .iter()
        .all(|&(idx, _)| !depth_datas[idx].normal_map.is_empty());
    let estimate_color =
        opts.estimate_colors && scene.images.iter().all(|img| img.color.is_some());
    let estimate_normal = opts.estimate_normals > 0;
    let min_views_fuse = (opts.min_views_fuse as usize).min(scene.images.len()).max(1);
    let normal_error = opts.normal_diff_threshold.to_radians().cos();

    let mut cloud = PointCloud::default();
    if estimate_color {
        cloud.colors = Some(Vec::new());
    }
    if estimate_normal && has_normal_maps {
        cloud.normals = Some(Vec::new());
    }
    // pixel→point claims, lazily allocated per image
    let mut claims: Vec<Option<Map2D<u32>>> = vec![None; depth_datas.len()];
    // pixel of each observation, aligned with each point's view list
    let mut projs: Vec<Vec<(u16, u16)>> = Vec::new();
    let mut n_depths = 0usize;

    for &(a, _) in &connections {
        let neighbors = depth_datas[a].neighbors.clone();
        for ns in &neighbors {
            let b = ns.id as usize;
            if claims[b].is_none() && !depth_datas[b].is_empty() {
                claims[b] = Some(Map2D::new(
                    depth_datas[b].depth_map.width(),
                    depth_datas[b].depth_map.height(),
                    NO_POINT,
                ));
            }
        }
        if claims[a].is_none() {
            claims[a] = Some(Map2D::new(
                depth_datas[a].depth_map.width(),
                depth_datas[a].depth_map.height(),
                NO_POINT,
            ));
        }

        let camera_a = depth_datas[a].camera;
        let (width, height) = (
            depth_datas[a].depth_map.width(),
            depth_datas[a].depth_map.height(),
        );
        let prev_points = cloud.len();
        for y in 0..height {
            for x in 0..width {
                let depth = depth_datas[a].depth_map.get(x, y);
                if depth <= 0.0 {
                    continue;
                }
                n_depths += 1;
                if claims[a].as_ref().unwrap().get(x, y) != NO_POINT {
                    continue;
                }
                let idx_point = cloud.len() as u32;
                let point =
                    camera_a.image_to_world(Point2::new(x as f64, y as f64), depth as f64);
                let weight = conf_to_weight(pixel_conf(&depth_datas[a], x, y), depth);
                let normal = if has_normal_maps {
                    world_normal(&depth_datas[a], x, y)
                } else {
                    Vector3::new(0.0, 0.0, -1.0)
                };

                let mut views: Vec<u32> = vec![a as u32];
                let mut weights: Vec<f32> = vec![weight];
                let mut point_projs: Vec<(u16, u16)> = vec![(x as u16, y as u16)];
                let mut position = point.coords * weight as f64;
                let mut color = estimate_color
                    .then(|| pixel_color(scene, a, x, y).coords * weight)
                    .unwrap_or_default();
                let mut normal_sum = normal * weight;
                let mut confidence = weight;
                let mut invalidated: Vec<(usize, u32, u32)> = Vec::new();

                claims[a].as_mut().unwrap().set(x, y, idx_point);

                for ns in &neighbors {
                    let b = ns.id as usize;
                    if depth_datas[b].is_empty() {
                        continue;
                    }
                    let (pb, zb) = depth_datas[b].camera.world_to_image(&point);
                    if zb <= 0.0 {
                        continue;
                    }
                    let (bx, by) = (pb.x.round() as i64, pb.y.round() as i64);
                    if !depth_datas[b].depth_map.is_inside(bx, by) {
                        continue;
                    }
                    let (bx, by) = (bx as u32, by as u32);
                    let depth_b = depth_datas[b].depth_map.get(bx, by);
                    if depth_b <= 0.0 {
                        continue;
                    }
                    if claims[b].as_ref().unwrap().get(bx, by) != NO_POINT {
                        continue;
                    }
                    let mut joined = false;
                    if is_depth_similar(zb as f32, depth_b, opts.depth_diff_threshold) {
                        let normal_b = if has_normal_maps {
                            world_normal(&depth_datas[b], bx, by)
                        } else {
                            Vector3::new(0.0, 0.0, -1.0)
                        };
                        if normal.dot(&normal_b) > normal_error {
                            // B observes the same surface point
                            let weight_b =
                                conf_to_weight(pixel_conf(&depth_datas[b], bx, by), depth_b);
                            let pos = views
                                .binary_search(&(b as u32))
                                .expect_err("duplicate view in fusion");
                            views.insert(pos, b as u32);
                            weights.insert(pos, weight_b);
                            point_projs.insert(pos, (bx as u16, by as u16));
                            claims[b].as_mut().unwrap().set(bx, by, idx_point);
                            let pb_world = depth_datas[b]
                                .camera
                                .image_to_world(Point2::new(bx as f64, by as f64), depth_b as f64);
                            position += pb_world.coords * weight_b as f64;
                            if estimate_color {
                                color += pixel_color(scene, b, bx, by).coords * weight_b;
                            }
                            normal_sum += normal_b * weight_b;
                            confidence += weight_b;
                            joined = true;
                        }
                    }
                    if !joined && (zb as f32) < depth_b {
                        // the accepted point would see through B's surface
                        invalidated.push((b, bx, by));
                    }
                }

                if views.len() < min_views_fuse {
                    for (v, &(px, py)) in views.iter().zip(&point_projs) {
                        claims[*v as usize].as_mut().unwrap().set(px as u32, py as u32, NO_POINT);
                    }
                    continue;
                }

                let nrm = 1.0 / confidence as f64;
                let fused = position * nrm;
                let i = cloud.push(Point3::new(fused.x as f32, fused.y as f32, fused.z as f32));
                debug_assert_eq!(i as u32, idx_point);
                cloud.point_views[i] = views;
                cloud.point_weights[i] = weights;
                projs.push(point_projs);
                if let Some(colors) = &mut cloud.colors {
                    colors.push(Point3::from(color * nrm as f32));
                }
                if let Some(normals) = &mut cloud.normals {
                    let n = normal_sum * nrm as f32;
                    normals.push(if n.norm() > 1e-6 { n.normalize() } else { n });
                }
                for (b, bx, by) in invalidated {
                    depth_datas[b].depth_map.set(bx, by, 0.0);
                }
            }
        }
        debug!(
            "depth map {a} fused: {} new points",
            cloud.len() - prev_points
        );
    }

    info!(
        "depth-maps fused: {} depth-maps, {n_depths} depths, {} points",
        connections.len(),
        cloud.len()
    );

    // normals were requested but no backend produced them per pixel: take
    // each point's normal from its highest-weight observer
    if estimate_normal && !has_normal_maps && !cloud.is_empty() {
        let datas: &[DepthData] = depth_datas;
        let normals: Vec<Vector3<f32>> = (0..cloud.len())
            .into_par_iter()
            .map(|i| {
                let weights = &cloud.point_weights[i];
                let best = weights
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(j, _)| j)
                    .unwrap_or(0);
                let view = cloud.point_views[i][best] as usize;
                let (px, py) = projs[i][best];
                estimate_normal_world(
                    &datas[view].camera,
                    &datas[view].depth_map,
                    px as u32,
                    py as u32,
                )
            })
            .collect();
        cloud.normals = Some(normals);
    }

    for &(idx, _) in &connections {
        depth_datas[idx].dec_ref();
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth_data::ViewData;
    use mvs_core::{Camera, ConfidenceMap, DepthMap, NormalMap, SceneImage, ViewScore};
    use nalgebra::Matrix3;

    fn fronto_camera(cx: f64) -> Camera {
        Camera::new(
            Matrix3::new(40.0, 0.0, 16.0, 0.0, 40.0, 16.0, 0.0, 0.0, 1.0),
            Matrix3::identity(),
            Point3::new(cx, 0.0, 0.0),
        )
    }

    fn make_data(id: u32, camera: Camera, depth: f32, neighbor: u32) -> DepthData {
        let mut data = DepthData {
            camera,
            depth_map: DepthMap::new(32, 32, depth),
            normal_map: NormalMap::new(32, 32, Vector3::new(0.0, 0.0, -1.0)),
            conf_map: ConfidenceMap::new(32, 32, 0.8),
            d_min: depth * 0.5,
            d_max: depth * 2.0,
            ..DepthData::default()
        };
        data.views.push(ViewData {
            image_id: id,
            name: format!("{id}.jpg"),
            scale: 1.0,
            camera,
            image: image::GrayImage::new(32, 32),
            depth_map: None,
        });
        data.neighbors.push(ViewScore {
            id: neighbor,
            scale: 1.0,
            score: 10.0,
            angle: 5.0,
            area: 0.5,
        });
        data
    }

    fn test_scene() -> Scene {
        let images = vec![
            SceneImage::new(0, "0.jpg", 32, 32, fronto_camera(0.0)),
            SceneImage::new(1, "1.jpg", 32, 32, fronto_camera(0.05)),
        ];
        Scene::new(images, PointCloud::default())
    }

    fn save_all(datas: &mut [DepthData], dir: &Path) {
        for (i, data) in datas.iter_mut().enumerate() {
            data.save(&mvs_io::compose_depth_file_path(dir, i as u32, "dmap"))
                .unwrap();
            data.release();
        }
    }

    fn opts_no_color() -> DenseOptions {
        DenseOptions {
            estimate_colors: false,
            min_views_fuse: 2,
            ..DenseOptions::default()
        }
    }

    #[test]
    fn test_empty_depth_maps_give_empty_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let mut datas = vec![
            make_data(0, fronto_camera(0.0), 0.0, 1),
            make_data(1, fronto_camera(0.05), 0.0, 0),
        ];
        save_all(&mut datas, dir.path());

        let merged = merge_depth_maps(&scene, &mut datas, dir.path(), &opts_no_color()).unwrap();
        assert!(merged.is_empty());

        let fused = fuse_depth_maps(&scene, &mut datas, dir.path(), &opts_no_color()).unwrap();
        assert!(fused.is_empty());
    }

    #[test]
    fn test_merge_appends_every_valid_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let mut datas = vec![
            make_data(0, fronto_camera(0.0), 2.0, 1),
            make_data(1, fronto_camera(0.05), 2.0, 0),
        ];
        save_all(&mut datas, dir.path());

        let cloud = merge_depth_maps(&scene, &mut datas, dir.path(), &opts_no_color()).unwrap();
        assert_eq!(cloud.len(), 2 * 32 * 32);
        cloud.check_invariants().unwrap();
        assert_eq!(cloud.point_views[0], vec![0]);
        // depth maps are released once merged
        assert!(datas[0].is_empty() && datas[1].is_empty());
    }

    #[test]
    fn test_fuse_joins_corresponding_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let mut datas = vec![
            make_data(0, fronto_camera(0.0), 2.0, 1),
            make_data(1, fronto_camera(0.05), 2.0, 0),
        ];
        save_all(&mut datas, dir.path());

        let cloud = fuse_depth_maps(&scene, &mut datas, dir.path(), &opts_no_color()).unwrap();
        assert!(!cloud.is_empty());
        cloud.check_invariants().unwrap();
        // the disparity between the two views is exactly one pixel, so most
        // pixels pair up into two-view points at depth 2
        let mut two_view = 0;
        for (i, views) in cloud.point_views.iter().enumerate() {
            assert!(views.len() >= 2);
            two_view += 1;
            let p = cloud.points[i];
            assert!((p.z - 2.0).abs() < 1e-3, "fused depth {}", p.z);
        }
        assert!(two_view as f32 > 0.7 * 1024.0, "{two_view} fused points");
        let normals = cloud.normals.as_ref().unwrap();
        assert!(normals.iter().all(|n| (n.z + 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_fuse_discards_single_view_points() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        // the neighbor map is far away: nothing joins, nMinViewsFuse = 2
        let mut datas = vec![
            make_data(0, fronto_camera(0.0), 2.0, 1),
            make_data(1, fronto_camera(0.05), 3.0, 0),
        ];
        save_all(&mut datas, dir.path());

        let cloud = fuse_depth_maps(&scene, &mut datas, dir.path(), &opts_no_color()).unwrap();
        assert!(cloud.is_empty());
    }
}
