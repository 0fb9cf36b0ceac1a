//! End-to-end scenarios: synthetic plane reconstruction, occlusion handling
//! and pipeline restart behavior.

use image::{GrayImage, Rgb, RgbImage};
use mvs_core::{Camera, ConfidenceMap, DenseOptions, DepthMap, NormalMap, PointCloud, Scene, SceneImage, ViewScore};
use mvs_densify::{
    filter_depth_map, fuse_depth_maps, DenseReconstruction, DepthData, NeighborDepthData,
    ReferenceDepthData, ViewData,
};
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const SIZE: u32 = 64;
const PLANE_DEPTH: f64 = 2.0;

fn fronto_camera(cx: f64, focal: f64) -> Camera {
    Camera::new(
        Matrix3::new(focal, 0.0, 31.5, 0.0, focal, 31.5, 0.0, 0.0, 1.0),
        Matrix3::identity(),
        Point3::new(cx, 0.0, 0.0),
    )
}

fn plane_texture(wx: f64, wy: f64) -> f64 {
    0.5 + 0.18 * (wx * 11.0).sin()
        + 0.18 * (wy * 13.0).cos()
        + 0.1 * (wx * 29.0 + wy * 23.0).sin()
}

/// Render the textured plane z = 2 with uniform noise of sigma ~ 0.01.
fn render_plane_image(camera: &Camera, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::new(SIZE, SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let p = camera.image_to_world(Point2::new(x as f64, y as f64), PLANE_DEPTH);
            let noise: f64 = rng.gen_range(-0.0173..0.0173);
            let v = ((plane_texture(p.x, p.y) + noise).clamp(0.0, 1.0) * 255.0) as u8;
            img.put_pixel(x, y, Rgb([v, v, v]));
        }
    }
    img
}

/// Two calibrated views of the plane plus a sparse seed grid.
fn plane_scene() -> Scene {
    let cameras = [fronto_camera(0.0, 64.0), fronto_camera(0.12, 64.0)];
    let images: Vec<SceneImage> = cameras
        .iter()
        .enumerate()
        .map(|(i, cam)| {
            SceneImage::new(i as u32, format!("{i}.jpg"), SIZE, SIZE, *cam)
                .with_color(render_plane_image(cam, i as u64 + 11))
        })
        .collect();

    let mut cloud = PointCloud::default();
    for gy in 0..6 {
        for gx in 0..6 {
            let p = cameras[0].image_to_world(
                Point2::new(8.0 + 9.0 * gx as f64, 8.0 + 9.0 * gy as f64),
                PLANE_DEPTH,
            );
            let idx = cloud.push(Point3::new(p.x as f32, p.y as f32, p.z as f32));
            cloud.insert_view(idx, 0, 1.0);
            cloud.insert_view(idx, 1, 1.0);
        }
    }
    Scene::new(images, cloud)
}

fn estimate_only_options() -> DenseOptions {
    DenseOptions {
        min_views_filter: 0, // estimate phase only
        min_views_fuse: 2,
        estimate_colors: true,
        max_threads: 2,
        ..DenseOptions::default()
    }
}

#[test]
fn test_two_view_plane_reconstruction() {
    let dir = tempfile::tempdir().unwrap();
    let scene = plane_scene();
    let mut pipeline =
        DenseReconstruction::new(scene, estimate_only_options(), dir.path()).unwrap();
    pipeline.compute_depth_maps().unwrap();

    // post-PatchMatch accuracy of the reference depth map
    let raw = mvs_io::load_depth_data(&mvs_io::compose_depth_file_path(dir.path(), 0, "dmap"))
        .unwrap();
    let conf = raw.conf_map.as_ref().unwrap();
    let mut errors = Vec::new();
    let mut confidences = Vec::new();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let d = raw.depth_map.get(x, y);
            if d > 0.0 {
                errors.push(((d as f64 - PLANE_DEPTH) / PLANE_DEPTH).abs());
                confidences.push(conf.get(x, y));
            }
        }
    }
    assert!(errors.len() > 2500, "only {} valid depths", errors.len());
    let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
    assert!(mean_error < 0.02, "mean depth error {mean_error}");
    confidences.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = confidences[confidences.len() / 2];
    assert!(median > 0.5, "median confidence {median}");

    // fusion joins the two views into one cloud
    let cloud = pipeline.fuse_depth_maps().unwrap();
    cloud.check_invariants().unwrap();
    assert!(
        cloud.len() as f64 >= 0.7 * 4096.0,
        "{} fused points",
        cloud.len()
    );
    let normals = cloud.normals.as_ref().unwrap();
    let limit = 10f32.to_radians().cos();
    for n in normals {
        assert!(
            n.dot(&Vector3::new(0.0, 0.0, -1.0)) >= limit,
            "normal {n:?} deviates more than 10 degrees"
        );
    }
    for views in &cloud.point_views {
        assert!(views.len() >= 2);
    }
}

fn constant_depth_data(
    id: u32,
    camera: Camera,
    depth: fn(u32, u32) -> f32,
    neighbors: &[u32],
) -> DepthData {
    let mut depth_map = DepthMap::new(16, 16, 0.0);
    for y in 0..16 {
        for x in 0..16 {
            depth_map.set(x, y, depth(x, y));
        }
    }
    let mut data = DepthData::default();
    data.camera = camera;
    data.depth_map = depth_map;
    data.normal_map = NormalMap::new(16, 16, Vector3::new(0.0, 0.0, -1.0));
    data.conf_map = ConfidenceMap::new(16, 16, 0.8);
    data.d_min = 0.5;
    data.d_max = 4.0;
    data.views.push(ViewData {
        image_id: id,
        name: format!("{id}.jpg"),
        scale: 1.0,
        camera,
        image: GrayImage::new(16, 16),
        depth_map: None,
    });
    for &n in neighbors {
        data.neighbors.push(ViewScore {
            id: n,
            scale: 1.0,
            score: 10.0,
            angle: 5.0,
            area: 0.5,
        });
    }
    data
}

fn small_camera(cx: f64) -> Camera {
    Camera::new(
        Matrix3::new(32.0, 0.0, 7.5, 0.0, 32.0, 7.5, 0.0, 0.0, 1.0),
        Matrix3::identity(),
        Point3::new(cx, 0.0, 0.0),
    )
}

/// Three views: two agree on a near surface, the third claims to see a far
/// plane straight through it. The free-space violation rule must invalidate
/// the see-through depths before they become points.
#[test]
fn test_free_space_violation_invalidates_occluded_depths() {
    let dir = tempfile::tempdir().unwrap();
    let images = vec![
        SceneImage::new(0, "0.jpg", 16, 16, small_camera(0.0)),
        SceneImage::new(1, "1.jpg", 16, 16, small_camera(0.01)),
        SceneImage::new(2, "2.jpg", 16, 16, small_camera(0.005)),
    ];
    let scene = Scene::new(images, PointCloud::default());
    let mut datas = vec![
        constant_depth_data(0, small_camera(0.0), |_, _| 1.0, &[1, 2]),
        constant_depth_data(1, small_camera(0.01), |_, _| 1.0, &[0, 2]),
        constant_depth_data(2, small_camera(0.005), |_, _| 2.0, &[0, 1]),
    ];
    for (i, data) in datas.iter_mut().enumerate() {
        data.save(&mvs_io::compose_depth_file_path(dir.path(), i as u32, "dmap"))
            .unwrap();
        data.release();
    }
    let opts = DenseOptions {
        estimate_colors: false,
        min_views_fuse: 1, // even lone observations survive, unless invalidated
        ..DenseOptions::default()
    };
    let cloud = fuse_depth_maps(&scene, &mut datas, dir.path(), &opts).unwrap();
    cloud.check_invariants().unwrap();
    assert!(!cloud.is_empty());
    for p in &cloud.points {
        assert!(
            p.z < 1.5,
            "see-through depth at {p:?} survived the free-space rule"
        );
    }
}

/// Adjust-mode filtering of the same see-through map: the negative evidence
/// dominates and every pixel is discarded.
#[test]
fn test_adjust_filter_discards_see_through_map() {
    let phantom_depth = DepthMap::new(16, 16, 2.0);
    let phantom_conf = ConfidenceMap::new(16, 16, 0.8);
    let near_depth = DepthMap::new(16, 16, 1.0);
    let near_conf = ConfidenceMap::new(16, 16, 0.8);

    let reference = ReferenceDepthData {
        id: 2,
        camera: small_camera(0.005),
        depth_map: &phantom_depth,
        conf_map: &phantom_conf,
        d_min: 0.5,
        d_max: 4.0,
    };
    let neighbors = vec![
        NeighborDepthData {
            id: 0,
            camera: small_camera(0.0),
            depth_map: &near_depth,
            conf_map: &near_conf,
        },
        NeighborDepthData {
            id: 1,
            camera: small_camera(0.01),
            depth_map: &near_depth,
            conf_map: &near_conf,
        },
    ];
    let opts = DenseOptions {
        filter_adjust: true,
        min_views_filter: 1,
        min_views_filter_adjust: 1,
        ..DenseOptions::default()
    };
    let (depth, conf) = filter_depth_map(&reference, &neighbors, &opts, 3)
        .unwrap()
        .unwrap();
    assert!(depth.data().iter().all(|&d| d == 0.0));
    assert!(conf.data().iter().all(|&c| c == 0.0));
}

fn read_dmap_bytes(dir: &Path, id: u32) -> Vec<u8> {
    std::fs::read(mvs_io::compose_depth_file_path(dir, id, "dmap")).unwrap()
}

/// Running the estimate phase again with the `.dmap` files already on disk
/// must reproduce them byte for byte (the pre-computed-map shortcut
/// re-applies only the idempotent optimization).
#[test]
fn test_pipeline_restart_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DenseOptions {
        optimize: DenseOptions::OPTIMIZE | DenseOptions::REMOVE_SPECKLES,
        ..estimate_only_options()
    };

    let mut first = DenseReconstruction::new(plane_scene(), opts.clone(), dir.path()).unwrap();
    first.compute_depth_maps().unwrap();
    let bytes_before: Vec<Vec<u8>> = (0..2).map(|i| read_dmap_bytes(dir.path(), i)).collect();

    let mut second = DenseReconstruction::new(plane_scene(), opts, dir.path()).unwrap();
    second.compute_depth_maps().unwrap();
    let bytes_after: Vec<Vec<u8>> = (0..2).map(|i| read_dmap_bytes(dir.path(), i)).collect();

    assert_eq!(bytes_before, bytes_after);
}

/// Depth maps that are entirely invalid yield an empty cloud in both fusion
/// modes, and the visibility filter copes with the empty cloud.
#[test]
fn test_empty_maps_produce_empty_cloud_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let images = vec![
        SceneImage::new(0, "0.jpg", 16, 16, small_camera(0.0)),
        SceneImage::new(1, "1.jpg", 16, 16, small_camera(0.01)),
    ];
    let scene = Scene::new(images, PointCloud::default());
    let mut datas = vec![
        constant_depth_data(0, small_camera(0.0), |_, _| 0.0, &[1]),
        constant_depth_data(1, small_camera(0.01), |_, _| 0.0, &[0]),
    ];
    for (i, data) in datas.iter_mut().enumerate() {
        data.save(&mvs_io::compose_depth_file_path(dir.path(), i as u32, "dmap"))
            .unwrap();
        data.release();
    }
    let opts = DenseOptions {
        estimate_colors: false,
        ..DenseOptions::default()
    };
    let mut cloud = fuse_depth_maps(&scene, &mut datas, dir.path(), &opts).unwrap();
    assert!(cloud.is_empty());
    let merged = mvs_densify::merge_depth_maps(&scene, &mut datas, dir.path(), &opts).unwrap();
    assert!(merged.is_empty());
    mvs_densify::point_cloud_filter(&mut cloud, &plane_scene().images, 0);
    assert!(cloud.is_empty());
}
