//! Visibility-based outlier filtering of the fused cloud.
//!
//! For every (point, view) pair a cone from the camera center toward the
//! point sweeps the octree: points inside the cone that are farther than the
//! query gather support, closer ones are counted as occluders. Points whose
//! accumulated visibility falls below the threshold are removed.

use log::info;
use mvs_core::{is_depth_similar, PointCloud, SceneImage};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

const MAX_LEAF_POINTS: usize = 128;
/// Cone height cap relative to the query distance.
const MAX_DEPTH_RATIO: f32 = 1.02;
/// Depth-similarity band excluded from the accounting.
const SIMILARITY: f32 = 0.01;

/// Remove every point whose visibility score ends up `<= th_remove`.
pub fn point_cloud_filter(cloud: &mut PointCloud, images: &[SceneImage], th_remove: i32) {
    if cloud.is_empty() {
        return;
    }
    let octree = Octree::build(&cloud.points);
    let visibility: Vec<AtomicI32> = (0..cloud.len()).map(|_| AtomicI32::new(0)).collect();

    // one collector per image; the cone state is mutable and shared
    let collectors: Vec<Mutex<ConeCollector>> = images
        .iter()
        .map(|img| {
            let c = img.camera.c;
            let apex = Point3::new(c.x as f32, c.y as f32, c.z as f32);
            let view = img.camera.view_direction();
            let axis = Vector3::new(view.x as f32, view.y as f32, view.z as f32);
            let half_angle = (img.camera.fov_x(img.width) / img.width.max(1) as f64) as f32;
            Mutex::new(ConeCollector::new(apex, axis, half_angle))
        })
        .collect();

    (0..cloud.len()).into_par_iter().for_each(|idx| {
        let point = cloud.points[idx];
        let views = &cloud.point_views[idx];
        let weight = views.len() as i32;
        for &view in views {
            let mut collector = collectors[view as usize].lock().unwrap();
            if !collector.aim(point) {
                // the camera does not actually face this point: no support
                continue;
            }
            visibility[idx].fetch_add(1, Ordering::Relaxed);
            octree.collect(&*collector, &mut |indices| {
                for &other in indices {
                    if other as usize == idx {
                        continue;
                    }
                    let Some(dist) = collector.classify(cloud.points[other as usize]) else {
                        continue;
                    };
                    if is_depth_similar(collector.distance, dist, SIMILARITY) {
                        continue;
                    }
                    if dist > collector.distance {
                        // still visible behind the query point
                        visibility[other as usize]
                            .fetch_add(cloud.point_views[other as usize].len() as i32, Ordering::Relaxed);
                    } else {
                        // closer: the query point is seen through it
                        visibility[other as usize].fetch_sub(weight, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let before = cloud.len();
    for idx in (0..cloud.len()).rev() {
        if visibility[idx].load(Ordering::Relaxed) <= th_remove {
            cloud.remove_point(idx);
        }
    }
    info!("point-cloud filtered: {}/{before} points", cloud.len());
}

/// Cone query state for one camera.
struct ConeCollector {
    apex: Point3<f32>,
    /// Optical axis of the camera; only points it faces gather support.
    axis: Vector3<f32>,
    tan_angle: f32,
    cos_angle: f32,
    dir: Vector3<f32>,
    max_height: f32,
    distance: f32,
}

impl ConeCollector {
    fn new(apex: Point3<f32>, axis: Vector3<f32>, half_angle: f32) -> Self {
        Self {
            apex,
            axis,
            tan_angle: half_angle.tan(),
            cos_angle: half_angle.cos(),
            dir: Vector3::new(0.0, 0.0, 1.0),
            max_height: 0.0,
            distance: 0.0,
        }
    }

    /// Point the cone at `target`; false when the camera does not face it.
    fn aim(&mut self, target: Point3<f32>) -> bool {
        let d = target - self.apex;
        let distance = d.norm();
        if distance <= f32::EPSILON || d.dot(&self.axis) <= 0.0 {
            return false;
        }
        self.dir = d / distance;
        self.distance = distance;
        self.max_height = distance * MAX_DEPTH_RATIO;
        true
    }

    /// Distance from the apex when `p` lies inside the cone.
    fn classify(&self, p: Point3<f32>) -> Option<f32> {
        let v = p - self.apex;
        let h = v.dot(&self.dir);
        if h <= 0.0 || h > self.max_height {
            return None;
        }
        let radial = (v - self.dir * h).norm();
        (radial <= h * self.tan_angle).then(|| v.norm())
    }

    /// Conservative cone/sphere test for octree nodes.
    fn intersects(&self, center: Point3<f32>, radius: f32) -> bool {
        let r = radius * 3f32.sqrt();
        let v = center - self.apex;
        let h = v.dot(&self.dir);
        if h < -r || h > self.max_height + r {
            return false;
        }
        let radial = (v - self.dir * h).norm();
        radial <= h.max(0.0) * self.tan_angle + r / self.cos_angle
    }
}

/// Octree over point indices; leaves split once they exceed
/// [`MAX_LEAF_POINTS`].
struct Octree {
    root: OctreeNode,
}

struct OctreeNode {
    center: Point3<f32>,
    half_extent: f32,
    children: Option<Box<[OctreeNode; 8]>>,
    points: Vec<u32>,
}

impl Octree {
    fn build(points: &[Point3<f32>]) -> Self {
        let mut min = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Point3::new(f32::MIN, f32::MIN, f32::MIN);
        for p in points {
            min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        let center = nalgebra::center(&min, &max);
        let half_extent = ((max - min).amax() * 0.5).max(1e-6);
        let mut root = OctreeNode {
            center,
            half_extent,
            children: None,
            points: (0..points.len() as u32).collect(),
        };
        root.split(points);
        Self { root }
    }

    /// Visit every leaf whose bounds pass the collector's intersection test.
    fn collect(&self, collector: &ConeCollector, visit: &mut impl FnMut(&[u32])) {
        Self::collect_node(&self.root, collector, visit);
    }

    fn collect_node(
        node: &OctreeNode,
        collector: &ConeCollector,
        visit: &mut impl FnMut(&[u32]),
    ) {
        if !collector.intersects(node.center, node.half_extent) {
            return;
        }
        if let Some(children) = &node.children {
            for child in children.iter() {
                Self::collect_node(child, collector, visit);
            }
        } else if !node.points.is_empty() {
            visit(&node.points);
        }
    }
}

impl OctreeNode {
    fn split(&mut self, points: &[Point3<f32>]) {
        // coincident points can never separate, keep them in one leaf
        if self.points.len() <= MAX_LEAF_POINTS || self.half_extent <= 1e-5 {
            return;
        }
        let half = self.half_extent * 0.5;
        let mut children: Vec<OctreeNode> = (0..8)
            .map(|i| {
                let offset = Vector3::new(
                    if i & 1 == 0 { -half } else { half },
                    if i & 2 == 0 { -half } else { half },
                    if i & 4 == 0 { -half } else { half },
                );
                OctreeNode {
                    center: self.center + offset,
                    half_extent: half,
                    children: None,
                    points: Vec::new(),
                }
            })
            .collect();
        for idx in self.points.drain(..) {
            let p = points[idx as usize];
            let mut child = 0usize;
            if p.x >= self.center.x {
                child |= 1;
            }
            if p.y >= self.center.y {
                child |= 2;
            }
            if p.z >= self.center.z {
                child |= 4;
            }
            children[child].points.push(idx);
        }
        for child in &mut children {
            child.split(points);
        }
        let children: [OctreeNode; 8] = children
            .try_into()
            .ok()
            .expect("octree subdivision always yields 8 children");
        self.children = Some(Box::new(children));
    }
}
