//! Scene model: calibrated images, the sparse cloud with visibility, and the
//! neighbor-view scoring consumed by view selection.

use crate::image::SceneImage;
use crate::point_cloud::PointCloud;
use nalgebra::Point3;
use std::collections::HashMap;

/// A ranked candidate neighbor for a reference image.
#[derive(Debug, Clone, Copy)]
pub struct ViewScore {
    pub id: u32,
    /// Footprint ratio of the neighbor relative to the reference (>1 means
    /// the neighbor sees the scene more magnified).
    pub scale: f32,
    pub score: f32,
    /// Mean parallax angle in degrees.
    pub angle: f32,
    /// Shared-area fraction of the reference image.
    pub area: f32,
}

/// Calibrated images plus the sparse point cloud they observe.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub images: Vec<SceneImage>,
    pub pointcloud: PointCloud,
}

struct NeighborStat {
    count: usize,
    weight: f32,
    angle_sum: f32,
    ratio_sum: f32,
    bbox: (f64, f64, f64, f64),
}

impl Scene {
    pub fn new(images: Vec<SceneImage>, pointcloud: PointCloud) -> Self {
        Self { images, pointcloud }
    }

    pub fn n_calibrated(&self) -> usize {
        self.images.iter().filter(|i| i.is_valid()).count()
    }

    /// Rank the views sharing sparse points with `reference` by a combined
    /// parallax/scale score, and collect the sparse points it sees (seeds).
    ///
    /// `min_point_views` is the minimum number of shared points a neighbor
    /// needs to be considered at all; `optim_angle` is in radians.
    pub fn select_neighbor_views(
        &self,
        reference: u32,
        min_point_views: usize,
        optim_angle: f32,
    ) -> (Vec<ViewScore>, Vec<u32>) {
        let ref_img = &self.images[reference as usize];
        let ref_cam = &ref_img.camera;
        let f_ref = ref_cam.k[(0, 0)];
        let mut seeds = Vec::new();
        let mut stats: HashMap<u32, NeighborStat> = HashMap::new();

        for (idx, views) in self.pointcloud.point_views.iter().enumerate() {
            if !views.contains(&reference) {
                continue;
            }
            let x32 = self.pointcloud.points[idx];
            let x = Point3::new(x32.x as f64, x32.y as f64, x32.z as f64);
            let (px, d_ref) = ref_cam.world_to_image(&x);
            if d_ref <= 0.0 {
                continue;
            }
            seeds.push(idx as u32);
            let ray_ref = (ref_cam.c - x).normalize();
            for &v in views {
                if v == reference {
                    continue;
                }
                let cam = &self.images[v as usize].camera;
                let d_v = cam.world_to_camera(&x).z;
                if d_v <= 0.0 {
                    continue;
                }
                let ray_v = (cam.c - x).normalize();
                let angle = ray_ref.dot(&ray_v).clamp(-1.0, 1.0).acos() as f32;
                let ratio = ((cam.k[(0, 0)] * d_ref) / (f_ref * d_v)) as f32;
                let rel = (angle - optim_angle) / optim_angle.max(1e-3);
                let w_angle = (-rel * rel).exp();
                let w_scale = ratio.min(1.0 / ratio).max(0.0).sqrt();
                let stat = stats.entry(v).or_insert(NeighborStat {
                    count: 0,
                    weight: 0.0,
                    angle_sum: 0.0,
                    ratio_sum: 0.0,
                    bbox: (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
                });
                stat.count += 1;
                stat.weight += w_angle * w_scale;
                stat.angle_sum += angle;
                stat.ratio_sum += ratio;
                stat.bbox.0 = stat.bbox.0.min(px.x);
                stat.bbox.1 = stat.bbox.1.min(px.y);
                stat.bbox.2 = stat.bbox.2.max(px.x);
                stat.bbox.3 = stat.bbox.3.max(px.y);
            }
        }

        let img_area = (ref_img.width as f64 * ref_img.height as f64).max(1.0);
        let mut neighbors: Vec<ViewScore> = stats
            .into_iter()
            .filter(|(_, s)| s.count >= min_point_views.max(1))
            .map(|(id, s)| {
                let n = s.count as f32;
                let bbox_area = ((s.bbox.2 - s.bbox.0).max(0.0) * (s.bbox.3 - s.bbox.1).max(0.0))
                    .min(img_area);
                ViewScore {
                    id,
                    scale: s.ratio_sum / n,
                    score: s.weight,
                    angle: (s.angle_sum / n).to_degrees(),
                    area: (bbox_area / img_area) as f32,
                }
            })
            .collect();
        neighbors.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        (neighbors, seeds)
    }
}

/// Drop neighbors outside the geometric limits and cap the list; returns
/// false when nothing viable remains.
pub fn filter_neighbor_views(
    neighbors: &mut Vec<ViewScore>,
    min_area: f32,
    min_scale: f32,
    max_scale: f32,
    min_angle: f32,
    max_angle: f32,
    max_views: usize,
) -> bool {
    neighbors.retain(|n| {
        n.area >= min_area
            && n.scale >= min_scale
            && n.scale <= max_scale
            && n.angle >= min_angle
            && n.angle <= max_angle
    });
    if max_views > 0 && neighbors.len() > max_views {
        neighbors.truncate(max_views);
    }
    !neighbors.is_empty()
}
