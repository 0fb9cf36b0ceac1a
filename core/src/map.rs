//! Dense 2D maps: depth, normal and confidence grids.

use crate::camera::Camera;
use nalgebra::{Point2, Vector3};

/// Row-major dense grid sized to an image.
#[derive(Debug, Clone, PartialEq)]
pub struct Map2D<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

pub type DepthMap = Map2D<f32>;
pub type NormalMap = Map2D<Vector3<f32>>;
pub type ConfidenceMap = Map2D<f32>;

impl<T> Default for Map2D<T> {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }
}

impl<T: Copy> Map2D<T> {
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; (width * height) as usize],
        }
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<T>) -> Self {
        assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        (y * self.width + x) as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let idx = self.idx(x, y);
        self.data[idx] = value;
    }

    #[inline]
    pub fn is_inside(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Surface normal at a pixel from the cross product of neighboring
/// deprojections, in world coordinates, oriented toward the camera.
/// Returns zero when the neighborhood has no valid depths.
pub fn estimate_normal_world(camera: &Camera, depth_map: &DepthMap, x: u32, y: u32) -> Vector3<f32> {
    let d = depth_map.get(x, y);
    if d <= 0.0 {
        return Vector3::zeros();
    }
    let deproject = |px: u32, py: u32, pd: f32| {
        camera.image_to_world(Point2::new(px as f64, py as f64), pd as f64)
    };
    let p = deproject(x, y, d);
    // prefer the forward neighbors, fall back to the backward ones
    let right = pick_valid(depth_map, x + 1, y).or_else(|| pick_valid_signed(depth_map, x as i64 - 1, y as i64));
    let down = pick_valid(depth_map, x, y + 1).or_else(|| pick_valid_signed(depth_map, x as i64, y as i64 - 1));
    let (Some((rx, ry, rd)), Some((dx, dy, dd))) = (right, down) else {
        return Vector3::zeros();
    };
    let pr = deproject(rx, ry, rd);
    let pd = deproject(dx, dy, dd);
    let n = (pr - p).cross(&(pd - p));
    if n.norm() <= f64::EPSILON {
        return Vector3::zeros();
    }
    let mut n = n.normalize();
    // orient toward the camera center
    if n.dot(&(camera.c - p)) < 0.0 {
        n = -n;
    }
    Vector3::new(n.x as f32, n.y as f32, n.z as f32)
}

/// Camera-frame variant of [`estimate_normal_world`], used when the backend
/// produces only depth and the normal map must be reconstructed.
pub fn estimate_normal_map(camera: &Camera, depth_map: &DepthMap) -> NormalMap {
    let mut normal_map = NormalMap::new(depth_map.width(), depth_map.height(), Vector3::zeros());
    for y in 0..depth_map.height() {
        for x in 0..depth_map.width() {
            let n = estimate_normal_world(camera, depth_map, x, y);
            if n != Vector3::zeros() {
                let nc = camera.r * Vector3::new(n.x as f64, n.y as f64, n.z as f64);
                normal_map.set(x, y, Vector3::new(nc.x as f32, nc.y as f32, nc.z as f32));
            }
        }
    }
    normal_map
}

fn pick_valid(map: &DepthMap, x: u32, y: u32) -> Option<(u32, u32, f32)> {
    if x < map.width() && y < map.height() && map.get(x, y) > 0.0 {
        Some((x, y, map.get(x, y)))
    } else {
        None
    }
}

fn pick_valid_signed(map: &DepthMap, x: i64, y: i64) -> Option<(u32, u32, f32)> {
    if map.is_inside(x, y) {
        pick_valid(map, x as u32, y as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use nalgebra::Point3;

    #[test]
    fn test_map_get_set() {
        let mut map = DepthMap::new(8, 4, 0.0);
        map.set(7, 3, 2.5);
        assert_eq!(map.get(7, 3), 2.5);
        assert_eq!(map.get(0, 0), 0.0);
        assert!(map.is_inside(7, 3));
        assert!(!map.is_inside(8, 3));
        assert!(!map.is_inside(-1, 0));
    }

    #[test]
    fn test_estimate_normal_on_fronto_parallel_plane() {
        let cam = Camera::new(
            Matrix3::new(50.0, 0.0, 16.0, 0.0, 50.0, 16.0, 0.0, 0.0, 1.0),
            Matrix3::identity(),
            Point3::origin(),
        );
        let map = DepthMap::new(32, 32, 2.0);
        let n = estimate_normal_world(&cam, &map, 16, 16);
        // plane at constant camera depth: normal points back at the camera
        assert!((n.z + 1.0).abs() < 1e-3, "normal was {n:?}");
    }

    #[test]
    fn test_estimate_normal_invalid_neighborhood() {
        let cam = Camera::from_intrinsics(50.0, 50.0, 16.0, 16.0);
        let mut map = DepthMap::new(4, 4, 0.0);
        map.set(1, 1, 2.0);
        assert_eq!(estimate_normal_world(&cam, &map, 1, 1), Vector3::zeros());
    }
}
