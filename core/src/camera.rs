//! Pinhole camera and the geometric predicates shared by the dense pipeline.

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};

/// Pinhole camera: intrinsics `K`, world-to-camera rotation `R` and camera
/// center `C` in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub k: Matrix3<f64>,
    pub r: Matrix3<f64>,
    pub c: Point3<f64>,
}

impl Camera {
    pub fn new(k: Matrix3<f64>, r: Matrix3<f64>, c: Point3<f64>) -> Self {
        Self { k, r, c }
    }

    /// Camera with the given intrinsics looking down +z from the world origin.
    pub fn from_intrinsics(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            k: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            r: Matrix3::identity(),
            c: Point3::origin(),
        }
    }

    pub fn k_inv(&self) -> Matrix3<f64> {
        self.k.try_inverse().unwrap_or_else(Matrix3::identity)
    }

    pub fn world_to_camera(&self, x: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.r * (x - self.c))
    }

    pub fn camera_to_world(&self, x: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.r.transpose() * x.coords + self.c.coords)
    }

    /// Perspective projection of a camera-space point onto the image plane.
    pub fn camera_to_image(&self, x: &Point3<f64>) -> Point2<f64> {
        let p = self.k * x.coords;
        Point2::new(p.x / p.z, p.y / p.z)
    }

    /// Lift a pixel to camera space at the given depth.
    pub fn image_to_camera(&self, p: Point2<f64>, depth: f64) -> Point3<f64> {
        let ray = self.k_inv() * Vector3::new(p.x, p.y, 1.0);
        Point3::from(ray * depth)
    }

    /// Lift a pixel to world space at the given depth.
    pub fn image_to_world(&self, p: Point2<f64>, depth: f64) -> Point3<f64> {
        self.camera_to_world(&self.image_to_camera(p, depth))
    }

    /// Project a world point; returns the pixel and the camera-space depth.
    pub fn world_to_image(&self, x: &Point3<f64>) -> (Point2<f64>, f64) {
        let cam = self.world_to_camera(x);
        (self.camera_to_image(&cam), cam.z)
    }

    /// Optical axis in world coordinates.
    pub fn view_direction(&self) -> Vector3<f64> {
        self.r.transpose() * Vector3::new(0.0, 0.0, 1.0)
    }

    /// Horizontal field of view in radians for the given image width.
    pub fn fov_x(&self, width: u32) -> f64 {
        2.0 * (width as f64 / (2.0 * self.k[(0, 0)])).atan()
    }

    /// Rebuild the intrinsics for an image resized by `scale` (pixel-center
    /// correct). `R` and `C` are unchanged.
    pub fn scaled(&self, scale: f64) -> Camera {
        let mut k = self.k;
        k[(0, 0)] *= scale;
        k[(1, 1)] *= scale;
        k[(0, 1)] *= scale;
        k[(0, 2)] = (k[(0, 2)] + 0.5) * scale - 0.5;
        k[(1, 2)] = (k[(1, 2)] + 0.5) * scale - 0.5;
        Camera { k, ..*self }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            k: Matrix3::identity(),
            r: Matrix3::identity(),
            c: Point3::origin(),
        }
    }
}

/// `|d1 - d2| <= tau * min(d1, d2)`
#[inline]
pub fn is_depth_similar(d1: f32, d2: f32, tau: f32) -> bool {
    (d1 - d2).abs() <= tau * d1.min(d2)
}

/// Map a unit normal to its spherical direction `(phi, theta)`.
#[inline]
pub fn normal_to_dir(n: &Vector3<f32>) -> Vector2<f32> {
    Vector2::new(n.y.atan2(n.x), n.z.clamp(-1.0, 1.0).acos())
}

/// Inverse of [`normal_to_dir`]; always returns a unit vector.
#[inline]
pub fn dir_to_normal(d: &Vector2<f32>) -> Vector3<f32> {
    let (sin_t, cos_t) = d.y.sin_cos();
    let (sin_p, cos_p) = d.x.sin_cos();
    Vector3::new(cos_p * sin_t, sin_p * sin_t, cos_t)
}
