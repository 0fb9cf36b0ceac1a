//! A 3D point cloud with per-point visibility and fusion weights.

use crate::{Error, Result};
use nalgebra::{Point3, Vector3};

/// Parallel arrays: positions, the sorted image ids seeing each point, and the
/// fusion weights aligned to those ids. Colors and normals are optional.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
    pub point_views: Vec<Vec<u32>>,
    pub point_weights: Vec<Vec<f32>>,
    pub colors: Option<Vec<Point3<f32>>>,
    pub normals: Option<Vec<Vector3<f32>>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        let n = points.len();
        Self {
            points,
            point_views: vec![Vec::new(); n],
            point_weights: vec![Vec::new(); n],
            colors: None,
            normals: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point with no views yet; returns its index.
    pub fn push(&mut self, point: Point3<f32>) -> usize {
        self.points.push(point);
        self.point_views.push(Vec::new());
        self.point_weights.push(Vec::new());
        self.points.len() - 1
    }

    /// Insert `view` into the sorted view list of `idx`, keeping the weight
    /// aligned. Returns the insertion position; ignores duplicate views.
    pub fn insert_view(&mut self, idx: usize, view: u32, weight: f32) -> usize {
        let views = &mut self.point_views[idx];
        match views.binary_search(&view) {
            Ok(pos) => pos,
            Err(pos) => {
                views.insert(pos, view);
                self.point_weights[idx].insert(pos, weight);
                pos
            }
        }
    }

    /// Swap-remove the point at `idx` from every parallel array.
    pub fn remove_point(&mut self, idx: usize) {
        self.points.swap_remove(idx);
        self.point_views.swap_remove(idx);
        self.point_weights.swap_remove(idx);
        if let Some(colors) = &mut self.colors {
            colors.swap_remove(idx);
        }
        if let Some(normals) = &mut self.normals {
            normals.swap_remove(idx);
        }
    }

    /// Verify the §-level invariants: equal lengths, strictly ascending view
    /// lists, positive weights.
    pub fn check_invariants(&self) -> Result<()> {
        let n = self.points.len();
        if self.point_views.len() != n || self.point_weights.len() != n {
            return Err(Error::Invariant(format!(
                "point cloud arrays disagree: {} points, {} views, {} weights",
                n,
                self.point_views.len(),
                self.point_weights.len()
            )));
        }
        for (i, (views, weights)) in self.point_views.iter().zip(&self.point_weights).enumerate() {
            if views.len() != weights.len() {
                return Err(Error::Invariant(format!(
                    "point {i}: {} views but {} weights",
                    views.len(),
                    weights.len()
                )));
            }
            if views.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::Invariant(format!("point {i}: views not sorted unique")));
            }
            if weights.iter().any(|&w| w <= 0.0) {
                return Err(Error::Invariant(format!("point {i}: non-positive weight")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_view_sorted_unique() {
        let mut pc = PointCloud::default();
        let idx = pc.push(Point3::new(0.0, 0.0, 1.0));
        pc.insert_view(idx, 4, 0.5);
        pc.insert_view(idx, 1, 0.25);
        pc.insert_view(idx, 4, 9.0); // duplicate view is ignored
        assert_eq!(pc.point_views[idx], vec![1, 4]);
        assert_eq!(pc.point_weights[idx], vec![0.25, 0.5]);
        pc.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_point_keeps_arrays_aligned() {
        let mut pc = PointCloud::default();
        for i in 0..3 {
            let idx = pc.push(Point3::new(i as f32, 0.0, 1.0));
            pc.insert_view(idx, i, 1.0);
        }
        pc.colors = Some(vec![Point3::new(0.1, 0.1, 0.1); 3]);
        pc.normals = Some(vec![Vector3::new(0.0, 0.0, -1.0); 3]);
        pc.remove_point(0);
        assert_eq!(pc.len(), 2);
        assert_eq!(pc.colors.as_ref().unwrap().len(), 2);
        assert_eq!(pc.normals.as_ref().unwrap().len(), 2);
        // swap-remove moved the last point to the front
        assert_eq!(pc.point_views[0], vec![2]);
        pc.check_invariants().unwrap();
    }

    #[test]
    fn test_invariants_catch_misaligned_weights() {
        let mut pc = PointCloud::default();
        let idx = pc.push(Point3::origin());
        pc.point_views[idx].push(2);
        assert!(pc.check_invariants().is_err());
    }
}
