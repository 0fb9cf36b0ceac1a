//! Per-image depth-map state and its on-disk residency.

use crate::{Error, Result};
use image::GrayImage;
use mvs_core::{Camera, ConfidenceMap, DepthMap, NormalMap, ViewScore};
use mvs_io::DepthDataRaw;
use std::path::Path;

/// One image participating in a depth-map estimation: the grayscale buffer at
/// its working scale and the camera rebuilt for that scale. Slot 0 of
/// [`DepthData::views`] is the reference; the optional depth map backs
/// geometric-consistency scoring and the cross-view filter.
#[derive(Debug, Clone)]
pub struct ViewData {
    pub image_id: u32,
    pub name: String,
    pub scale: f64,
    pub camera: Camera,
    pub image: GrayImage,
    pub depth_map: Option<DepthMap>,
}

impl Default for ViewData {
    fn default() -> Self {
        Self {
            image_id: 0,
            name: String::new(),
            scale: 1.0,
            camera: Camera::default(),
            image: GrayImage::new(0, 0),
            depth_map: None,
        }
    }
}

/// The unit of work of the dense pipeline: selected views, sparse seeds and
/// the evolving depth/normal/confidence maps of one reference image.
///
/// Residency is reference-counted: the first [`DepthData::inc_ref`] loads the
/// maps from disk, the last [`DepthData::dec_ref`] releases them, so a
/// reference can stay resident while neighbors consult it.
#[derive(Debug, Default)]
pub struct DepthData {
    pub views: Vec<ViewData>,
    pub neighbors: Vec<ViewScore>,
    /// Sparse-cloud indices visible from the reference.
    pub seeds: Vec<u32>,
    /// Reference camera at the working scale (kept in sync with `views[0]`
    /// and with whatever a load from disk brings in).
    pub camera: Camera,
    pub depth_map: DepthMap,
    pub normal_map: NormalMap,
    pub conf_map: ConfidenceMap,
    pub d_min: f32,
    pub d_max: f32,
    pub(crate) refs: u32,
}

impl DepthData {
    /// Views were selected for this image.
    pub fn is_valid(&self) -> bool {
        !self.neighbors.is_empty()
    }

    /// No depth map resident in memory.
    pub fn is_empty(&self) -> bool {
        self.depth_map.is_empty()
    }

    pub fn reference(&self) -> &ViewData {
        &self.views[0]
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Acquire the depth map, loading it from `path` on the 0→1 transition.
    pub fn inc_ref(&mut self, path: &Path) -> Result<()> {
        if self.refs == 0 && self.is_empty() {
            self.load(path)?;
        }
        self.refs += 1;
        Ok(())
    }

    /// Release one acquisition; frees the in-memory maps on the last one.
    pub fn dec_ref(&mut self) {
        debug_assert!(self.refs > 0);
        self.refs -= 1;
        if self.refs == 0 {
            self.release();
        }
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        let raw = mvs_io::load_depth_data(path)
            .map_err(|e| Error::DepthMapIo(format!("{}: {e}", path.display())))?;
        self.camera = raw.camera;
        self.d_min = raw.d_min;
        self.d_max = raw.d_max;
        self.depth_map = raw.depth_map;
        self.normal_map = raw.normal_map.unwrap_or_default();
        self.conf_map = raw.conf_map.unwrap_or_default();
        if let Some(view) = self.views.first() {
            if view.image.width() > 0
                && (view.image.width(), view.image.height())
                    != (self.depth_map.width(), self.depth_map.height())
            {
                return Err(Error::Invariant(format!(
                    "depth map {} is {}x{} but its image is {}x{}",
                    path.display(),
                    self.depth_map.width(),
                    self.depth_map.height(),
                    view.image.width(),
                    view.image.height()
                )));
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let reference = self.views.first();
        let raw = DepthDataRaw {
            name: reference.map(|v| v.name.clone()).unwrap_or_default(),
            view_ids: self.views.iter().map(|v| v.image_id).collect(),
            d_min: self.d_min,
            d_max: self.d_max,
            camera: self.camera,
            depth_map: self.depth_map.clone(),
            normal_map: (!self.normal_map.is_empty()).then(|| self.normal_map.clone()),
            conf_map: (!self.conf_map.is_empty()).then(|| self.conf_map.clone()),
        };
        mvs_io::save_depth_data(path, &raw)
            .map_err(|e| Error::DepthMapIo(format!("{}: {e}", path.display())))
    }

    /// Free the dense maps, keeping views and neighbors.
    pub fn release(&mut self) {
        self.depth_map = DepthMap::default();
        self.normal_map = NormalMap::default();
        self.conf_map = ConfidenceMap::default();
    }

    /// Free the grayscale buffers once estimation is done.
    pub fn release_images(&mut self) {
        for view in &mut self.views {
            view.image = GrayImage::new(0, 0);
            view.depth_map = None;
        }
    }
}
