//! The depth-map estimation capability.
//!
//! The pipeline drives whatever backend it was constructed with: the CPU
//! PatchMatch estimator here, or an external collaborator (GPU PatchMatch,
//! semi-global matching) plugged in by the caller.

use crate::depth_data::DepthData;
use crate::patch_match;
use crate::Result;
use mvs_core::{DenseOptions, Map2D};

pub trait DenseBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Estimate the depth/normal/confidence maps of `data` in place.
    fn estimate_depth_map(
        &self,
        data: &mut DepthData,
        ignore_mask: Option<&Map2D<bool>>,
        opts: &DenseOptions,
        threads: usize,
        geo_iter: i32,
    ) -> Result<()>;
}

/// The CPU PatchMatch estimator.
#[derive(Debug, Default)]
pub struct PatchMatchBackend;

impl DenseBackend for PatchMatchBackend {
    fn name(&self) -> &'static str {
        "patch-match"
    }

    fn estimate_depth_map(
        &self,
        data: &mut DepthData,
        ignore_mask: Option<&Map2D<bool>>,
        opts: &DenseOptions,
        threads: usize,
        geo_iter: i32,
    ) -> Result<()> {
        patch_match::estimate_depth_map(data, ignore_mask, opts, threads, geo_iter)
    }
}
