//! Dense multi-view stereo
//!
//! Per-image depth/normal/confidence maps via PatchMatch propagation and
//! random refinement, cross-view filtering, fusion into one world-space
//! point cloud, and octree-based visibility filtering — driven by an
//! event-queue pipeline with bounded concurrency.

pub mod backend;
pub mod cloud_filter;
pub mod depth_data;
pub mod filter;
pub mod fusion;
pub mod init;
pub mod patch_match;
pub mod pipeline;
pub mod postprocess;

pub use backend::{DenseBackend, PatchMatchBackend};
pub use cloud_filter::point_cloud_filter;
pub use depth_data::{DepthData, ViewData};
pub use filter::{filter_depth_map, NeighborDepthData, ReferenceDepthData};
pub use fusion::{fuse_depth_maps, merge_depth_maps};
pub use pipeline::{DenseReconstruction, Event};

pub use mvs_core::{Error, Result};
