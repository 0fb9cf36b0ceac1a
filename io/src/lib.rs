//! Depth-map and point-cloud I/O
//!
//! Supports the artifacts produced by the dense pipeline:
//! - `.dmap` depth-map files (depth + optional normal/confidence maps)
//! - PLY point clouds
//! - PNG visualizations of depth, normal and confidence maps

pub mod dmap;
pub mod ply;
pub mod viz;

pub use dmap::{
    compose_depth_file_path, load_confidence_map, load_depth_data, load_depth_map,
    save_confidence_map, save_depth_data, save_depth_map, DepthDataRaw,
};
pub use ply::{read_ply, write_ply};
pub use viz::{
    confidence_map_to_image, depth_map_to_image, export_depth_snapshot, normal_map_to_image,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, IoError>;
