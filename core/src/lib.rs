pub mod camera;
pub mod image;
pub mod map;
pub mod options;
pub mod point_cloud;
pub mod scene;

pub use self::camera::*;
pub use self::image::SceneImage;
pub use self::map::*;
pub use self::options::*;
pub use self::point_cloud::*;
pub use self::scene::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reference image {0} has no good images in view")]
    ViewSelectionInsufficient(u32),

    #[error("failed to load image {0}: {1}")]
    ImageLoadFailed(u32, String),

    #[error("depth-map I/O failed: {0}")]
    DepthMapIo(String),

    #[error("not enough calibrated images to filter depth-maps")]
    FilterPrerequisitesUnmet,

    #[error("depth estimation backend unavailable: {0}")]
    BackendFailed(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
