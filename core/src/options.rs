//! Dense reconstruction configuration.
//!
//! One immutable value constructed at pipeline start and threaded by
//! reference through the components; never mutated afterwards.

/// How per-target ZNCC scores are aggregated into one pixel score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreAggregation {
    /// N-th smallest score (second-smallest when more than one target).
    NthBest,
    Mean,
    Min,
    /// Mean of the bottom-k scores.
    BottomK,
}

#[derive(Debug, Clone)]
pub struct DenseOptions {
    /// Minimum neighbor count selected (clamped to what the scene offers).
    pub min_views: u32,
    /// Below 2 the depth map is seeded by splatting sparse points, otherwise
    /// by triangulation-based interpolation.
    pub min_views_trust_point: u32,
    /// Cap on selected neighbors.
    pub max_views: u32,
    /// Neighbors actually used for estimation (0 = all selected).
    pub num_views: u32,
    /// Minimum shared-area fraction for a neighbor.
    pub min_area: f32,
    /// View-selection parallax limits, degrees.
    pub min_angle: f32,
    pub max_angle: f32,
    pub optim_angle: f32,
    /// Absolute neighbor-score floor.
    pub view_min_score: f32,
    /// Neighbor-score floor relative to the best neighbor.
    pub view_min_score_ratio: f32,
    /// PatchMatch propagation/refinement sweeps.
    pub estimation_iters: u32,
    /// Extra geometric-consistency rounds after the photometric pass.
    pub estimation_geometric_iters: u32,
    /// Weight of the reprojection term during geometric rounds.
    pub geometric_weight: f32,
    /// ZNCC score (0 = best, 2 = worst) above which estimates are discarded.
    pub ncc_threshold_keep: f32,
    pub aggregation: ScoreAggregation,
    /// Connected components smaller than this are removed.
    pub speckle_size: u32,
    /// Maximum run of invalid pixels bridged by gap interpolation.
    pub ipol_gap_size: u32,
    /// Relative depth-similarity threshold.
    pub depth_diff_threshold: f32,
    /// Normal agreement threshold for fusion, degrees.
    pub normal_diff_threshold: f32,
    pub min_views_filter: u32,
    pub min_views_filter_adjust: u32,
    /// Confidence-weighted adjustment instead of strict consensus.
    pub filter_adjust: bool,
    pub min_views_fuse: u32,
    /// Bitfield of `OPTIMIZE | REMOVE_SPECKLES | FILL_GAPS`.
    pub optimize: u32,
    pub estimate_colors: bool,
    /// 0 = none, 1 = from PatchMatch planes, 2 = recomputed from depth.
    pub estimate_normals: u8,
    /// Mask label marking ignored pixels; negative disables.
    pub ignore_mask_label: i32,
    /// Negative selects the external stereo backend, otherwise PatchMatch.
    pub fusion_mode: i32,
    /// Worker threads; 0 uses the number of CPUs.
    pub max_threads: usize,
    /// Above 0, debug artifacts (PNG/PLY snapshots) are written.
    pub verbosity: u32,
}

impl DenseOptions {
    pub const OPTIMIZE: u32 = 1;
    pub const REMOVE_SPECKLES: u32 = 2;
    pub const FILL_GAPS: u32 = 4;
}

impl Default for DenseOptions {
    fn default() -> Self {
        Self {
            min_views: 5,
            min_views_trust_point: 2,
            max_views: 12,
            num_views: 8,
            min_area: 0.05,
            min_angle: 3.0,
            max_angle: 65.0,
            optim_angle: 10.0,
            view_min_score: 2.0,
            view_min_score_ratio: 0.3,
            estimation_iters: 3,
            estimation_geometric_iters: 0,
            geometric_weight: 0.1,
            ncc_threshold_keep: 0.55,
            aggregation: ScoreAggregation::NthBest,
            speckle_size: 100,
            ipol_gap_size: 7,
            depth_diff_threshold: 0.01,
            normal_diff_threshold: 25.0,
            min_views_filter: 2,
            min_views_filter_adjust: 1,
            filter_adjust: true,
            min_views_fuse: 3,
            optimize: Self::OPTIMIZE | Self::REMOVE_SPECKLES | Self::FILL_GAPS,
            estimate_colors: true,
            estimate_normals: 1,
            ignore_mask_label: -1,
            fusion_mode: 0,
            max_threads: 0,
            verbosity: 0,
        }
    }
}
