//! PatchMatch depth/normal estimation over homography-warped ZNCC patches.
//!
//! The reference image is swept in a zig-zag stripe order; workers claim
//! pixels through an atomic cursor so each pixel is owned by exactly one
//! worker per sweep. Neighbor estimates are read best-effort through relaxed
//! atomic cells: stale values are acceptable, PatchMatch convergence is
//! defined by the iteration, not by sequential consistency.

use crate::depth_data::DepthData;
use crate::{Error, Result};
use mvs_core::{
    is_depth_similar, Camera, DenseOptions, DepthMap, Map2D, NormalMap, ScoreAggregation,
};
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

const HALF_WINDOW: i64 = 3;
const WINDOW: usize = 7;
const NUM_SAMPLES: usize = WINDOW * WINDOW;

/// ZNCC score of an unassemblable patch.
const SCORE_WORST: f32 = 2.0;
/// Score charged to a target whose warped patch is unusable.
const SCORE_ROBUST: f32 = 1.2;
const SMOOTH_BONUS: f32 = 0.95;
const REFINE_STEPS: u32 = 8;
/// Largest normal perturbation during refinement, radians.
const REFINE_ANGLE: f32 = 0.6;
/// Cap on the geometric reprojection error, pixels.
const GEOMETRIC_ERROR_CAP: f32 = 4.0;

/// Estimate the depth/normal/confidence maps of `data` in place.
///
/// `geo_iter < 0` runs the photometric sweeps; `geo_iter >= 0` runs one
/// extra sweep with reprojection-consistency scoring against the neighbor
/// depth maps loaded into the views.
pub fn estimate_depth_map(
    data: &mut DepthData,
    ignore_mask: Option<&Map2D<bool>>,
    opts: &DenseOptions,
    threads: usize,
    geo_iter: i32,
) -> Result<()> {
    if data.views.len() < 2 {
        return Err(Error::Invariant("estimation needs a reference and a target".into()));
    }
    let width = data.views[0].image.width();
    let height = data.views[0].image.height();
    if width == 0 || height == 0 {
        return Err(Error::Invariant("reference image not loaded".into()));
    }
    if data.depth_map.is_empty() {
        return Err(Error::Invariant("depth map not initialized".into()));
    }
    if (data.depth_map.width(), data.depth_map.height()) != (width, height) {
        return Err(Error::Invariant(format!(
            "depth map {}x{} does not match image {width}x{height}",
            data.depth_map.width(),
            data.depth_map.height()
        )));
    }
    if data.normal_map.is_empty() {
        data.normal_map = NormalMap::new(width, height, Vector3::zeros());
    }

    // masked pixels leave the partition and their depth is invalidated
    if let Some(mask) = ignore_mask {
        for y in 0..height {
            for x in 0..width {
                if mask.get(x, y) {
                    data.depth_map.set(x, y, 0.0);
                    data.normal_map.set(x, y, Vector3::zeros());
                }
            }
        }
    }

    let threads = threads.max(1);
    let n_tiles = 64.max(8 * threads);
    let coords = zigzag_coords(width, height, n_tiles, ignore_mask);

    let reference = &data.views[0];
    let targets: Vec<TargetView> = data.views[1..]
        .iter()
        .map(|view| {
            let r_rel = view.camera.r * reference.camera.r.transpose();
            let t_rel = view.camera.r * (reference.camera.c - view.camera.c);
            TargetView {
                gray: normalize_gray(&view.image),
                width: view.image.width(),
                height: view.image.height(),
                k: view.camera.k,
                r_rel,
                t_rel,
                camera: view.camera,
                depth_map: view.depth_map.as_ref(),
            }
        })
        .collect();
    let geometric = geo_iter >= 0 && targets.iter().any(|t| t.depth_map.is_some());

    let estimator = Estimator {
        width,
        height,
        gray: normalize_gray(&reference.image),
        k_inv: reference.camera.k_inv(),
        camera: reference.camera,
        targets,
        depth: SharedGrid::from_map(&data.depth_map),
        normal: SharedNormalGrid::from_map(&data.normal_map),
        conf: SharedGrid::zeros(width, height),
        coords,
        cursor: AtomicUsize::new(0),
        d_min: data.d_min,
        d_max: data.d_max,
        opts,
        geometric,
    };

    // phase A: score the current estimates, randomizing invalid ones
    estimator.cursor.store(0, Ordering::SeqCst);
    run_parallel(threads, || estimator.score_pass());

    // phase B: propagation and random refinement sweeps
    let (begin, end) = if geo_iter < 0 {
        (0, opts.estimation_iters)
    } else {
        let base = opts.estimation_iters + geo_iter as u32;
        (base, base + 1)
    };
    for iter in begin..end {
        estimator.cursor.store(0, Ordering::SeqCst);
        run_parallel(threads, || estimator.refine_pass(iter));
    }

    // phase C: discard weak estimates and invert the confidence
    estimator.cursor.store(0, Ordering::SeqCst);
    run_parallel(threads, || estimator.finalize_pass());

    data.depth_map = estimator.depth.to_map();
    data.normal_map = estimator.normal.to_map();
    data.conf_map = estimator.conf.to_map();
    Ok(())
}

/// Serpentine stripe ordering: `n_tiles` horizontal stripes, rows alternating
/// direction inside each stripe. Masked pixels are excluded.
pub(crate) fn zigzag_coords(
    width: u32,
    height: u32,
    n_tiles: usize,
    mask: Option<&Map2D<bool>>,
) -> Vec<(u16, u16)> {
    let rows_per_tile = ((height as usize + n_tiles - 1) / n_tiles).max(1);
    let mut coords = Vec::with_capacity((width * height) as usize);
    let mut row = 0usize;
    while row < height as usize {
        let end = (row + rows_per_tile).min(height as usize);
        for y in row..end {
            let push = |coords: &mut Vec<(u16, u16)>, x: u32| {
                if mask.map_or(true, |m| !m.get(x, y as u32)) {
                    coords.push((x as u16, y as u16));
                }
            };
            if (y - row) % 2 == 0 {
                for x in 0..width {
                    push(&mut coords, x);
                }
            } else {
                for x in (0..width).rev() {
                    push(&mut coords, x);
                }
            }
        }
        row = end;
    }
    coords
}

fn normalize_gray(image: &image::GrayImage) -> Vec<f32> {
    image.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

fn run_parallel<F: Fn() + Sync>(threads: usize, f: F) {
    if threads <= 1 {
        f();
        return;
    }
    std::thread::scope(|s| {
        for _ in 1..threads {
            s.spawn(&f);
        }
        f();
    });
}

/// f32 grid with relaxed atomic cells.
struct SharedGrid {
    width: u32,
    cells: Vec<AtomicU32>,
}

impl SharedGrid {
    fn from_map(map: &Map2D<f32>) -> Self {
        Self {
            width: map.width(),
            cells: map.data().iter().map(|v| AtomicU32::new(v.to_bits())).collect(),
        }
    }

    fn zeros(width: u32, height: u32) -> Self {
        Self::from_map(&Map2D::new(width, height, 0.0f32))
    }

    #[inline]
    fn get(&self, x: u32, y: u32) -> f32 {
        f32::from_bits(self.cells[(y * self.width + x) as usize].load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, x: u32, y: u32, v: f32) {
        self.cells[(y * self.width + x) as usize].store(v.to_bits(), Ordering::Relaxed);
    }

    fn to_map(&self) -> Map2D<f32> {
        let height = self.cells.len() as u32 / self.width;
        Map2D::from_vec(
            self.width,
            height,
            self.cells
                .iter()
                .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
                .collect(),
        )
    }
}

struct SharedNormalGrid {
    width: u32,
    cells: Vec<[AtomicU32; 3]>,
}

impl SharedNormalGrid {
    fn from_map(map: &NormalMap) -> Self {
        Self {
            width: map.width(),
            cells: map
                .data()
                .iter()
                .map(|n| {
                    [
                        AtomicU32::new(n.x.to_bits()),
                        AtomicU32::new(n.y.to_bits()),
                        AtomicU32::new(n.z.to_bits()),
                    ]
                })
                .collect(),
        }
    }

    #[inline]
    fn get(&self, x: u32, y: u32) -> Vector3<f32> {
        let c = &self.cells[(y * self.width + x) as usize];
        Vector3::new(
            f32::from_bits(c[0].load(Ordering::Relaxed)),
            f32::from_bits(c[1].load(Ordering::Relaxed)),
            f32::from_bits(c[2].load(Ordering::Relaxed)),
        )
    }

    #[inline]
    fn set(&self, x: u32, y: u32, n: Vector3<f32>) {
        let c = &self.cells[(y * self.width + x) as usize];
        c[0].store(n.x.to_bits(), Ordering::Relaxed);
        c[1].store(n.y.to_bits(), Ordering::Relaxed);
        c[2].store(n.z.to_bits(), Ordering::Relaxed);
    }

    fn to_map(&self) -> NormalMap {
        let height = self.cells.len() as u32 / self.width;
        Map2D::from_vec(
            self.width,
            height,
            (0..self.cells.len())
                .map(|i| self.get(i as u32 % self.width, i as u32 / self.width))
                .collect(),
        )
    }
}

struct TargetView<'a> {
    gray: Vec<f32>,
    width: u32,
    height: u32,
    k: Matrix3<f64>,
    r_rel: Matrix3<f64>,
    t_rel: Vector3<f64>,
    camera: Camera,
    depth_map: Option<&'a DepthMap>,
}

struct Patch {
    vals: [f32; NUM_SAMPLES],
    mean: f32,
    var: f32,
}

struct Estimator<'a> {
    width: u32,
    height: u32,
    gray: Vec<f32>,
    k_inv: Matrix3<f64>,
    camera: Camera,
    targets: Vec<TargetView<'a>>,
    depth: SharedGrid,
    normal: SharedNormalGrid,
    conf: SharedGrid,
    coords: Vec<(u16, u16)>,
    cursor: AtomicUsize,
    d_min: f32,
    d_max: f32,
    opts: &'a DenseOptions,
    geometric: bool,
}

impl Estimator<'_> {
    fn score_pass(&self) {
        loop {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            if idx >= self.coords.len() {
                return;
            }
            let (x, y) = (self.coords[idx].0 as u32, self.coords[idx].1 as u32);
            let Some(patch) = self.gather_patch(x, y) else {
                self.depth.set(x, y, 0.0);
                self.normal.set(x, y, Vector3::zeros());
                self.conf.set(x, y, SCORE_WORST);
                continue;
            };
            let mut rng = StdRng::seed_from_u64(0x9E37_79B9 ^ (idx as u64));
            let view_dir = self.view_dir(x, y);
            let mut d = self.depth.get(x, y);
            let mut n = self.normal.get(x, y);
            if !(d >= self.d_min && d <= self.d_max) {
                d = self.random_depth(&mut rng);
                n = self.random_normal(&mut rng, view_dir);
            } else if n.dot(&view_dir) >= 0.0 {
                n = self.random_normal(&mut rng, view_dir);
            }
            self.depth.set(x, y, d);
            self.normal.set(x, y, n);
            self.conf.set(x, y, self.score_pixel(x, y, d, n, &patch));
        }
    }

    fn refine_pass(&self, iter: u32) {
        let reverse = iter % 2 == 1;
        loop {
            let claim = self.cursor.fetch_add(1, Ordering::SeqCst);
            if claim >= self.coords.len() {
                return;
            }
            let idx = if reverse { self.coords.len() - 1 - claim } else { claim };
            let (x, y) = (self.coords[idx].0 as u32, self.coords[idx].1 as u32);
            let Some(patch) = self.gather_patch(x, y) else {
                continue;
            };
            let view_dir = self.view_dir(x, y);
            let mut best_d = self.depth.get(x, y);
            let mut best_n = self.normal.get(x, y);
            let mut best_score = self.conf.get(x, y);
            if best_d <= 0.0 {
                continue;
            }

            // propagate: adopt a strictly better neighbor plane
            for (nx, ny) in self.four_neighbors(x, y) {
                let dn = self.depth.get(nx, ny);
                let nn = self.normal.get(nx, ny);
                if dn <= 0.0 || nn == Vector3::zeros() {
                    continue;
                }
                let d_cand = self
                    .propagate_depth(nx, ny, dn, &nn, x, y)
                    .clamp(self.d_min, self.d_max);
                let score = self.score_pixel(x, y, d_cand, nn, &patch)
                    * self.smoothness(x, y, d_cand, &nn);
                if score < best_score {
                    best_score = score;
                    best_d = d_cand;
                    best_n = nn;
                }
            }

            // refine: random perturbations in a shrinking bracket
            let mut rng = StdRng::seed_from_u64(
                0x2545_F491_4F6C_DD1D ^ ((iter as u64) << 40) ^ (idx as u64),
            );
            for step in 0..REFINE_STEPS {
                let scale = 0.5f32.powi(step as i32 + 1);
                let d_cand = (best_d * (rng.gen_range(-scale..scale)).exp())
                    .clamp(self.d_min, self.d_max);
                let n_cand = self.perturb_normal(&mut rng, best_n, view_dir, scale * REFINE_ANGLE);
                let score = self.score_pixel(x, y, d_cand, n_cand, &patch)
                    * self.smoothness(x, y, d_cand, &n_cand);
                if score < best_score {
                    best_score = score;
                    best_d = d_cand;
                    best_n = n_cand;
                }
            }

            self.depth.set(x, y, best_d);
            self.normal.set(x, y, best_n);
            self.conf.set(x, y, best_score);
        }
    }

    fn finalize_pass(&self) {
        let keep = self.opts.ncc_threshold_keep;
        loop {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            if idx >= self.coords.len() {
                return;
            }
            let (x, y) = (self.coords[idx].0 as u32, self.coords[idx].1 as u32);
            let d = self.depth.get(x, y);
            let score = self.conf.get(x, y);
            if d <= 0.0 || score >= keep || score >= 1.0 {
                self.depth.set(x, y, 0.0);
                self.normal.set(x, y, Vector3::zeros());
                self.conf.set(x, y, 0.0);
            } else {
                self.conf.set(x, y, 1.0 - score);
            }
        }
    }

    /// Camera-frame direction of the pixel ray.
    fn view_dir(&self, x: u32, y: u32) -> Vector3<f32> {
        let ray = self.k_inv * Vector3::new(x as f64, y as f64, 1.0);
        let ray = ray.normalize();
        Vector3::new(ray.x as f32, ray.y as f32, ray.z as f32)
    }

    fn gather_patch(&self, x: u32, y: u32) -> Option<Patch> {
        let (xi, yi) = (x as i64, y as i64);
        if xi < HALF_WINDOW
            || yi < HALF_WINDOW
            || xi + HALF_WINDOW >= self.width as i64
            || yi + HALF_WINDOW >= self.height as i64
        {
            return None;
        }
        let mut vals = [0.0f32; NUM_SAMPLES];
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        let mut i = 0;
        for dy in -HALF_WINDOW..=HALF_WINDOW {
            for dx in -HALF_WINDOW..=HALF_WINDOW {
                let v = self.gray[((yi + dy) as u32 * self.width + (xi + dx) as u32) as usize];
                vals[i] = v;
                sum += v;
                sum_sq += v * v;
                i += 1;
            }
        }
        let mean = sum / NUM_SAMPLES as f32;
        let var = (sum_sq / NUM_SAMPLES as f32 - mean * mean).max(0.0);
        Some(Patch { vals, mean, var })
    }

    /// ZNCC in [0,2] (0 = best) of the plane `(d, n)` at pixel `(x, y)`,
    /// aggregated over the target views.
    fn score_pixel(&self, x: u32, y: u32, d: f32, n: Vector3<f32>, patch: &Patch) -> f32 {
        let n64 = Vector3::new(n.x as f64, n.y as f64, n.z as f64);
        let x0 = self.k_inv * Vector3::new(x as f64, y as f64, 1.0) * d as f64;
        let plane_d = n64.dot(&x0);
        if plane_d.abs() < 1e-12 || patch.var < 1e-10 {
            return SCORE_WORST;
        }

        let mut scores: Vec<f32> = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let h = target.k
                * (target.r_rel + target.t_rel * (n64 / plane_d).transpose())
                * self.k_inv;
            let mut score = self.score_target(target, x, y, &h, patch);
            if self.geometric {
                score += self.geometric_penalty(target, x, y, &x0);
            }
            scores.push(score);
        }
        aggregate_scores(&mut scores, self.opts.aggregation)
    }

    fn score_target(
        &self,
        target: &TargetView,
        x: u32,
        y: u32,
        h: &Matrix3<f64>,
        patch: &Patch,
    ) -> f32 {
        let mut sum_t = 0.0f32;
        let mut sum_tt = 0.0f32;
        let mut sum_rt = 0.0f32;
        let mut i = 0;
        for dy in -HALF_WINDOW..=HALF_WINDOW {
            for dx in -HALF_WINDOW..=HALF_WINDOW {
                let p = h * Vector3::new((x as i64 + dx) as f64, (y as i64 + dy) as f64, 1.0);
                if p.z <= 1e-9 {
                    return SCORE_ROBUST;
                }
                let Some(v) = bilinear(&target.gray, target.width, target.height, p.x / p.z, p.y / p.z)
                else {
                    return SCORE_ROBUST;
                };
                sum_t += v;
                sum_tt += v * v;
                sum_rt += v * patch.vals[i];
                i += 1;
            }
        }
        let nrm = NUM_SAMPLES as f32;
        let mean_t = sum_t / nrm;
        let var_t = (sum_tt / nrm - mean_t * mean_t).max(0.0);
        let denom = (patch.var * var_t).sqrt();
        if denom < 1e-10 {
            return SCORE_ROBUST;
        }
        let zncc = (sum_rt / nrm - patch.mean * mean_t) / denom;
        (1.0 - zncc).clamp(0.0, SCORE_WORST)
    }

    /// Reprojection disagreement against the target's own depth estimate.
    fn geometric_penalty(&self, target: &TargetView, x: u32, y: u32, x0: &Vector3<f64>) -> f32 {
        let Some(depth_map) = target.depth_map else {
            return 0.0;
        };
        let weight = self.opts.geometric_weight;
        let world = self.camera.camera_to_world(&Point3::from(*x0));
        let (pb, zb) = target.camera.world_to_image(&world);
        let (bx, by) = (pb.x.round() as i64, pb.y.round() as i64);
        if zb <= 0.0 || !depth_map.is_inside(bx, by) {
            return weight * GEOMETRIC_ERROR_CAP;
        }
        let db = depth_map.get(bx as u32, by as u32);
        if db <= 0.0 {
            return weight * GEOMETRIC_ERROR_CAP;
        }
        let world_b = target
            .camera
            .image_to_world(Point2::new(bx as f64, by as f64), db as f64);
        let (pr, _) = self.camera.world_to_image(&world_b);
        let err = ((pr.x - x as f64).powi(2) + (pr.y - y as f64).powi(2)).sqrt() as f32;
        weight * err.min(GEOMETRIC_ERROR_CAP)
    }

    /// Discount when the candidate agrees with already-estimated neighbors;
    /// stabilizes textureless regions.
    fn smoothness(&self, x: u32, y: u32, d: f32, n: &Vector3<f32>) -> f32 {
        let mut matches = 0u32;
        for (nx, ny) in self.four_neighbors(x, y) {
            let dn = self.depth.get(nx, ny);
            if dn <= 0.0 {
                continue;
            }
            if is_depth_similar(d, dn, self.opts.depth_diff_threshold * 2.0)
                && n.dot(&self.normal.get(nx, ny)) > 0.93
            {
                matches += 1;
            }
        }
        SMOOTH_BONUS.powi(matches.min(2) as i32)
    }

    fn four_neighbors(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
        let (w, h) = (self.width, self.height);
        [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
            .into_iter()
            .filter_map(move |(dx, dy)| {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                (nx >= 0 && ny >= 0 && (nx as u32) < w && (ny as u32) < h)
                    .then_some((nx as u32, ny as u32))
            })
    }

    /// Depth of the neighbor's plane intersected with this pixel's ray.
    fn propagate_depth(&self, nx: u32, ny: u32, dn: f32, nn: &Vector3<f32>, x: u32, y: u32) -> f32 {
        let n64 = Vector3::new(nn.x as f64, nn.y as f64, nn.z as f64);
        let xn = self.k_inv * Vector3::new(nx as f64, ny as f64, 1.0);
        let xr = self.k_inv * Vector3::new(x as f64, y as f64, 1.0);
        let denom = n64.dot(&xr);
        if denom.abs() < 1e-12 {
            return dn;
        }
        let d = (n64.dot(&xn) * dn as f64 / denom) as f32;
        if d.is_finite() && d > 0.0 {
            d
        } else {
            dn
        }
    }

    /// Log-uniform depth in the current bracket.
    fn random_depth(&self, rng: &mut StdRng) -> f32 {
        let lo = self.d_min.max(1e-6).ln();
        let hi = self.d_max.max(self.d_min * 1.01 + 1e-6).ln();
        if hi <= lo {
            return self.d_min.max(1e-6);
        }
        rng.gen_range(lo..hi).exp()
    }

    /// Uniform direction in the hemisphere facing the camera.
    fn random_normal(&self, rng: &mut StdRng, view_dir: Vector3<f32>) -> Vector3<f32> {
        let axis = -view_dir;
        let (u, v) = tangent_basis(&axis);
        let cos_t: f32 = rng.gen_range(0.15..1.0);
        let sin_t = (1.0 - cos_t * cos_t).sqrt();
        let phi: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
        (axis * cos_t + (u * phi.cos() + v * phi.sin()) * sin_t).normalize()
    }

    /// Small-angle perturbation of `n`, kept front-facing.
    fn perturb_normal(
        &self,
        rng: &mut StdRng,
        n: Vector3<f32>,
        view_dir: Vector3<f32>,
        max_angle: f32,
    ) -> Vector3<f32> {
        let (u, v) = tangent_basis(&n);
        let t = max_angle.tan();
        let cand = (n + u * rng.gen_range(-t..t) + v * rng.gen_range(-t..t)).normalize();
        if cand.dot(&view_dir) < 0.0 {
            cand
        } else {
            n
        }
    }
}

fn tangent_basis(n: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let helper = if n.x.abs() < 0.9 {
        Vector3::new(1.0, 0.0, 0.0)
    } else {
        Vector3::new(0.0, 1.0, 0.0)
    };
    let u = n.cross(&helper).normalize();
    let v = n.cross(&u);
    (u, v)
}

fn aggregate_scores(scores: &mut [f32], aggregation: ScoreAggregation) -> f32 {
    if scores.is_empty() {
        return SCORE_WORST;
    }
    match aggregation {
        ScoreAggregation::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
        ScoreAggregation::Min => scores.iter().copied().fold(f32::MAX, f32::min),
        ScoreAggregation::NthBest => {
            let nth = usize::from(scores.len() > 1);
            scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            scores[nth]
        }
        ScoreAggregation::BottomK => {
            let k = (scores.len() / 2).max(1);
            scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            scores[..k].iter().sum::<f32>() / k as f32
        }
    }
}

fn bilinear(gray: &[f32], width: u32, height: u32, x: f64, y: f64) -> Option<f32> {
    if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let at = |xx: u32, yy: u32| gray[(yy * width + xx) as usize];
    Some(
        at(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + at(x1, y0) * fx * (1.0 - fy)
            + at(x0, y1) * (1.0 - fx) * fy
            + at(x1, y1) * fx * fy,
    )
}
