//! The event-driven pipeline driving estimation, filtering and fusion across
//! all images with bounded concurrency.
//!
//! A FIFO queue with priority push-front feeds a pool of workers; a counting
//! semaphore (one permit) bounds the memory-heavy stages so only one
//! estimator or adjuster holds large buffers at a time.

use crate::backend::{DenseBackend, PatchMatchBackend};
use crate::cloud_filter;
use crate::depth_data::DepthData;
use crate::filter::{self, NeighborDepthData, ReferenceDepthData};
use crate::fusion;
use crate::init;
use crate::postprocess;
use crate::{Error, Result};
use log::{info, warn};
use mvs_core::{Camera, ConfidenceMap, DenseOptions, DepthMap, Map2D, PointCloud, Scene};
use mvs_io::compose_depth_file_path;
use nalgebra::Vector3;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, RwLock};

/// Work items carried by the driver queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ProcessImage(usize),
    EstimateDepthMap(usize),
    OptimizeDepthMap(usize),
    SaveDepthMap(usize),
    FilterDepthMap(usize),
    AdjustDepthMap(usize),
    Close,
    Fail,
}

pub(crate) struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push_back(&self, event: Event) {
        self.queue.lock().unwrap().push_back(event);
        self.ready.notify_all();
    }

    pub(crate) fn push_front(&self, event: Event) {
        self.queue.lock().unwrap().push_front(event);
        self.ready.notify_all();
    }

    /// Blocking dequeue.
    pub(crate) fn pop(&self) -> Event {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(event) = queue.pop_front() {
                return event;
            }
            queue = self.ready.wait(queue).unwrap();
        }
    }

    /// Non-blocking dequeue; `None` means the queue is drained.
    pub(crate) fn try_pop(&self) -> Option<Event> {
        self.queue.lock().unwrap().pop_front()
    }
}

pub(crate) struct Semaphore {
    count: Mutex<isize>,
    released: Condvar,
}

impl Semaphore {
    pub(crate) fn new(count: isize) -> Self {
        Self {
            count: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub(crate) fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count <= 0 {
            count = self.released.wait(count).unwrap();
        }
        *count -= 1;
    }

    pub(crate) fn signal(&self, n: isize) {
        *self.count.lock().unwrap() += n;
        self.released.notify_all();
    }
}

struct PhaseCtx {
    events: EventQueue,
    sem: Semaphore,
    idx_image: AtomicUsize,
    progress: AtomicUsize,
    /// Filter phase: images still waiting for their FilterDepthMap event.
    remaining: AtomicUsize,
    total: usize,
    failure: Mutex<Option<Error>>,
}

impl PhaseCtx {
    fn new(total: usize) -> Self {
        Self {
            events: EventQueue::new(),
            sem: Semaphore::new(1),
            idx_image: AtomicUsize::new(0),
            progress: AtomicUsize::new(0),
            remaining: AtomicUsize::new(total),
            total,
            failure: Mutex::new(None),
        }
    }

    fn next_image(&self) -> usize {
        self.idx_image.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn fail(&self, error: Error) {
        let mut failure = self.failure.lock().unwrap();
        if failure.is_none() {
            *failure = Some(error);
        }
        drop(failure);
        self.events.push_front(Event::Fail);
        // workers parked on the semaphore must drain too
        self.sem.signal(2 * self.total as isize);
    }

    /// One filter event finished; the last one pulses the semaphore so every
    /// pending adjust can proceed.
    fn signal_complete_filter(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.sem.signal(2 * self.total as isize);
        }
    }

    fn take_failure(self) -> Option<Error> {
        self.failure.into_inner().unwrap()
    }
}

/// The dense reconstruction driver: owns the scene, the per-image depth
/// data, the configuration and the estimation backend.
pub struct DenseReconstruction {
    scene: Scene,
    opts: DenseOptions,
    working_dir: PathBuf,
    depth_data: Vec<RwLock<DepthData>>,
    backend: Box<dyn DenseBackend>,
}

impl DenseReconstruction {
    pub fn new(scene: Scene, opts: DenseOptions, working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;
        let depth_data = (0..scene.images.len())
            .map(|_| RwLock::new(DepthData::default()))
            .collect();
        Ok(Self {
            scene,
            opts,
            working_dir,
            depth_data,
            backend: Box::new(PatchMatchBackend),
        })
    }

    pub fn with_backend(mut self, backend: Box<dyn DenseBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn threads(&self) -> usize {
        if self.opts.max_threads == 0 {
            num_cpus::get()
        } else {
            self.opts.max_threads
        }
    }

    fn dmap_path(&self, idx: usize, ext: &str) -> PathBuf {
        compose_depth_file_path(&self.working_dir, idx as u32, ext)
    }

    /// Estimate (and optionally geometrically refine) a depth map per image,
    /// then cross-view filter them.
    pub fn compute_depth_maps(&mut self) -> Result<()> {
        if self.opts.fusion_mode < 0 && self.backend.name() == "patch-match" {
            return Err(Error::BackendFailed(
                "fusion mode requests an external stereo backend".into(),
            ));
        }

        // rank and filter neighbor views for every image
        let mut n_valid = 0usize;
        for idx in 0..self.depth_data.len() {
            let data = self.depth_data[idx].get_mut().unwrap();
            data.neighbors.clear();
            data.seeds.clear();
            match init::select_views(&self.scene, &self.opts, idx as u32, data) {
                Ok(()) => n_valid += 1,
                Err(e) => warn!("image {idx} skipped: {e}"),
            }
        }
        if n_valid == 0 {
            warn!("no image has viable neighbor views");
            return Ok(());
        }

        for geo_iter in -1..self.opts.estimation_geometric_iters as i32 {
            self.run_estimate_phase(geo_iter)?;
            if geo_iter >= 0 {
                // each geometric round replaces the maps the next one reads
                for idx in 0..self.depth_data.len() {
                    let geo = self.dmap_path(idx, "geo.dmap");
                    if geo.exists() {
                        std::fs::rename(&geo, self.dmap_path(idx, "dmap"))?;
                    }
                }
            }
        }

        if self.opts.min_views_filter > 0 && self.scene.n_calibrated() > 1 {
            self.filter_depth_maps()?;
        }
        Ok(())
    }

    fn run_estimate_phase(&self, geo_iter: i32) -> Result<()> {
        let ctx = PhaseCtx::new(self.depth_data.len());
        ctx.events.push_back(Event::ProcessImage(0));
        let threads = self.threads();
        if threads > 1 {
            std::thread::scope(|scope| {
                for _ in 1..threads {
                    scope.spawn(|| self.estimate_worker(&ctx, threads, geo_iter));
                }
                self.estimate_worker(&ctx, threads, geo_iter);
            });
        } else {
            self.estimate_worker(&ctx, 1, geo_iter);
        }
        let done = ctx.progress.load(Ordering::SeqCst);
        info!(
            "estimated {done}/{} depth maps{}",
            self.depth_data.len(),
            if geo_iter < 0 {
                String::new()
            } else {
                format!(" (geometric iteration {geo_iter})")
            }
        );
        match ctx.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn estimate_worker(&self, ctx: &PhaseCtx, threads: usize, geo_iter: i32) {
        let n = self.depth_data.len();
        loop {
            match ctx.events.pop() {
                Event::ProcessImage(i) => {
                    if i >= n {
                        if threads > 1 {
                            ctx.events.push_back(Event::Close);
                        }
                        return;
                    }
                    self.handle_process_image(ctx, i, geo_iter);
                }
                Event::EstimateDepthMap(i) => {
                    // produce the next unit of work before the heavy stage
                    ctx.events.push_back(Event::ProcessImage(ctx.next_image()));
                    ctx.sem.wait();
                    let result = {
                        let mut data = self.depth_data[i].write().unwrap();
                        let mask = self.ignore_mask(i);
                        let result = self.backend.estimate_depth_map(
                            &mut data,
                            mask.as_ref(),
                            &self.opts,
                            threads,
                            geo_iter,
                        );
                        if result.is_ok()
                            && self.opts.estimate_normals == 2
                            && data.normal_map.is_empty()
                        {
                            // depth-only backend: rebuild the normals
                            data.normal_map =
                                mvs_core::estimate_normal_map(&data.camera, &data.depth_map);
                        }
                        result
                    };
                    ctx.sem.signal(1);
                    match result {
                        Ok(()) => {
                            if self.opts.optimize & DenseOptions::OPTIMIZE != 0 {
                                ctx.events.push_front(Event::OptimizeDepthMap(i));
                            } else {
                                ctx.events.push_front(Event::SaveDepthMap(i));
                            }
                        }
                        Err(e) => {
                            warn!("image {i} skipped: {e}");
                            let mut data = self.depth_data[i].write().unwrap();
                            data.release();
                            data.release_images();
                        }
                    }
                }
                Event::OptimizeDepthMap(i) => {
                    let mut data = self.depth_data[i].write().unwrap();
                    if self.opts.optimize & DenseOptions::REMOVE_SPECKLES != 0 {
                        postprocess::remove_small_segments(&mut data, &self.opts);
                    }
                    if self.opts.optimize & DenseOptions::FILL_GAPS != 0 {
                        postprocess::gap_interpolation(&mut data, &self.opts);
                    }
                    drop(data);
                    ctx.events.push_front(Event::SaveDepthMap(i));
                }
                Event::SaveDepthMap(i) => {
                    if let Err(e) = self.handle_save(i, geo_iter) {
                        ctx.fail(e);
                        continue;
                    }
                    ctx.progress.fetch_add(1, Ordering::SeqCst);
                }
                Event::Close => {
                    if threads > 1 {
                        ctx.events.push_back(Event::Close);
                    }
                    return;
                }
                Event::Fail => {
                    ctx.events.push_front(Event::Fail);
                    return;
                }
                other => {
                    debug_assert!(false, "unexpected event {other:?} in estimate phase");
                }
            }
        }
    }

    fn handle_process_image(&self, ctx: &PhaseCtx, i: usize, geo_iter: i32) {
        let precomputed = self.opts.fusion_mode >= 0
            && geo_iter < 0
            && self.dmap_path(i, "dmap").exists();
        {
            let mut data = self.depth_data[i].write().unwrap();
            if !data.is_valid() {
                ctx.events.push_back(Event::ProcessImage(ctx.next_image()));
                return;
            }
            let load_depth_maps = if precomputed {
                -1
            } else if geo_iter >= 0 {
                1
            } else {
                0
            };
            if let Err(e) = init::init_views(
                &self.scene,
                &self.opts,
                i as u32,
                &mut data,
                None,
                self.opts.num_views,
                !precomputed,
                load_depth_maps,
                &self.working_dir,
            ) {
                warn!("image {i} skipped: {e}");
                ctx.events.push_back(Event::ProcessImage(ctx.next_image()));
                return;
            }
        }
        if precomputed {
            if self.opts.optimize & DenseOptions::OPTIMIZE != 0 {
                let mut data = self.depth_data[i].write().unwrap();
                if let Err(e) = data.load(&self.dmap_path(i, "dmap")) {
                    ctx.fail(e);
                    return;
                }
                ctx.events.push_front(Event::OptimizeDepthMap(i));
            }
            ctx.events.push_back(Event::ProcessImage(ctx.next_image()));
        } else {
            ctx.events.push_front(Event::EstimateDepthMap(i));
        }
    }

    fn handle_save(&self, i: usize, geo_iter: i32) -> Result<()> {
        let mut data = self.depth_data[i].write().unwrap();
        if !data.depth_map.is_empty() {
            let ext = if geo_iter < 0 { "dmap" } else { "geo.dmap" };
            data.save(&self.dmap_path(i, ext))?;
            if self.opts.verbosity > 2 {
                self.export_snapshots(&data, i)?;
            }
        }
        data.release_images();
        data.release();
        Ok(())
    }

    fn export_snapshots(&self, data: &DepthData, i: usize) -> Result<()> {
        let to_io = |e: mvs_io::IoError| Error::DepthMapIo(e.to_string());
        let save_png = |img: image::GrayImage, path: PathBuf| -> Result<()> {
            img.save(&path)
                .map_err(|e| Error::DepthMapIo(format!("{}: {e}", path.display())))
        };
        save_png(
            mvs_io::depth_map_to_image(&data.depth_map),
            self.dmap_path(i, "png"),
        )?;
        save_png(
            mvs_io::confidence_map_to_image(&data.conf_map),
            self.dmap_path(i, "conf.png"),
        )?;
        mvs_io::export_depth_snapshot(
            &self.dmap_path(i, "ply"),
            &data.camera,
            &data.depth_map,
            (!data.normal_map.is_empty()).then_some(&data.normal_map),
        )
        .map_err(to_io)?;
        if self.opts.verbosity > 4 && !data.normal_map.is_empty() {
            mvs_io::normal_map_to_image(&data.normal_map)
                .save(self.dmap_path(i, "normal.png"))
                .map_err(|e| Error::DepthMapIo(e.to_string()))?;
        }
        Ok(())
    }

    fn ignore_mask(&self, i: usize) -> Option<Map2D<bool>> {
        let label = self.opts.ignore_mask_label;
        if label < 0 {
            return None;
        }
        let image = &self.scene.images[i];
        let mask = image.mask.as_ref()?;
        if (mask.width(), mask.height()) != (image.width, image.height) {
            warn!("ignore mask of image {i} has mismatched size");
            return None;
        }
        let mut out = Map2D::new(mask.width(), mask.height(), false);
        for y in 0..mask.height() {
            for x in 0..mask.width() {
                if mask.get_pixel(x, y)[0] as i32 == label {
                    out.set(x, y, true);
                }
            }
        }
        Some(out)
    }

    /// Cross-view filter every estimated depth map, then merge the filtered
    /// maps back (adjust step).
    pub fn filter_depth_maps(&mut self) -> Result<()> {
        if self.scene.n_calibrated() < 2 {
            return Err(Error::FilterPrerequisitesUnmet);
        }
        let valid: Vec<usize> = (0..self.depth_data.len())
            .filter(|&i| {
                self.depth_data[i].read().unwrap().is_valid()
                    && self.dmap_path(i, "dmap").exists()
            })
            .collect();
        if valid.is_empty() {
            return Ok(());
        }

        let ctx = PhaseCtx::new(valid.len());
        for &i in &valid {
            ctx.events.push_back(Event::FilterDepthMap(i));
        }
        let threads = self.threads();
        if threads > 1 {
            std::thread::scope(|scope| {
                for _ in 1..threads {
                    scope.spawn(|| self.filter_worker(&ctx));
                }
                self.filter_worker(&ctx);
            });
        } else {
            self.filter_worker(&ctx);
        }
        info!(
            "filtered {}/{} depth maps",
            ctx.progress.load(Ordering::SeqCst),
            valid.len()
        );
        match ctx.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn filter_worker(&self, ctx: &PhaseCtx) {
        while let Some(event) = ctx.events.try_pop() {
            match event {
                Event::FilterDepthMap(i) => {
                    if let Err(e) = self.handle_filter(ctx, i) {
                        ctx.fail(e);
                        return;
                    }
                }
                Event::AdjustDepthMap(i) => {
                    if let Err(e) = self.handle_adjust(ctx, i) {
                        ctx.fail(e);
                        return;
                    }
                }
                Event::Fail => {
                    ctx.events.push_front(Event::Fail);
                    return;
                }
                other => {
                    debug_assert!(false, "unexpected event {other:?} in filter phase");
                }
            }
        }
    }

    fn handle_filter(&self, ctx: &PhaseCtx, i: usize) -> Result<()> {
        const MAX_NEIGHBORS: usize = 8;
        {
            let mut data = self.depth_data[i].write().unwrap();
            if !data.is_valid() {
                drop(data);
                ctx.signal_complete_filter();
                return Ok(());
            }
            data.inc_ref(&self.dmap_path(i, "dmap"))?;
        }
        let (camera, depth_map, conf_map, d_min, d_max, neighbors) = {
            let data = self.depth_data[i].read().unwrap();
            (
                data.camera,
                data.depth_map.clone(),
                default_conf(&data.conf_map, &data.depth_map),
                data.d_min,
                data.d_max,
                data.neighbors.clone(),
            )
        };

        // load and snapshot up to 8 neighbor depth maps
        let mut snapshots: Vec<(u32, Camera, DepthMap, ConfidenceMap)> = Vec::new();
        for neighbor in &neighbors {
            if snapshots.len() == MAX_NEIGHBORS {
                break;
            }
            let b = neighbor.id as usize;
            let mut pair = self.depth_data[b].write().unwrap();
            if !pair.is_valid() {
                continue;
            }
            if let Err(e) = pair.inc_ref(&self.dmap_path(b, "dmap")) {
                drop(pair);
                self.depth_data[i].write().unwrap().dec_ref();
                return Err(e);
            }
            snapshots.push((
                neighbor.id,
                pair.camera,
                pair.depth_map.clone(),
                default_conf(&pair.conf_map, &pair.depth_map),
            ));
            pair.dec_ref();
        }

        let reference = ReferenceDepthData {
            id: i as u32,
            camera,
            depth_map: &depth_map,
            conf_map: &conf_map,
            d_min,
            d_max,
        };
        let neighbor_refs: Vec<NeighborDepthData> = snapshots
            .iter()
            .map(|(id, camera, depth, conf)| NeighborDepthData {
                id: *id,
                camera: *camera,
                depth_map: depth,
                conf_map: conf,
            })
            .collect();
        let filtered =
            filter::filter_depth_map(&reference, &neighbor_refs, &self.opts, self.scene.n_calibrated());
        self.depth_data[i].write().unwrap().dec_ref();

        match filtered {
            Ok(Some((new_depth, new_conf))) => {
                let to_io = |e: mvs_io::IoError| Error::DepthMapIo(e.to_string());
                mvs_io::save_depth_map(&self.dmap_path(i, "filtered.dmap"), &new_depth)
                    .map_err(to_io)?;
                mvs_io::save_confidence_map(&self.dmap_path(i, "filtered.cmap"), &new_conf)
                    .map_err(to_io)?;
                ctx.events.push_back(Event::AdjustDepthMap(i));
                ctx.signal_complete_filter();
                Ok(())
            }
            Ok(None) => {
                ctx.signal_complete_filter();
                Ok(())
            }
            Err(e) => {
                ctx.signal_complete_filter();
                Err(e)
            }
        }
    }

    fn handle_adjust(&self, ctx: &PhaseCtx, i: usize) -> Result<()> {
        // adjusts run after every filter read the unmodified maps
        ctx.sem.wait();
        let to_io = |e: mvs_io::IoError| Error::DepthMapIo(e.to_string());
        let filtered_dmap = self.dmap_path(i, "filtered.dmap");
        let filtered_cmap = self.dmap_path(i, "filtered.cmap");

        let mut data = self.depth_data[i].write().unwrap();
        data.inc_ref(&self.dmap_path(i, "dmap"))?;
        data.depth_map = mvs_io::load_depth_map(&filtered_dmap).map_err(to_io)?;
        data.conf_map = mvs_io::load_confidence_map(&filtered_cmap).map_err(to_io)?;
        // keep the validity invariant: discarded pixels lose their normal
        if !data.normal_map.is_empty() {
            for y in 0..data.depth_map.height() {
                for x in 0..data.depth_map.width() {
                    if data.depth_map.get(x, y) <= 0.0 {
                        data.normal_map.set(x, y, Vector3::zeros());
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&filtered_dmap);
        let _ = std::fs::remove_file(&filtered_cmap);
        if self.opts.verbosity > 2 {
            mvs_io::depth_map_to_image(&data.depth_map)
                .save(self.dmap_path(i, "filtered.png"))
                .map_err(|e| Error::DepthMapIo(e.to_string()))?;
        }
        data.save(&self.dmap_path(i, "dmap"))?;
        data.dec_ref();
        drop(data);
        ctx.progress.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Fuse the saved depth maps into one cloud, joining corresponding
    /// pixels and handling free-space violations.
    pub fn fuse_depth_maps(&mut self) -> Result<PointCloud> {
        self.with_depth_data(|scene, datas, dir, opts| {
            fusion::fuse_depth_maps(scene, datas, dir, opts)
        })
    }

    /// Simple union of all depth maps.
    pub fn merge_depth_maps(&mut self) -> Result<PointCloud> {
        self.with_depth_data(|scene, datas, dir, opts| {
            fusion::merge_depth_maps(scene, datas, dir, opts)
        })
    }

    /// Remove fused points whose visibility accounting falls at or below
    /// `th_remove`.
    pub fn filter_point_cloud(&self, cloud: &mut PointCloud, th_remove: i32) {
        cloud_filter::point_cloud_filter(cloud, &self.scene.images, th_remove);
    }

    fn with_depth_data<T>(
        &mut self,
        f: impl FnOnce(&Scene, &mut [DepthData], &Path, &DenseOptions) -> Result<T>,
    ) -> Result<T> {
        let mut datas: Vec<DepthData> = std::mem::take(&mut self.depth_data)
            .into_iter()
            .map(|lock| lock.into_inner().unwrap())
            .collect();
        let result = f(&self.scene, &mut datas, &self.working_dir, &self.opts);
        self.depth_data = datas.into_iter().map(RwLock::new).collect();
        result
    }
}

fn default_conf(conf: &ConfidenceMap, depth: &DepthMap) -> ConfidenceMap {
    if conf.is_empty() {
        ConfidenceMap::new(depth.width(), depth.height(), 0.9)
    } else {
        conf.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_event_queue_push_front_preempts() {
        let queue = EventQueue::new();
        queue.push_back(Event::ProcessImage(0));
        queue.push_back(Event::ProcessImage(1));
        queue.push_front(Event::EstimateDepthMap(7));
        assert_eq!(queue.pop(), Event::EstimateDepthMap(7));
        assert_eq!(queue.pop(), Event::ProcessImage(0));
        assert_eq!(queue.try_pop(), Some(Event::ProcessImage(1)));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_event_queue_blocking_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(EventQueue::new());
        let q = queue.clone();
        let handle = std::thread::spawn(move || q.pop());
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.push_back(Event::Close);
        assert_eq!(handle.join().unwrap(), Event::Close);
    }

    #[test]
    fn test_semaphore_admits_one_at_a_time() {
        let sem = Semaphore::new(1);
        let inside = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    sem.wait();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.signal(1);
                });
            }
        });
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_semaphore_pulse_releases_all_waiters() {
        let sem = std::sync::Arc::new(Semaphore::new(0));
        let released = std::sync::Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let sem = sem.clone();
            let released = released.clone();
            handles.push(std::thread::spawn(move || {
                sem.wait();
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        sem.signal(6);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }
}
