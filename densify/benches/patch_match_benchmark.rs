use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma};
use mvs_core::{Camera, DenseOptions, DepthMap, NormalMap};
use mvs_densify::{DenseBackend, DepthData, PatchMatchBackend, ViewData};
use nalgebra::{Matrix3, Point2, Point3, Vector3};

fn plane_view(cx: f64, size: u32) -> (GrayImage, Camera) {
    let k = Matrix3::new(
        size as f64,
        0.0,
        size as f64 / 2.0,
        0.0,
        size as f64,
        size as f64 / 2.0,
        0.0,
        0.0,
        1.0,
    );
    let camera = Camera::new(k, Matrix3::identity(), Point3::new(cx, 0.0, 0.0));
    let mut img = GrayImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let p = camera.image_to_world(Point2::new(x as f64, y as f64), 2.0);
            let v = 0.5 + 0.2 * (p.x * 9.0).sin() + 0.2 * (p.y * 11.0).cos();
            img.put_pixel(x, y, Luma([(v.clamp(0.0, 1.0) * 255.0) as u8]));
        }
    }
    (img, camera)
}

fn plane_depth_data(size: u32) -> DepthData {
    let (ref_img, ref_cam) = plane_view(0.0, size);
    let (trg_img, trg_cam) = plane_view(0.1, size);
    let mut data = DepthData::default();
    data.camera = ref_cam;
    data.depth_map = DepthMap::new(size, size, 2.0);
    data.normal_map = NormalMap::new(size, size, Vector3::new(0.0, 0.0, -1.0));
    data.d_min = 1.6;
    data.d_max = 2.4;
    data.views.push(ViewData {
        image_id: 0,
        name: "ref".into(),
        scale: 1.0,
        camera: ref_cam,
        image: ref_img,
        depth_map: None,
    });
    data.views.push(ViewData {
        image_id: 1,
        name: "trg".into(),
        scale: 1.0,
        camera: trg_cam,
        image: trg_img,
        depth_map: None,
    });
    data
}

fn bench_estimate_depth_map(c: &mut Criterion) {
    let backend = PatchMatchBackend;
    let opts = DenseOptions {
        estimation_iters: 2,
        ..DenseOptions::default()
    };
    c.bench_function("patch_match_32", |b| {
        b.iter(|| {
            let mut data = plane_depth_data(32);
            backend
                .estimate_depth_map(black_box(&mut data), None, &opts, 1, -1)
                .unwrap();
            black_box(data.depth_map)
        })
    });
    c.bench_function("patch_match_64_threaded", |b| {
        b.iter(|| {
            let mut data = plane_depth_data(64);
            backend
                .estimate_depth_map(black_box(&mut data), None, &opts, 4, -1)
                .unwrap();
            black_box(data.depth_map)
        })
    });
}

criterion_group!(benches, bench_estimate_depth_map);
criterion_main!(benches);
