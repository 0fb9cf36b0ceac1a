use mvs_core::camera::Camera;
use nalgebra::{Matrix3, Point2, Point3, Rotation3};

#[test]
fn test_pinhole_projection_round_trip() {
    let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
    let camera = Camera::new(k, Matrix3::identity(), Point3::origin());

    let p3 = Point3::new(1.0, 1.0, 5.0);
    let (p2, depth) = camera.world_to_image(&p3);

    // x = 1.0 * 500 / 5.0 + 320 = 420
    // y = 1.0 * 500 / 5.0 + 240 = 340
    assert!((p2.x - 420.0).abs() < 1e-5);
    assert!((p2.y - 340.0).abs() < 1e-5);
    assert!((depth - 5.0).abs() < 1e-9);

    let p3_back = camera.image_to_world(p2, depth);
    assert!((p3_back - p3).norm() < 1e-9);
}

#[test]
fn test_posed_camera_consistency() {
    let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
    let r = Rotation3::from_euler_angles(0.1, -0.2, 0.05).into_inner();
    let camera = Camera::new(k, r, Point3::new(0.5, -0.3, 1.0));

    // a point two units in front of the camera along its optical axis
    let target = Point3::from(camera.c.coords + camera.view_direction() * 2.0);
    let cam_space = camera.world_to_camera(&target);
    assert!((cam_space.z - 2.0).abs() < 1e-9);
    let (px, _) = camera.world_to_image(&target);
    assert!((px - Point2::new(320.0, 240.0)).norm() < 1e-6);
}

#[test]
fn test_scaled_camera_halves_fov_resolution() {
    let k = Matrix3::new(500.0, 0.0, 319.5, 0.0, 500.0, 239.5, 0.0, 0.0, 1.0);
    let camera = Camera::new(k, Matrix3::identity(), Point3::origin());
    let half = camera.scaled(0.5);
    // same field of view at half the width
    assert!((camera.fov_x(640) - half.fov_x(320)).abs() < 1e-9);
}
