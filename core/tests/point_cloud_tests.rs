use mvs_core::point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};

#[test]
fn test_fused_cloud_bookkeeping() {
    let mut cloud = PointCloud::default();
    cloud.colors = Some(Vec::new());
    cloud.normals = Some(Vec::new());

    for i in 0..4u32 {
        let idx = cloud.push(Point3::new(i as f32, 0.0, 2.0));
        cloud.insert_view(idx, i, 0.5);
        cloud.insert_view(idx, (i + 1) % 4, 0.25);
        cloud.colors.as_mut().unwrap().push(Point3::new(0.5, 0.5, 0.5));
        cloud.normals.as_mut().unwrap().push(Vector3::new(0.0, 0.0, -1.0));
    }
    cloud.check_invariants().unwrap();
    assert_eq!(cloud.len(), 4);
    // views stay sorted regardless of insertion order
    assert_eq!(cloud.point_views[3], vec![0, 3]);

    cloud.remove_point(1);
    cloud.check_invariants().unwrap();
    assert_eq!(cloud.len(), 3);
    assert_eq!(cloud.colors.as_ref().unwrap().len(), 3);
}

#[test]
fn test_invariant_violations_are_reported() {
    let mut cloud = PointCloud::new(vec![Point3::origin()]);
    cloud.point_weights.push(vec![1.0]);
    let err = cloud.check_invariants().unwrap_err();
    assert!(err.to_string().contains("disagree"));
}
