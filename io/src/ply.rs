//! PLY (Polygon File Format) I/O
//!
//! ASCII PLY for the dense cloud. Besides position, normal and color, each
//! vertex carries its visibility as two list properties (`view`, `weight`),
//! so a fused cloud round-trips with its per-point observers intact.

use crate::{IoError, Result};
use mvs_core::PointCloud;
use nalgebra::{Point3, Vector3};
use std::io::{BufRead, Lines, Write};

#[derive(Default)]
struct VertexLayout {
    count: usize,
    has_normals: bool,
    has_colors: bool,
    has_views: bool,
    has_weights: bool,
}

fn parse_header<R: BufRead>(lines: &mut Lines<R>) -> Result<VertexLayout> {
    let mut layout = VertexLayout::default();
    let mut ascii = false;
    loop {
        let line = lines
            .next()
            .ok_or_else(|| IoError::Parse("PLY header ends prematurely".into()))??;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("format") => ascii = tokens.next() == Some("ascii"),
            Some("element") => {
                if tokens.next() == Some("vertex") {
                    layout.count = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| IoError::Parse("bad vertex element".into()))?;
                }
            }
            Some("property") => match tokens.last() {
                Some("nx") => layout.has_normals = true,
                Some("red") => layout.has_colors = true,
                Some("view") => layout.has_views = true,
                Some("weight") => layout.has_weights = true,
                _ => {}
            },
            Some("end_header") => break,
            _ => {}
        }
    }
    if !ascii {
        return Err(IoError::UnsupportedFormat(
            "only ASCII PLY is supported".into(),
        ));
    }
    Ok(layout)
}

/// Read a PLY point cloud, restoring visibility lists when present.
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud> {
    let mut lines = reader.lines();
    let layout = parse_header(&mut lines)?;

    let mut cloud = PointCloud::default();
    if layout.has_normals {
        cloud.normals = Some(Vec::with_capacity(layout.count));
    }
    if layout.has_colors {
        cloud.colors = Some(Vec::with_capacity(layout.count));
    }

    for _ in 0..layout.count {
        let line = lines
            .next()
            .ok_or_else(|| IoError::Parse("vertex data ends prematurely".into()))??;
        let mut fields = line.split_whitespace().map(|t| {
            t.parse::<f32>()
                .map_err(|_| IoError::Parse(format!("bad vertex field '{t}'")))
        });
        let mut take = |what: &str| -> Result<f32> {
            fields
                .next()
                .transpose()?
                .ok_or_else(|| IoError::InvalidData(format!("vertex is missing {what}")))
        };

        let idx = cloud.push(Point3::new(take("x")?, take("y")?, take("z")?));
        if layout.has_normals {
            let n = Vector3::new(take("nx")?, take("ny")?, take("nz")?);
            cloud.normals.as_mut().unwrap().push(n);
        }
        if layout.has_colors {
            let c = Point3::new(
                take("red")? / 255.0,
                take("green")? / 255.0,
                take("blue")? / 255.0,
            );
            cloud.colors.as_mut().unwrap().push(c);
        }
        if layout.has_views {
            let n_views = take("view count")? as usize;
            let mut views = Vec::with_capacity(n_views);
            for _ in 0..n_views {
                views.push(take("view id")? as u32);
            }
            let weights = if layout.has_weights {
                let n_weights = take("weight count")? as usize;
                if n_weights != n_views {
                    return Err(IoError::InvalidData(format!(
                        "vertex has {n_views} views but {n_weights} weights"
                    )));
                }
                let mut weights = Vec::with_capacity(n_weights);
                for _ in 0..n_weights {
                    weights.push(take("weight")?);
                }
                weights
            } else {
                vec![1.0; n_views]
            };
            for (view, weight) in views.into_iter().zip(weights) {
                cloud.insert_view(idx, view, weight);
            }
        }
    }
    Ok(cloud)
}

/// Write a point cloud as ASCII PLY. Visibility lists are emitted whenever
/// any point carries observers.
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let has_normals = cloud.normals.is_some();
    let has_colors = cloud.colors.is_some();
    let has_visibility = cloud.point_views.iter().any(|views| !views.is_empty());

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property float {axis}")?;
    }
    if has_normals {
        for axis in ["nx", "ny", "nz"] {
            writeln!(writer, "property float {axis}")?;
        }
    }
    if has_colors {
        for channel in ["red", "green", "blue"] {
            writeln!(writer, "property uchar {channel}")?;
        }
    }
    if has_visibility {
        writeln!(writer, "property list uchar uint view")?;
        writeln!(writer, "property list uchar float weight")?;
    }
    writeln!(writer, "end_header")?;

    for i in 0..cloud.len() {
        let p = cloud.points[i];
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;
        if let Some(normals) = &cloud.normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }
        if let Some(colors) = &cloud.colors {
            let c = colors[i];
            write!(
                writer,
                " {} {} {}",
                (c.x.clamp(0.0, 1.0) * 255.0) as u8,
                (c.y.clamp(0.0, 1.0) * 255.0) as u8,
                (c.z.clamp(0.0, 1.0) * 255.0) as u8
            )?;
        }
        if has_visibility {
            let views = &cloud.point_views[i];
            write!(writer, " {}", views.len())?;
            for view in views {
                write!(writer, " {view}")?;
            }
            let weights = &cloud.point_weights[i];
            write!(writer, " {}", weights.len())?;
            for weight in weights {
                write!(writer, " {weight}")?;
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fused_cloud() -> PointCloud {
        let mut cloud = PointCloud::default();
        cloud.colors = Some(Vec::new());
        cloud.normals = Some(Vec::new());
        for i in 0..3u32 {
            let idx = cloud.push(Point3::new(i as f32, -0.5 * i as f32, 2.0));
            cloud.insert_view(idx, i + 2, 0.75);
            cloud.insert_view(idx, i, 1.5);
            cloud.colors.as_mut().unwrap().push(Point3::new(0.2, 0.4, 0.8));
            cloud.normals.as_mut().unwrap().push(Vector3::new(0.0, 0.0, -1.0));
        }
        cloud
    }

    #[test]
    fn test_ply_round_trips_visibility() {
        let cloud = fused_cloud();
        let mut buffer = Vec::new();
        write_ply(&mut buffer, &cloud).expect("write failed");

        let read_cloud = read_ply(Cursor::new(buffer)).expect("read failed");
        read_cloud.check_invariants().unwrap();
        assert_eq!(read_cloud.len(), 3);
        assert_eq!(read_cloud.point_views, cloud.point_views);
        assert_eq!(read_cloud.point_weights, cloud.point_weights);
        assert!(read_cloud.normals.is_some());
        let colors = read_cloud.colors.as_ref().unwrap();
        assert!((colors[0].z - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_ply_plain_cloud_has_no_observers() {
        let cloud = PointCloud::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 3.0),
        ]);
        let mut buffer = Vec::new();
        write_ply(&mut buffer, &cloud).expect("write failed");
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(!text.contains("property list"));

        let read_cloud = read_ply(Cursor::new(buffer)).expect("read failed");
        assert_eq!(read_cloud.len(), 2);
        assert!((read_cloud.points[1].y - 2.0).abs() < 1e-6);
        assert!(read_cloud.point_views.iter().all(|views| views.is_empty()));
    }

    #[test]
    fn test_ply_empty_cloud() {
        let cloud = PointCloud::default();
        let mut buffer = Vec::new();
        write_ply(&mut buffer, &cloud).expect("write failed");
        let read_cloud = read_ply(Cursor::new(buffer)).expect("read failed");
        assert_eq!(read_cloud.len(), 0);
    }

    #[test]
    fn test_ply_rejects_binary_format() {
        let header = "ply\nformat binary_little_endian 1.0\nelement vertex 0\nend_header\n";
        assert!(matches!(
            read_ply(Cursor::new(header)),
            Err(IoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_ply_mismatched_weight_list_is_rejected() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nproperty list uchar uint view\nproperty list uchar float weight\nend_header\n0 0 2 2 0 1 1 0.5\n";
        assert!(matches!(
            read_ply(Cursor::new(text)),
            Err(IoError::InvalidData(_))
        ));
    }
}
