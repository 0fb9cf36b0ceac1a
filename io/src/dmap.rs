//! Depth-map files
//!
//! A `.dmap` carries everything needed to reuse a depth map without the
//! scene: source image name, participating view ids, image size, camera,
//! depth bounds, the depth map and optional normal/confidence maps. The
//! format is little-endian and round-trips bit-exactly.
//!
//! The filter phase additionally writes bare single-map files
//! (`filtered.dmap` / `filtered.cmap`) holding just a grid.

use crate::{IoError, Result};
use mvs_core::{Camera, ConfidenceMap, DepthMap, Map2D, NormalMap};
use nalgebra::{Matrix3, Point3, Vector3};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const DMAP_MAGIC: u32 = 0x50414D44; // "DMAP"
const MAP_MAGIC: u32 = 0x3050414D; // "MAP0"

const HAS_NORMAL: u8 = 1;
const HAS_CONF: u8 = 2;

/// In-memory image of a `.dmap` file.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthDataRaw {
    pub name: String,
    pub view_ids: Vec<u32>,
    pub d_min: f32,
    pub d_max: f32,
    pub camera: Camera,
    pub depth_map: DepthMap,
    pub normal_map: Option<NormalMap>,
    pub conf_map: Option<ConfidenceMap>,
}

/// `{id:04}.{ext}` naming used by the pipeline driver.
pub fn compose_depth_file_path(dir: &Path, id: u32, ext: &str) -> PathBuf {
    dir.join(format!("{id:04}.{ext}"))
}

pub fn save_depth_data(path: &Path, data: &DepthDataRaw) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_u32(&mut w, DMAP_MAGIC)?;
    let mut flags = 0u8;
    if data.normal_map.is_some() {
        flags |= HAS_NORMAL;
    }
    if data.conf_map.is_some() {
        flags |= HAS_CONF;
    }
    w.write_all(&[1u8, flags, 0, 0])?;
    let name = data.name.as_bytes();
    write_u32(&mut w, name.len() as u32)?;
    w.write_all(name)?;
    write_u32(&mut w, data.view_ids.len() as u32)?;
    for &id in &data.view_ids {
        write_u32(&mut w, id)?;
    }
    write_u32(&mut w, data.depth_map.width())?;
    write_u32(&mut w, data.depth_map.height())?;
    write_f32(&mut w, data.d_min)?;
    write_f32(&mut w, data.d_max)?;
    for v in data.camera.k.transpose().iter() {
        write_f64(&mut w, *v)?;
    }
    for v in data.camera.r.transpose().iter() {
        write_f64(&mut w, *v)?;
    }
    for v in data.camera.c.coords.iter() {
        write_f64(&mut w, *v)?;
    }
    for &d in data.depth_map.data() {
        write_f32(&mut w, d)?;
    }
    if let Some(normal_map) = &data.normal_map {
        for n in normal_map.data() {
            write_f32(&mut w, n.x)?;
            write_f32(&mut w, n.y)?;
            write_f32(&mut w, n.z)?;
        }
    }
    if let Some(conf_map) = &data.conf_map {
        for &c in conf_map.data() {
            write_f32(&mut w, c)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn load_depth_data(path: &Path) -> Result<DepthDataRaw> {
    let mut r = BufReader::new(File::open(path)?);
    if read_u32(&mut r)? != DMAP_MAGIC {
        return Err(IoError::UnsupportedFormat(format!(
            "{} is not a depth-map file",
            path.display()
        )));
    }
    let mut head = [0u8; 4];
    r.read_exact(&mut head)?;
    if head[0] != 1 {
        return Err(IoError::UnsupportedFormat(format!(
            "depth-map version {}",
            head[0]
        )));
    }
    let flags = head[1];
    let name_len = read_u32(&mut r)? as usize;
    let mut name = vec![0u8; name_len];
    r.read_exact(&mut name)?;
    let name = String::from_utf8(name).map_err(|e| IoError::Parse(e.to_string()))?;
    let n_views = read_u32(&mut r)? as usize;
    let mut view_ids = Vec::with_capacity(n_views);
    for _ in 0..n_views {
        view_ids.push(read_u32(&mut r)?);
    }
    let width = read_u32(&mut r)?;
    let height = read_u32(&mut r)?;
    let count = (width as usize) * (height as usize);
    if count == 0 {
        return Err(IoError::InvalidData("empty depth map".into()));
    }
    let d_min = read_f32(&mut r)?;
    let d_max = read_f32(&mut r)?;
    let k = read_matrix3(&mut r)?;
    let rot = read_matrix3(&mut r)?;
    let c = Point3::new(read_f64(&mut r)?, read_f64(&mut r)?, read_f64(&mut r)?);
    let mut depths = Vec::with_capacity(count);
    for _ in 0..count {
        depths.push(read_f32(&mut r)?);
    }
    let depth_map = DepthMap::from_vec(width, height, depths);
    let normal_map = if flags & HAS_NORMAL != 0 {
        let mut normals = Vec::with_capacity(count);
        for _ in 0..count {
            normals.push(Vector3::new(
                read_f32(&mut r)?,
                read_f32(&mut r)?,
                read_f32(&mut r)?,
            ));
        }
        Some(NormalMap::from_vec(width, height, normals))
    } else {
        None
    };
    let conf_map = if flags & HAS_CONF != 0 {
        let mut confs = Vec::with_capacity(count);
        for _ in 0..count {
            confs.push(read_f32(&mut r)?);
        }
        Some(ConfidenceMap::from_vec(width, height, confs))
    } else {
        None
    };
    Ok(DepthDataRaw {
        name,
        view_ids,
        d_min,
        d_max,
        camera: Camera::new(k, rot, c),
        depth_map,
        normal_map,
        conf_map,
    })
}

pub fn save_depth_map(path: &Path, map: &DepthMap) -> Result<()> {
    save_map(path, map)
}

pub fn load_depth_map(path: &Path) -> Result<DepthMap> {
    load_map(path)
}

pub fn save_confidence_map(path: &Path, map: &ConfidenceMap) -> Result<()> {
    save_map(path, map)
}

pub fn load_confidence_map(path: &Path) -> Result<ConfidenceMap> {
    load_map(path)
}

fn save_map(path: &Path, map: &Map2D<f32>) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_u32(&mut w, MAP_MAGIC)?;
    write_u32(&mut w, map.width())?;
    write_u32(&mut w, map.height())?;
    for &v in map.data() {
        write_f32(&mut w, v)?;
    }
    w.flush()?;
    Ok(())
}

fn load_map(path: &Path) -> Result<Map2D<f32>> {
    let mut r = BufReader::new(File::open(path)?);
    if read_u32(&mut r)? != MAP_MAGIC {
        return Err(IoError::UnsupportedFormat(format!(
            "{} is not a map file",
            path.display()
        )));
    }
    let width = read_u32(&mut r)?;
    let height = read_u32(&mut r)?;
    let count = (width as usize) * (height as usize);
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        data.push(read_f32(&mut r)?);
    }
    Ok(Map2D::from_vec(width, height, data))
}

fn read_matrix3<R: Read>(r: &mut R) -> Result<Matrix3<f64>> {
    let mut m = [0.0f64; 9];
    for v in &mut m {
        *v = read_f64(r)?;
    }
    Ok(Matrix3::from_row_slice(&m))
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(f32::from_le_bytes(b))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> DepthDataRaw {
        let mut depth_map = DepthMap::new(4, 3, 0.0);
        depth_map.set(1, 1, 2.5);
        depth_map.set(2, 2, 3.0);
        let mut normal_map = NormalMap::new(4, 3, Vector3::zeros());
        normal_map.set(1, 1, Vector3::new(0.0, 0.0, -1.0));
        let mut conf_map = ConfidenceMap::new(4, 3, 0.0);
        conf_map.set(1, 1, 0.75);
        DepthDataRaw {
            name: "view0.jpg".into(),
            view_ids: vec![0, 2, 5],
            d_min: 1.9,
            d_max: 3.3,
            camera: Camera::from_intrinsics(100.0, 100.0, 2.0, 1.5),
            depth_map,
            normal_map: Some(normal_map),
            conf_map: Some(conf_map),
        }
    }

    #[test]
    fn test_dmap_round_trip_bitwise() {
        let dir = tempfile::tempdir().unwrap();
        let path = compose_depth_file_path(dir.path(), 0, "dmap");
        let data = sample_data();
        save_depth_data(&path, &data).unwrap();
        let loaded = load_depth_data(&path).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_dmap_without_optional_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = compose_depth_file_path(dir.path(), 7, "dmap");
        let mut data = sample_data();
        data.normal_map = None;
        data.conf_map = None;
        save_depth_data(&path, &data).unwrap();
        let loaded = load_depth_data(&path).unwrap();
        assert!(loaded.normal_map.is_none());
        assert!(loaded.conf_map.is_none());
        assert_eq!(loaded.depth_map, data.depth_map);
    }

    #[test]
    fn test_bare_map_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = compose_depth_file_path(dir.path(), 3, "filtered.cmap");
        let mut map = ConfidenceMap::new(5, 2, 0.0);
        map.set(4, 1, 0.25);
        save_confidence_map(&path, &map).unwrap();
        assert_eq!(load_confidence_map(&path).unwrap(), map);
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.dmap");
        std::fs::write(&path, b"not a dmap").unwrap();
        assert!(load_depth_data(&path).is_err());
    }

    #[test]
    fn test_compose_path_is_zero_padded() {
        let p = compose_depth_file_path(Path::new("/tmp"), 12, "geo.dmap");
        assert_eq!(p, Path::new("/tmp/0012.geo.dmap"));
    }
}
