//! Calibration records: one JSON file per camera, written once the
//! parameters are final.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use stitch_core::CameraParams;

use crate::Result;

/// Serialized form of one camera's calibration. Matrices are row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub t: [f64; 3],
    pub ppx: f64,
    pub ppy: f64,
    pub focal: f64,
    pub aspect: f64,
}

impl From<&CameraParams> for CameraRecord {
    fn from(cam: &CameraParams) -> Self {
        Self {
            k: row_major(&cam.k()),
            r: row_major(&cam.r),
            t: [cam.t.x, cam.t.y, cam.t.z],
            ppx: cam.ppx,
            ppy: cam.ppy,
            focal: cam.focal,
            aspect: cam.aspect,
        }
    }
}

impl CameraRecord {
    pub fn to_camera(&self) -> CameraParams {
        CameraParams {
            focal: self.focal,
            aspect: self.aspect,
            ppx: self.ppx,
            ppy: self.ppy,
            r: from_row_major(&self.r),
            t: Vector3::new(self.t[0], self.t[1], self.t[2]),
        }
    }
}

fn row_major(m: &Matrix3<f64>) -> [f64; 9] {
    [
        m[(0, 0)],
        m[(0, 1)],
        m[(0, 2)],
        m[(1, 0)],
        m[(1, 1)],
        m[(1, 2)],
        m[(2, 0)],
        m[(2, 1)],
        m[(2, 2)],
    ]
}

fn from_row_major(v: &[f64; 9]) -> Matrix3<f64> {
    Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8])
}

/// File name for the 1-based camera index.
pub fn camera_file_name(index: usize) -> String {
    format!("cam{}.json", index + 1)
}

/// Write every camera's record into `dir`, named by 1-based index.
pub fn save_camera_params(dir: &Path, cameras: &[CameraParams]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(cameras.len());

    for (i, cam) in cameras.iter().enumerate() {
        let record = CameraRecord::from(cam);
        let path = dir.join(camera_file_name(i));
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        paths.push(path);
    }

    Ok(paths)
}

pub fn load_camera_record(path: &Path) -> Result<CameraRecord> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn record_round_trips_exactly() {
        let cam = CameraParams {
            focal: 812.3456789012345,
            aspect: 1.0000001,
            ppx: 320.25,
            ppy: 239.75,
            r: nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), 0.123456789).into_inner(),
            t: Vector3::new(0.1, -0.2, 0.3),
        };

        let dir = tempfile::tempdir().unwrap();
        let paths = save_camera_params(dir.path(), std::slice::from_ref(&cam)).unwrap();
        assert_eq!(paths, vec![dir.path().join("cam1.json")]);

        let record = load_camera_record(&paths[0]).unwrap();
        let restored = record.to_camera();

        assert_eq!(restored.focal, cam.focal);
        assert_eq!(restored.aspect, cam.aspect);
        assert_eq!(restored.r, cam.r);
        assert_eq!(restored.t, cam.t);
        assert_eq!(record.k, row_major(&cam.k()));
    }

    #[test]
    fn files_are_named_by_one_based_index() {
        assert_eq!(camera_file_name(0), "cam1.json");
        assert_eq!(camera_file_name(7), "cam8.json");
    }
}
