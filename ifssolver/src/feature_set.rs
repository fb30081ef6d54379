use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic_file::write_atomic;
use crate::circular_feature_descriptor::{CircularFeatureDescriptor, DESCRIPTOR_DIMS};
use crate::error::{Result, SolverError};

/// Columns of one packed feature row: the six keypoint fields, the total radius and the
/// aligned descriptor values.
pub const FEATURE_COLS: usize = 7 + DESCRIPTOR_DIMS;

/// A detected keypoint in level 0 image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation of the total colour centre of mass, in radians.
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the keypoint was found on.
    pub octave: u32,
    /// Diameter of the described region, in level 0 pixels.
    pub size: f32,
}

/// Keypoints and their descriptors, index aligned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<CircularFeatureDescriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.keypoints.iter().map(|k| (k.x as f64, k.y as f64)).collect()
    }

    /// Flattens the set into a single row-major array, one row per keypoint.
    pub fn pack(&self) -> FeatureArray {
        let mut data = Vec::with_capacity(self.len() * FEATURE_COLS);
        for (k, d) in self.keypoints.iter().zip(self.descriptors.iter()) {
            data.extend_from_slice(&[k.x, k.y, k.angle, k.response, k.octave as f32, k.size, d.total_radius]);
            data.extend_from_slice(&d.aligned);
        }
        FeatureArray {
            rows: self.keypoints.len().min(self.descriptors.len()),
            cols: FEATURE_COLS,
            data,
        }
    }

    /// Inverse of [`FeatureSet::pack`].
    pub fn unpack(array: &FeatureArray) -> std::result::Result<FeatureSet, String> {
        array.validate()?;
        let mut keypoints = Vec::with_capacity(array.rows);
        let mut descriptors = Vec::with_capacity(array.rows);
        for row in array.data.chunks_exact(FEATURE_COLS) {
            let keypoint = Keypoint {
                x: row[0],
                y: row[1],
                angle: row[2],
                response: row[3],
                octave: row[4] as u32,
                size: row[5],
            };
            let mut aligned = [0.0f32; DESCRIPTOR_DIMS];
            aligned.copy_from_slice(&row[7..]);
            descriptors.push(CircularFeatureDescriptor::from_aligned(keypoint.angle, row[6], aligned));
            keypoints.push(keypoint);
        }
        Ok(FeatureSet { keypoints, descriptors })
    }
}

/// Features stored as one row-major `f32` array with [`FEATURE_COLS`] columns. This is
/// the on-disk cache format and the in-memory format of the GPU backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureArray {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl FeatureArray {
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn point(&self, index: usize) -> (f64, f64) {
        let row = self.row(index);
        (row[0] as f64, row[1] as f64)
    }

    /// The aligned descriptor values of a row.
    pub fn descriptor(&self, index: usize) -> &[f32] {
        &self.row(index)[7..]
    }

    /// Keeps only the rows whose index satisfies `keep`.
    pub fn retain_rows(&self, keep: impl Fn(usize) -> bool) -> FeatureArray {
        let mut data = Vec::new();
        let mut rows = 0;
        for index in 0..self.rows {
            if keep(index) {
                data.extend_from_slice(self.row(index));
                rows += 1;
            }
        }
        FeatureArray {
            rows,
            cols: self.cols,
            data,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.cols != FEATURE_COLS {
            return Err(format!("expected {FEATURE_COLS} columns, found {}", self.cols));
        }
        if self.data.len() != self.rows * self.cols {
            return Err(format!(
                "{} values do not fill {} rows of {} columns",
                self.data.len(),
                self.rows,
                self.cols
            ));
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err("non finite value".to_string());
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        write_atomic(path, &bytes)
    }

    /// Reads and validates a cache file.
    ///
    /// # Errors
    /// [`SolverError::CacheCorrupt`] when the file cannot be decoded or has the wrong shape.
    pub fn load(path: &Path) -> Result<FeatureArray> {
        let bytes = fs::read(path)?;
        let corrupt = |reason: String| SolverError::CacheCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let (array, read): (FeatureArray, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| corrupt(e.to_string()))?;
        if read != bytes.len() {
            return Err(corrupt(format!("{} trailing bytes", bytes.len() - read)));
        }
        array.validate().map_err(corrupt)?;
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> FeatureSet {
        let mut aligned = [0.0f32; DESCRIPTOR_DIMS];
        for (i, a) in aligned.iter_mut().enumerate() {
            *a = i as f32 * 0.01 - 0.05;
        }
        FeatureSet {
            keypoints: vec![
                Keypoint {
                    x: 12.0,
                    y: 7.0,
                    angle: 0.5,
                    response: 300.0,
                    octave: 0,
                    size: 16.0,
                },
                Keypoint {
                    x: 40.0,
                    y: 22.0,
                    angle: -1.25,
                    response: 120.0,
                    octave: 1,
                    size: 32.0,
                },
            ],
            descriptors: vec![
                CircularFeatureDescriptor::from_aligned(0.5, 0.1, aligned),
                CircularFeatureDescriptor::from_aligned(-1.25, 0.2, [0.03; DESCRIPTOR_DIMS]),
            ],
        }
    }

    #[test]
    fn cache_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu").join("portal.features");
        let set = sample_set();
        set.pack().save(&path).unwrap();
        let loaded = FeatureSet::unpack(&FeatureArray::load(&path).unwrap()).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.features");
        fs::write(&path, b"definitely not bincode").unwrap();
        assert!(matches!(FeatureArray::load(&path), Err(SolverError::CacheCorrupt { .. })));
    }

    #[test]
    fn wrong_column_count_is_rejected() {
        let array = FeatureArray {
            rows: 1,
            cols: 3,
            data: vec![1.0, 2.0, 3.0],
        };
        assert!(FeatureSet::unpack(&array).is_err());
    }

    #[test]
    fn retain_rows_filters() {
        let packed = sample_set().pack();
        let kept = packed.retain_rows(|i| i == 1);
        assert_eq!(kept.rows, 1);
        assert_eq!(kept.point(0), (40.0, 22.0));
    }
}
