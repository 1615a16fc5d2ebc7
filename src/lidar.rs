// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common point cloud types and error handling.
//!
//! Every pipeline stage consumes and produces [`PointCloud`] values, stored
//! structure-of-arrays so per-axis loops stay contiguous.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single point in the sensor frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn distance(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f32; 3]> for Point3 {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

/// Ordered point cloud in structure-of-arrays (SoA) layout.
///
/// Point order carries no meaning for the algorithms but is preserved by
/// every stage so results are reproducible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
}

impl PointCloud {
    /// Create an empty cloud with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
        }
    }

    /// Create an empty cloud.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a cloud from separate coordinate vectors.
    ///
    /// Returns `None` when the vectors differ in length.
    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Option<Self> {
        if x.len() != y.len() || x.len() != z.len() {
            return None;
        }
        Some(Self { x, y, z })
    }

    pub fn push(&mut self, p: Point3) {
        self.x.push(p.x);
        self.y.push(p.y);
        self.z.push(p.z);
    }

    /// Point at index `i`. Panics if out of bounds, like slice indexing.
    #[inline]
    pub fn point(&self, i: usize) -> Point3 {
        Point3::new(self.x[i], self.y[i], self.z[i])
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Point3> + '_ {
        (0..self.len()).map(move |i| self.point(i))
    }

    /// Gather the points at `indices` into a new cloud, in index order.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        let mut out = PointCloud::with_capacity(indices.len());
        for &i in indices {
            out.push(self.point(i));
        }
        out
    }

    /// Clear all points while retaining capacity
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

impl FromIterator<Point3> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point3>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut cloud = PointCloud::with_capacity(iter.size_hint().0);
        for p in iter {
            cloud.push(p);
        }
        cloud
    }
}

/// Common error type for the detector.
///
/// Per-frame conditions (empty input, degraded segmentation, degenerate box
/// fits) are not errors; they are reported through the frame diagnostics.
#[derive(Debug)]
pub enum Error {
    /// Configuration rejected before any frame is processed
    InvalidConfig(String),
    /// I/O error (file operations)
    Io(std::io::Error),
    /// Malformed PCD file
    Pcd(String),
    /// JSON configuration or output error
    Json(serde_json::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Pcd(msg) => write!(f, "invalid PCD data: {}", msg),
            Error::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_xyz_length_mismatch() {
        assert!(PointCloud::from_xyz(vec![0.0; 3], vec![0.0; 3], vec![0.0; 2]).is_none());
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]).unwrap();
        assert_eq!(cloud.point(0), Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_select_preserves_index_order() {
        let cloud: PointCloud = (0..5).map(|i| Point3::new(i as f32, 0.0, 0.0)).collect();
        let sub = cloud.select(&[4, 1, 3]);
        assert_eq!(sub.x, vec![4.0, 1.0, 3.0]);
        assert_eq!(sub.len(), 3);
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("voxel size must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: voxel size must be positive"
        );
    }
}
