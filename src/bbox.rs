// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! 3D bounding box fitting for point clusters.
//!
//! Two strategies are available (see [`BoxFitMode`]):
//!
//! - **Axis-aligned**: per-axis min/max of the cluster, identity orientation.
//! - **Oriented**: the cluster is projected onto the ground plane and the
//!   dominant eigenvector of its 2×2 covariance gives the heading. Extents
//!   are measured along the heading, across it, and along z; the box center
//!   is the middle of those extents. Orientation is a pure yaw rotation.
//!
//! Clusters whose horizontal covariance is singular (fewer than 3 points,
//! coincident or collinear points) fall back to the axis-aligned fit.

use crate::{
    config::BoxFitMode,
    lidar::{Point3, PointCloud},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest extent reported on any axis (meters). Flat or single-point
/// clusters are inflated to this so every box has a volume.
pub const MIN_DIMENSION: f32 = 1e-3;
/// Horizontal covariance is singular when `det / trace²` falls below this.
const SINGULAR_RATIO: f64 = 1e-9;

/// Unit quaternion, `(x, y, z, w)` order as in ROS `geometry_msgs`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation of `yaw` radians about +z.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = 0.5 * yaw;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }

    /// Rotation about +z, assuming the quaternion carries no roll or pitch.
    pub fn yaw(&self) -> f32 {
        let siny = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny.atan2(cosy)
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Oriented 3D bounding box with track identity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub id: u64,
    /// Box center in the sensor frame.
    pub position: Point3,
    pub orientation: Quaternion,
    /// Extents along the box's local x (heading), y and z axes.
    pub dimension: [f32; 3],
}

impl BoundingBox {
    pub fn yaw(&self) -> f32 {
        self.orientation.yaw()
    }

    /// Ground-plane footprint corners, counter-clockwise.
    pub fn footprint(&self) -> [[f32; 2]; 4] {
        let (s, c) = self.yaw().sin_cos();
        let hl = 0.5 * self.dimension[0];
        let hw = 0.5 * self.dimension[1];
        let (px, py) = (self.position.x, self.position.y);
        [(hl, hw), (-hl, hw), (-hl, -hw), (hl, -hw)]
            .map(|(u, v)| [px + u * c - v * s, py + u * s + v * c])
    }

    pub fn footprint_area(&self) -> f32 {
        self.dimension[0] * self.dimension[1]
    }
}

/// Result of fitting one cluster.
#[derive(Clone, Copy, Debug)]
pub struct BoxFit {
    pub bbox: BoundingBox,
    /// True when an oriented fit was requested but the cluster was
    /// degenerate and the axis-aligned fallback was used.
    pub degenerate: bool,
}

/// Fit a box to `points` with the requested strategy.
pub fn fit_box(points: &PointCloud, id: u64, mode: BoxFitMode) -> BoxFit {
    match mode {
        BoxFitMode::AxisAligned => BoxFit {
            bbox: axis_aligned_box(points, id),
            degenerate: false,
        },
        BoxFitMode::Oriented => match oriented_box(points, id) {
            Some(bbox) => BoxFit {
                bbox,
                degenerate: false,
            },
            None => {
                debug!(id, n = points.len(), "singular covariance, axis-aligned fallback");
                BoxFit {
                    bbox: axis_aligned_box(points, id),
                    degenerate: true,
                }
            }
        },
    }
}

/// Axis-aligned box spanning the per-axis min/max of `points`.
pub fn axis_aligned_box(points: &PointCloud, id: u64) -> BoundingBox {
    if points.is_empty() {
        return BoundingBox {
            id,
            position: Point3::default(),
            orientation: Quaternion::IDENTITY,
            dimension: [MIN_DIMENSION; 3],
        };
    }

    let (min, max) = min_max(&points.x)
        .zip(min_max(&points.y))
        .zip(min_max(&points.z))
        .map(|((x, y), z)| ([x.0, y.0, z.0], [x.1, y.1, z.1]))
        .unwrap_or(([0.0; 3], [0.0; 3]));

    BoundingBox {
        id,
        position: Point3::new(
            0.5 * (min[0] + max[0]),
            0.5 * (min[1] + max[1]),
            0.5 * (min[2] + max[2]),
        ),
        orientation: Quaternion::IDENTITY,
        dimension: [
            clamp_dimension(max[0] - min[0]),
            clamp_dimension(max[1] - min[1]),
            clamp_dimension(max[2] - min[2]),
        ],
    }
}

/// PCA-oriented box, or `None` if the horizontal covariance is singular.
pub fn oriented_box(points: &PointCloud, id: u64) -> Option<BoundingBox> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let cx = points.x.iter().map(|&v| v as f64).sum::<f64>() * inv_n;
    let cy = points.y.iter().map(|&v| v as f64).sum::<f64>() * inv_n;

    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    let mut syy = 0.0f64;
    for (&x, &y) in points.x.iter().zip(points.y.iter()) {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    sxx *= inv_n;
    sxy *= inv_n;
    syy *= inv_n;

    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    if trace <= f64::EPSILON || det <= SINGULAR_RATIO * trace * trace {
        return None;
    }

    // Dominant eigenvector angle of [[sxx, sxy], [sxy, syy]], in (-π/2, π/2]
    let yaw = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (s, c) = yaw.sin_cos();

    let mut u_range = (f64::INFINITY, f64::NEG_INFINITY);
    let mut v_range = (f64::INFINITY, f64::NEG_INFINITY);
    for (&x, &y) in points.x.iter().zip(points.y.iter()) {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let u = dx * c + dy * s;
        let v = -dx * s + dy * c;
        u_range = (u_range.0.min(u), u_range.1.max(u));
        v_range = (v_range.0.min(v), v_range.1.max(v));
    }
    let (z_min, z_max) = min_max(&points.z)?;

    let u_mid = 0.5 * (u_range.0 + u_range.1);
    let v_mid = 0.5 * (v_range.0 + v_range.1);

    Some(BoundingBox {
        id,
        position: Point3::new(
            (cx + u_mid * c - v_mid * s) as f32,
            (cy + u_mid * s + v_mid * c) as f32,
            0.5 * (z_min + z_max),
        ),
        orientation: Quaternion::from_yaw(yaw as f32),
        dimension: [
            clamp_dimension((u_range.1 - u_range.0) as f32),
            clamp_dimension((v_range.1 - v_range.0) as f32),
            clamp_dimension(z_max - z_min),
        ],
    })
}

fn min_max(values: &[f32]) -> Option<(f32, f32)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

#[inline]
fn clamp_dimension(d: f32) -> f32 {
    if d > MIN_DIMENSION { d } else { MIN_DIMENSION }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn cloud_of(points: &[[f32; 3]]) -> PointCloud {
        points.iter().copied().map(Point3::from).collect()
    }

    /// Filled rectangle of `len` × `wid` on a 0.1m grid, yawed by `yaw`,
    /// centered at (cx, cy), spanning z in [0, 1].
    fn rotated_rect(cx: f32, cy: f32, len: f32, wid: f32, yaw: f32) -> PointCloud {
        let (s, c) = yaw.sin_cos();
        let mut cloud = PointCloud::empty();
        let nu = (len / 0.1).round() as i32;
        let nv = (wid / 0.1).round() as i32;
        for i in 0..=nu {
            for j in 0..=nv {
                let u = -0.5 * len + i as f32 * 0.1;
                let v = -0.5 * wid + j as f32 * 0.1;
                let z = if (i + j) % 2 == 0 { 0.0 } else { 1.0 };
                cloud.push(Point3::new(cx + u * c - v * s, cy + u * s + v * c, z));
            }
        }
        cloud
    }

    #[test]
    fn test_axis_aligned_box() {
        let cloud = cloud_of(&[[1.0, 2.0, 0.0], [3.0, 2.5, 1.0], [2.0, 4.0, 0.5]]);
        let b = axis_aligned_box(&cloud, 7);
        assert_eq!(b.id, 7);
        assert_eq!(b.position, Point3::new(2.0, 3.0, 0.5));
        assert_eq!(b.dimension, [2.0, 2.0, 1.0]);
        assert_eq!(b.orientation, Quaternion::IDENTITY);
    }

    #[test]
    fn test_single_point_box_is_well_formed() {
        let cloud = cloud_of(&[[1.0, 1.0, 1.0]]);
        let b = axis_aligned_box(&cloud, 0);
        assert_eq!(b.position, Point3::new(1.0, 1.0, 1.0));
        assert!(b.dimension.iter().all(|&d| d == MIN_DIMENSION));
    }

    #[test]
    fn test_oriented_box_recovers_yaw_and_extents() {
        let cloud = rotated_rect(10.0, -3.0, 4.0, 1.6, FRAC_PI_4);
        let fit = fit_box(&cloud, 1, BoxFitMode::Oriented);
        assert!(!fit.degenerate);
        let b = fit.bbox;

        assert!((b.yaw() - FRAC_PI_4).abs() < 1e-3, "yaw {}", b.yaw());
        assert!((b.dimension[0] - 4.0).abs() < 1e-3, "length {}", b.dimension[0]);
        assert!((b.dimension[1] - 1.6).abs() < 1e-3, "width {}", b.dimension[1]);
        assert!((b.dimension[2] - 1.0).abs() < 1e-6);
        assert!((b.position.x - 10.0).abs() < 1e-3);
        assert!((b.position.y + 3.0).abs() < 1e-3);
        assert!((b.position.z - 0.5).abs() < 1e-6);
        assert!((b.orientation.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_oriented_box_of_aligned_rect_matches_aabb() {
        let cloud = rotated_rect(0.0, 0.0, 3.0, 1.0, 0.0);
        let oriented = oriented_box(&cloud, 0).unwrap();
        let aligned = axis_aligned_box(&cloud, 0);
        assert!(oriented.yaw().abs() < 1e-4);
        for k in 0..3 {
            assert!((oriented.dimension[k] - aligned.dimension[k]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_collinear_falls_back() {
        let cloud: PointCloud = (0..10).map(|i| Point3::new(i as f32, i as f32, 0.5)).collect();
        let fit = fit_box(&cloud, 3, BoxFitMode::Oriented);
        assert!(fit.degenerate);
        assert_eq!(fit.bbox.orientation, Quaternion::IDENTITY);
        assert_eq!(fit.bbox.dimension[0], 9.0);
        assert_eq!(fit.bbox.dimension[2], MIN_DIMENSION);
    }

    #[test]
    fn test_coincident_and_tiny_fall_back() {
        let cloud = cloud_of(&[[1.0, 1.0, 0.0]; 5]);
        let fit = fit_box(&cloud, 0, BoxFitMode::Oriented);
        assert!(fit.degenerate);
        assert!(fit.bbox.dimension.iter().all(|&d| d > 0.0));

        let pair = cloud_of(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(fit_box(&pair, 0, BoxFitMode::Oriented).degenerate);
    }

    #[test]
    fn test_footprint_corners() {
        let b = BoundingBox {
            id: 0,
            position: Point3::new(1.0, 1.0, 0.0),
            orientation: Quaternion::IDENTITY,
            dimension: [4.0, 2.0, 1.0],
        };
        let fp = b.footprint();
        assert_eq!(fp[0], [3.0, 2.0]);
        assert_eq!(fp[2], [-1.0, 0.0]);
        assert_eq!(b.footprint_area(), 8.0);
    }

    #[test]
    fn test_quaternion_yaw_roundtrip() {
        for &yaw in &[-1.2f32, -0.3, 0.0, 0.7, 1.5] {
            let q = Quaternion::from_yaw(yaw);
            assert!((q.yaw() - yaw).abs() < 1e-5);
        }
    }
}
