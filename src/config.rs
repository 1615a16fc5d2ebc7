// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Immutable detector configuration.
//!
//! A [`Config`] is a complete snapshot of every tunable parameter. The
//! detector never mutates it; reconfiguration replaces the whole snapshot
//! between frames (see [`crate::pipeline::Detector::reconfigure`]).
//!
//! Defaults suit a roof-mounted automotive LiDAR with x forward, y left and
//! z up, the sensor about 1.8m above the road.

use crate::lidar::{Error, Point3};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Axis-aligned box given by inclusive min/max corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    pub const fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// True if `p` lies inside the box, boundaries included.
    #[inline]
    pub fn contains(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    fn check(&self, name: &str) -> Result<(), Error> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::InvalidConfig(format!("{name} corners must be finite")));
        }
        for (axis, lo, hi) in [
            ("x", self.min.x, self.max.x),
            ("y", self.min.y, self.max.y),
            ("z", self.min.z, self.max.z),
        ] {
            if lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "{name} min {lo} exceeds max {hi} on the {axis} axis"
                )));
            }
        }
        Ok(())
    }
}

/// Region of the ego vehicle's own body (roof rack, mirrors) in the sensor
/// frame. Points inside it are sensor self-returns.
pub const DEFAULT_EGO_BOX: Aabb = Aabb::new(
    Point3::new(-1.5, -1.7, -1.0),
    Point3::new(2.6, 1.7, -0.4),
);

/// Point filter parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Edge length of the downsampling voxel (meters).
    pub voxel_size: f32,
    /// Region of interest; points outside are discarded.
    pub roi: Aabb,
    /// Self-body exclusion box, `None` disables the removal.
    pub ego_box: Option<Aabb>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            voxel_size: 0.2,
            roi: Aabb::new(Point3::new(-50.0, -6.0, -2.0), Point3::new(120.0, 6.0, 5.0)),
            ego_box: Some(DEFAULT_EGO_BOX),
        }
    }
}

/// RANSAC ground segmentation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundParams {
    /// Maximum point-to-plane distance for a ground inlier (meters).
    pub distance_threshold: f32,
    /// Number of plane hypotheses sampled.
    pub max_iterations: usize,
    /// Seed for hypothesis sampling. Equal seeds give equal partitions.
    pub seed: u64,
    /// Least-squares refinement of the winning plane over its inliers.
    pub refine: bool,
}

impl Default for GroundParams {
    fn default() -> Self {
        Self {
            distance_threshold: 0.3,
            max_iterations: 30,
            seed: 0x5eed,
            refine: true,
        }
    }
}

/// Euclidean clustering parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Points closer than this are connected (meters).
    pub distance_threshold: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            distance_threshold: 0.6,
            min_size: 10,
            max_size: 5000,
        }
    }
}

/// Bounding box fitting strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxFitMode {
    /// Boxes aligned with the sensor axes.
    #[default]
    AxisAligned,
    /// Boxes yawed along the cluster's principal horizontal direction.
    Oriented,
}

/// Cross-frame identity tracking parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    pub enabled: bool,
    /// Centroids must move less than this between frames (meters).
    pub displacement_threshold: f32,
    /// Minimum ground-footprint IoU for a match, in (0, 1].
    pub iou_threshold: f32,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            displacement_threshold: 1.0,
            iou_threshold: 0.3,
        }
    }
}

/// Complete detector configuration snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterParams,
    pub ground: GroundParams,
    pub cluster: ClusterParams,
    pub box_fit: BoxFitMode,
    pub tracking: TrackingParams,
}

impl Config {
    /// Load a JSON snapshot. Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        positive("filter.voxel_size", self.filter.voxel_size)?;
        self.filter.roi.check("filter.roi")?;
        if let Some(ego) = &self.filter.ego_box {
            ego.check("filter.ego_box")?;
        }

        positive("ground.distance_threshold", self.ground.distance_threshold)?;
        if self.ground.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "ground.max_iterations must be at least 1".into(),
            ));
        }

        positive("cluster.distance_threshold", self.cluster.distance_threshold)?;
        if self.cluster.min_size == 0 {
            return Err(Error::InvalidConfig(
                "cluster.min_size must be at least 1".into(),
            ));
        }
        if self.cluster.min_size > self.cluster.max_size {
            return Err(Error::InvalidConfig(format!(
                "cluster.min_size {} exceeds cluster.max_size {}",
                self.cluster.min_size, self.cluster.max_size
            )));
        }

        positive(
            "tracking.displacement_threshold",
            self.tracking.displacement_threshold,
        )?;
        positive("tracking.iou_threshold", self.tracking.iou_threshold)?;
        if self.tracking.iou_threshold > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "tracking.iou_threshold {} exceeds 1",
                self.tracking.iou_threshold
            )));
        }

        Ok(())
    }
}

fn positive(name: &str, value: f32) -> Result<(), Error> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_voxel() {
        let mut config = Config::default();
        config.filter.voxel_size = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        config.filter.voxel_size = f32::NAN;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_roi() {
        let mut config = Config::default();
        config.filter.roi.min.y = 10.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("y axis"), "unexpected: {err}");
    }

    #[test]
    fn test_rejects_cluster_bounds() {
        let mut config = Config::default();
        config.cluster.min_size = 100;
        config.cluster.max_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_thresholds() {
        let mut config = Config::default();
        config.ground.distance_threshold = -0.1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracking.iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracking.displacement_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ground.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "cluster": { "min_size": 3 }, "box_fit": "oriented" }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.cluster.min_size, 3);
        assert_eq!(config.cluster.max_size, ClusterParams::default().max_size);
        assert_eq!(config.box_fit, BoxFitMode::Oriented);
        assert_eq!(config.filter, FilterParams::default());
    }

    #[test]
    fn test_aabb_contains_inclusive() {
        let b = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        assert!(b.contains(Point3::new(1.0, 0.0, 0.5)));
        assert!(!b.contains(Point3::new(1.01, 0.0, 0.5)));
    }
}
